use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

use crate::{
    embedding::{EMBEDDING_DIM, Embedder},
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "all-MiniLM-L6-v2";
pub const MODEL_ENV_VAR: &str = "TREESYNC_MODEL";

/// Model ids accepted by [`ModelManager`]. All produce 384-dimensional
/// vectors.
pub const SUPPORTED_MODELS: &[&str] =
    &["all-MiniLM-L6-v2", "all-MiniLM-L12-v2", "bge-small-en-v1.5"];

fn model_for_id(model_id: &str) -> Result<EmbeddingModel> {
    match model_id {
        "all-MiniLM-L6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "all-MiniLM-L12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        other => Err(Error::Config(format!(
            "unknown embedding model '{other}', supported: {}",
            SUPPORTED_MODELS.join(", ")
        ))),
    }
}

/// Manages the embedding model lifecycle, loading it on first use.
pub struct ModelManager {
    model: Option<TextEmbedding>,
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `TREESYNC_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`all-MiniLM-L6-v2`)
    ///
    /// Nothing is downloaded or loaded until the first call to `embed`.
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());

        Self {
            model: None,
            model_id,
        }
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution. The id is validated up front.
    pub fn with_model_id(model_id: String) -> Result<Self> {
        model_for_id(&model_id)?;
        Ok(Self {
            model: None,
            model_id,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Loads the model if needed. Calling it again is a no-op.
    pub fn ensure_loaded(&mut self) -> Result<&TextEmbedding> {
        let model = match self.model.take() {
            Some(model) => model,
            None => {
                tracing::info!(model = %self.model_id, "loading embedding model");
                let options = InitOptions::new(model_for_id(&self.model_id)?)
                    .with_show_download_progress(false);
                TextEmbedding::try_new(options)
                    .map_err(|e| Error::Embedding(e.to_string()))?
            }
        };
        Ok(self.model.insert(model))
    }
}

impl Embedder for ModelManager {
    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.ensure_loaded()?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| Error::Embedding(e.to_string()))
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager")
            .field("model_id", &self.model_id)
            .field("loaded", &self.is_loaded())
            .finish()
    }
}
