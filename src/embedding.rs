use crate::error::{Error, Result};

/// Dimension of every vector stored in a collection.
pub const EMBEDDING_DIM: usize = 384;

/// Maps text to fixed-dimension vectors.
///
/// Implementations may initialise lazily on the first call; callers treat
/// any `Err` as "no vectors were produced".
pub trait Embedder: Send {
    /// Length of every vector returned by [`Embedder::embed`].
    fn dimension(&self) -> usize;

    fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` and check that exactly one vector of the advertised
/// dimension came back for each input.
pub fn embed_checked(
    embedder: &mut dyn Embedder,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let vectors = embedder.embed(texts)?;
    if vectors.len() != texts.len() {
        return Err(Error::Embedding(format!(
            "expected {} vectors, got {}",
            texts.len(),
            vectors.len()
        )));
    }

    let dimension = embedder.dimension();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(Error::Embedding(format!(
            "expected dimension {dimension}, got {}",
            bad.len()
        )));
    }

    Ok(vectors)
}

/// Cosine similarity; zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::hash::{DefaultHasher, Hash, Hasher};

    use super::*;

    /// Deterministic bag of character unigrams and bigrams, hashed into a
    /// small vector. Texts sharing characters score as similar.
    pub struct HashEmbedder {
        pub dimension: usize,
        pub calls: usize,
    }

    impl HashEmbedder {
        pub fn new(dimension: usize) -> Self {
            Self {
                dimension,
                calls: 0,
            }
        }

        fn bucket(&self, gram: &str) -> usize {
            let mut hasher = DefaultHasher::new();
            gram.hash(&mut hasher);
            (hasher.finish() % self.dimension as u64) as usize
        }
    }

    impl Embedder for HashEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls += 1;
            Ok(texts
                .iter()
                .map(|text| {
                    let mut vector = vec![0.0f32; self.dimension];
                    let chars: Vec<char> =
                        text.to_lowercase().chars().collect();
                    for c in &chars {
                        vector[self.bucket(&c.to_string())] += 1.0;
                    }
                    for pair in chars.windows(2) {
                        let gram: String = pair.iter().collect();
                        vector[self.bucket(&gram)] += 1.0;
                    }
                    vector
                })
                .collect())
        }
    }

    /// Always fails, as a model that ran out of memory would.
    pub struct FailingEmbedder {
        pub dimension: usize,
    }

    impl Embedder for FailingEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed(&mut self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::Embedding("model unavailable".into()))
        }
    }
}
