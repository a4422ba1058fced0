use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_SEARCH_LIMIT: usize = 2;
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

pub const CHUNK_SIZE_ENV_VAR: &str = "TREESYNC_CHUNK_SIZE";
pub const SEARCH_LIMIT_ENV_VAR: &str = "TREESYNC_SEARCH_LIMIT";
pub const IGNORE_ENV_VAR: &str = "TREESYNC_IGNORE";
pub const DEBOUNCE_ENV_VAR: &str = "TREESYNC_DEBOUNCE_MS";

/// Runtime knobs shared by the sync engine, the watcher and search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Characters per chunk handed to the embedder.
    pub chunk_size: usize,
    /// Nearest neighbours returned per query and per collection.
    pub search_limit: usize,
    /// Extra glob patterns, matched against root-relative paths.
    pub ignore: Vec<String>,
    pub debounce: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            search_limit: DEFAULT_SEARCH_LIMIT,
            ignore: Vec::new(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

/// Values given on the command line. `None` falls through to the
/// environment, then to the defaults.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub chunk_size: Option<usize>,
    pub search_limit: Option<usize>,
    pub ignore: Vec<String>,
}

impl Settings {
    pub fn resolve(overrides: &Overrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    fn resolve_with(
        overrides: &Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();

        let chunk_size = match overrides.chunk_size {
            Some(n) => n,
            None => parse_env(&env, CHUNK_SIZE_ENV_VAR)?
                .unwrap_or(defaults.chunk_size),
        };
        let search_limit = match overrides.search_limit {
            Some(n) => n,
            None => parse_env(&env, SEARCH_LIMIT_ENV_VAR)?
                .unwrap_or(defaults.search_limit),
        };
        let debounce = parse_env(&env, DEBOUNCE_ENV_VAR)?
            .map(Duration::from_millis)
            .unwrap_or(defaults.debounce);

        let mut ignore: Vec<String> = env(IGNORE_ENV_VAR)
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        ignore.extend(overrides.ignore.iter().cloned());

        let settings = Self {
            chunk_size,
            search_limit,
            ignore,
            debounce,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidInput(
                "chunk size must be greater than zero".into(),
            ));
        }
        if self.search_limit == 0 {
            return Err(Error::InvalidInput(
                "search limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(
    env: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>> {
    let Some(raw) = env(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} is not a number: {raw}")))
}
