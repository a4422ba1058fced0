use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// Decides which paths under a watched root are never indexed.
///
/// A path is ignored when it lies outside the root, when any component
/// below the root starts with a dot, when its name marks it as one of the
/// stores' own files (`*.db`, `*.db-journal`, `*.db.lock`), or when its
/// root-relative form matches one of the configured globs.
#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    root: PathBuf,
    globs: GlobSet,
}

impl IgnoreFilter {
    pub fn new(root: &Path, patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                Error::Config(format!("invalid glob pattern: {e}"))
            })?;
            builder.add(glob);
        }
        let globs = builder.build().map_err(|e| {
            Error::Config(format!("invalid glob pattern set: {e}"))
        })?;

        Ok(Self {
            root: root.to_path_buf(),
            globs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_ignored(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return true;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }

        let hidden = relative
            .components()
            .any(|c| c.as_os_str().to_string_lossy().starts_with('.'));
        if hidden {
            return true;
        }

        if relative
            .file_name()
            .is_some_and(|name| is_store_artifact(&name.to_string_lossy()))
        {
            return true;
        }

        self.globs.is_match(relative)
    }
}

/// Names of collection files, their journals and lock files.
pub fn is_store_artifact(name: &str) -> bool {
    name.ends_with(".db")
        || name.contains(".db-journal")
        || name.ends_with(".db.lock")
}
