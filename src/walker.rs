use std::{
    fs::FileType,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{error::Result, filter::IgnoreFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// A discovered entry below the walk root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Enumerate every non-ignored entry below `root`, top-down.
///
/// For each directory its subdirectories are listed first, then its
/// files, then each subdirectory is descended into, all sorted by name. A
/// directory that cannot be read is logged and skipped; only a failure to
/// read `root` itself is an error. Symlinks are not followed or reported.
pub fn walk_tree(root: &Path, filter: &IgnoreFilter) -> Result<Vec<WalkEntry>> {
    let mut results = Vec::new();
    let subdirs = list_dir(root, filter, &mut results)?;
    for dir in subdirs {
        walk_dir(&dir, filter, &mut results);
    }
    Ok(results)
}

fn walk_dir(current: &Path, filter: &IgnoreFilter, results: &mut Vec<WalkEntry>) {
    match list_dir(current, filter, results) {
        Ok(subdirs) => {
            for dir in subdirs {
                walk_dir(&dir, filter, results);
            }
        }
        Err(e) => {
            warn!(dir = %current.display(), error = %e, "skipping unreadable directory");
        }
    }
}

/// Push the entries of one directory and return its subdirectories.
fn list_dir(
    current: &Path,
    filter: &IgnoreFilter,
    results: &mut Vec<WalkEntry>,
) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for entry in std::fs::read_dir(current)? {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(
                    dir = %current.display(),
                    error = %e,
                    "skipping unreadable entry"
                );
                continue;
            }
        };
        let path = entry.path();
        if filter.is_ignored(&path) {
            continue;
        }
        sort_entry(path, entry.file_type(), &mut dirs, &mut files);
    }

    dirs.sort();
    files.sort();

    results.extend(dirs.iter().map(|path| WalkEntry {
        path: path.clone(),
        kind: EntryKind::Directory,
    }));
    results.extend(files.into_iter().map(|path| WalkEntry {
        path,
        kind: EntryKind::File,
    }));

    Ok(dirs)
}

/// File entries go to `files`, directories to `dirs`. Symlinks and entries
/// whose type cannot be read are logged and left out.
fn sort_entry(
    path: PathBuf,
    file_type: std::io::Result<FileType>,
    dirs: &mut Vec<PathBuf>,
    files: &mut Vec<PathBuf>,
) {
    match file_type {
        Ok(t) if t.is_symlink() => {
            debug!(path = %path.display(), "skipping symlink");
        }
        Ok(t) if t.is_dir() => dirs.push(path),
        Ok(t) if t.is_file() => files.push(path),
        Ok(_) => {}
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "skipping entry of unknown type"
            );
        }
    }
}
