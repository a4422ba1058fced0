//! Path algebra shared by the stores and the sync engine.
//!
//! Prefix tests compare whole path components, so `/a/b` is an ancestor of
//! `/a/b/c` but not of `/a/bc`.

use std::path::{Component, Path, PathBuf};

/// Extension of per-directory collection files.
pub const COLLECTION_EXT: &str = "db";

/// Render a path as the string key used by the metadata store.
pub fn key(path: &Path) -> String {
    normalize(path).to_string_lossy().into_owned()
}

/// Drop `.` components and trailing separators without touching the
/// filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// True when `path` equals `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    Path::new(path).starts_with(ancestor)
}

/// Replace the `old` prefix of `path` with `new`. Returns `None` when
/// `path` is not within `old`.
pub fn rebase(path: &str, old: &str, new: &str) -> Option<String> {
    let rest = Path::new(path).strip_prefix(old).ok()?;
    if rest.as_os_str().is_empty() {
        return Some(new.to_string());
    }
    Some(Path::new(new).join(rest).to_string_lossy().into_owned())
}

/// Parent directory key; empty for a filesystem root.
pub fn parent_of(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Half-open string range `[lo, hi)` containing every key strictly below
/// `dir`. For `/` the range also holds `/` itself, so callers still
/// confirm each hit with [`is_within`] and skip `dir`.
pub fn descendant_range(dir: &str) -> (String, String) {
    let base = dir.trim_end_matches('/');
    (format!("{base}/"), format!("{base}0"))
}

/// `<dir>/<dirname>.db`, the collection owned by `dir`.
pub fn collection_file(dir: &Path) -> PathBuf {
    dir.join(format!("{}.{COLLECTION_EXT}", dir_name(dir)))
}

/// `<dir>/.<dirname>.db.lock`, the advisory lock guarding a collection
/// file.
pub fn lock_file(collection: &Path) -> PathBuf {
    let name = collection
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    collection.with_file_name(format!(".{name}.lock"))
}

/// The collection owning entries for a file at `path`.
pub fn owning_collection(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) => collection_file(parent),
        None => collection_file(path),
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "root".to_string())
}
