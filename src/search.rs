use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use tracing::{debug, warn};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    metadata_db::MetadataDb,
    tree_path::{collection_file, is_within, key},
    vector_db::VectorDb,
};

/// Resolve `queries` to the paths of the closest files under `root`.
///
/// Every indexed directory within `root` that has a collection on disk is
/// searched for the top `limit` entries per query. Result ids are mapped
/// back to paths and deduplicated, keeping the first occurrence. A
/// directory whose search fails is logged and skipped.
pub fn resolve_paths(
    metadata: &MetadataDb,
    vectors: &VectorDb,
    embedder: &mut dyn Embedder,
    root: &Path,
    queries: &[String],
    limit: usize,
) -> Result<Vec<String>> {
    if queries.is_empty() {
        return Err(Error::InvalidInput("no query texts given".into()));
    }
    if limit == 0 {
        return Err(Error::InvalidInput(
            "search limit must be greater than zero".into(),
        ));
    }

    let root_key = key(root);
    let mut seen = HashSet::new();
    let mut paths = Vec::new();

    for dir in metadata.list_directory_paths()? {
        if !is_within(&dir, &root_key) {
            continue;
        }
        let collection = collection_file(Path::new(&dir));
        if !collection.is_file() {
            continue;
        }

        let ids = match vectors.similarity_search(
            &collection,
            queries,
            limit,
            embedder,
        ) {
            Ok(ids) => ids,
            Err(e) => {
                warn!(dir = %dir, error = %e, "skipping directory in search");
                continue;
            }
        };

        for id in ids {
            if !seen.insert(id) {
                continue;
            }
            match metadata.path_by_id(id) {
                Ok(path) => paths.push(path),
                Err(e) if e.is_not_found() => {
                    debug!(id, "stale vector entry without a file record");
                }
                Err(e) => return Err(e),
            }
        }
    }

    Ok(paths)
}

/// Symlink every result into `target_dir`. A file name that is already
/// taken gets a numeric suffix (`notes.md`, `notes-1.md`, ...).
///
/// Returns the number of links created.
#[cfg(unix)]
pub fn link_results(paths: &[String], target_dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(target_dir)?;

    let mut created = 0;
    for path in paths {
        let source = Path::new(path);
        let Some(name) = source.file_name() else {
            continue;
        };
        let link = free_link_name(target_dir, Path::new(name));
        std::os::unix::fs::symlink(source, &link)?;
        debug!(link = %link.display(), target = %source.display(), "linked result");
        created += 1;
    }
    Ok(created)
}

#[cfg(not(unix))]
pub fn link_results(_paths: &[String], _target_dir: &Path) -> Result<usize> {
    Err(Error::InvalidInput(
        "result links are only supported on unix".into(),
    ))
}

fn free_link_name(dir: &Path, name: &Path) -> PathBuf {
    let candidate = dir.join(name);
    if candidate.symlink_metadata().is_err() {
        return candidate;
    }

    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{stem}-{n}{ext}")))
        .find(|p| p.symlink_metadata().is_err())
        .unwrap_or(candidate)
}

/// Format results for human-readable terminal output.
pub fn format_human(paths: &[String]) {
    if paths.is_empty() {
        println!("No results found.");
        return;
    }

    for (rank, path) in paths.iter().enumerate() {
        println!("{:>3}. {path}", rank + 1);
    }
    println!("\n{} result(s)", paths.len());
}

/// Format results as a JSON document on stdout.
pub fn format_json(paths: &[String], queries: &[String]) -> Result<()> {
    let body = serde_json::json!({
        "queries": queries,
        "result_count": paths.len(),
        "results": paths,
    });
    println!("{}", serde_json::to_string(&body)?);
    Ok(())
}
