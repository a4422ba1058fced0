use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    Table,
    TableDefinition,
    WriteTransaction,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    tree_path::{descendant_range, is_within, parent_of, rebase},
};

const FILE_INFO: TableDefinition<u64, &[u8]> =
    TableDefinition::new("file_info");
const FILE_PATHS: TableDefinition<&str, u64> =
    TableDefinition::new("file_paths");
const DIRECTORY_STRUCTURE: TableDefinition<u64, &[u8]> =
    TableDefinition::new("directory_structure");
const DIRECTORY_PATHS: TableDefinition<&str, u64> =
    TableDefinition::new("directory_paths");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");

const FILE_ID_COUNTER: &str = "file_id";
const RECORD_ID_COUNTER: &str = "record_id";

const CONNECT_RETRIES: u32 = 20;
const CONNECT_BACKOFF: Duration = Duration::from_millis(10);

/// One file or directory known to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: u64,
    pub path: String,
    pub is_dir: bool,
}

/// Tree edge from a directory to its parent. `id` is the directory's
/// [`FileRecord`] id; `parent_dir_path` is empty for a filesystem root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEdge {
    pub record_id: u64,
    pub id: u64,
    pub dir_path: String,
    pub parent_dir_path: String,
}

/// Record counts reported by `status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub files: usize,
    pub directories: usize,
    pub edges: usize,
}

/// Path-to-id mapping for every file and directory under watch.
///
/// Each table is paired with a path index (`file_paths`,
/// `directory_paths`) so point lookups and subtree scans never read the
/// JSON-encoded rows. Ids come from a monotonically increasing counter and
/// are never reused until [`MetadataDb::initialize`] wipes the store.
///
/// Only the path is held. Every operation opens the database, runs one
/// transaction and closes it again, so a watcher and a search in another
/// process can share one data directory.
#[derive(Debug)]
pub struct MetadataDb {
    path: PathBuf,
}

impl MetadataDb {
    /// Create the store and its tables if missing.
    pub fn open(path: &Path) -> Result<Self> {
        let this = Self {
            path: path.to_path_buf(),
        };
        let db = this.connect()?;
        let txn = db.begin_write()?;
        open_all_tables(&txn)?;
        txn.commit()?;
        Ok(this)
    }

    /// Open the database for a single operation. Another process holding
    /// it mid-operation is waited out for a short while.
    fn connect(&self) -> Result<Database> {
        let mut attempt = 0;
        loop {
            match Database::create(&self.path) {
                Ok(db) => return Ok(db),
                Err(redb::DatabaseError::DatabaseAlreadyOpen)
                    if attempt < CONNECT_RETRIES =>
                {
                    attempt += 1;
                    thread::sleep(CONNECT_BACKOFF * attempt);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Drop every row and reset the id counters.
    pub fn initialize(&self) -> Result<()> {
        let db = self.connect()?;
        let txn = db.begin_write()?;
        txn.delete_table(FILE_INFO)?;
        txn.delete_table(FILE_PATHS)?;
        txn.delete_table(DIRECTORY_STRUCTURE)?;
        txn.delete_table(DIRECTORY_PATHS)?;
        txn.delete_table(COUNTERS)?;
        open_all_tables(&txn)?;
        txn.commit()?;
        Ok(())
    }

    // -- Files --

    /// Record a new path and return its id. A path that is already live is
    /// rejected with [`Error::AlreadyIndexed`].
    pub fn insert_file(&self, path: &str, is_dir: bool) -> Result<u64> {
        let db = self.connect()?;
        let txn = db.begin_write()?;
        let id = {
            let mut paths = txn.open_table(FILE_PATHS)?;
            if paths.get(path)?.is_some() {
                return Err(Error::AlreadyIndexed(path.to_string()));
            }
            let id = next_id(&txn, FILE_ID_COUNTER)?;
            paths.insert(path, id)?;

            let mut info = txn.open_table(FILE_INFO)?;
            let record = FileRecord {
                id,
                path: path.to_string(),
                is_dir,
            };
            info.insert(id, serde_json::to_vec(&record)?.as_slice())?;
            id
        };
        txn.commit()?;
        Ok(id)
    }

    pub fn id_by_path(&self, path: &str) -> Result<u64> {
        let db = self.connect()?;
        let txn = db.begin_read()?;
        let paths = txn.open_table(FILE_PATHS)?;
        paths
            .get(path)?
            .map(|v| v.value())
            .ok_or_else(|| Error::not_found("path", path))
    }

    pub fn path_by_id(&self, id: u64) -> Result<String> {
        let db = self.connect()?;
        let txn = db.begin_read()?;
        let info = txn.open_table(FILE_INFO)?;
        read_record(&info, id)?
            .map(|record| record.path)
            .ok_or_else(|| Error::not_found("id", id.to_string()))
    }

    pub fn record_by_path(&self, path: &str) -> Result<FileRecord> {
        let db = self.connect()?;
        let txn = db.begin_read()?;
        let paths = txn.open_table(FILE_PATHS)?;
        let info = txn.open_table(FILE_INFO)?;
        let id = paths
            .get(path)?
            .map(|v| v.value())
            .ok_or_else(|| Error::not_found("path", path))?;
        read_record(&info, id)?.ok_or_else(|| Error::not_found("path", path))
    }

    pub fn contains(&self, path: &str) -> Result<bool> {
        match self.id_by_path(path) {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Point update of a single record's path.
    pub fn rename_file(&self, old: &str, new: &str) -> Result<()> {
        let db = self.connect()?;
        let txn = db.begin_write()?;
        {
            let mut paths = txn.open_table(FILE_PATHS)?;
            let mut info = txn.open_table(FILE_INFO)?;

            let id = paths
                .remove(old)?
                .map(|v| v.value())
                .ok_or_else(|| Error::not_found("path", old))?;
            if paths.get(new)?.is_some() {
                return Err(Error::AlreadyIndexed(new.to_string()));
            }
            paths.insert(new, id)?;

            if let Some(mut record) = read_record(&info, id)? {
                record.path = new.to_string();
                write_record(&mut info, &record)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Remove one record (and its edge, if it was a directory).
    pub fn delete_file(&self, path: &str) -> Result<FileRecord> {
        let db = self.connect()?;
        let txn = db.begin_write()?;
        let record = {
            let mut paths = txn.open_table(FILE_PATHS)?;
            let mut info = txn.open_table(FILE_INFO)?;

            let id = paths
                .remove(path)?
                .map(|v| v.value())
                .ok_or_else(|| Error::not_found("path", path))?;
            let record = info
                .remove(id)?
                .map(|v| serde_json::from_slice::<FileRecord>(v.value()))
                .transpose()?
                .ok_or_else(|| Error::not_found("id", id.to_string()))?;

            let mut edge_paths = txn.open_table(DIRECTORY_PATHS)?;
            if let Some(record_id) = edge_paths.remove(path)?.map(|v| v.value()) {
                let mut edges = txn.open_table(DIRECTORY_STRUCTURE)?;
                edges.remove(record_id)?;
            }
            record
        };
        txn.commit()?;
        Ok(record)
    }

    pub fn list_records(&self) -> Result<Vec<FileRecord>> {
        let db = self.connect()?;
        let txn = db.begin_read()?;
        let info = txn.open_table(FILE_INFO)?;
        let mut result = Vec::new();
        for entry in info.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    // -- Directory edges --

    /// Record the edge for a directory just inserted with
    /// [`MetadataDb::insert_file`]. Returns the edge's own record id.
    pub fn insert_directory_edge(
        &self,
        id: u64,
        dir_path: &str,
        parent_dir_path: &str,
    ) -> Result<u64> {
        let db = self.connect()?;
        let txn = db.begin_write()?;
        let record_id = {
            let mut edge_paths = txn.open_table(DIRECTORY_PATHS)?;
            if edge_paths.get(dir_path)?.is_some() {
                return Err(Error::AlreadyIndexed(dir_path.to_string()));
            }
            let record_id = next_id(&txn, RECORD_ID_COUNTER)?;
            edge_paths.insert(dir_path, record_id)?;

            let mut edges = txn.open_table(DIRECTORY_STRUCTURE)?;
            let edge = DirectoryEdge {
                record_id,
                id,
                dir_path: dir_path.to_string(),
                parent_dir_path: parent_dir_path.to_string(),
            };
            write_edge(&mut edges, &edge)?;
            record_id
        };
        txn.commit()?;
        Ok(record_id)
    }

    /// Every known directory path, in insertion order.
    pub fn list_directory_paths(&self) -> Result<Vec<String>> {
        Ok(self
            .list_directory_edges()?
            .into_iter()
            .map(|edge| edge.dir_path)
            .collect())
    }

    pub fn list_directory_edges(&self) -> Result<Vec<DirectoryEdge>> {
        let db = self.connect()?;
        let txn = db.begin_read()?;
        let edges = txn.open_table(DIRECTORY_STRUCTURE)?;
        let mut result = Vec::new();
        for entry in edges.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    pub fn counts(&self) -> Result<Counts> {
        let records = self.list_records()?;
        let directories = records.iter().filter(|r| r.is_dir).count();
        Ok(Counts {
            files: records.len() - directories,
            directories,
            edges: self.list_directory_edges()?.len(),
        })
    }

    // -- Subtree cascades --

    /// Rewrite the `old` prefix to `new` on the directory's own record and
    /// every descendant record and edge. Descendant edges get both
    /// `dir_path` and `parent_dir_path` rewritten; the moved directory's
    /// edge points at the parent of `new`.
    ///
    /// Returns the number of file records rewritten.
    pub fn rename_directory_subtree(&self, old: &str, new: &str) -> Result<usize> {
        let db = self.connect()?;
        let txn = db.begin_write()?;
        let rewritten = {
            let mut paths = txn.open_table(FILE_PATHS)?;
            let mut info = txn.open_table(FILE_INFO)?;

            let affected = subtree_keys(&paths, old)?;
            if affected.is_empty() {
                return Err(Error::not_found("directory", old));
            }
            if paths.get(new)?.is_some() {
                return Err(Error::AlreadyIndexed(new.to_string()));
            }

            for (path, id) in &affected {
                let Some(new_path) = rebase(path, old, new) else {
                    continue;
                };
                paths.remove(path.as_str())?;
                paths.insert(new_path.as_str(), *id)?;
                if let Some(mut record) = read_record(&info, *id)? {
                    record.path = new_path;
                    write_record(&mut info, &record)?;
                }
            }

            let mut edge_paths = txn.open_table(DIRECTORY_PATHS)?;
            let mut edges = txn.open_table(DIRECTORY_STRUCTURE)?;
            for (dir_path, record_id) in subtree_keys(&edge_paths, old)? {
                let Some(new_dir) = rebase(&dir_path, old, new) else {
                    continue;
                };
                edge_paths.remove(dir_path.as_str())?;
                edge_paths.insert(new_dir.as_str(), record_id)?;

                let Some(mut edge) = read_edge(&edges, record_id)? else {
                    continue;
                };
                edge.parent_dir_path = if dir_path == old {
                    parent_of(&new_dir)
                } else {
                    rebase(&edge.parent_dir_path, old, new)
                        .unwrap_or(edge.parent_dir_path)
                };
                edge.dir_path = new_dir;
                write_edge(&mut edges, &edge)?;
            }

            affected.len()
        };
        txn.commit()?;
        Ok(rewritten)
    }

    /// Remove `dir` and every record and edge below it. Returns the number
    /// of file records removed.
    pub fn delete_subtree(&self, dir: &str) -> Result<usize> {
        let db = self.connect()?;
        let txn = db.begin_write()?;
        let removed = {
            let mut paths = txn.open_table(FILE_PATHS)?;
            let mut info = txn.open_table(FILE_INFO)?;
            let affected = subtree_keys(&paths, dir)?;
            for (path, id) in &affected {
                paths.remove(path.as_str())?;
                info.remove(*id)?;
            }

            let mut edge_paths = txn.open_table(DIRECTORY_PATHS)?;
            let mut edges = txn.open_table(DIRECTORY_STRUCTURE)?;
            for (dir_path, record_id) in subtree_keys(&edge_paths, dir)? {
                edge_paths.remove(dir_path.as_str())?;
                edges.remove(record_id)?;
            }

            affected.len()
        };
        txn.commit()?;
        Ok(removed)
    }
}

fn open_all_tables(txn: &WriteTransaction) -> Result<()> {
    txn.open_table(FILE_INFO)?;
    txn.open_table(FILE_PATHS)?;
    txn.open_table(DIRECTORY_STRUCTURE)?;
    txn.open_table(DIRECTORY_PATHS)?;
    txn.open_table(COUNTERS)?;
    Ok(())
}

fn next_id(txn: &WriteTransaction, counter: &str) -> Result<u64> {
    let mut counters = txn.open_table(COUNTERS)?;
    let next = counters.get(counter)?.map(|v| v.value()).unwrap_or(0) + 1;
    counters.insert(counter, next)?;
    Ok(next)
}

/// `dir` itself plus every key below it, with their values.
fn subtree_keys(
    index: &impl ReadableTable<&'static str, u64>,
    dir: &str,
) -> Result<Vec<(String, u64)>> {
    let mut keys = Vec::new();
    if let Some(id) = index.get(dir)?.map(|v| v.value()) {
        keys.push((dir.to_string(), id));
    }
    let (lo, hi) = descendant_range(dir);
    for entry in index.range(lo.as_str()..hi.as_str())? {
        let (k, v) = entry?;
        if k.value() != dir && is_within(k.value(), dir) {
            keys.push((k.value().to_string(), v.value()));
        }
    }
    Ok(keys)
}

fn read_record(
    info: &impl ReadableTable<u64, &'static [u8]>,
    id: u64,
) -> Result<Option<FileRecord>> {
    Ok(info
        .get(id)?
        .map(|v| serde_json::from_slice(v.value()))
        .transpose()?)
}

fn write_record(
    info: &mut Table<u64, &'static [u8]>,
    record: &FileRecord,
) -> Result<()> {
    info.insert(record.id, serde_json::to_vec(record)?.as_slice())?;
    Ok(())
}

fn read_edge(
    edges: &impl ReadableTable<u64, &'static [u8]>,
    record_id: u64,
) -> Result<Option<DirectoryEdge>> {
    Ok(edges
        .get(record_id)?
        .map(|v| serde_json::from_slice(v.value()))
        .transpose()?)
}

fn write_edge(
    edges: &mut Table<u64, &'static [u8]>,
    edge: &DirectoryEdge,
) -> Result<()> {
    edges.insert(edge.record_id, serde_json::to_vec(edge)?.as_slice())?;
    Ok(())
}
