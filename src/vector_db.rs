use std::{
    fs,
    io,
    path::{Path, PathBuf},
};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    Table,
    TableDefinition,
};
use tracing::{debug, info, warn};

use crate::{
    embedding::{Embedder, cosine_similarity, embed_checked},
    error::{Error, Result},
    tree_path::{COLLECTION_EXT, collection_file, lock_file},
};

const ENTRIES: TableDefinition<(u64, u64), &[u8]> =
    TableDefinition::new("entries");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const DIMENSION_KEY: &str = "dimension";

/// Header size: 4 bytes vector dimension.
const HEADER_SIZE: usize = 4;

/// One embedded chunk. Many entries share a `file_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    pub file_id: u64,
    pub vector: Vec<f32>,
    pub text: String,
}

/// Per-directory vector collections.
///
/// Every directory owns one collection file, `<dir>/<dirname>.db`. Nothing
/// is held open between calls: each operation takes the advisory lock
/// `<dir>/.<dirname>.db.lock`, opens the file, works, then closes it and
/// removes the lock, including when the operation fails.
///
/// Binary format per entry, keyed by `(file_id, seq)`:
/// - 4 bytes: dimension D (u32 LE)
/// - D * 4 bytes: f32 values, little-endian
/// - remaining bytes: the chunk text as UTF-8
#[derive(Debug, Clone)]
pub struct VectorDb {
    dimension: usize,
}

impl VectorDb {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Drop and recreate an empty collection.
    pub fn initialize_collection(&self, collection: &Path) -> Result<()> {
        let handle = CollectionHandle::open(collection, true)?;

        let txn = handle.db.begin_write()?;
        txn.delete_table(ENTRIES)?;
        txn.delete_table(META)?;
        {
            txn.open_table(ENTRIES)?;
            let mut meta = txn.open_table(META)?;
            meta.insert(DIMENSION_KEY, self.dimension as u64)?;
        }
        txn.commit()?;

        debug!(collection = %collection.display(), "initialized collection");
        Ok(())
    }

    /// Delete a collection file. Returns `false` when there was none.
    pub fn drop_collection(&self, collection: &Path) -> Result<bool> {
        if !collection.exists() {
            info!(collection = %collection.display(), "no collection to drop");
            return Ok(false);
        }

        let _lock = LockGuard::acquire(collection)?;
        match fs::remove_file(collection) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        }

        debug!(collection = %collection.display(), "dropped collection");
        Ok(true)
    }

    /// After a directory's basename changed from `old_name`, move its
    /// collection file to the name derived from the new basename.
    pub fn rename_collection(&self, dir: &Path, old_name: &str) -> Result<bool> {
        let from = dir.join(format!("{old_name}.{COLLECTION_EXT}"));
        let to = collection_file(dir);
        if from == to || !from.exists() {
            return Ok(false);
        }

        let _lock = LockGuard::acquire(&from)?;
        fs::rename(&from, &to)?;

        debug!(from = %from.display(), to = %to.display(), "renamed collection");
        Ok(true)
    }

    /// Embed `chunks` and store one entry per chunk under `file_id`.
    ///
    /// Nothing is written unless every chunk was embedded.
    pub fn upsert_chunks(
        &self,
        collection: &Path,
        file_id: u64,
        chunks: &[String],
        embedder: &mut dyn Embedder,
    ) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let handle = CollectionHandle::open(collection, false)?;
        let vectors = embed_checked(embedder, chunks)?;

        let entries: Vec<VectorEntry> = vectors
            .into_iter()
            .zip(chunks)
            .map(|(vector, text)| VectorEntry {
                file_id,
                vector,
                text: text.clone(),
            })
            .collect();
        handle.insert(&entries)
    }

    /// Store entries as they are, without re-embedding.
    pub fn reinsert_entries(
        &self,
        collection: &Path,
        entries: &[VectorEntry],
    ) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let handle = CollectionHandle::open(collection, false)?;
        handle.insert(entries)
    }

    /// Delete every entry carrying `file_id`. Returns how many went.
    pub fn remove_by_file_id(
        &self,
        collection: &Path,
        file_id: u64,
    ) -> Result<usize> {
        let handle = CollectionHandle::open(collection, false)?;

        let txn = handle.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(ENTRIES)?;
            let mut keys = Vec::new();
            for entry in table.range(file_range(file_id))? {
                let (k, _v) = entry?;
                keys.push(k.value());
            }
            for key in &keys {
                table.remove(*key)?;
            }
            keys.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// Entries stored for `file_id`, in insertion order. A missing
    /// collection reads as empty.
    pub fn lookup_by_file_id(
        &self,
        collection: &Path,
        file_id: u64,
    ) -> Result<Vec<VectorEntry>> {
        let handle = match CollectionHandle::open(collection, false) {
            Ok(handle) => handle,
            Err(Error::StoreUnavailable { .. }) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let txn = handle.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let mut result = Vec::new();
        for entry in table.range(file_range(file_id))? {
            let (_k, v) = entry?;
            if let Some(decoded) = decode_entry(file_id, v.value()) {
                result.push(decoded);
            }
        }
        Ok(result)
    }

    /// Nearest entries by cosine similarity: the ids of the top `limit`
    /// entries for each query, concatenated in query order.
    pub fn similarity_search(
        &self,
        collection: &Path,
        queries: &[String],
        limit: usize,
        embedder: &mut dyn Embedder,
    ) -> Result<Vec<u64>> {
        if queries.is_empty() {
            return Err(Error::InvalidInput("no query texts given".into()));
        }
        if limit == 0 {
            return Err(Error::InvalidInput(
                "search limit must be greater than zero".into(),
            ));
        }

        let handle = CollectionHandle::open(collection, false)?;
        let query_vectors = embed_checked(embedder, queries)?;
        let stored = handle.all_entries()?;

        let mut ids = Vec::with_capacity(queries.len() * limit);
        for query in &query_vectors {
            let mut scored: Vec<(f32, u64)> = stored
                .iter()
                .map(|e| (cosine_similarity(query, &e.vector), e.file_id))
                .collect();
            scored.sort_by(|a, b| b.0.total_cmp(&a.0));
            ids.extend(scored.into_iter().take(limit).map(|(_, id)| id));
        }
        Ok(ids)
    }

    /// Number of entries in a collection.
    pub fn count(&self, collection: &Path) -> Result<usize> {
        let handle = CollectionHandle::open(collection, false)?;
        Ok(handle.all_entries()?.len())
    }
}

/// Advisory lock file held for the lifetime of a collection operation.
struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    fn acquire(collection: &Path) -> Result<Self> {
        let path = lock_file(collection);
        if path.exists() {
            warn!(lock = %path.display(), "taking over stale collection lock");
        }
        fs::write(&path, std::process::id().to_string()).map_err(|e| {
            Error::StoreUnavailable {
                store: collection.to_path_buf(),
                reason: format!("cannot create lock file: {e}"),
            }
        })?;
        Ok(Self { path })
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path)
            && e.kind() != io::ErrorKind::NotFound
        {
            warn!(lock = %self.path.display(), error = %e, "failed to remove collection lock");
        }
    }
}

/// An open collection. Fields drop in order, so the database is closed
/// before the lock file is removed.
struct CollectionHandle {
    db: Database,
    dimension: usize,
    _lock: LockGuard,
}

impl CollectionHandle {
    /// With `create`, a missing file is created; otherwise it must already
    /// hold an initialized collection.
    fn open(collection: &Path, create: bool) -> Result<Self> {
        let unavailable = |reason: String| Error::StoreUnavailable {
            store: collection.to_path_buf(),
            reason,
        };

        if !create && !collection.is_file() {
            return Err(unavailable("collection does not exist".into()));
        }

        let lock = LockGuard::acquire(collection)?;
        let db = Database::create(collection)
            .map_err(|e| unavailable(e.to_string()))?;

        let dimension = if create {
            0
        } else {
            let txn = db.begin_read()?;
            let stored = match txn.open_table(META) {
                Ok(meta) => {
                    let value = meta.get(DIMENSION_KEY)?.map(|v| v.value());
                    value
                }
                Err(redb::TableError::TableDoesNotExist(_)) => None,
                Err(e) => return Err(e.into()),
            };
            stored.ok_or_else(|| {
                unavailable("collection is not initialized".into())
            })? as usize
        };

        Ok(Self {
            db,
            dimension,
            _lock: lock,
        })
    }

    fn insert(&self, entries: &[VectorEntry]) -> Result<usize> {
        if let Some(bad) = entries.iter().find(|e| e.vector.len() != self.dimension)
        {
            return Err(Error::Embedding(format!(
                "collection expects dimension {}, got {}",
                self.dimension,
                bad.vector.len()
            )));
        }

        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(ENTRIES)?;
            for entry in entries {
                let seq = next_seq(&table, entry.file_id)?;
                let byte_len = HEADER_SIZE
                    + std::mem::size_of_val(entry.vector.as_slice())
                    + entry.text.len();
                let mut guard =
                    table.insert_reserve((entry.file_id, seq), byte_len)?;
                encode_entry(guard.as_mut(), entry);
            }
        }
        txn.commit()?;
        Ok(entries.len())
    }

    fn all_entries(&self) -> Result<Vec<VectorEntry>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(ENTRIES)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            let (file_id, _seq) = k.value();
            if let Some(decoded) = decode_entry(file_id, v.value()) {
                result.push(decoded);
            }
        }
        Ok(result)
    }
}

fn file_range(file_id: u64) -> std::ops::RangeInclusive<(u64, u64)> {
    (file_id, 0)..=(file_id, u64::MAX)
}

fn next_seq(table: &Table<(u64, u64), &'static [u8]>, file_id: u64) -> Result<u64> {
    let last = table.range(file_range(file_id))?.next_back().transpose()?;
    Ok(last.map(|(k, _)| k.value().1 + 1).unwrap_or(0))
}

fn encode_entry(dest: &mut [u8], entry: &VectorEntry) {
    let vector_end = HEADER_SIZE + std::mem::size_of_val(entry.vector.as_slice());
    dest[0..HEADER_SIZE]
        .copy_from_slice(&(entry.vector.len() as u32).to_le_bytes());
    for (slot, value) in dest[HEADER_SIZE..vector_end]
        .chunks_exact_mut(4)
        .zip(&entry.vector)
    {
        slot.copy_from_slice(&value.to_le_bytes());
    }
    dest[vector_end..].copy_from_slice(entry.text.as_bytes());
}

fn decode_entry(file_id: u64, bytes: &[u8]) -> Option<VectorEntry> {
    let header: [u8; HEADER_SIZE] = bytes.get(..HEADER_SIZE)?.try_into().ok()?;
    let dimension = u32::from_le_bytes(header) as usize;
    let vector_end = HEADER_SIZE + dimension * 4;

    let vector = bytes
        .get(HEADER_SIZE..vector_end)?
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    let text = std::str::from_utf8(&bytes[vector_end..]).ok()?.to_string();

    Some(VectorEntry {
        file_id,
        vector,
        text,
    })
}
