//! The sync engine: keeps the metadata store and the per-directory vector
//! collections in step with a directory tree.
//!
//! There is no transaction spanning the two stores. Each event runs its
//! store operations in a fixed order and a failure part-way leaves the
//! earlier writes in place; a later [`SyncEngine::initial_walk`] rebuilds
//! both stores from the filesystem.

use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    extract::{ExtractedContent, extract},
    filter::IgnoreFilter,
    metadata_db::MetadataDb,
    search,
    settings::Settings,
    tree_path::{collection_file, key, owning_collection, parent_of},
    vector_db::VectorDb,
    walker::{EntryKind, walk_tree},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Deleted,
    Moved,
    /// File content changed in place.
    Modified,
}

/// A filesystem change below the watched root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: EventKind,
    pub is_directory: bool,
    pub src_path: PathBuf,
    /// Set for [`EventKind::Moved`] only.
    pub dest_path: Option<PathBuf>,
}

impl FsEvent {
    pub fn created(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: EventKind::Created,
            is_directory,
            src_path: path.into(),
            dest_path: None,
        }
    }

    pub fn deleted(path: impl Into<PathBuf>, is_directory: bool) -> Self {
        Self {
            kind: EventKind::Deleted,
            is_directory,
            src_path: path.into(),
            dest_path: None,
        }
    }

    pub fn moved(
        src: impl Into<PathBuf>,
        dest: impl Into<PathBuf>,
        is_directory: bool,
    ) -> Self {
        Self {
            kind: EventKind::Moved,
            is_directory,
            src_path: src.into(),
            dest_path: Some(dest.into()),
        }
    }

    pub fn modified(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: EventKind::Modified,
            is_directory: false,
            src_path: path.into(),
            dest_path: None,
        }
    }
}

/// What [`SyncEngine::handle_event`] did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Store operations ran to completion.
    Applied,
    /// Dropped by the ignore filter before touching any store.
    Ignored,
    /// Nothing to synchronize (unknown path, already indexed).
    Skipped,
    /// A store operation failed; the error was logged.
    Failed,
}

/// Counters reported after a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalkStats {
    pub directories: usize,
    pub files: usize,
    pub chunks: usize,
    pub failures: usize,
}

pub struct SyncEngine {
    root: PathBuf,
    metadata: MetadataDb,
    vectors: VectorDb,
    embedder: Box<dyn Embedder>,
    filter: IgnoreFilter,
    chunk_size: usize,
}

impl SyncEngine {
    /// `root` must be an existing directory; it is canonicalized so that
    /// event paths reported by the OS compare equal to stored paths.
    pub fn new(
        root: &Path,
        metadata: MetadataDb,
        embedder: Box<dyn Embedder>,
        settings: &Settings,
    ) -> Result<Self> {
        settings.validate()?;
        if !root.is_dir() {
            return Err(Error::Config(format!(
                "root is not a directory: {}",
                root.display()
            )));
        }
        let root = root.canonicalize().map_err(|e| {
            Error::Config(format!(
                "cannot resolve root {}: {e}",
                root.display()
            ))
        })?;

        let filter = IgnoreFilter::new(&root, &settings.ignore)?;
        let vectors = VectorDb::new(embedder.dimension());

        Ok(Self {
            root,
            metadata,
            vectors,
            embedder,
            filter,
            chunk_size: settings.chunk_size,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn metadata(&self) -> &MetadataDb {
        &self.metadata
    }

    pub fn vectors(&self) -> &VectorDb {
        &self.vectors
    }

    pub fn filter(&self) -> &IgnoreFilter {
        &self.filter
    }

    /// Rebuild both stores from the tree on disk.
    ///
    /// Wiping the metadata store or initializing the root collection are
    /// fatal; any failure below the root is logged, counted and skipped.
    pub fn initial_walk(&mut self) -> Result<WalkStats> {
        info!(root = %self.root.display(), "starting full resync");

        self.metadata.initialize()?;
        let root = self.root.clone();
        let root_key = key(&root);
        self.vectors.initialize_collection(&collection_file(&root))?;
        let id = self.metadata.insert_file(&root_key, true)?;
        self.metadata
            .insert_directory_edge(id, &root_key, &parent_of(&root_key))?;

        let mut stats = WalkStats {
            directories: 1,
            ..WalkStats::default()
        };
        self.index_subtree(&root, &mut stats)?;

        info!(
            directories = stats.directories,
            files = stats.files,
            chunks = stats.chunks,
            failures = stats.failures,
            "resync finished"
        );
        Ok(stats)
    }

    /// Apply one event. Never fails: errors are logged and reported as
    /// [`EventOutcome::Failed`] so the watch loop keeps running.
    pub fn handle_event(&mut self, event: &FsEvent) -> EventOutcome {
        debug!(?event, "handling event");

        let result = match (event.kind, &event.dest_path) {
            (EventKind::Moved, Some(dest)) => {
                match (
                    self.filter.is_ignored(&event.src_path),
                    self.filter.is_ignored(dest),
                ) {
                    (true, true) => Ok(EventOutcome::Ignored),
                    (false, true) => self.on_deleted(&event.src_path),
                    (true, false) if event.is_directory => {
                        self.on_created(dest, true)
                    }
                    (true, false) => self.on_modified(dest),
                    (false, false) => {
                        self.on_moved(&event.src_path, dest, event.is_directory)
                    }
                }
            }
            (EventKind::Moved, None) => {
                warn!(path = %event.src_path.display(), "move event without destination");
                Ok(EventOutcome::Skipped)
            }
            _ if self.filter.is_ignored(&event.src_path) => {
                Ok(EventOutcome::Ignored)
            }
            (EventKind::Created, _) => {
                self.on_created(&event.src_path, event.is_directory)
            }
            (EventKind::Deleted, _) => self.on_deleted(&event.src_path),
            (EventKind::Modified, _) => self.on_modified(&event.src_path),
        };

        match result {
            Ok(outcome) => outcome,
            Err(e) if e.is_not_found() => {
                info!(path = %event.src_path.display(), "nothing to synchronize: {e}");
                EventOutcome::Skipped
            }
            Err(Error::AlreadyIndexed(path)) => {
                debug!(%path, "already indexed");
                EventOutcome::Skipped
            }
            Err(e) => {
                error!(
                    kind = ?event.kind,
                    path = %event.src_path.display(),
                    error = %e,
                    "failed to synchronize event"
                );
                EventOutcome::Failed
            }
        }
    }

    /// Paths of the files closest to `queries` in every collection under
    /// the root.
    pub fn resolve_paths(
        &mut self,
        queries: &[String],
        limit: usize,
    ) -> Result<Vec<String>> {
        search::resolve_paths(
            &self.metadata,
            &self.vectors,
            self.embedder.as_mut(),
            &self.root,
            queries,
            limit,
        )
    }

    fn on_created(
        &mut self,
        path: &Path,
        is_directory: bool,
    ) -> Result<EventOutcome> {
        if is_directory {
            self.add_directory(path)?;
            // Anything already inside was created before the watch on
            // this directory existed and will not be reported.
            let mut stats = WalkStats::default();
            self.index_subtree(path, &mut stats)?;
            if stats.files + stats.directories > 0 {
                debug!(
                    dir = %path.display(),
                    directories = stats.directories,
                    files = stats.files,
                    "indexed existing contents"
                );
            }
        } else {
            let content = extract(path, self.chunk_size);
            self.add_file(path, content)?;
        }
        Ok(EventOutcome::Applied)
    }

    fn on_deleted(&mut self, path: &Path) -> Result<EventOutcome> {
        let path_key = key(path);
        let record = self.metadata.record_by_path(&path_key)?;

        if record.is_dir {
            let collection = collection_file(path);
            if let Err(e) = self.vectors.drop_collection(&collection) {
                warn!(dir = %path.display(), error = %e, "failed to drop collection");
            }
            let removed = self.metadata.delete_subtree(&path_key)?;
            debug!(dir = %path.display(), removed, "deleted subtree");
        } else {
            self.remove_vectors(&owning_collection(path), record.id);
            self.metadata.delete_file(&path_key)?;
        }
        Ok(EventOutcome::Applied)
    }

    fn on_moved(
        &mut self,
        src: &Path,
        dest: &Path,
        is_directory: bool,
    ) -> Result<EventOutcome> {
        let src_key = key(src);
        let dest_key = key(dest);

        let record = match self.metadata.record_by_path(&src_key) {
            Ok(record) => record,
            Err(e) if e.is_not_found() => {
                info!(src = %src.display(), "move source was never indexed");
                return if is_directory {
                    self.on_created(dest, true)
                } else {
                    self.on_modified(dest)
                };
            }
            Err(e) => return Err(e),
        };

        if self.metadata.contains(&dest_key)? {
            if record.is_dir {
                self.metadata.delete_subtree(&dest_key)?;
            } else {
                self.on_deleted(dest)?;
            }
        }

        if record.is_dir {
            self.move_directory(src, dest)?;
        } else {
            self.move_file(src, dest, record.id)?;
        }
        Ok(EventOutcome::Applied)
    }

    fn on_modified(&mut self, path: &Path) -> Result<EventOutcome> {
        let record = match self.metadata.record_by_path(&key(path)) {
            Ok(record) => record,
            Err(e) if e.is_not_found() => return self.on_created(path, false),
            Err(e) => return Err(e),
        };
        if record.is_dir {
            return Ok(EventOutcome::Skipped);
        }

        let chunks = self.chunks_or_empty(path, extract(path, self.chunk_size));
        let collection = owning_collection(path);
        self.vectors.remove_by_file_id(&collection, record.id)?;
        self.vectors.upsert_chunks(
            &collection,
            record.id,
            &chunks,
            self.embedder.as_mut(),
        )?;
        Ok(EventOutcome::Applied)
    }

    /// Index everything below `dir`, which must itself already be
    /// indexed.
    fn index_subtree(
        &mut self,
        dir: &Path,
        stats: &mut WalkStats,
    ) -> Result<()> {
        let entries = walk_tree(dir, &self.filter)?;

        let chunk_size = self.chunk_size;
        let contents: Vec<Option<Result<ExtractedContent>>> = entries
            .par_iter()
            .map(|entry| {
                (entry.kind == EntryKind::File)
                    .then(|| extract(&entry.path, chunk_size))
            })
            .collect();

        for (entry, content) in entries.iter().zip(contents) {
            let result = match content {
                None => self.add_directory(&entry.path).map(|()| {
                    stats.directories += 1;
                }),
                Some(content) => {
                    self.add_file(&entry.path, content).map(|chunks| {
                        stats.files += 1;
                        stats.chunks += chunks;
                    })
                }
            };

            match result {
                Ok(()) => {}
                Err(Error::AlreadyIndexed(path)) => {
                    debug!(%path, "already indexed");
                }
                Err(e) => {
                    stats.failures += 1;
                    warn!(path = %entry.path.display(), error = %e, "failed to index entry");
                }
            }
        }
        Ok(())
    }

    fn add_directory(&self, path: &Path) -> Result<()> {
        let path_key = key(path);
        if self.metadata.contains(&path_key)? {
            return Err(Error::AlreadyIndexed(path_key));
        }

        self.vectors.initialize_collection(&collection_file(path))?;
        let id = self.metadata.insert_file(&path_key, true)?;
        self.metadata
            .insert_directory_edge(id, &path_key, &parent_of(&path_key))?;
        Ok(())
    }

    /// Insert the file row, then embed its chunks. Returns the number of
    /// chunks stored.
    fn add_file(
        &mut self,
        path: &Path,
        content: Result<ExtractedContent>,
    ) -> Result<usize> {
        let id = self.metadata.insert_file(&key(path), false)?;
        let chunks = self.chunks_or_empty(path, content);
        self.vectors.upsert_chunks(
            &owning_collection(path),
            id,
            &chunks,
            self.embedder.as_mut(),
        )
    }

    fn move_file(&mut self, src: &Path, dest: &Path, id: u64) -> Result<()> {
        let from = owning_collection(src);
        let to = owning_collection(dest);

        if from != to {
            let entries = match self.vectors.lookup_by_file_id(&from, id) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(collection = %from.display(), error = %e, "cannot read vectors to move");
                    Vec::new()
                }
            };
            if !entries.is_empty() {
                match self.vectors.reinsert_entries(&to, &entries) {
                    Ok(n) => {
                        debug!(id, moved = n, to = %to.display(), "re-homed vectors");
                        self.remove_vectors(&from, id);
                    }
                    Err(e) => {
                        warn!(
                            collection = %to.display(),
                            error = %e,
                            "cannot re-home vectors, leaving them in the source collection"
                        );
                    }
                }
            }
        }

        self.metadata.rename_file(&key(src), &key(dest))
    }

    fn move_directory(&self, src: &Path, dest: &Path) -> Result<()> {
        let rewritten = self
            .metadata
            .rename_directory_subtree(&key(src), &key(dest))?;
        debug!(src = %src.display(), dest = %dest.display(), rewritten, "moved subtree");

        if let (Some(old_name), Some(new_name)) =
            (src.file_name(), dest.file_name())
            && old_name != new_name
            && let Err(e) = self
                .vectors
                .rename_collection(dest, &old_name.to_string_lossy())
        {
            warn!(dir = %dest.display(), error = %e, "failed to rename collection");
        }
        Ok(())
    }

    fn remove_vectors(&self, collection: &Path, id: u64) {
        match self.vectors.remove_by_file_id(collection, id) {
            Ok(_) => {}
            Err(e @ Error::StoreUnavailable { .. }) => {
                debug!(collection = %collection.display(), error = %e, "no collection to remove from");
            }
            Err(e) => {
                warn!(collection = %collection.display(), error = %e, "failed to remove vectors");
            }
        }
    }

    fn chunks_or_empty(
        &self,
        path: &Path,
        content: Result<ExtractedContent>,
    ) -> Vec<String> {
        match content {
            Ok(content) => content.chunks,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "indexing without content");
                Vec::new()
            }
        }
    }
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("root", &self.root)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::{
        embedding::test_support::{FailingEmbedder, HashEmbedder},
        tree_path::lock_file,
    };

    const DIM: usize = 16;

    struct Fixture {
        _data: tempfile::TempDir,
        _tree: tempfile::TempDir,
        engine: SyncEngine,
    }

    impl Fixture {
        fn root(&self) -> PathBuf {
            self.engine.root().to_path_buf()
        }

        fn id(&self, path: &Path) -> u64 {
            self.engine.metadata().id_by_path(&key(path)).unwrap()
        }

        fn texts(&self, collection_dir: &Path, file: &Path) -> Vec<String> {
            let id = self.id(file);
            self.engine
                .vectors()
                .lookup_by_file_id(&collection_file(collection_dir), id)
                .unwrap()
                .into_iter()
                .map(|e| e.text)
                .collect()
        }

        fn root_entries(&self) -> usize {
            self.engine
                .vectors()
                .count(&collection_file(self.engine.root()))
                .unwrap()
        }

        fn is_known(&self, path: &Path) -> bool {
            self.engine.metadata().contains(&key(path)).unwrap()
        }
    }

    fn fixture_with(chunk_size: usize, embedder: Box<dyn Embedder>) -> Fixture {
        let data = tempfile::tempdir().unwrap();
        let tree = tempfile::tempdir().unwrap();
        let root = tree.path().join("root");
        fs::create_dir(&root).unwrap();

        let metadata =
            MetadataDb::open(&data.path().join("filesystem.db")).unwrap();
        let settings = Settings {
            chunk_size,
            ..Settings::default()
        };
        let engine =
            SyncEngine::new(&root, metadata, embedder, &settings).unwrap();

        Fixture {
            _data: data,
            _tree: tree,
            engine,
        }
    }

    fn fixture(chunk_size: usize) -> Fixture {
        fixture_with(chunk_size, Box::new(HashEmbedder::new(DIM)))
    }

    #[test]
    fn initial_walk_scenario() {
        let mut fx = fixture(5);
        let root = fx.root();
        fs::create_dir(root.join("docs")).unwrap();
        fs::write(root.join("docs/a.txt"), "hello world").unwrap();
        fs::write(root.join("img.png"), "not really an image").unwrap();

        let stats = fx.engine.initial_walk().unwrap();

        assert_eq!(
            stats,
            WalkStats {
                directories: 2,
                files: 2,
                chunks: 3,
                failures: 0
            }
        );

        let mut paths: Vec<(String, bool)> = fx
            .engine
            .metadata()
            .list_records()
            .unwrap()
            .into_iter()
            .map(|r| (r.path, r.is_dir))
            .collect();
        paths.sort();
        let mut expected = vec![
            (key(&root), true),
            (key(&root.join("docs")), true),
            (key(&root.join("docs/a.txt")), false),
            (key(&root.join("img.png")), false),
        ];
        expected.sort();
        assert_eq!(paths, expected);

        assert_eq!(
            fx.engine.metadata().list_directory_paths().unwrap(),
            vec![key(&root), key(&root.join("docs"))]
        );

        assert_eq!(
            fx.texts(&root.join("docs"), &root.join("docs/a.txt")),
            vec!["hello", " worl", "d"]
        );
        assert!(fx.texts(&root, &root.join("img.png")).is_empty());
        assert_eq!(fx.root_entries(), 0);
        assert!(root.join("root.db").is_file());
        assert!(root.join("docs/docs.db").is_file());
        assert!(!lock_file(&root.join("docs/docs.db")).exists());
    }

    #[test]
    fn resync_rebuilds_from_scratch() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::write(root.join("a.txt"), "first").unwrap();
        fx.engine.initial_walk().unwrap();

        fs::remove_file(root.join("a.txt")).unwrap();
        fs::write(root.join("b.txt"), "second").unwrap();
        let stats = fx.engine.initial_walk().unwrap();

        assert_eq!(stats.files, 1);
        assert!(!fx.is_known(&root.join("a.txt")));
        assert_eq!(fx.root_entries(), 1);
        assert_eq!(fx.texts(&root, &root.join("b.txt")), vec!["second"]);
    }

    #[test]
    fn walk_survives_embedding_failures() {
        let mut fx =
            fixture_with(500, Box::new(FailingEmbedder { dimension: DIM }));
        let root = fx.root();
        fs::write(root.join("a.txt"), "one").unwrap();
        fs::write(root.join("b.txt"), "two").unwrap();

        let stats = fx.engine.initial_walk().unwrap();

        assert_eq!(stats.failures, 2);
        assert!(fx.is_known(&root.join("a.txt")));
        assert!(fx.is_known(&root.join("b.txt")));
        assert!(!lock_file(&collection_file(&root)).exists());
    }

    #[test]
    fn created_file_is_embedded_into_parent_collection() {
        let mut fx = fixture(4);
        let root = fx.root();
        fx.engine.initial_walk().unwrap();

        let path = root.join("note.md");
        fs::write(&path, "abcdefgh").unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::created(&path, false));

        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(fx.texts(&root, &path), vec!["abcd", "efgh"]);
    }

    #[test]
    fn created_binary_file_has_no_vectors() {
        let mut fx = fixture(4);
        let root = fx.root();
        fx.engine.initial_walk().unwrap();

        let path = root.join("song.mp3");
        fs::write(&path, "looks like text").unwrap();
        fx.engine.handle_event(&FsEvent::created(&path, false));

        assert!(fx.is_known(&path));
        assert!(fx.texts(&root, &path).is_empty());
    }

    #[test]
    fn duplicate_create_is_skipped() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::write(root.join("a.txt"), "content").unwrap();
        fx.engine.initial_walk().unwrap();

        let outcome = fx
            .engine
            .handle_event(&FsEvent::created(root.join("a.txt"), false));

        assert_eq!(outcome, EventOutcome::Skipped);
        assert_eq!(fx.texts(&root, &root.join("a.txt")).len(), 1);
    }

    #[test]
    fn created_directory_gets_its_own_collection() {
        let mut fx = fixture(500);
        let root = fx.root();
        fx.engine.initial_walk().unwrap();

        let dir = root.join("new");
        fs::create_dir(&dir).unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::created(&dir, true));

        assert_eq!(outcome, EventOutcome::Applied);
        assert!(dir.join("new.db").is_file());
        let edges = fx.engine.metadata().list_directory_edges().unwrap();
        let edge = edges.iter().find(|e| e.dir_path == key(&dir)).unwrap();
        assert_eq!(edge.id, fx.id(&dir));
        assert_eq!(edge.parent_dir_path, key(&root));
    }

    #[test]
    fn created_directory_indexes_existing_contents() {
        let mut fx = fixture(500);
        let root = fx.root();
        fx.engine.initial_walk().unwrap();

        let dir = root.join("incoming");
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("top.txt"), "top").unwrap();
        fs::write(dir.join("nested/deep.txt"), "deep").unwrap();
        fx.engine.handle_event(&FsEvent::created(&dir, true));

        assert_eq!(fx.texts(&dir, &dir.join("top.txt")), vec!["top"]);
        assert_eq!(
            fx.texts(&dir.join("nested"), &dir.join("nested/deep.txt")),
            vec!["deep"]
        );

        // The watcher may still report the nested entries afterwards.
        let again = fx
            .engine
            .handle_event(&FsEvent::created(dir.join("nested"), true));
        assert_eq!(again, EventOutcome::Skipped);
        assert_eq!(
            fx.texts(&dir.join("nested"), &dir.join("nested/deep.txt")),
            vec!["deep"]
        );
    }

    #[test]
    fn created_then_vanished_directory_fails_cleanly() {
        let mut fx = fixture(500);
        let root = fx.root();
        fx.engine.initial_walk().unwrap();

        let ghost = root.join("ghost");
        let outcome = fx.engine.handle_event(&FsEvent::created(&ghost, true));

        assert_eq!(outcome, EventOutcome::Failed);
        assert!(!fx.is_known(&ghost));
    }

    #[test]
    fn deleted_file_loses_record_and_vectors() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::write(root.join("a.txt"), "content").unwrap();
        fx.engine.initial_walk().unwrap();
        let id = fx.id(&root.join("a.txt"));

        fs::remove_file(root.join("a.txt")).unwrap();
        let outcome = fx
            .engine
            .handle_event(&FsEvent::deleted(root.join("a.txt"), false));

        assert_eq!(outcome, EventOutcome::Applied);
        assert!(!fx.is_known(&root.join("a.txt")));
        assert!(
            fx.engine
                .vectors()
                .lookup_by_file_id(&collection_file(&root), id)
                .unwrap()
                .is_empty()
        );
    }

    #[test]
    fn deleted_directory_cascades() {
        let mut fx = fixture(500);
        let root = fx.root();
        let dir = root.join("d");
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("one.txt"), "1").unwrap();
        fs::write(dir.join("sub/two.txt"), "2").unwrap();
        fs::create_dir(root.join("dx")).unwrap();
        fs::write(root.join("dx/keep.txt"), "k").unwrap();
        fx.engine.initial_walk().unwrap();

        // Reported as a file: the stored record decides.
        let outcome = fx.engine.handle_event(&FsEvent::deleted(&dir, false));

        assert_eq!(outcome, EventOutcome::Applied);
        for gone in [
            dir.clone(),
            dir.join("one.txt"),
            dir.join("sub"),
            dir.join("sub/two.txt"),
        ] {
            assert!(
                fx.engine
                    .metadata()
                    .id_by_path(&key(&gone))
                    .unwrap_err()
                    .is_not_found()
            );
        }
        assert!(!dir.join("d.db").exists());
        assert!(!lock_file(&dir.join("d.db")).exists());
        assert!(fx.is_known(&root.join("dx/keep.txt")));
        assert_eq!(
            fx.engine.metadata().list_directory_paths().unwrap(),
            vec![key(&root), key(&root.join("dx"))]
        );
    }

    #[test]
    fn deleting_unknown_path_is_skipped() {
        let mut fx = fixture(500);
        fx.engine.initial_walk().unwrap();
        let outcome = fx
            .engine
            .handle_event(&FsEvent::deleted(fx.root().join("never.txt"), false));
        assert_eq!(outcome, EventOutcome::Skipped);
    }

    #[test]
    fn moved_file_rehomes_vectors_to_destination() {
        let mut fx = fixture(3);
        let root = fx.root();
        fs::create_dir(root.join("a")).unwrap();
        fs::create_dir(root.join("b")).unwrap();
        fs::write(root.join("a/f.txt"), "abcdefgh").unwrap();
        fx.engine.initial_walk().unwrap();

        let id = fx.id(&root.join("a/f.txt"));
        let before = fx
            .engine
            .vectors()
            .lookup_by_file_id(&collection_file(&root.join("a")), id)
            .unwrap();
        assert_eq!(before.len(), 3);

        fs::rename(root.join("a/f.txt"), root.join("b/g.txt")).unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::moved(
            root.join("a/f.txt"),
            root.join("b/g.txt"),
            false,
        ));

        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(fx.id(&root.join("b/g.txt")), id);
        assert!(
            fx.engine
                .vectors()
                .lookup_by_file_id(&collection_file(&root.join("a")), id)
                .unwrap()
                .is_empty()
        );
        let after = fx
            .engine
            .vectors()
            .lookup_by_file_id(&collection_file(&root.join("b")), id)
            .unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn rename_within_directory_keeps_vectors() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::write(root.join("old.txt"), "body").unwrap();
        fx.engine.initial_walk().unwrap();
        let id = fx.id(&root.join("old.txt"));

        fs::rename(root.join("old.txt"), root.join("new.txt")).unwrap();
        fx.engine.handle_event(&FsEvent::moved(
            root.join("old.txt"),
            root.join("new.txt"),
            false,
        ));

        assert_eq!(fx.id(&root.join("new.txt")), id);
        assert_eq!(fx.texts(&root, &root.join("new.txt")), vec!["body"]);
    }

    #[test]
    fn move_onto_tracked_file_replaces_it() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::write(root.join("draft.txt"), "new body").unwrap();
        fs::write(root.join("final.txt"), "old body").unwrap();
        fx.engine.initial_walk().unwrap();
        let draft = fx.id(&root.join("draft.txt"));

        fs::rename(root.join("draft.txt"), root.join("final.txt")).unwrap();
        fx.engine.handle_event(&FsEvent::moved(
            root.join("draft.txt"),
            root.join("final.txt"),
            false,
        ));

        assert_eq!(fx.id(&root.join("final.txt")), draft);
        assert_eq!(fx.texts(&root, &root.join("final.txt")), vec!["new body"]);
        assert_eq!(fx.root_entries(), 1);
    }

    #[test]
    fn moved_directory_rewrites_subtree_and_collection() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::create_dir_all(root.join("a/b/deep")).unwrap();
        fs::write(root.join("a/b/file.txt"), "inside").unwrap();
        fs::write(root.join("a/b/deep/x.md"), "deeper").unwrap();
        fs::create_dir(root.join("a/bx")).unwrap();
        fs::write(root.join("a/bx/file.txt"), "sibling").unwrap();
        fx.engine.initial_walk().unwrap();
        let file_id = fx.id(&root.join("a/b/file.txt"));

        fs::rename(root.join("a/b"), root.join("a/c")).unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::moved(
            root.join("a/b"),
            root.join("a/c"),
            true,
        ));

        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(fx.id(&root.join("a/c/file.txt")), file_id);
        assert!(fx.is_known(&root.join("a/c/deep/x.md")));
        assert!(!fx.is_known(&root.join("a/b/file.txt")));
        assert!(fx.is_known(&root.join("a/bx/file.txt")));

        assert!(root.join("a/c/c.db").is_file());
        assert!(!root.join("a/c/b.db").exists());
        assert_eq!(
            fx.texts(&root.join("a/c"), &root.join("a/c/file.txt")),
            vec!["inside"]
        );
        assert_eq!(
            fx.texts(&root.join("a/c/deep"), &root.join("a/c/deep/x.md")),
            vec!["deeper"]
        );

        let edges = fx.engine.metadata().list_directory_edges().unwrap();
        let deep = edges
            .iter()
            .find(|e| e.dir_path == key(&root.join("a/c/deep")))
            .unwrap();
        assert_eq!(deep.parent_dir_path, key(&root.join("a/c")));
    }

    #[test]
    fn move_to_hidden_name_is_a_delete() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::write(root.join("a.txt"), "x").unwrap();
        fx.engine.initial_walk().unwrap();

        fs::rename(root.join("a.txt"), root.join(".a.txt")).unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::moved(
            root.join("a.txt"),
            root.join(".a.txt"),
            false,
        ));

        assert_eq!(outcome, EventOutcome::Applied);
        assert!(!fx.is_known(&root.join("a.txt")));
        assert_eq!(fx.root_entries(), 0);
    }

    #[test]
    fn atomic_save_through_hidden_temp_refreshes_content() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::write(root.join("doc.txt"), "old").unwrap();
        fx.engine.initial_walk().unwrap();
        let id = fx.id(&root.join("doc.txt"));

        fs::write(root.join(".doc.txt.swp"), "new").unwrap();
        fs::rename(root.join(".doc.txt.swp"), root.join("doc.txt")).unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::moved(
            root.join(".doc.txt.swp"),
            root.join("doc.txt"),
            false,
        ));

        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(fx.id(&root.join("doc.txt")), id);
        assert_eq!(fx.texts(&root, &root.join("doc.txt")), vec!["new"]);
    }

    #[test]
    fn move_of_unknown_source_indexes_destination() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::write(root.join("final.txt"), "old body").unwrap();
        fx.engine.initial_walk().unwrap();
        let id = fx.id(&root.join("final.txt"));

        fs::write(root.join("draft.txt"), "new body").unwrap();
        fs::rename(root.join("draft.txt"), root.join("final.txt")).unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::moved(
            root.join("draft.txt"),
            root.join("final.txt"),
            false,
        ));

        assert_eq!(outcome, EventOutcome::Applied);
        assert!(!fx.is_known(&root.join("draft.txt")));
        assert_eq!(fx.id(&root.join("final.txt")), id);
        assert_eq!(fx.texts(&root, &root.join("final.txt")), vec!["new body"]);
        assert_eq!(fx.root_entries(), 1);

        fs::write(root.join("late.txt"), "late body").unwrap();
        fs::rename(root.join("late.txt"), root.join("fresh.txt")).unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::moved(
            root.join("late.txt"),
            root.join("fresh.txt"),
            false,
        ));

        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(fx.texts(&root, &root.join("fresh.txt")), vec!["late body"]);
        assert_eq!(fx.root_entries(), 2);
    }

    #[test]
    fn directory_revealed_from_hidden_name_is_created() {
        let mut fx = fixture(500);
        let root = fx.root();
        fx.engine.initial_walk().unwrap();

        fs::create_dir_all(root.join(".stage/sub")).unwrap();
        fs::write(root.join(".stage/inner.txt"), "staged").unwrap();
        fs::write(root.join(".stage/sub/deep.md"), "deeper").unwrap();
        fs::rename(root.join(".stage"), root.join("stage")).unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::moved(
            root.join(".stage"),
            root.join("stage"),
            true,
        ));

        assert_eq!(outcome, EventOutcome::Applied);
        assert!(fx.is_known(&root.join("stage")));
        assert!(fx.is_known(&root.join("stage/sub")));
        assert!(root.join("stage/stage.db").is_file());
        assert!(root.join("stage/sub/sub.db").is_file());
        assert_eq!(
            fx.texts(&root.join("stage"), &root.join("stage/inner.txt")),
            vec!["staged"]
        );
        assert_eq!(
            fx.texts(&root.join("stage/sub"), &root.join("stage/sub/deep.md")),
            vec!["deeper"]
        );
        assert!(!fx.is_known(&root.join(".stage")));
    }

    #[test]
    fn directory_moved_to_hidden_name_is_deleted() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::create_dir(root.join("notes")).unwrap();
        fs::write(root.join("notes/a.txt"), "note").unwrap();
        fx.engine.initial_walk().unwrap();

        fs::rename(root.join("notes"), root.join(".notes")).unwrap();
        let outcome = fx.engine.handle_event(&FsEvent::moved(
            root.join("notes"),
            root.join(".notes"),
            true,
        ));

        assert_eq!(outcome, EventOutcome::Applied);
        assert!(!fx.is_known(&root.join("notes")));
        assert!(!fx.is_known(&root.join("notes/a.txt")));
        assert!(!fx.is_known(&root.join(".notes")));
        assert_eq!(
            fx.engine.metadata().list_directory_paths().unwrap(),
            vec![key(&root)]
        );
    }

    #[test]
    fn modified_file_is_re_embedded() {
        let mut fx = fixture(500);
        let root = fx.root();
        fs::write(root.join("a.txt"), "before").unwrap();
        fx.engine.initial_walk().unwrap();

        fs::write(root.join("a.txt"), "after").unwrap();
        let outcome =
            fx.engine.handle_event(&FsEvent::modified(root.join("a.txt")));

        assert_eq!(outcome, EventOutcome::Applied);
        assert_eq!(fx.texts(&root, &root.join("a.txt")), vec!["after"]);
    }

    #[test]
    fn ignored_paths_touch_no_store() {
        let mut fx = fixture(500);
        let root = fx.root();
        fx.engine.initial_walk().unwrap();
        let before = fx.engine.metadata().list_records().unwrap();

        fs::write(root.join(".hidden"), "x").unwrap();
        for event in [
            FsEvent::created(root.join(".hidden"), false),
            FsEvent::created(root.join("root.db"), false),
            FsEvent::created(root.join(".root.db.lock"), false),
            FsEvent::deleted(root.join(".git"), true),
            FsEvent::moved(root.join(".a"), root.join(".b"), false),
        ] {
            assert_eq!(fx.engine.handle_event(&event), EventOutcome::Ignored);
        }

        assert_eq!(fx.engine.metadata().list_records().unwrap(), before);
    }

    #[test]
    fn create_failure_keeps_row_and_clears_lock() {
        let mut fx =
            fixture_with(500, Box::new(FailingEmbedder { dimension: DIM }));
        let root = fx.root();
        fx.engine.initial_walk().unwrap();

        fs::write(root.join("a.txt"), "text").unwrap();
        let outcome = fx
            .engine
            .handle_event(&FsEvent::created(root.join("a.txt"), false));

        assert_eq!(outcome, EventOutcome::Failed);
        assert!(fx.is_known(&root.join("a.txt")));
        assert!(!lock_file(&collection_file(&root)).exists());
    }

    #[test]
    fn missing_root_is_rejected() {
        let data = tempfile::tempdir().unwrap();
        let metadata =
            MetadataDb::open(&data.path().join("filesystem.db")).unwrap();
        let err = SyncEngine::new(
            &data.path().join("absent"),
            metadata,
            Box::new(HashEmbedder::new(DIM)),
            &Settings::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
