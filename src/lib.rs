//! treesync - keeps a directory tree indexed for semantic search.
//!
//! Every file and directory under a watched root gets a record with a
//! stable id in a single metadata store. Every directory also owns a
//! vector collection at `<dir>/<dirname>.db` holding the embedded text
//! chunks of the files directly inside it. The [`SyncEngine`] builds both
//! from a full walk and then applies filesystem events to keep them
//! current.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use treesync::{DataDir, MetadataDb, ModelManager, Settings, SyncEngine};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let metadata = MetadataDb::open(&data_dir.metadata_db()).unwrap();
//! let settings = Settings::default();
//! let mut engine = SyncEngine::new(
//!     Path::new("/home/me/notes"),
//!     metadata,
//!     Box::new(ModelManager::new()),
//!     &settings,
//! )
//! .unwrap();
//!
//! engine.initial_walk().unwrap();
//! let queries = vec!["pasta recipes".to_string()];
//! for path in engine.resolve_paths(&queries, settings.search_limit).unwrap() {
//!     println!("{path}");
//! }
//! ```

pub mod chunking;
pub mod cli;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod filter;
pub mod metadata_db;
pub mod model_manager;
pub mod search;
pub mod settings;
pub mod sync;
pub mod tree_path;
pub mod vector_db;
pub mod walker;
pub mod watcher;

pub use data_dir::DataDir;
pub use embedding::Embedder;
pub use error::{Error, Result};
pub use metadata_db::MetadataDb;
pub use model_manager::ModelManager;
pub use settings::Settings;
pub use sync::{EventOutcome, FsEvent, SyncEngine};
pub use vector_db::VectorDb;
