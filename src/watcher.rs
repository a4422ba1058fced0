//! Filesystem watching: turns debounced OS notifications into [`FsEvent`]s
//! and feeds them to a [`SyncEngine`] until asked to stop.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    time::Duration,
};

use notify_debouncer_full::{
    DebounceEventResult,
    DebouncedEvent,
    Debouncer,
    RecommendedCache,
    new_debouncer,
    notify::{
        EventKind as NotifyKind,
        RecommendedWatcher,
        RecursiveMode,
        event::{CreateKind, ModifyKind, RemoveKind, RenameMode},
    },
};
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::Result,
    sync::{FsEvent, SyncEngine},
};

/// How often the loop checks the shutdown flag while idle.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Recursive watch on one directory tree with debouncing.
pub struct FsWatcher {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    events: mpsc::Receiver<DebounceEventResult>,
}

impl FsWatcher {
    pub fn new(root: &Path, debounce: Duration) -> Result<Self> {
        let (tx, events) = mpsc::channel();
        let mut debouncer =
            new_debouncer(debounce, None, move |result: DebounceEventResult| {
                let _ = tx.send(result);
            })?;
        debouncer.watch(root, RecursiveMode::Recursive)?;
        debug!(root = %root.display(), "watch registered");

        Ok(Self { debouncer, events })
    }

    /// Wait up to `timeout` for the next batch of events. An empty batch
    /// on timeout, `None` once the watcher has gone away.
    pub fn next_batch(&self, timeout: Duration) -> Option<Vec<FsEvent>> {
        match self.events.recv_timeout(timeout) {
            Ok(Ok(events)) => {
                Some(events.iter().filter_map(convert_event).collect())
            }
            Ok(Err(errors)) => {
                for e in errors {
                    error!(error = %e, "watch error");
                }
                Some(Vec::new())
            }
            Err(mpsc::RecvTimeoutError::Timeout) => Some(Vec::new()),
            Err(mpsc::RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn stop(mut self, root: &Path) {
        if let Err(e) = self.debouncer.unwatch(root) {
            debug!(error = %e, "unwatch failed");
        }
    }
}

/// Watch `engine.root()` and apply every event until `shutdown` is set.
///
/// Events are applied one at a time on the calling thread, in the order
/// the debouncer delivers them.
pub fn run(
    engine: &mut SyncEngine,
    shutdown: &AtomicBool,
    debounce: Duration,
) -> Result<()> {
    let root = engine.root().to_path_buf();
    let watcher = FsWatcher::new(&root, debounce)?;
    info!(root = %root.display(), "watching for changes");

    while !shutdown.load(Ordering::Relaxed) {
        let Some(batch) = watcher.next_batch(POLL_INTERVAL) else {
            warn!("watcher went away");
            break;
        };
        for event in &batch {
            let outcome = engine.handle_event(event);
            trace!(?event, ?outcome, "event applied");
        }
    }

    watcher.stop(&root);
    info!(root = %root.display(), "stopped watching");
    Ok(())
}

/// Map a debounced notification onto the engine's event model.
///
/// Renames arrive stitched together as `Name(Both)` with source and
/// destination; a lone `Name(From)` means the entry left the watched tree
/// and a lone `Name(To)` that it entered it. Attribute and access changes
/// are dropped.
pub fn convert_event(event: &DebouncedEvent) -> Option<FsEvent> {
    let path = event.paths.first()?;

    match &event.kind {
        NotifyKind::Create(kind) => {
            let is_dir = match kind {
                CreateKind::Folder => true,
                CreateKind::File => false,
                _ => path.is_dir(),
            };
            Some(FsEvent::created(path, is_dir))
        }
        NotifyKind::Remove(kind) => {
            Some(FsEvent::deleted(path, *kind == RemoveKind::Folder))
        }
        NotifyKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => {
                let dest = event.paths.get(1)?;
                Some(FsEvent::moved(path, dest, dest.is_dir()))
            }
            RenameMode::From => Some(FsEvent::deleted(path, false)),
            RenameMode::To => Some(FsEvent::created(path, path.is_dir())),
            _ if path.exists() => Some(FsEvent::created(path, path.is_dir())),
            _ => Some(FsEvent::deleted(path, false)),
        },
        NotifyKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
            path.is_file().then(|| FsEvent::modified(path))
        }
        _ => None,
    }
}
