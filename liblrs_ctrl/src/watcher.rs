//! Binding of freshly written data files to the run they belong to.
//!
//! The DAQ writes one data file at a time. A file is only complete once the next one appears
//! (or the run stops), so the watcher keeps the most recent file in a single pending slot and
//! finalizes the previous occupant whenever the slot is refilled or flushed.
//!
//! All slot mutations happen on one coordinator thread. Filesystem events and flush requests
//! reach it through the same channel, which serializes finalization no matter which side
//! triggered it.
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use super::error::WatcherError;
use super::metadata::Finalize;
use super::run_context::RunContextStore;
use super::run_file::RunFilePattern;

/// The pending file state machine: Idle when the slot is empty, Pending otherwise
pub struct PendingFileBinder<F: Finalize> {
    pending: Option<PathBuf>,
    store: RunContextStore,
    finalizer: F,
}

impl<F: Finalize> PendingFileBinder<F> {
    pub fn new(store: RunContextStore, finalizer: F) -> Self {
        Self {
            pending: None,
            store,
            finalizer,
        }
    }

    pub fn pending(&self) -> Option<&Path> {
        self.pending.as_deref()
    }

    /// A new data file appeared. Finalizes the previous pending file, if any, and takes the
    /// new one as pending. Returns the path that was finalized.
    pub fn on_created(&mut self, path: PathBuf) -> Option<PathBuf> {
        if self.pending.as_ref() == Some(&path) {
            log::debug!("Duplicate creation event for {}", path.to_string_lossy());
            return None;
        }
        if self.store.get().is_none() {
            log::warn!(
                "File {} was created while no run context is set; it will not get metadata",
                path.to_string_lossy()
            );
            return None;
        }
        let finalized = self.finalize_pending();
        log::info!("New pending file {}", path.to_string_lossy());
        self.pending = Some(path);
        finalized
    }

    /// Finalize the pending file now and return to Idle
    pub fn flush(&mut self) -> Option<PathBuf> {
        self.finalize_pending()
    }

    /// Take the slot and finalize it against the context active right now. The slot is
    /// cleared even when finalization fails: a file is attempted exactly once.
    fn finalize_pending(&mut self) -> Option<PathBuf> {
        let path = self.pending.take()?;
        let Some(context) = self.store.get() else {
            log::warn!(
                "No run context while finalizing {}; metadata skipped",
                path.to_string_lossy()
            );
            return None;
        };
        match self.finalizer.finalize(&path, &context) {
            Ok(_) => Some(path),
            Err(e) => {
                log::error!("Failed to finalize {}: {e}", path.to_string_lossy());
                None
            }
        }
    }
}

pub enum WatcherMessage {
    Created(PathBuf),
    Flush(Sender<Option<PathBuf>>),
    Shutdown,
}

/// Explicit flush of the pending slot, as issued when a run stops
pub trait PendingFlush: Send + Sync {
    fn flush_pending(&self) -> Result<Option<PathBuf>, WatcherError>;
}

/// Cloneable sender side of the coordinator
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    tx: Sender<WatcherMessage>,
}

impl WatcherHandle {
    pub fn notify_created(&self, path: PathBuf) -> Result<(), WatcherError> {
        self.tx
            .send(WatcherMessage::Created(path))
            .map_err(|_| WatcherError::Disconnected)
    }

    /// Ask the coordinator to finalize the pending file and wait until it has
    pub fn flush(&self) -> Result<Option<PathBuf>, WatcherError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.tx
            .send(WatcherMessage::Flush(reply_tx))
            .map_err(|_| WatcherError::Disconnected)?;
        reply_rx.recv().map_err(|_| WatcherError::Disconnected)
    }

    fn shutdown(&self) {
        let _ = self.tx.send(WatcherMessage::Shutdown);
    }
}

impl PendingFlush for WatcherHandle {
    fn flush_pending(&self) -> Result<Option<PathBuf>, WatcherError> {
        self.flush()
    }
}

fn run_coordinator<F: Finalize>(mut binder: PendingFileBinder<F>, rx: Receiver<WatcherMessage>) {
    log::info!("File watcher coordinator started");
    while let Ok(message) = rx.recv() {
        match message {
            WatcherMessage::Created(path) => {
                binder.on_created(path);
            }
            WatcherMessage::Flush(reply) => {
                let finalized = binder.flush();
                if reply.send(finalized).is_err() {
                    log::warn!("Flush requester went away before the reply");
                }
            }
            WatcherMessage::Shutdown => break,
        }
    }
    if let Some(path) = binder.pending() {
        log::warn!(
            "File watcher stopping with {} still pending",
            path.to_string_lossy()
        );
    }
    log::info!("File watcher coordinator stopped");
}

/// Start the coordinator thread that owns the binder
pub fn spawn_coordinator<F: Finalize + 'static>(
    binder: PendingFileBinder<F>,
) -> Result<(WatcherHandle, JoinHandle<()>), WatcherError> {
    let (tx, rx) = mpsc::channel();
    let thread = std::thread::Builder::new()
        .name(String::from("file-binder"))
        .spawn(move || run_coordinator(binder, rx))?;
    Ok((WatcherHandle { tx }, thread))
}

/// Filesystem listener on the data directory feeding a coordinator
pub struct FileWatcher {
    handle: WatcherHandle,
    _watcher: RecommendedWatcher,
    coordinator: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn start<F: Finalize + 'static>(
        data_dir: &Path,
        pattern: RunFilePattern,
        binder: PendingFileBinder<F>,
    ) -> Result<Self, WatcherError> {
        let (handle, coordinator) = spawn_coordinator(binder)?;
        let events = handle.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            match res {
                Ok(event) => {
                    if !matches!(event.kind, EventKind::Create(_)) {
                        return;
                    }
                    for path in event.paths {
                        if !pattern.is_data_file(&path) {
                            continue;
                        }
                        if events.notify_created(path).is_err() {
                            log::error!("File watcher coordinator is gone; dropping event");
                        }
                    }
                }
                Err(e) => log::error!("File watcher error: {e}"),
            }
        })?;
        watcher.watch(data_dir, RecursiveMode::NonRecursive)?;
        log::info!("Watching {} for new data files", data_dir.to_string_lossy());
        Ok(Self {
            handle,
            _watcher: watcher,
            coordinator: Some(coordinator),
        })
    }

    pub fn handle(&self) -> WatcherHandle {
        self.handle.clone()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.coordinator.take() {
            if thread.join().is_err() {
                log::error!("File watcher coordinator panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetadataError;
    use crate::metadata::MetadataRecord;
    use crate::run_context::RunContext;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// Records every finalize call, then fails since it builds no record
    #[derive(Clone, Default)]
    struct RecordingFinalizer {
        calls: Arc<Mutex<Vec<(PathBuf, u32)>>>,
    }

    impl RecordingFinalizer {
        fn calls(&self) -> Vec<(PathBuf, u32)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Finalize for RecordingFinalizer {
        fn finalize(
            &self,
            path: &Path,
            context: &RunContext,
        ) -> Result<MetadataRecord, MetadataError> {
            self.calls
                .lock()
                .unwrap()
                .push((path.to_path_buf(), context.run));
            Err(MetadataError::IOError(std::io::Error::other(
                "recording finalizer builds no record",
            )))
        }
    }

    fn binder_with_context() -> (
        PendingFileBinder<RecordingFinalizer>,
        RecordingFinalizer,
        RunContextStore,
    ) {
        let store = RunContextStore::new();
        store.set(RunContext::new(1, 0, "physics", "morcs"));
        let finalizer = RecordingFinalizer::default();
        (
            PendingFileBinder::new(store.clone(), finalizer.clone()),
            finalizer,
            store,
        )
    }

    #[test]
    fn test_second_file_finalizes_first() {
        let (mut binder, finalizer, _store) = binder_with_context();
        binder.on_created(PathBuf::from("A"));
        assert!(finalizer.calls().is_empty());
        binder.on_created(PathBuf::from("B"));
        assert_eq!(finalizer.calls(), vec![(PathBuf::from("A"), 1)]);
        assert_eq!(binder.pending(), Some(Path::new("B")));
    }

    #[test]
    fn test_flush_finalizes_once() {
        let (mut binder, finalizer, _store) = binder_with_context();
        binder.on_created(PathBuf::from("A"));
        binder.flush();
        binder.flush();
        assert_eq!(finalizer.calls().len(), 1);
        assert_eq!(binder.pending(), None);
    }

    #[test]
    fn test_context_read_at_finalize_time() {
        let (mut binder, finalizer, store) = binder_with_context();
        binder.on_created(PathBuf::from("A"));
        store.set(RunContext::new(2, 0, "physics", "morcs"));
        binder.flush();
        assert_eq!(finalizer.calls(), vec![(PathBuf::from("A"), 2)]);
    }

    #[test]
    fn test_no_context_drops_event() {
        let finalizer = RecordingFinalizer::default();
        let mut binder = PendingFileBinder::new(RunContextStore::new(), finalizer.clone());
        binder.on_created(PathBuf::from("A"));
        assert_eq!(binder.pending(), None);
        binder.flush();
        assert!(finalizer.calls().is_empty());
    }

    #[test]
    fn test_duplicate_event_ignored() {
        let (mut binder, finalizer, _store) = binder_with_context();
        binder.on_created(PathBuf::from("A"));
        binder.on_created(PathBuf::from("A"));
        assert!(finalizer.calls().is_empty());
        assert_eq!(binder.pending(), Some(Path::new("A")));
    }

    #[test]
    fn test_failed_finalize_still_clears_slot() {
        let (mut binder, finalizer, _store) = binder_with_context();
        binder.on_created(PathBuf::from("bad"));
        assert_eq!(binder.flush(), None);
        assert_eq!(binder.pending(), None);
        assert_eq!(finalizer.calls().len(), 1);
    }

    #[test]
    fn test_coordinator_serializes_events_and_flush() {
        let (binder, finalizer, _store) = binder_with_context();
        let (handle, thread) = spawn_coordinator(binder).unwrap();
        handle.notify_created(PathBuf::from("A")).unwrap();
        handle.notify_created(PathBuf::from("B")).unwrap();
        // Finalizer always errors, so the flush reports nothing finalized
        assert_eq!(handle.flush_pending().unwrap(), None);
        assert_eq!(handle.flush_pending().unwrap(), None);
        let names: Vec<PathBuf> = finalizer.calls().into_iter().map(|(p, _)| p).collect();
        assert_eq!(names, vec![PathBuf::from("A"), PathBuf::from("B")]);
        handle.shutdown();
        thread.join().unwrap();
        assert!(matches!(handle.flush(), Err(WatcherError::Disconnected)));
    }

    #[test]
    fn test_watcher_sees_new_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let (binder, finalizer, _store) = binder_with_context();
        let watcher = FileWatcher::start(
            dir.path(),
            RunFilePattern::new("mpd").unwrap(),
            binder,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        let data_file = dir.path().join("mpd_x_1.data");
        std::fs::write(&data_file, b"").unwrap();

        let handle = watcher.handle();
        for _ in 0..50 {
            std::thread::sleep(Duration::from_millis(100));
            handle.flush().unwrap();
            if !finalizer.calls().is_empty() {
                break;
            }
        }
        let calls = finalizer.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0.file_name(), data_file.file_name());
    }
}
