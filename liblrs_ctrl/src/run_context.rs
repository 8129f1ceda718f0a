use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

/// Descriptor of the active run (or calibration subrun), captured at run start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub run: u32,
    #[serde(default)]
    pub subrun: u32,
    pub data_stream: String,
    pub run_starting_instance: String,
    /// External subsystem configurations as they were when the run started
    #[serde(default)]
    pub snapshots: BTreeMap<String, serde_json::Value>,
}

impl RunContext {
    pub fn new(run: u32, subrun: u32, data_stream: &str, run_starting_instance: &str) -> Self {
        Self {
            run,
            subrun,
            data_stream: data_stream.to_string(),
            run_starting_instance: run_starting_instance.to_string(),
            snapshots: BTreeMap::new(),
        }
    }
}

/// Phases of a calibration sequence, as reported on the status endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationState {
    #[default]
    Idle,
    Preparing,
    MonitoringSuspended,
    Configuring,
    Exposing,
    ResumingMonitoring,
    Finalizing,
}

/// Progress of the calibration sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStatus {
    pub state: CalibrationState,
    pub subrun: usize,
    pub total: usize,
}

impl CalibrationStatus {
    pub fn new(state: CalibrationState, subrun: usize, total: usize) -> Self {
        Self {
            state,
            subrun,
            total,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == CalibrationState::Idle
    }
}

/// Snapshot of everything the store guards, for status reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub context: Option<RunContext>,
    pub run_active: bool,
    pub calibration: CalibrationStatus,
}

#[derive(Debug, Default)]
struct StoreInner {
    context: Option<RunContext>,
    run_active: bool,
    calibration: CalibrationStatus,
    cancel_requested: bool,
}

/// The single mutable slot holding the active run descriptor.
///
/// Cloning the store clones the handle, not the slot. The same lock guards the calibration
/// bookkeeping so a status read never sees a context from one subrun and the progress of another.
#[derive(Debug, Clone, Default)]
pub struct RunContextStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl RunContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Every write is a whole-value replacement, so a poisoned guard is still consistent
    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Replace the active context unconditionally, returning the previous one
    pub fn set(&self, context: RunContext) -> Option<RunContext> {
        self.lock().context.replace(context)
    }

    pub fn get(&self) -> Option<RunContext> {
        self.lock().context.clone()
    }

    /// Replace the context and mark the run as started. Returns the previous context and
    /// whether that previous run was still active (never stopped).
    pub fn start_run(&self, context: RunContext) -> (Option<RunContext>, bool) {
        let mut inner = self.lock();
        let was_active = inner.run_active;
        inner.run_active = true;
        (inner.context.replace(context), was_active)
    }

    /// Mark the run as stopped. The context is kept, the pending file still needs it.
    pub fn stop_run(&self) -> bool {
        let mut inner = self.lock();
        std::mem::replace(&mut inner.run_active, false)
    }

    pub fn is_run_active(&self) -> bool {
        self.lock().run_active
    }

    pub fn set_calibration(&self, status: CalibrationStatus) {
        self.lock().calibration = status;
    }

    pub fn calibration(&self) -> CalibrationStatus {
        self.lock().calibration.clone()
    }

    /// Atomically move the calibration bookkeeping out of Idle. Returns false if a sequence
    /// already owns it. A new sequence starts with no cancellation pending.
    pub fn try_begin_calibration(&self) -> bool {
        let mut inner = self.lock();
        if !inner.calibration.is_idle() {
            return false;
        }
        inner.calibration = CalibrationStatus::new(CalibrationState::Preparing, 0, 0);
        inner.cancel_requested = false;
        true
    }

    /// Return the bookkeeping to Idle and drop any cancellation aimed at the finished sequence
    pub fn finish_calibration(&self) {
        let mut inner = self.lock();
        inner.calibration = CalibrationStatus::default();
        inner.cancel_requested = false;
    }

    /// Ask the running sequence to stop. Returns false, and records nothing, when no
    /// sequence is running.
    pub fn request_cancel(&self) -> bool {
        let mut inner = self.lock();
        if inner.calibration.is_idle() {
            return false;
        }
        inner.cancel_requested = true;
        true
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.lock().cancel_requested
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.lock();
        StoreSnapshot {
            context: inner.context.clone(),
            run_active: inner.run_active,
            calibration: inner.calibration.clone(),
        }
    }
}

/// Read every configured external subsystem JSON file. Files that cannot be read or parsed
/// are logged and left out of the snapshot.
pub fn capture_snapshots(sources: &BTreeMap<String, PathBuf>) -> BTreeMap<String, serde_json::Value> {
    let mut snapshots = BTreeMap::new();
    for (name, path) in sources.iter() {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Could not read {name} snapshot at {path:?}: {e}");
                continue;
            }
        };
        match serde_json::from_str(&contents) {
            Ok(value) => {
                snapshots.insert(name.clone(), value);
            }
            Err(e) => log::warn!("Could not parse {name} snapshot at {path:?}: {e}"),
        }
    }
    snapshots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_returns_previous_whole() {
        let store = RunContextStore::new();
        assert!(store.get().is_none());
        let mut first = RunContext::new(10, 1, "physics", "morcs");
        first
            .snapshots
            .insert(String::from("EvB"), serde_json::json!({"a": 1}));
        assert!(store.set(first.clone()).is_none());

        let second = RunContext::new(11, 0, "cosmics", "manual");
        let previous = store.set(second.clone()).unwrap();
        assert_eq!(previous, first);
        assert_eq!(store.get().unwrap(), second);
    }

    #[test]
    fn test_start_reports_unstopped_run() {
        let store = RunContextStore::new();
        let (prev, was_active) = store.start_run(RunContext::new(1, 0, "physics", "morcs"));
        assert!(prev.is_none());
        assert!(!was_active);
        let (prev, was_active) = store.start_run(RunContext::new(2, 0, "physics", "morcs"));
        assert_eq!(prev.unwrap().run, 1);
        assert!(was_active);
        assert!(store.stop_run());
        assert!(!store.stop_run());
        assert_eq!(store.get().unwrap().run, 2);
    }

    #[test]
    fn test_calibration_is_exclusive() {
        let store = RunContextStore::new();
        assert!(store.try_begin_calibration());
        assert!(!store.try_begin_calibration());
        store.set_calibration(CalibrationStatus::default());
        assert!(store.try_begin_calibration());
    }

    #[test]
    fn test_cancel_only_lands_on_a_running_sequence() {
        let store = RunContextStore::new();
        assert!(!store.request_cancel());
        assert!(!store.is_cancel_requested());

        assert!(store.try_begin_calibration());
        assert!(store.request_cancel());
        assert!(store.is_cancel_requested());
        store.finish_calibration();
        assert!(store.calibration().is_idle());
        assert!(!store.is_cancel_requested());
        assert!(!store.request_cancel());

        // A stale flag never survives into the next sequence
        store.set_calibration(CalibrationStatus::new(CalibrationState::Exposing, 1, 2));
        assert!(store.request_cancel());
        store.set_calibration(CalibrationStatus::default());
        assert!(store.try_begin_calibration());
        assert!(!store.is_cancel_requested());
    }

    #[test]
    fn test_clones_share_the_slot() {
        let store = RunContextStore::new();
        let handle = store.clone();
        let worker = std::thread::spawn(move || {
            handle.set(RunContext::new(5, 0, "physics", "morcs"));
        });
        worker.join().unwrap();
        assert_eq!(store.get().unwrap().run, 5);
    }

    #[test]
    fn test_capture_snapshots_skips_bad_files() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("evb.json");
        let bad = dir.path().join("rc.json");
        std::fs::write(&good, r#"{"threads": 4}"#).unwrap();
        std::fs::write(&bad, "not json").unwrap();
        let mut sources = BTreeMap::new();
        sources.insert(String::from("EvB"), good);
        sources.insert(String::from("RunControl"), bad);
        sources.insert(String::from("Adc64_sum"), dir.path().join("missing.json"));
        let snapshots = capture_snapshots(&sources);
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots["EvB"]["threads"], 4);
    }
}
