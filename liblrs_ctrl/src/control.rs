use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::config::Config;
use super::error::ControlError;
use super::run_context::{capture_snapshots, RunContext, RunContextStore, StoreSnapshot};
use super::sequencer::{CalibrationSequencer, Collaborators};
use super::signal::Signal;

/// Run descriptor as posted to the start run and reset metadata commands
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    pub run: u32,
    #[serde(default)]
    pub subrun: u32,
    #[serde(default)]
    pub data_stream: Option<String>,
    #[serde(default = "default_instance")]
    pub run_starting_instance: String,
}

fn default_instance() -> String {
    String::from("manual")
}

impl RunRequest {
    pub fn new(run: u32) -> Self {
        Self {
            run,
            subrun: 0,
            data_stream: None,
            run_starting_instance: default_instance(),
        }
    }
}

/// Outcome of a stop: the file finalized by the flush, if there was one pending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopReply {
    pub finalized: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationReply {
    pub summary: PathBuf,
}

/// The operations of the control surface, independent of how they are invoked
pub struct Controller {
    config: Config,
    store: RunContextStore,
    collaborators: Collaborators,
}

impl Controller {
    pub fn new(config: Config, store: RunContextStore, collaborators: Collaborators) -> Self {
        Self {
            config,
            store,
            collaborators,
        }
    }

    pub fn store(&self) -> &RunContextStore {
        &self.store
    }

    fn context_for(&self, request: &RunRequest) -> RunContext {
        let data_stream = request
            .data_stream
            .as_deref()
            .unwrap_or(&self.config.default_data_stream);
        RunContext::new(
            request.run,
            request.subrun,
            data_stream,
            &request.run_starting_instance,
        )
    }

    /// Replace the run context, then tell the readout to start
    pub fn start_run(&self, request: &RunRequest) -> Result<StoreSnapshot, ControlError> {
        if !self.store.calibration().is_idle() {
            return Err(ControlError::CalibrationBusy);
        }
        let mut context = self.context_for(request);
        context.snapshots = capture_snapshots(&self.config.snapshots);
        let (previous, was_active) = self.store.start_run(context);
        if was_active {
            if let Some(previous) = previous {
                log::warn!(
                    "Run {} (subrun {}) was never stopped and is replaced by run {}",
                    previous.run,
                    previous.subrun,
                    request.run
                );
            }
        }
        self.collaborators.relay.send(Signal::Start)?;
        log::info!("Run {} started", request.run);
        Ok(self.store.snapshot())
    }

    /// Tell the readout to stop, let it drain, then finalize the last file. A calibration
    /// owns the run toggling while it is active.
    pub fn stop_run(&self) -> Result<StopReply, ControlError> {
        if !self.store.calibration().is_idle() {
            return Err(ControlError::CalibrationBusy);
        }
        self.collaborators.relay.send(Signal::Stop)?;
        if !self.store.stop_run() {
            log::warn!("Stop requested but no run was active");
        }
        self.collaborators.clock.sleep(self.config.stop_drain());
        let finalized = self.collaborators.flush.flush_pending()?;
        log::info!("Run stopped");
        Ok(StopReply { finalized })
    }

    /// Replace the run context without signalling the readout
    pub fn reset_metadata(&self, request: &RunRequest) -> StoreSnapshot {
        let previous = self.store.set(self.context_for(request));
        log::info!(
            "Run context reset to run {} (was {:?})",
            request.run,
            previous.map(|p| p.run)
        );
        self.store.snapshot()
    }

    /// Run a calibration sequence to completion on the calling thread
    pub fn start_calibration(&self) -> Result<CalibrationReply, ControlError> {
        if !self.store.try_begin_calibration() {
            return Err(ControlError::CalibrationBusy);
        }
        let sequencer =
            CalibrationSequencer::new(&self.config, self.store.clone(), self.collaborators.clone());
        Ok(CalibrationReply {
            summary: sequencer.run()?,
        })
    }

    pub fn cancel_calibration(&self) -> Result<(), ControlError> {
        if !self.store.request_cancel() {
            return Err(ControlError::NoCalibration);
        }
        log::warn!("Calibration cancellation requested");
        Ok(())
    }

    pub fn status(&self) -> StoreSnapshot {
        self.store.snapshot()
    }
}
