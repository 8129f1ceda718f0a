//! The calibration sequence.
//!
//! A calibration walks the subrun plan generated from the active topology. For every subrun
//! the pulser and the SiPM bias supplies are reconfigured, then the run is toggled around a
//! pulser exposure. Bias monitoring is suspended for the whole sequence and resumed exactly
//! once afterwards, on success and on failure.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use super::config::{CalibrationConfig, Config};
use super::config_store::{ConfigKind, ConfigStore};
use super::constants::CALIBRATION_DATA_STREAM;
use super::error::{ConfigError, RemoteError, SequencerError};
use super::generator::{
    bias_module_file, generate_subrun_configs, BiasConfigMaker, ConfigGenerator,
    PulserConfigMaker, SubrunConfig,
};
use super::remote::{with_retries, RemoteExecutor};
use super::run_context::{CalibrationState, CalibrationStatus, RunContext, RunContextStore};
use super::run_info::{local_now, RunInfo};
use super::signal::{Signal, SignalRelay};
use super::topology::Topology;
use super::watcher::PendingFlush;

const CALIBRATION_INSTANCE: &str = "calibration";

/// Time source of the sequencer. Injected so tests don't wait.
pub trait Clock: Send + Sync {
    fn sleep(&self, duration: Duration);
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }

    fn now(&self) -> OffsetDateTime {
        local_now()
    }
}

/// Everything outside the process the sequencer talks to
#[derive(Clone)]
pub struct Collaborators {
    pub config_store: Arc<dyn ConfigStore>,
    pub remote: Arc<dyn RemoteExecutor>,
    pub relay: Arc<dyn SignalRelay>,
    pub flush: Arc<dyn PendingFlush>,
    pub clock: Arc<dyn Clock>,
}

/// Resumes bias monitoring when dropped, unless `resume` already did
struct MonitoringGuard<'a> {
    sequencer: &'a CalibrationSequencer,
    resumed: bool,
}

impl<'a> MonitoringGuard<'a> {
    fn suspend(sequencer: &'a CalibrationSequencer) -> Result<Self, RemoteError> {
        let cal = &sequencer.calibration;
        sequencer.remote_call(&cal.monitor_host, &cal.monitor_suspend_command)?;
        log::info!("Bias monitoring suspended on {}", cal.monitor_host);
        Ok(Self {
            sequencer,
            resumed: false,
        })
    }

    fn resume(mut self) -> Result<(), RemoteError> {
        self.resumed = true;
        self.resume_monitoring()
    }

    fn resume_monitoring(&self) -> Result<(), RemoteError> {
        let cal = &self.sequencer.calibration;
        self.sequencer
            .remote_call(&cal.monitor_host, &cal.monitor_resume_command)?;
        log::info!("Bias monitoring resumed on {}", cal.monitor_host);
        Ok(())
    }
}

impl Drop for MonitoringGuard<'_> {
    fn drop(&mut self) {
        if self.resumed {
            return;
        }
        self.resumed = true;
        if let Err(e) = self.resume_monitoring() {
            log::error!("Failed to resume bias monitoring: {e}");
        }
    }
}

pub struct CalibrationSequencer {
    calibration: CalibrationConfig,
    data_dir: PathBuf,
    store: RunContextStore,
    collaborators: Collaborators,
    pulser: Box<dyn ConfigGenerator>,
    bias: Box<dyn ConfigGenerator>,
}

impl CalibrationSequencer {
    /// Cancellation requests reach the sequence through the store, see
    /// [`RunContextStore::request_cancel`]
    pub fn new(config: &Config, store: RunContextStore, collaborators: Collaborators) -> Self {
        Self {
            calibration: config.calibration.clone(),
            data_dir: config.data_dir.clone(),
            store,
            collaborators,
            pulser: Box::new(PulserConfigMaker::from_config(&config.calibration)),
            bias: Box::new(BiasConfigMaker::from_config(&config.calibration)),
        }
    }

    /// Replace the default config generators
    pub fn with_generators(
        mut self,
        pulser: Box<dyn ConfigGenerator>,
        bias: Box<dyn ConfigGenerator>,
    ) -> Self {
        self.pulser = pulser;
        self.bias = bias;
        self
    }

    /// Run the whole sequence. Returns the path of the run summary. The calibration status is
    /// back to Idle when this returns, whatever the outcome.
    pub fn run(&self) -> Result<PathBuf, SequencerError> {
        let result = self.run_sequence();
        match &result {
            Ok(path) => log::info!("Calibration complete, summary at {}", path.to_string_lossy()),
            Err(e) => log::error!("Calibration failed: {e}"),
        }
        self.store.finish_calibration();
        result
    }

    fn run_sequence(&self) -> Result<PathBuf, SequencerError> {
        self.set_status(CalibrationState::Preparing, 0, 0);
        let (version, topology) = self.load_active_topology()?;
        let subruns =
            generate_subrun_configs(self.pulser.as_ref(), self.bias.as_ref(), &topology)?;
        let total = subruns.len();
        log::info!("Calibration with topology {version}: {total} subruns");

        let mut info = RunInfo::new(&self.data_dir, &version);
        let guard = MonitoringGuard::suspend(self)?;
        self.set_status(CalibrationState::MonitoringSuspended, 0, total);
        let looped = self.run_subruns(&subruns, &topology, &mut info);

        self.set_status(CalibrationState::ResumingMonitoring, total, total);
        let resumed = guard.resume();

        self.set_status(CalibrationState::Finalizing, total, total);
        self.flush_pending();
        looped?;
        resumed?;
        Ok(info.write(&self.data_dir, self.collaborators.clock.now())?)
    }

    fn load_active_topology(&self) -> Result<(String, Topology), SequencerError> {
        let version = self
            .collaborators
            .config_store
            .active_version(ConfigKind::Topology)?
            .ok_or(ConfigError::NoActiveTopology)?;
        let path = self.calibration.topology_file(&version);
        let topology = Topology::load(&path, self.calibration.bias_modules)?;
        Ok((version, topology))
    }

    fn run_subruns(
        &self,
        subruns: &[SubrunConfig],
        topology: &Topology,
        info: &mut RunInfo,
    ) -> Result<(), SequencerError> {
        let total = subruns.len();
        for (index, config) in subruns.iter().enumerate() {
            // Subruns are numbered from 1, like their configuration files
            let subrun = index + 1;
            self.check_cancelled(subrun)?;
            log::info!("Subrun {subrun}/{total}");

            self.set_status(CalibrationState::Configuring, subrun, total);
            self.configure_pulser(config)?;
            self.configure_bias(config, subrun)?;

            self.set_status(CalibrationState::Exposing, subrun, total);
            self.expose(subrun)?;
            info.record_subrun(subrun, config, topology, self.calibration.default_voltage)?;
        }
        Ok(())
    }

    fn configure_pulser(&self, config: &SubrunConfig) -> Result<(), SequencerError> {
        let cal = &self.calibration;
        self.remote_copy(
            &cal.pulser_host,
            &[config.pulser_config.clone()],
            &cal.pulser_remote_dir,
        )?;
        let remote_file = remote_path(&cal.pulser_remote_dir, &config.pulser_config);
        let command = cal.pulser_configure_command.replace("{file}", &remote_file);
        self.remote_call(&cal.pulser_host, &command)?;
        Ok(())
    }

    fn configure_bias(&self, config: &SubrunConfig, subrun: usize) -> Result<(), SequencerError> {
        let cal = &self.calibration;
        for bias_host in cal.bias_hosts.iter() {
            let tables: Vec<PathBuf> = bias_host
                .modules
                .iter()
                .map(|m| config.bias_config.join(bias_module_file(*m)))
                .collect();
            self.remote_copy(&bias_host.host, &tables, &bias_host.remote_dir)?;
            self.remote_call(&bias_host.host, &cal.bias_configure_command)?;
            self.wait_for_bias_ready(&bias_host.host, subrun)?;
        }
        Ok(())
    }

    /// Poll the bias controller until it reports ready. A round is `attempts` polls with
    /// backoff; every round after the first starts with a service restart.
    fn wait_for_bias_ready(&self, host: &str, subrun: usize) -> Result<(), SequencerError> {
        let cal = &self.calibration;
        let readiness = &cal.readiness;
        let max_interval = readiness
            .max_poll_interval_ms
            .max(readiness.poll_interval_ms) as f64;
        for round in 0..=readiness.max_restarts {
            if round > 0 {
                log::warn!(
                    "{host} not ready, restarting its service ({round}/{})",
                    readiness.max_restarts
                );
                self.remote_call(host, &cal.bias_restart_command)?;
            }
            let mut interval = readiness.poll_interval_ms as f64;
            for attempt in 1..=readiness.attempts {
                self.check_cancelled(subrun)?;
                match self.collaborators.remote.execute(
                    host,
                    &cal.bias_status_command,
                    cal.remote_timeout(),
                ) {
                    Ok(response) if response.contains(&cal.bias_ready_token) => {
                        log::info!("{host} ready after {attempt} polls");
                        return Ok(());
                    }
                    Ok(response) => log::debug!("{host} not ready: {}", response.trim()),
                    Err(e) if e.is_timeout() => log::warn!("{e}"),
                    Err(e) => return Err(e.into()),
                }
                self.collaborators
                    .clock
                    .sleep(Duration::from_millis(interval as u64));
                interval = (interval * readiness.backoff_factor).min(max_interval);
            }
        }
        Err(SequencerError::HardwareNotReady {
            host: host.to_string(),
            attempts: readiness.attempts * (readiness.max_restarts + 1),
            restarts: readiness.max_restarts,
        })
    }

    /// Toggle the run around one pulser exposure. The stop signal is sent even if the
    /// trigger fails.
    fn expose(&self, subrun: usize) -> Result<(), SequencerError> {
        let cal = &self.calibration;
        let context = RunContext::new(
            cal.run_number,
            subrun as u32,
            CALIBRATION_DATA_STREAM,
            CALIBRATION_INSTANCE,
        );
        self.store.start_run(context);
        if let Err(e) = self.collaborators.relay.send(Signal::Start) {
            self.store.stop_run();
            return Err(e.into());
        }

        let triggered = self.trigger();
        let stopped = self.collaborators.relay.send(Signal::Stop);
        self.store.stop_run();
        triggered?;
        stopped?;
        Ok(())
    }

    fn trigger(&self) -> Result<(), SequencerError> {
        let cal = &self.calibration;
        let clock = &self.collaborators.clock;
        clock.sleep(Duration::from_millis(cal.settle_ms + cal.pulser_period_ms));
        let command = cal
            .pulser_trigger_command
            .replace("{duration}", &cal.trigger_duration_s.to_string());
        // The trigger runs for the whole exposure
        let timeout = cal.remote_timeout() + Duration::from_secs(cal.trigger_duration_s);
        with_retries(cal.remote_retries, || {
            self.collaborators
                .remote
                .execute(&cal.pulser_host, &command, timeout)
        })?;
        Ok(())
    }

    fn flush_pending(&self) {
        match self.collaborators.flush.flush_pending() {
            Ok(Some(path)) => log::info!("Flushed {}", path.to_string_lossy()),
            Ok(None) => (),
            Err(e) => log::error!("Failed to flush the pending file: {e}"),
        }
    }

    fn check_cancelled(&self, subrun: usize) -> Result<(), SequencerError> {
        if self.store.is_cancel_requested() {
            log::warn!("Calibration cancelled at subrun {subrun}");
            return Err(SequencerError::Cancelled(subrun));
        }
        Ok(())
    }

    fn remote_call(&self, host: &str, command: &str) -> Result<String, RemoteError> {
        let timeout = self.calibration.remote_timeout();
        with_retries(self.calibration.remote_retries, || {
            self.collaborators.remote.execute(host, command, timeout)
        })
    }

    fn remote_copy(
        &self,
        host: &str,
        files: &[PathBuf],
        remote_dir: &str,
    ) -> Result<(), RemoteError> {
        let timeout = self.calibration.remote_timeout();
        with_retries(self.calibration.remote_retries, || {
            self.collaborators
                .remote
                .copy_to(host, files, remote_dir, timeout)
        })
    }

    fn set_status(&self, state: CalibrationState, subrun: usize, total: usize) {
        self.store
            .set_calibration(CalibrationStatus::new(state, subrun, total));
    }
}

fn remote_path(remote_dir: &str, local: &Path) -> String {
    let name = local
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    format!("{}/{name}", remote_dir.trim_end_matches('/'))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::BiasHostConfig;
    use crate::config_store::YamlConfigStore;
    use crate::error::{GeneratorError, SignalError, WatcherError};
    use crate::topology::tests::SMALL_TOPOLOGY;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tempfile::TempDir;

    pub(crate) type EventLog = Arc<Mutex<Vec<String>>>;

    fn events(log: &EventLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    /// Remote side scripted per test. Status polls are answered from a queue, READY once
    /// it runs dry. Commands containing `fail_on` exit non-zero.
    pub(crate) struct ScriptedRemote {
        pub log: EventLog,
        pub status: Mutex<VecDeque<Result<String, RemoteError>>>,
        pub fail_on: Option<String>,
    }

    impl ScriptedRemote {
        pub(crate) fn new(log: &EventLog) -> Self {
            Self {
                log: log.clone(),
                status: Mutex::new(VecDeque::new()),
                fail_on: None,
            }
        }
    }

    impl RemoteExecutor for ScriptedRemote {
        fn execute(
            &self,
            host: &str,
            command: &str,
            _timeout: Duration,
        ) -> Result<String, RemoteError> {
            self.log.lock().unwrap().push(format!("exec {host} {command}"));
            if let Some(fail) = &self.fail_on {
                if command.contains(fail.as_str()) {
                    return Err(RemoteError::Failed {
                        host: host.to_string(),
                        command: command.to_string(),
                        status: 1,
                        stderr: String::from("scripted failure"),
                    });
                }
            }
            if command == "status" {
                return self
                    .status
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(String::from("READY\n")));
            }
            Ok(String::new())
        }

        fn copy_to(
            &self,
            host: &str,
            files: &[PathBuf],
            remote_dir: &str,
            _timeout: Duration,
        ) -> Result<(), RemoteError> {
            self.log
                .lock()
                .unwrap()
                .push(format!("copy {host} {} {remote_dir}", files.len()));
            Ok(())
        }
    }

    pub(crate) struct RecordingRelay(pub EventLog);

    impl SignalRelay for RecordingRelay {
        fn send(&self, signal: Signal) -> Result<(), SignalError> {
            self.0.lock().unwrap().push(format!("signal {signal:?}"));
            Ok(())
        }
    }

    pub(crate) struct RecordingFlush(pub EventLog);

    impl PendingFlush for RecordingFlush {
        fn flush_pending(&self) -> Result<Option<PathBuf>, WatcherError> {
            self.0.lock().unwrap().push(String::from("flush"));
            Ok(None)
        }
    }

    #[derive(Default)]
    pub(crate) struct TestClock {
        pub sleeps: Mutex<Vec<Duration>>,
    }

    impl Clock for TestClock {
        fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
        }

        fn now(&self) -> OffsetDateTime {
            time::macros::datetime!(2024-05-01 12:00:00 UTC)
        }
    }

    struct FixedGenerator(usize);

    impl ConfigGenerator for FixedGenerator {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn generate(&self, _topology: &Topology) -> Result<Vec<PathBuf>, GeneratorError> {
            Ok((0..self.0).map(|i| PathBuf::from(i.to_string())).collect())
        }
    }

    /// A configuration pointing every directory into a temporary tree, with topology `v1`
    /// imported and active
    pub(crate) struct Bench {
        pub dir: TempDir,
        pub config: Config,
        pub config_store: Arc<YamlConfigStore>,
        pub log: EventLog,
        pub clock: Arc<TestClock>,
    }

    impl Bench {
        pub(crate) fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut config = Config::default();
            config.data_dir = dir.path().join("data");
            config.run_log_path = dir.path().join("run_log.jsonl");
            config.config_store_path = dir.path().join("store.yml");
            let cal = &mut config.calibration;
            cal.topology_dir = dir.path().join("moas");
            cal.pulser_config_dir = dir.path().join("pulser");
            cal.bias_config_dir = dir.path().join("bias");
            cal.bias_modules = 2;
            cal.pulser_host = String::from("pulser");
            cal.pulser_remote_dir = String::from("/cfg");
            cal.pulser_configure_command = String::from("pconf {file}");
            cal.pulser_trigger_command = String::from("trigger {duration}");
            cal.bias_hosts = vec![BiasHostConfig {
                host: String::from("bias"),
                modules: vec![0, 1],
                remote_dir: String::from("/csv"),
            }];
            cal.bias_configure_command = String::from("bconf");
            cal.bias_status_command = String::from("status");
            cal.bias_restart_command = String::from("restart");
            cal.monitor_host = String::from("monitor");
            cal.monitor_suspend_command = String::from("suspend");
            cal.monitor_resume_command = String::from("resume");
            cal.run_number = 77;
            cal.trigger_duration_s = 3;
            cal.readiness.poll_interval_ms = 10;
            cal.readiness.max_poll_interval_ms = 30;
            cal.readiness.backoff_factor = 2.0;
            cal.readiness.attempts = 2;
            cal.readiness.max_restarts = 1;
            cal.remote_retries = 1;

            std::fs::create_dir_all(&config.data_dir).unwrap();
            std::fs::create_dir_all(&cal.topology_dir).unwrap();
            let topology_file = cal.topology_file("v1");
            std::fs::write(&topology_file, SMALL_TOPOLOGY).unwrap();
            let config_store = Arc::new(YamlConfigStore::open(&config.config_store_path).unwrap());
            config_store
                .import_configuration(ConfigKind::Topology, &topology_file, "test")
                .unwrap();
            config_store
                .set_active_version(ConfigKind::Topology, "v1")
                .unwrap();

            Self {
                dir,
                config,
                config_store,
                log: Arc::new(Mutex::new(vec![])),
                clock: Arc::new(TestClock::default()),
            }
        }

        pub(crate) fn collaborators(&self, remote: ScriptedRemote) -> Collaborators {
            Collaborators {
                config_store: self.config_store.clone(),
                remote: Arc::new(remote),
                relay: Arc::new(RecordingRelay(self.log.clone())),
                flush: Arc::new(RecordingFlush(self.log.clone())),
                clock: self.clock.clone(),
            }
        }

        fn sequencer(
            &self,
            remote: ScriptedRemote,
            store: &RunContextStore,
        ) -> CalibrationSequencer {
            CalibrationSequencer::new(&self.config, store.clone(), self.collaborators(remote))
        }

        fn summaries(&self) -> Vec<PathBuf> {
            std::fs::read_dir(&self.config.data_dir)
                .unwrap()
                .map(|e| e.unwrap().path())
                .filter(|p| p.to_string_lossy().ends_with("_run_summary.json"))
                .collect()
        }
    }

    fn count(events: &[String], needle: &str) -> usize {
        events.iter().filter(|e| e.as_str() == needle).count()
    }

    #[test]
    fn test_full_sequence_in_order() {
        let bench = Bench::new();
        let store = RunContextStore::new();
        let sequencer = bench.sequencer(ScriptedRemote::new(&bench.log), &store);
        let summary = sequencer.run().unwrap();

        let events = events(&bench.log);
        let subrun_cycle = [
            "copy pulser 1 /cfg",
            "exec pulser pconf /cfg/{n}.json",
            "copy bias 2 /csv",
            "exec bias bconf",
            "exec bias status",
            "signal Start",
            "exec pulser trigger 3",
            "signal Stop",
        ];
        let mut expected = vec![String::from("exec monitor suspend")];
        for n in 1..=2 {
            expected.extend(subrun_cycle.iter().map(|e| e.replace("{n}", &n.to_string())));
        }
        expected.push(String::from("exec monitor resume"));
        expected.push(String::from("flush"));
        assert_eq!(events, expected);

        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&summary).unwrap()).unwrap();
        assert_eq!(
            summary.file_name().unwrap().to_str().unwrap(),
            "20240501_120000_run_summary.json"
        );
        assert_eq!(written["topology"], "v1");
        assert_eq!(written["subruns"].as_array().unwrap().len(), 2);
        assert_eq!(written["subruns"][1]["subrun"], 2);
        assert_eq!(written["subruns"][1]["active_chans"], serde_json::json!([[0, 2]]));

        let context = store.get().unwrap();
        assert_eq!(context.run, 77);
        assert_eq!(context.subrun, 2);
        assert_eq!(context.data_stream, CALIBRATION_DATA_STREAM);
        assert!(!store.is_run_active());
        assert!(store.calibration().is_idle());
    }

    #[test]
    fn test_readiness_backoff() {
        let bench = Bench::new();
        let remote = ScriptedRemote::new(&bench.log);
        {
            let mut status = remote.status.lock().unwrap();
            status.push_back(Ok(String::from("BUSY")));
            status.push_back(Err(RemoteError::Timeout {
                host: String::from("bias"),
                command: String::from("status"),
                after: Duration::from_secs(1),
            }));
            status.push_back(Ok(String::from("BUSY")));
        }
        let store = RunContextStore::new();
        bench.sequencer(remote, &store).run().unwrap();

        let events = events(&bench.log);
        assert_eq!(count(&events, "exec bias restart"), 1);
        assert_eq!(count(&events, "exec bias status"), 4 + 1);
        let sleeps = bench.clock.sleeps.lock().unwrap().clone();
        let ms = |v: u64| Duration::from_millis(v);
        // Round one doubles, restart resets the interval
        assert_eq!(&sleeps[..3], &[ms(10), ms(20), ms(10)]);
    }

    #[test]
    fn test_hardware_not_ready_is_bounded() {
        let bench = Bench::new();
        let remote = ScriptedRemote::new(&bench.log);
        {
            let mut status = remote.status.lock().unwrap();
            for _ in 0..10 {
                status.push_back(Ok(String::from("BUSY")));
            }
        }
        let store = RunContextStore::new();
        let result = bench.sequencer(remote, &store).run();
        assert!(matches!(
            result,
            Err(SequencerError::HardwareNotReady {
                attempts: 4,
                restarts: 1,
                ..
            })
        ));

        let events = events(&bench.log);
        assert_eq!(count(&events, "exec monitor suspend"), 1);
        assert_eq!(count(&events, "exec monitor resume"), 1);
        assert_eq!(count(&events, "signal Start"), 0);
        assert_eq!(events.last().unwrap(), "flush");
        assert!(bench.summaries().is_empty());
        assert!(store.calibration().is_idle());
    }

    #[test]
    fn test_trigger_failure_still_stops_and_resumes() {
        let bench = Bench::new();
        let mut remote = ScriptedRemote::new(&bench.log);
        remote.fail_on = Some(String::from("trigger"));
        let store = RunContextStore::new();
        let result = bench.sequencer(remote, &store).run();
        assert!(matches!(
            result,
            Err(SequencerError::RemoteError(RemoteError::Failed { .. }))
        ));

        let events = events(&bench.log);
        let start = events.iter().position(|e| e == "signal Start").unwrap();
        assert_eq!(events[start + 2], "signal Stop");
        assert_eq!(count(&events, "signal Start"), 1);
        assert_eq!(count(&events, "exec monitor resume"), 1);
        assert!(!store.is_run_active());
        assert!(bench.summaries().is_empty());
    }

    #[test]
    fn test_cancelled_before_first_subrun() {
        let bench = Bench::new();
        let store = RunContextStore::new();
        assert!(store.try_begin_calibration());
        assert!(store.request_cancel());
        let sequencer = bench.sequencer(ScriptedRemote::new(&bench.log), &store);
        assert!(matches!(sequencer.run(), Err(SequencerError::Cancelled(1))));
        assert!(store.calibration().is_idle());
        assert!(!store.is_cancel_requested());
        let events = events(&bench.log);
        assert_eq!(
            events,
            vec!["exec monitor suspend", "exec monitor resume", "flush"]
        );
    }

    #[test]
    fn test_mismatched_generators_never_suspend() {
        let bench = Bench::new();
        let store = RunContextStore::new();
        let sequencer = bench
            .sequencer(ScriptedRemote::new(&bench.log), &store)
            .with_generators(Box::new(FixedGenerator(3)), Box::new(FixedGenerator(2)));
        assert!(matches!(
            sequencer.run(),
            Err(SequencerError::GeneratorError(GeneratorError::ConfigError(
                ConfigError::MismatchedGenerators { .. }
            )))
        ));
        assert!(events(&bench.log).is_empty());
        assert!(store.calibration().is_idle());
    }

    #[test]
    fn test_no_active_topology() {
        let bench = Bench::new();
        let config_store: Arc<dyn ConfigStore> = Arc::new(
            YamlConfigStore::open(&bench.dir.path().join("empty_store.yml")).unwrap(),
        );
        let mut collaborators = bench.collaborators(ScriptedRemote::new(&bench.log));
        collaborators.config_store = config_store;
        let sequencer =
            CalibrationSequencer::new(&bench.config, RunContextStore::new(), collaborators);
        assert!(matches!(
            sequencer.run(),
            Err(SequencerError::ConfigError(ConfigError::NoActiveTopology))
        ));
    }

    #[test]
    fn test_remote_path() {
        assert_eq!(remote_path("/cfg/", Path::new("/local/3.json")), "/cfg/3.json");
        assert_eq!(remote_path("~/cfg", Path::new("3.json")), "~/cfg/3.json");
    }
}
