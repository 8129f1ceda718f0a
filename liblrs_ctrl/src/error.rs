use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::constants::RECORD_TIMESTAMP_SPAN;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config has an invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error("Config environment override {0} could not be parsed: {1}")]
    BadEnvOverride(&'static str, String),
    #[error("Pulser generator produced {pulser} configurations but the bias generator produced {bias}")]
    MismatchedGenerators { pulser: usize, bias: usize },
    #[error("No active topology version is set in the configuration store")]
    NoActiveTopology,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Pulser channel {0} is outside of the allowed range 1..=16")]
    PulserChannel(u16),
    #[error("Resistor setting {0} is outside of the allowed range 0..=255")]
    ResistorSetting(u16),
    #[error("Bias channel {0} is outside of the allowed range 1..=128")]
    BiasChannel(u16),
    #[error("Bias module {0} is not served by any configured bias controller")]
    BiasModule(u16),
    #[error("Bias channel (module {0}, channel {1}) appears more than once in the topology")]
    DuplicateBiasChannel(u16, u16),
    #[error("LED group id {0} does not follow the 1CCSSSPPP encoding")]
    LedGroupEncoding(u32),
    #[error("Bias channel (module {0}, channel {1}) is not mapped to an ADC channel")]
    UnmappedBiasChannel(u16, u16),
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Timestamp scan failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Record at offset {offset} is truncated: {span} bytes are required from the sync word but the file is {file_size} bytes", span=RECORD_TIMESTAMP_SPAN)]
    TruncatedRecord { offset: u64, file_size: u64 },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilenameError {
    #[error("File name {0} does not match any known data file pattern")]
    UnknownPattern(String),
    #[error("Path {0:?} has no valid UTF-8 file name")]
    NoFileName(PathBuf),
    #[error("File name pattern failed to compile: {0}")]
    BadPattern(String),
}

#[derive(Debug, Error)]
pub enum ConfigStoreError {
    #[error("Configuration store failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Configuration store failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Configuration version {0} has never been imported")]
    UnknownVersion(String),
    #[error("File {0:?} is not a valid {1} configuration file name")]
    BadFileName(PathBuf, &'static str),
    #[error("Configuration file {0:?} does not exist")]
    MissingFile(PathBuf),
    #[error("Unknown configuration kind {0}; expected topology (MOAS) or threshold (FOAS)")]
    UnknownKind(String),
    #[error("Configuration store lock was poisoned")]
    Poisoned,
}

#[derive(Debug, Error)]
pub enum RunLogError {
    #[error("Run log failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Run log failed to (de)serialize a row: {0}")]
    SerdeError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("Metadata failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Metadata failed due to timestamp scan error: {0}")]
    ScanError(#[from] ScanError),
    #[error("Metadata failed due to file name error: {0}")]
    FilenameError(#[from] FilenameError),
    #[error("Metadata failed due to configuration store error: {0}")]
    StoreError(#[from] ConfigStoreError),
    #[error("Metadata failed due to run log error: {0}")]
    RunLogError(#[from] RunLogError),
    #[error("Metadata failed to serialize the sidecar: {0}")]
    SerdeError(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Topology failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Topology failed to parse an integer: {0}")]
    ParsingError(#[from] std::num::ParseIntError),
    #[error("Topology failed to parse a voltage: {0}")]
    VoltageError(#[from] std::num::ParseFloatError),
    #[error("Topology was given a file with the incorrect format at line {0}; most likely the number of columns is incorrect")]
    BadFileFormat(usize),
    #[error("Topology failed validation: {0}")]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Config generator failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config generator failed to serialize JSON: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Config generator failed due to topology error: {0}")]
    TopologyError(#[from] TopologyError),
    #[error("Config generator failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
}

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Remote command `{command}` on {host} exited with status {status}: {stderr}")]
    Failed {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("Remote command `{command}` on {host} timed out after {after:?}")]
    Timeout {
        host: String,
        command: String,
        after: Duration,
    },
    #[error("Remote command failed to launch due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl RemoteError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("Signal relay failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Signal relay sent {sent} of {expected} bytes")]
    ShortSend { sent: usize, expected: usize },
}

#[derive(Debug, Error)]
pub enum RunInfoError {
    #[error("RunInfo failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("RunInfo failed to serialize JSON: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("RunInfo failed to parse bias config {0:?}: {1}")]
    BadBiasConfig(PathBuf, String),
    #[error("RunInfo failed validation: {0}")]
    Invalid(#[from] ValidationError),
    #[error("RunInfo failed to format a timestamp: {0}")]
    TimeFormat(#[from] time::error::Format),
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("File watcher failed due to notify error: {0}")]
    NotifyError(#[from] notify::Error),
    #[error("File watcher failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("File watcher coordinator is no longer running")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum SequencerError {
    #[error("Calibration failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Calibration failed due to config generator error: {0}")]
    GeneratorError(#[from] GeneratorError),
    #[error("Calibration failed due to remote command error: {0}")]
    RemoteError(#[from] RemoteError),
    #[error("Calibration failed due to signal error: {0}")]
    SignalError(#[from] SignalError),
    #[error("Calibration failed due to topology error: {0}")]
    TopologyError(#[from] TopologyError),
    #[error("Calibration failed due to configuration store error: {0}")]
    StoreError(#[from] ConfigStoreError),
    #[error("Calibration failed due to RunInfo error: {0}")]
    RunInfoError(#[from] RunInfoError),
    #[error("Bias controller {host} was not ready after {attempts} polls and {restarts} restarts")]
    HardwareNotReady {
        host: String,
        attempts: u32,
        restarts: u32,
    },
    #[error("Calibration was cancelled before subrun {0}")]
    Cancelled(usize),
}

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Control failed due to signal error: {0}")]
    SignalError(#[from] SignalError),
    #[error("Control failed due to file watcher error: {0}")]
    WatcherError(#[from] WatcherError),
    #[error("Control failed due to calibration error: {0}")]
    SequencerError(#[from] SequencerError),
    #[error("A calibration sequence is already running")]
    CalibrationBusy,
    #[error("No calibration sequence is running")]
    NoCalibration,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Client failed due to HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Server rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Server failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Server failed due to file watcher error: {0}")]
    WatcherError(#[from] WatcherError),
    #[error("Server failed due to configuration store error: {0}")]
    StoreError(#[from] ConfigStoreError),
    #[error("Server failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Server failed due to file name error: {0}")]
    FilenameError(#[from] FilenameError),
}
