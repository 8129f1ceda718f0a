use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::constants::DEFAULT_DATA_STREAM;
use super::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "LRS_CTRL_CONFIG";
pub const APP_HOST_ENV: &str = "LRS_CTRL_APP_HOST";
pub const APP_PORT_ENV: &str = "LRS_CTRL_APP_PORT";
pub const DATA_DIR_ENV: &str = "LRS_CTRL_DATA_DIR";
pub const DEFAULT_CONFIG_PATH: &str = "./lrs_ctrl.yml";

/// Structure representing the application configuration. Contains the control surface address,
/// the data/metadata locations and the calibration hardware description.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app_host: String,
    pub app_port: u16,
    pub data_dir: PathBuf,
    pub file_prefix: String,
    pub namespace: String,
    pub application_version: String,
    pub default_data_stream: String,
    pub run_log_path: PathBuf,
    pub config_store_path: PathBuf,
    pub stop_drain_ms: u64,
    pub signal: SignalConfig,
    /// External subsystem configuration files captured into the run context at run start
    pub snapshots: BTreeMap<String, PathBuf>,
    pub calibration: CalibrationConfig,
}

/// Where the DAQ start/stop datagrams go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    pub host: String,
    pub port: u16,
    pub start_message: String,
    pub stop_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub topology_dir: PathBuf,
    pub pulser_config_dir: PathBuf,
    pub bias_config_dir: PathBuf,
    pub default_voltage: f64,
    pub run_number: u32,
    pub bias_modules: u16,
    pub remote_user: String,
    pub pulser_host: String,
    pub pulser_remote_dir: String,
    /// `{file}` is replaced by the remote path of the pulser config
    pub pulser_configure_command: String,
    /// `{duration}` is replaced by the trigger duration in seconds
    pub pulser_trigger_command: String,
    pub bias_hosts: Vec<BiasHostConfig>,
    pub bias_configure_command: String,
    pub bias_status_command: String,
    pub bias_ready_token: String,
    pub bias_restart_command: String,
    pub monitor_host: String,
    pub monitor_suspend_command: String,
    pub monitor_resume_command: String,
    pub settle_ms: u64,
    pub pulser_period_ms: u64,
    pub trigger_duration_s: u64,
    pub readiness: ReadinessConfig,
    pub remote_timeout_s: u64,
    pub remote_retries: u32,
}

/// One bias-voltage controller and the supply modules it drives
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiasHostConfig {
    pub host: String,
    pub modules: Vec<u16>,
    pub remote_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub poll_interval_ms: u64,
    pub max_poll_interval_ms: u64,
    pub backoff_factor: f64,
    pub attempts: u32,
    pub max_restarts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_host: String::from("127.0.0.1"),
            app_port: 5000,
            data_dir: PathBuf::from("/data/LRS"),
            file_prefix: String::from("mpd"),
            namespace: String::from("neardet-2x2-lar-light"),
            application_version: String::from(env!("CARGO_PKG_VERSION")),
            default_data_stream: String::from(DEFAULT_DATA_STREAM),
            run_log_path: PathBuf::from("/data/LRS/lrs_run_log.jsonl"),
            config_store_path: PathBuf::from("/data/LRS_det_config/config_store.yml"),
            stop_drain_ms: 2000,
            signal: SignalConfig::default(),
            snapshots: BTreeMap::new(),
            calibration: CalibrationConfig::default(),
        }
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 6000,
            start_message: String::from("start_adc64"),
            stop_message: String::from("stop_adc64"),
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            topology_dir: PathBuf::from("/data/LRS_det_config/MOAS"),
            pulser_config_dir: PathBuf::from("/data/LRS_det_config/pulser_config"),
            bias_config_dir: PathBuf::from("/data/LRS_det_config/sipm_config"),
            default_voltage: 0.0,
            run_number: 0,
            bias_modules: 4,
            remote_user: String::from("pi"),
            pulser_host: String::from("acd-pulser01"),
            pulser_remote_dir: String::from("~/pulser/config"),
            pulser_configure_command: String::from("~/pulser/configure.sh {file}"),
            pulser_trigger_command: String::from("~/pulser/trigger.sh {duration}"),
            bias_hosts: vec![
                BiasHostConfig {
                    host: String::from("acd-sipmpsctrl01"),
                    modules: vec![0, 1],
                    remote_dir: String::from("~/supplr/Configuration_CSVs"),
                },
                BiasHostConfig {
                    host: String::from("acd-sipmpsctrl23"),
                    modules: vec![2, 3],
                    remote_dir: String::from("~/supplr/Configuration_CSVs"),
                },
            ],
            bias_configure_command: String::from(". ~/configure.sh"),
            bias_status_command: String::from("~/supplr/status.sh"),
            bias_ready_token: String::from("READY"),
            bias_restart_command: String::from("sudo systemctl restart supplr"),
            monitor_host: String::from("acd-sipmpsctrl01"),
            monitor_suspend_command: String::from("screen -S foo -X quit"),
            monitor_resume_command: String::from("screen -dmS foo ~/supplr/monitor.sh"),
            settle_ms: 5000,
            pulser_period_ms: 1000,
            trigger_duration_s: 60,
            readiness: ReadinessConfig::default(),
            remote_timeout_s: 30,
            remote_retries: 2,
        }
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            max_poll_interval_ms: 10000,
            backoff_factor: 1.0,
            attempts: 10,
            max_restarts: 2,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Read, apply environment overrides and validate. This is what the entry points use.
    pub fn load(config_path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read_config_file(config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Pick the configuration file: explicit path, then the environment, then the default
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        match std::env::var(CONFIG_PATH_ENV) {
            Ok(p) if !p.is_empty() => PathBuf::from(p),
            _ => PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }

    /// Write a template (default) configuration to the given path
    pub fn write_template(path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(&Self::default())?;
        std::fs::write(path, yaml_str)?;
        Ok(())
    }

    /// Apply overrides from the environment. The lookup is injected so tests don't touch
    /// the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(APP_HOST_ENV) {
            self.app_host = host;
        }
        if let Some(port) = lookup(APP_PORT_ENV) {
            self.app_port = port
                .parse()
                .map_err(|_| ConfigError::BadEnvOverride(APP_PORT_ENV, port))?;
        }
        if let Some(dir) = lookup(DATA_DIR_ENV) {
            self.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.app_port == 0 {
            return Err(invalid("app_port", "must be non-zero"));
        }
        if self.file_prefix.is_empty() {
            return Err(invalid("file_prefix", "must not be empty"));
        }
        let cal = &self.calibration;
        if cal.bias_modules == 0 {
            return Err(invalid("calibration.bias_modules", "must be at least 1"));
        }
        if cal.readiness.attempts == 0 {
            return Err(invalid("calibration.readiness.attempts", "must be at least 1"));
        }
        if cal.readiness.poll_interval_ms == 0 {
            return Err(invalid(
                "calibration.readiness.poll_interval_ms",
                "must be non-zero",
            ));
        }
        let factor = cal.readiness.backoff_factor;
        if factor.is_nan() || factor < 1.0 {
            return Err(invalid(
                "calibration.readiness.backoff_factor",
                "must be at least 1.0",
            ));
        }
        let mut claimed = HashSet::new();
        for bias_host in cal.bias_hosts.iter() {
            if bias_host.modules.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "calibration.bias_hosts",
                    reason: format!("{} serves no modules", bias_host.host),
                });
            }
            for module in bias_host.modules.iter() {
                if !claimed.insert(*module) {
                    return Err(ConfigError::InvalidValue {
                        field: "calibration.bias_hosts",
                        reason: format!("module {module} is claimed by more than one host"),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.app_host, self.app_port)
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.bind_address())
    }

    pub fn stop_drain(&self) -> Duration {
        Duration::from_millis(self.stop_drain_ms)
    }
}

impl SignalConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl CalibrationConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_secs(self.remote_timeout_s)
    }

    /// Get the path to the topology CSV for a given version tag
    pub fn topology_file(&self, version: &str) -> PathBuf {
        self.topology_dir
            .join(format!("{}{version}.csv", super::constants::TOPOLOGY_FILE_PREFIX))
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lrs_ctrl.yml");
        Config::write_template(&path).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.app_port, 5000);
        assert_eq!(config.calibration.bias_hosts.len(), 2);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("app_port: 8080\nfile_prefix: adc\n").unwrap();
        assert_eq!(config.app_port, 8080);
        assert_eq!(config.file_prefix, "adc");
        assert_eq!(config.signal.port, 6000);
        assert_eq!(config.calibration.readiness.attempts, 10);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::read_config_file(Path::new("/definitely/not/here.yml"));
        assert!(matches!(result, Err(ConfigError::BadFilePath(_))));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(|key| match key {
                APP_PORT_ENV => Some(String::from("7001")),
                DATA_DIR_ENV => Some(String::from("/tmp/lrs")),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.app_port, 7001);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/lrs"));
        assert_eq!(config.app_host, "127.0.0.1");

        let result =
            config.apply_env_overrides(|key| (key == APP_PORT_ENV).then(|| String::from("x")));
        assert!(matches!(result, Err(ConfigError::BadEnvOverride(_, _))));
    }

    #[test]
    fn test_validate_rejects_shared_module() {
        let mut config = Config::default();
        config.calibration.bias_hosts[1].modules = vec![1, 2];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut config = Config::default();
        config.calibration.readiness.attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_backoff() {
        let mut config = Config::default();
        config.calibration.readiness.backoff_factor = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
        config.calibration.readiness.backoff_factor = 0.5;
        assert!(config.validate().is_err());
        config.calibration.readiness.backoff_factor = 1.0;
        assert!(config.validate().is_ok());
    }
}
