//! Deterministic writers of per-subrun hardware configuration.
//!
//! Both generators derive the subrun plan from the same topology: every TPC sorts its LED
//! groups, and subrun `k` flashes the k-th group of every TPC that has one. The pulser side
//! turns the plan into pulser channel resistor settings, the bias side into SiPM bias voltages.
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use super::channel_id::LedGroupId;
use super::config::CalibrationConfig;
use super::constants::{BIAS_CHANNELS_PER_MODULE, LED_RUNS_DIR, PULSER_CHANNELS};
use super::error::{ConfigError, GeneratorError, TopologyError};
use super::topology::Topology;

/// Produces one configuration artifact per subrun, in subrun order
pub trait ConfigGenerator: Send + Sync {
    fn name(&self) -> &'static str;
    fn generate(&self, topology: &Topology) -> Result<Vec<PathBuf>, GeneratorError>;
}

/// The pair of artifacts applied together for one calibration subrun
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubrunConfig {
    pub pulser_config: PathBuf,
    /// Directory holding one MOD<m>.csv per bias module
    pub bias_config: PathBuf,
}

/// The LED groups flashed in each subrun
pub fn subrun_plan(topology: &Topology) -> Vec<BTreeSet<LedGroupId>> {
    let groups = topology.led_groups_by_tpc();
    let n_subruns = groups.values().map(|g| g.len()).max().unwrap_or(0);
    (0..n_subruns)
        .map(|k| groups.values().filter_map(|g| g.get(k).copied()).collect())
        .collect()
}

#[derive(Debug, Serialize)]
struct PulserFile {
    channels: BTreeMap<String, [u16; 2]>,
}

/// Writes `<output_dir>/<k+1>.json` pulser settings files
#[derive(Debug, Clone)]
pub struct PulserConfigMaker {
    output_dir: PathBuf,
}

impl PulserConfigMaker {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
        }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(&config.pulser_config_dir)
    }

    fn clear_stale(&self) -> Result<(), GeneratorError> {
        std::fs::create_dir_all(&self.output_dir)?;
        for entry in std::fs::read_dir(&self.output_dir)? {
            let path = entry?.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some("json")
            {
                std::fs::remove_file(&path)?;
            }
        }
        Ok(())
    }
}

impl ConfigGenerator for PulserConfigMaker {
    fn name(&self) -> &'static str {
        "pulser"
    }

    fn generate(&self, topology: &Topology) -> Result<Vec<PathBuf>, GeneratorError> {
        self.clear_stale()?;
        let mut written = Vec::new();
        for (k, groups) in subrun_plan(topology).iter().enumerate() {
            let mut channels: BTreeMap<String, [u16; 2]> = (0..PULSER_CHANNELS)
                .map(|ch| (format!("ch{ch:02}"), [0, 0]))
                .collect();
            for group in groups.iter() {
                let setting = group.decode().map_err(TopologyError::from)?;
                let key = format!("ch{:02}", setting.channel - 1);
                if channels.get(&key) != Some(&[0, 0]) {
                    log::warn!(
                        "Pulser channel {} is driven by more than one LED group in subrun {}",
                        setting.channel,
                        k + 1
                    );
                }
                channels.insert(key, [setting.series, setting.parallel]);
            }
            let path = self.output_dir.join(format!("{}.json", k + 1));
            std::fs::write(&path, serde_json::to_string_pretty(&PulserFile { channels })?)?;
            written.push(path);
        }
        log::info!(
            "Wrote {} pulser configurations to {}",
            written.len(),
            self.output_dir.to_string_lossy()
        );
        Ok(written)
    }
}

/// Writes `<output_dir>/LEDRuns/<k+1>/MOD<m>.csv` bias voltage tables
#[derive(Debug, Clone)]
pub struct BiasConfigMaker {
    output_dir: PathBuf,
    bias_modules: u16,
    default_voltage: f64,
}

impl BiasConfigMaker {
    pub fn new(output_dir: &Path, bias_modules: u16, default_voltage: f64) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            bias_modules,
            default_voltage,
        }
    }

    pub fn from_config(config: &CalibrationConfig) -> Self {
        Self::new(
            &config.bias_config_dir,
            config.bias_modules,
            config.default_voltage,
        )
    }

    fn write_module(
        &self,
        dir: &Path,
        module: u16,
        voltages: &BTreeMap<(u16, u16), f64>,
    ) -> Result<(), GeneratorError> {
        let mut table = String::new();
        for channel in 1..=BIAS_CHANNELS_PER_MODULE {
            let voltage = voltages
                .get(&(module, channel))
                .copied()
                .unwrap_or(self.default_voltage);
            table.push_str(&format!("{channel},{voltage:.2}\n"));
        }
        std::fs::write(dir.join(bias_module_file(module)), table)?;
        Ok(())
    }
}

/// File name of one bias module's voltage table
pub fn bias_module_file(module: u16) -> String {
    format!("MOD{module}.csv")
}

impl ConfigGenerator for BiasConfigMaker {
    fn name(&self) -> &'static str {
        "bias"
    }

    fn generate(&self, topology: &Topology) -> Result<Vec<PathBuf>, GeneratorError> {
        let runs_dir = self.output_dir.join(LED_RUNS_DIR);
        if runs_dir.exists() {
            std::fs::remove_dir_all(&runs_dir)?;
        }

        let mut written = Vec::new();
        for (k, groups) in subrun_plan(topology).iter().enumerate() {
            let voltages: BTreeMap<(u16, u16), f64> = topology
                .entries()
                .iter()
                .filter(|e| groups.contains(&e.led_group))
                .map(|e| ((e.bias.module, e.bias.channel), e.bias_voltage))
                .collect();
            let subrun_dir = runs_dir.join((k + 1).to_string());
            std::fs::create_dir_all(&subrun_dir)?;
            for module in 0..self.bias_modules {
                self.write_module(&subrun_dir, module, &voltages)?;
            }
            written.push(subrun_dir);
        }
        log::info!(
            "Wrote {} bias configurations to {}",
            written.len(),
            runs_dir.to_string_lossy()
        );
        Ok(written)
    }
}

/// Run both generators and pair their outputs in order
pub fn generate_subrun_configs(
    pulser: &dyn ConfigGenerator,
    bias: &dyn ConfigGenerator,
    topology: &Topology,
) -> Result<Vec<SubrunConfig>, GeneratorError> {
    let pulser_configs = pulser.generate(topology)?;
    let bias_configs = bias.generate(topology)?;
    if pulser_configs.len() != bias_configs.len() {
        return Err(ConfigError::MismatchedGenerators {
            pulser: pulser_configs.len(),
            bias: bias_configs.len(),
        }
        .into());
    }
    Ok(pulser_configs
        .into_iter()
        .zip(bias_configs)
        .map(|(pulser_config, bias_config)| SubrunConfig {
            pulser_config,
            bias_config,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::tests::SMALL_TOPOLOGY;

    struct FixedGenerator(usize);

    impl ConfigGenerator for FixedGenerator {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn generate(&self, _topology: &Topology) -> Result<Vec<PathBuf>, GeneratorError> {
            Ok((0..self.0).map(|i| PathBuf::from(i.to_string())).collect())
        }
    }

    #[test]
    fn test_subrun_plan() {
        let topology = Topology::parse(SMALL_TOPOLOGY, 2).unwrap();
        let plan = subrun_plan(&topology);
        assert_eq!(plan.len(), 2);
        assert!(plan[0].contains(&LedGroupId(101_010_020)));
        assert!(plan[0].contains(&LedGroupId(103_001_002)));
        assert_eq!(plan[1].len(), 1);
        assert!(plan[1].contains(&LedGroupId(102_030_040)));
    }

    #[test]
    fn test_pulser_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("9.json"), "{}").unwrap();
        let topology = Topology::parse(SMALL_TOPOLOGY, 2).unwrap();
        let files = PulserConfigMaker::new(dir.path()).generate(&topology).unwrap();
        assert_eq!(files, vec![dir.path().join("1.json"), dir.path().join("2.json")]);
        assert!(!dir.path().join("9.json").exists());

        let first: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&files[0]).unwrap()).unwrap();
        let channels = first["channels"].as_object().unwrap();
        assert_eq!(channels.len(), 16);
        assert_eq!(first["channels"]["ch00"], serde_json::json!([10, 20]));
        assert_eq!(first["channels"]["ch02"], serde_json::json!([1, 2]));
        assert_eq!(first["channels"]["ch15"], serde_json::json!([0, 0]));
    }

    #[test]
    fn test_bias_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = dir.path().join(LED_RUNS_DIR).join("7");
        std::fs::create_dir_all(&stale).unwrap();
        let topology = Topology::parse(SMALL_TOPOLOGY, 2).unwrap();
        let dirs = BiasConfigMaker::new(dir.path(), 2, 1.5)
            .generate(&topology)
            .unwrap();
        assert_eq!(dirs.len(), 2);
        assert!(!stale.exists());

        let module0 = std::fs::read_to_string(dirs[0].join("MOD0.csv")).unwrap();
        let lines: Vec<&str> = module0.lines().collect();
        assert_eq!(lines.len(), 128);
        assert_eq!(lines[0], "1,45.50");
        assert_eq!(lines[1], "2,45.25");
        // Channel 3 belongs to the second LED group of TPC 0
        assert_eq!(lines[2], "3,1.50");
        assert_eq!(lines[127], "128,1.50");
        assert!(module0.ends_with("128,1.50\n"));

        let second = std::fs::read_to_string(dirs[1].join("MOD0.csv")).unwrap();
        assert!(second.lines().any(|l| l == "3,46.00"));
        let module1 = std::fs::read_to_string(dirs[1].join("MOD1.csv")).unwrap();
        assert!(module1.lines().all(|l| l.ends_with(",1.50")));
    }

    #[test]
    fn test_pairs_in_order_and_rejects_mismatch() {
        let topology = Topology::default();
        let configs =
            generate_subrun_configs(&FixedGenerator(2), &FixedGenerator(2), &topology).unwrap();
        assert_eq!(configs[1].pulser_config, PathBuf::from("1"));
        assert_eq!(configs[1].bias_config, PathBuf::from("1"));
        assert!(matches!(
            generate_subrun_configs(&FixedGenerator(3), &FixedGenerator(2), &topology),
            Err(GeneratorError::ConfigError(ConfigError::MismatchedGenerators {
                pulser: 3,
                bias: 2
            }))
        ));
    }
}
