use serde::Serialize;
use std::path::{Path, PathBuf};
use time::macros::format_description;
use time::OffsetDateTime;

use super::channel_id::{AdcChannelId, BiasChannelId};
use super::constants::DATA_FILE_EXTENSION;
use super::error::{RunInfoError, ValidationError};
use super::generator::SubrunConfig;
use super::topology::Topology;

const SUMMARY_SUFFIX: &str = "_run_summary.json";

/// What one calibration subrun did and which channels it lit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubrunSummary {
    pub subrun: usize,
    /// Most recent data file when the subrun was recorded
    pub data_file: Option<PathBuf>,
    pub pulser_config: PathBuf,
    pub bias_config: PathBuf,
    pub active_chans: Vec<AdcChannelId>,
}

/// Aggregate record of a calibration session, written once at the end
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunInfo {
    pub run_folder: PathBuf,
    pub topology: String,
    pub subruns: Vec<SubrunSummary>,
}

impl RunInfo {
    pub fn new(run_folder: &Path, topology: &str) -> Self {
        Self {
            run_folder: run_folder.to_path_buf(),
            topology: topology.to_string(),
            subruns: vec![],
        }
    }

    /// Summarize a finished subrun and append it
    pub fn record_subrun(
        &mut self,
        subrun: usize,
        config: &SubrunConfig,
        topology: &Topology,
        default_voltage: f64,
    ) -> Result<&SubrunSummary, RunInfoError> {
        let summary = SubrunSummary {
            subrun,
            data_file: most_recent_file(&self.run_folder)?,
            pulser_config: config.pulser_config.clone(),
            bias_config: config.bias_config.clone(),
            active_chans: active_channels(&config.bias_config, default_voltage, topology)?,
        };
        log::info!(
            "Subrun {subrun} exposed {} channels",
            summary.active_chans.len()
        );
        self.subruns.push(summary);
        Ok(&self.subruns[self.subruns.len() - 1])
    }

    /// Write `<dir>/<YYYYmmdd_HHMMSS>_run_summary.json`, stamped with `now`
    pub fn write(&self, dir: &Path, now: OffsetDateTime) -> Result<PathBuf, RunInfoError> {
        let stamp = now.format(format_description!(
            "[year][month][day]_[hour][minute][second]"
        ))?;
        let path = dir.join(format!("{stamp}{SUMMARY_SUFFIX}"));
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        log::info!("Wrote run summary {}", path.to_string_lossy());
        Ok(path)
    }
}

/// Local wall-clock time, falling back to UTC if the local offset can't be determined
pub fn local_now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// The most recently modified data file in a directory
pub fn most_recent_file(dir: &Path) -> Result<Option<PathBuf>, std::io::Error> {
    let mut newest: Option<(std::time::SystemTime, PathBuf)> = None;
    for item in dir.read_dir()? {
        let item_path = item?.path();
        if item_path.extension().and_then(|e| e.to_str()) != Some(DATA_FILE_EXTENSION) {
            continue;
        }
        let modified = item_path.metadata()?.modified()?;
        if newest.as_ref().map_or(true, |(time, _)| modified > *time) {
            newest = Some((modified, item_path));
        }
    }
    Ok(newest.map(|(_, path)| path))
}

// Voltages are compared at the two decimals the tables are written with
fn centivolts(voltage: f64) -> i64 {
    (voltage * 100.0).round() as i64
}

/// Read one MOD<m>.csv voltage table
pub fn read_bias_table(
    path: &Path,
    module: u16,
) -> Result<Vec<(BiasChannelId, f64)>, RunInfoError> {
    let bad = |reason: &str| RunInfoError::BadBiasConfig(path.to_path_buf(), reason.to_string());
    let contents = std::fs::read_to_string(path)?;
    let mut table = Vec::new();
    for line in contents.lines() {
        if line.trim().is_empty() {
            continue;
        }
        let (channel, voltage) = line
            .split_once(',')
            .ok_or_else(|| bad(&format!("line `{line}` is not `channel,voltage`")))?;
        let channel: u16 = channel
            .trim()
            .parse()
            .map_err(|_| bad(&format!("bad channel in `{line}`")))?;
        let voltage: f64 = voltage
            .trim()
            .parse()
            .map_err(|_| bad(&format!("bad voltage in `{line}`")))?;
        table.push((BiasChannelId { module, channel }, voltage));
    }
    Ok(table)
}

/// ADC inputs behind every bias output set away from the default voltage in a subrun's
/// bias configuration directory. Sorted and deduplicated.
pub fn active_channels(
    bias_dir: &Path,
    default_voltage: f64,
    topology: &Topology,
) -> Result<Vec<AdcChannelId>, RunInfoError> {
    let mut active = Vec::new();
    for item in bias_dir.read_dir()? {
        let item_path = item?.path();
        let Some(module) = item_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_prefix("MOD"))
            .and_then(|n| n.strip_suffix(".csv"))
            .and_then(|n| n.parse::<u16>().ok())
        else {
            continue;
        };
        for (bias, voltage) in read_bias_table(&item_path, module)? {
            if centivolts(voltage) == centivolts(default_voltage) {
                continue;
            }
            let adc = topology
                .adc_channel(&bias)
                .ok_or(ValidationError::UnmappedBiasChannel(bias.module, bias.channel))?;
            active.push(*adc);
        }
    }
    active.sort();
    active.dedup();
    Ok(active)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{BiasConfigMaker, ConfigGenerator};
    use crate::topology::tests::SMALL_TOPOLOGY;
    use time::macros::datetime;

    #[test]
    fn test_active_channels_from_generated_tables() {
        let dir = tempfile::tempdir().unwrap();
        let topology = Topology::parse(SMALL_TOPOLOGY, 2).unwrap();
        let dirs = BiasConfigMaker::new(dir.path(), 2, 0.0)
            .generate(&topology)
            .unwrap();
        assert_eq!(
            active_channels(&dirs[0], 0.0, &topology).unwrap(),
            vec![
                AdcChannelId { adc: 0, channel: 0 },
                AdcChannelId { adc: 0, channel: 1 },
                AdcChannelId { adc: 1, channel: 0 },
            ]
        );
        assert_eq!(
            active_channels(&dirs[1], 0.0, &topology).unwrap(),
            vec![AdcChannelId { adc: 0, channel: 2 }]
        );
    }

    #[test]
    fn test_unmapped_channel_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("MOD1.csv"), "1,44.75\n5,30.00\n").unwrap();
        let topology = Topology::parse(SMALL_TOPOLOGY, 2).unwrap();
        assert!(matches!(
            active_channels(dir.path(), 0.0, &topology),
            Err(RunInfoError::Invalid(ValidationError::UnmappedBiasChannel(1, 5)))
        ));
    }

    #[test]
    fn test_bad_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("MOD0.csv");
        std::fs::write(&path, "1;45.0\n").unwrap();
        assert!(matches!(
            read_bias_table(&path, 0),
            Err(RunInfoError::BadBiasConfig(_, _))
        ));
    }

    #[test]
    fn test_most_recent_data_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(most_recent_file(dir.path()).unwrap(), None);
        std::fs::write(dir.path().join("mpd_a_1.data"), b"a").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        std::fs::write(dir.path().join("mpd_a_2.data"), b"b").unwrap();
        std::fs::write(dir.path().join("mpd_a_2.data.json"), b"{}").unwrap();
        assert_eq!(
            most_recent_file(dir.path()).unwrap(),
            Some(dir.path().join("mpd_a_2.data"))
        );
    }

    #[test]
    fn test_write_summary() {
        let dir = tempfile::tempdir().unwrap();
        let info = RunInfo::new(dir.path(), "v1");
        let path = info
            .write(dir.path(), datetime!(2024-05-01 12:03:04 UTC))
            .unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "20240501_120304_run_summary.json"
        );
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["topology"], "v1");
        assert_eq!(written["subruns"], serde_json::json!([]));
    }
}
