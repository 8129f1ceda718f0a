use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::config::Config;
use super::config_store::{ConfigKind, ConfigStore};
use super::constants::*;
use super::error::{FilenameError, MetadataError};
use super::run_context::RunContext;
use super::run_file::RunFilePattern;
use super::run_log::{RunLog, RunLogRow};
use super::timestamp_scanner::{scan_file, EventTimestamp};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checksums {
    pub adler32: String,
}

/// The `metadata` block of a sidecar, using the data catalogue's dotted key names
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogueFields {
    #[serde(rename = "core.application.family")]
    pub application_family: String,
    #[serde(rename = "core.application.name")]
    pub application_name: String,
    #[serde(rename = "core.application.version")]
    pub application_version: String,
    #[serde(rename = "core.data_stream")]
    pub data_stream: String,
    #[serde(rename = "core.data_tier")]
    pub data_tier: String,
    #[serde(rename = "core.file_type")]
    pub file_type: String,
    #[serde(rename = "core.file_format")]
    pub file_format: String,
    #[serde(rename = "core.file_content_status")]
    pub file_content_status: String,
    #[serde(rename = "core.start_time")]
    pub start_time: i64,
    #[serde(rename = "core.end_time")]
    pub end_time: i64,
    #[serde(rename = "core.run_type")]
    pub run_type: String,
    #[serde(rename = "core.runs")]
    pub runs: Vec<u32>,
    #[serde(rename = "core.runs_subruns")]
    pub runs_subruns: Vec<u32>,
    #[serde(rename = "core.first_event_number")]
    pub first_event_number: i64,
    #[serde(rename = "core.last_event_number")]
    pub last_event_number: i64,
    #[serde(rename = "retention.class")]
    pub retention_class: String,
    #[serde(rename = "retention.status")]
    pub retention_status: String,
    #[serde(rename = "lrs.active_topology")]
    pub active_topology: Option<String>,
    #[serde(rename = "lrs.active_threshold")]
    pub active_threshold: Option<String>,
}

/// Immutable description of one finalized data file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub name: String,
    pub namespace: String,
    pub checksums: Checksums,
    pub size: u64,
    pub metadata: CatalogueFields,
}

impl MetadataRecord {
    pub fn run(&self) -> u32 {
        self.metadata.runs.first().copied().unwrap_or_default()
    }

    pub fn subrun(&self) -> u32 {
        self.metadata.runs_subruns.first().copied().unwrap_or_default()
    }
}

/// Values that take precedence over the run context and the file name
#[derive(Debug, Clone, Default)]
pub struct MetadataOverrides {
    pub run: Option<u32>,
    pub subrun: Option<u32>,
    pub data_stream: Option<String>,
}

/// Anything able to turn a finished data file into its metadata.
///
/// This is the seam between the file watcher and the metadata machinery.
pub trait Finalize: Send {
    fn finalize(&self, path: &Path, context: &RunContext) -> Result<MetadataRecord, MetadataError>;
}

/// Adler-32 over the whole stream, fed in fixed size chunks in stream order
pub fn adler32_checksum<R: Read>(reader: &mut R) -> Result<u32, std::io::Error> {
    let mut hasher = adler::Adler32::new();
    let mut buffer = vec![0u8; CHECKSUM_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.write_slice(&buffer[..n]);
    }
    Ok(hasher.checksum())
}

pub fn file_checksum(path: &Path) -> Result<u32, std::io::Error> {
    adler32_checksum(&mut File::open(path)?)
}

/// Path of the JSON sidecar that accompanies a data file
pub fn sidecar_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(SIDECAR_EXTENSION);
    PathBuf::from(name)
}

fn timestamp_fields(event: Option<EventTimestamp>) -> (i64, i64) {
    match event {
        Some(ts) => (ts.unix_s() as i64, ts.tai_s as i64),
        None => (NO_EVENT_SENTINEL, NO_EVENT_SENTINEL),
    }
}

/// Builds metadata records, writes sidecars and feeds the run log
pub struct MetadataExtractor {
    namespace: String,
    application_version: String,
    default_data_stream: String,
    pattern: RunFilePattern,
    config_store: Arc<dyn ConfigStore>,
    run_log: Arc<dyn RunLog>,
}

impl MetadataExtractor {
    pub fn new(
        config: &Config,
        config_store: Arc<dyn ConfigStore>,
        run_log: Arc<dyn RunLog>,
    ) -> Result<Self, FilenameError> {
        Ok(Self {
            namespace: config.namespace.clone(),
            application_version: config.application_version.clone(),
            default_data_stream: config.default_data_stream.clone(),
            pattern: RunFilePattern::new(&config.file_prefix)?,
            config_store,
            run_log,
        })
    }

    pub fn pattern(&self) -> &RunFilePattern {
        &self.pattern
    }

    /// Build the record for a file. The active configuration versions are read now, at
    /// finalize time, not when the file was created.
    pub fn extract(
        &self,
        path: &Path,
        context: Option<&RunContext>,
        overrides: &MetadataOverrides,
    ) -> Result<MetadataRecord, MetadataError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FilenameError::NoFileName(path.to_path_buf()))?
            .to_string();
        let numbers = self
            .pattern
            .resolve(path, overrides.run, overrides.subrun)?;
        let size = std::fs::metadata(path)?.len();
        let checksum = file_checksum(path)?;
        let span = scan_file(path)?;
        let (start_time, first_event_number) = timestamp_fields(span.first);
        let (end_time, last_event_number) = timestamp_fields(span.last);
        if span.first.is_none() {
            log::warn!("No event found in {name}; timestamps set to {NO_EVENT_SENTINEL}");
        }

        let data_stream = overrides
            .data_stream
            .clone()
            .or_else(|| context.map(|c| c.data_stream.clone()))
            .unwrap_or_else(|| self.default_data_stream.clone());

        Ok(MetadataRecord {
            name,
            namespace: self.namespace.clone(),
            checksums: Checksums {
                adler32: format!("{checksum:08x}"),
            },
            size,
            metadata: CatalogueFields {
                application_family: APPLICATION_FAMILY.to_string(),
                application_name: APPLICATION_NAME.to_string(),
                application_version: self.application_version.clone(),
                data_stream,
                data_tier: DATA_TIER.to_string(),
                file_type: FILE_TYPE.to_string(),
                file_format: FILE_FORMAT.to_string(),
                file_content_status: FILE_CONTENT_STATUS.to_string(),
                start_time,
                end_time,
                run_type: self.namespace.clone(),
                runs: vec![numbers.run],
                runs_subruns: vec![numbers.subrun],
                first_event_number,
                last_event_number,
                retention_class: RETENTION_CLASS.to_string(),
                retention_status: RETENTION_STATUS.to_string(),
                active_topology: self.config_store.active_version(ConfigKind::Topology)?,
                active_threshold: self.config_store.active_version(ConfigKind::Threshold)?,
            },
        })
    }

    /// Write `<datafile>.json` next to the data file, four space indented
    pub fn write_sidecar(record: &MetadataRecord, path: &Path) -> Result<PathBuf, MetadataError> {
        let json_path = sidecar_path(path);
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        record.serialize(&mut serializer)?;
        buffer.push(b'\n');
        let mut file = File::create(&json_path)?;
        file.write_all(&buffer)?;
        Ok(json_path)
    }

    /// Extract and write the sidecar only. Used for files outside of a managed run.
    pub fn write_metadata(
        &self,
        path: &Path,
        overrides: &MetadataOverrides,
    ) -> Result<MetadataRecord, MetadataError> {
        let record = self.extract(path, None, overrides)?;
        Self::write_sidecar(&record, path)?;
        Ok(record)
    }

    pub fn log_row(&self, record: &MetadataRecord, context: &RunContext) -> RunLogRow {
        RunLogRow {
            filename: record.name.clone(),
            size: record.size,
            application_version: record.metadata.application_version.clone(),
            run_mode: record.metadata.data_stream.clone(),
            start_time: record.metadata.start_time,
            end_time: record.metadata.end_time,
            run_starting_instance: context.run_starting_instance.clone(),
            context_run: context.run,
            run: record.run(),
            subrun: record.subrun(),
            first_event_number: record.metadata.first_event_number,
            last_event_number: record.metadata.last_event_number,
            active_topology: record.metadata.active_topology.clone(),
            active_threshold: record.metadata.active_threshold.clone(),
            snapshots: context.snapshots.clone(),
        }
    }
}

impl Finalize for MetadataExtractor {
    fn finalize(&self, path: &Path, context: &RunContext) -> Result<MetadataRecord, MetadataError> {
        let record = self.extract(path, Some(context), &MetadataOverrides::default())?;
        let json_path = Self::write_sidecar(&record, path)?;
        self.run_log.append(&self.log_row(&record, context))?;
        log::info!(
            "Finalized {} ({}, run {} subrun {}) -> {}",
            record.name,
            human_bytes::human_bytes(record.size as f64),
            record.run(),
            record.subrun(),
            json_path.to_string_lossy()
        );
        Ok(record)
    }
}
