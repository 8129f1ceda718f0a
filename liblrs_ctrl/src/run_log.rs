use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::error::RunLogError;

/// One row of the run log, keyed by data file name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLogRow {
    pub filename: String,
    pub size: u64,
    pub application_version: String,
    pub run_mode: String,
    pub start_time: i64,
    pub end_time: i64,
    pub run_starting_instance: String,
    /// Run number of the run context (the run control's numbering)
    pub context_run: u32,
    pub run: u32,
    pub subrun: u32,
    pub first_event_number: i64,
    pub last_event_number: i64,
    pub active_topology: Option<String>,
    pub active_threshold: Option<String>,
    #[serde(default)]
    pub snapshots: BTreeMap<String, serde_json::Value>,
}

/// Append-only persistent log of finalized data files
pub trait RunLog: Send + Sync {
    fn append(&self, row: &RunLogRow) -> Result<(), RunLogError>;
}

/// RunLog stored as JSON lines, one row per line
#[derive(Debug)]
pub struct JsonlRunLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRunLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row back, oldest first
    pub fn read_all(&self) -> Result<Vec<RunLogRow>, RunLogError> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let reader = BufReader::new(std::fs::File::open(&self.path)?);
        let mut rows = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line)?);
        }
        Ok(rows)
    }
}

impl RunLog for JsonlRunLog {
    fn append(&self, row: &RunLogRow) -> Result<(), RunLogError> {
        let mut line = serde_json::to_string(row)?;
        line.push('\n');
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
