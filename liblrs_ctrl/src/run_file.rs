use regex::Regex;
use std::path::Path;

use super::constants::DATA_FILE_EXTENSION;
use super::error::FilenameError;

/// Run and subrun numbers carried by a data file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunNumbers {
    pub run: u32,
    pub subrun: u32,
}

/// Recognizes the two data file naming conventions of the DAQ:
///
/// - `<prefix>_<tag>_<run>_p<subrun>.data`
/// - `<prefix>_<tag>_<run>.data` (subrun 0)
#[derive(Debug, Clone)]
pub struct RunFilePattern {
    prefix: String,
    with_subrun: Regex,
    without_subrun: Regex,
}

impl RunFilePattern {
    pub fn new(prefix: &str) -> Result<Self, FilenameError> {
        let escaped = regex::escape(prefix);
        let with_subrun = Regex::new(&format!(
            r"^{escaped}_(.*?)_(\d+)_p(\d+)\.{DATA_FILE_EXTENSION}$"
        ))
        .map_err(|e| FilenameError::BadPattern(e.to_string()))?;
        let without_subrun = Regex::new(&format!(r"^{escaped}_(.*?)_(\d+)\.{DATA_FILE_EXTENSION}$"))
            .map_err(|e| FilenameError::BadPattern(e.to_string()))?;
        Ok(Self {
            prefix: prefix.to_string(),
            with_subrun,
            without_subrun,
        })
    }

    /// Cheap check used by the watcher to drop unrelated files before anything is parsed
    pub fn is_data_file(&self, path: &Path) -> bool {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) => {
                name.starts_with(&self.prefix)
                    && path
                        .extension()
                        .is_some_and(|ext| ext == DATA_FILE_EXTENSION)
            }
            None => false,
        }
    }

    pub fn parse_name(&self, name: &str) -> Result<RunNumbers, FilenameError> {
        if let Some(caps) = self.with_subrun.captures(name) {
            return Ok(RunNumbers {
                run: parse_number(&caps[2], name)?,
                subrun: parse_number(&caps[3], name)?,
            });
        }
        if let Some(caps) = self.without_subrun.captures(name) {
            return Ok(RunNumbers {
                run: parse_number(&caps[2], name)?,
                subrun: 0,
            });
        }
        Err(FilenameError::UnknownPattern(name.to_string()))
    }

    pub fn parse_path(&self, path: &Path) -> Result<RunNumbers, FilenameError> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FilenameError::NoFileName(path.to_path_buf()))?;
        self.parse_name(name)
    }

    /// Resolve run numbers with optional overrides taking precedence over the file name.
    /// The file name is only consulted (and therefore only required to match) when at least
    /// one of the two numbers is not overridden.
    pub fn resolve(
        &self,
        path: &Path,
        run: Option<u32>,
        subrun: Option<u32>,
    ) -> Result<RunNumbers, FilenameError> {
        match (run, subrun) {
            (Some(run), Some(subrun)) => Ok(RunNumbers { run, subrun }),
            _ => {
                let parsed = self.parse_path(path)?;
                Ok(RunNumbers {
                    run: run.unwrap_or(parsed.run),
                    subrun: subrun.unwrap_or(parsed.subrun),
                })
            }
        }
    }
}

fn parse_number(digits: &str, name: &str) -> Result<u32, FilenameError> {
    digits
        .parse()
        .map_err(|_| FilenameError::UnknownPattern(name.to_string()))
}
