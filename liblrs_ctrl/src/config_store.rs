use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use super::constants::{THRESHOLD_FILE_PREFIX, TOPOLOGY_FILE_PREFIX};
use super::error::ConfigStoreError;

/// The two families of versioned detector configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigKind {
    /// Hardware channel mapping (MOAS)
    Topology,
    /// Trigger thresholds (FOAS)
    Threshold,
}

impl ConfigKind {
    pub fn file_prefix(&self) -> &'static str {
        match self {
            Self::Topology => TOPOLOGY_FILE_PREFIX,
            Self::Threshold => THRESHOLD_FILE_PREFIX,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Topology => "topology",
            Self::Threshold => "threshold",
        }
    }

    /// Version named by a configuration file, `MOAS_x.csv` -> `x`
    pub fn version_of(&self, file: &Path) -> Result<String, ConfigStoreError> {
        file.file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.strip_prefix(self.file_prefix()))
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ConfigStoreError::BadFileName(file.to_path_buf(), self.label()))
    }

    /// Normalize `MOAS_x.csv`, `MOAS_x`, `x.csv` or `x` to the bare version `x`
    pub fn normalize_version<'a>(&self, version: &'a str) -> &'a str {
        let version = version.strip_suffix(".csv").unwrap_or(version);
        version.strip_prefix(self.file_prefix()).unwrap_or(version)
    }
}

impl FromStr for ConfigKind {
    type Err = ConfigStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "topology" | "moas" => Ok(Self::Topology),
            "threshold" | "foas" => Ok(Self::Threshold),
            _ => Err(ConfigStoreError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigVersion {
    pub kind: ConfigKind,
    pub version: String,
    pub tag: String,
}

/// Versioned configuration store: tracks imported versions and which one is active
pub trait ConfigStore: Send + Sync {
    fn active_version(&self, kind: ConfigKind) -> Result<Option<String>, ConfigStoreError>;
    fn set_active_version(&self, kind: ConfigKind, version: &str) -> Result<(), ConfigStoreError>;
    /// Register a configuration file, returning its version
    fn import_configuration(
        &self,
        kind: ConfigKind,
        file: &Path,
        tag: &str,
    ) -> Result<String, ConfigStoreError>;
    fn versions(&self, kind: ConfigKind) -> Result<Vec<ConfigVersion>, ConfigStoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoreDocument {
    versions: Vec<ConfigVersion>,
    active_topology: Option<String>,
    active_threshold: Option<String>,
}

impl StoreDocument {
    fn active_mut(&mut self, kind: ConfigKind) -> &mut Option<String> {
        match kind {
            ConfigKind::Topology => &mut self.active_topology,
            ConfigKind::Threshold => &mut self.active_threshold,
        }
    }

    fn has_version(&self, kind: ConfigKind, version: &str) -> bool {
        self.versions
            .iter()
            .any(|v| v.kind == kind && v.version == version)
    }
}

/// A ConfigStore persisted as a single YAML document, rewritten after every mutation
#[derive(Debug)]
pub struct YamlConfigStore {
    path: PathBuf,
    document: Mutex<StoreDocument>,
}

impl YamlConfigStore {
    /// Open the store at path, starting empty if the file does not exist yet
    pub fn open(path: &Path) -> Result<Self, ConfigStoreError> {
        let document = if path.exists() {
            let yaml_str = std::fs::read_to_string(path)?;
            serde_yaml::from_str::<StoreDocument>(&yaml_str)?
        } else {
            StoreDocument::default()
        };
        Ok(Self {
            path: path.to_path_buf(),
            document: Mutex::new(document),
        })
    }

    fn persist(&self, document: &StoreDocument) -> Result<(), ConfigStoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_yaml::to_string(document)?)?;
        Ok(())
    }
}

impl ConfigStore for YamlConfigStore {
    fn active_version(&self, kind: ConfigKind) -> Result<Option<String>, ConfigStoreError> {
        let mut document = self.document.lock().map_err(|_| ConfigStoreError::Poisoned)?;
        Ok(document.active_mut(kind).clone())
    }

    fn set_active_version(&self, kind: ConfigKind, version: &str) -> Result<(), ConfigStoreError> {
        let version = kind.normalize_version(version);
        let mut document = self.document.lock().map_err(|_| ConfigStoreError::Poisoned)?;
        if !document.has_version(kind, version) {
            return Err(ConfigStoreError::UnknownVersion(version.to_string()));
        }
        *document.active_mut(kind) = Some(version.to_string());
        self.persist(&document)?;
        log::info!("Active {} version is now {version}", kind.label());
        Ok(())
    }

    fn import_configuration(
        &self,
        kind: ConfigKind,
        file: &Path,
        tag: &str,
    ) -> Result<String, ConfigStoreError> {
        let version = kind.version_of(file)?;

        let mut document = self.document.lock().map_err(|_| ConfigStoreError::Poisoned)?;
        if document.has_version(kind, &version) {
            log::info!("{} version {version} already imported", kind.label());
            return Ok(version);
        }
        document.versions.push(ConfigVersion {
            kind,
            version: version.clone(),
            tag: tag.to_string(),
        });
        self.persist(&document)?;
        log::info!("Imported {} version {version} ({tag})", kind.label());
        Ok(version)
    }

    fn versions(&self, kind: ConfigKind) -> Result<Vec<ConfigVersion>, ConfigStoreError> {
        let document = self.document.lock().map_err(|_| ConfigStoreError::Poisoned)?;
        Ok(document
            .versions
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect())
    }
}

/// Register a configuration file with the store. When `dir` is given the file is first
/// copied there (unless it already lives there), so the version can be loaded by name later.
pub fn import_configuration_file(
    store: &dyn ConfigStore,
    kind: ConfigKind,
    file: &Path,
    tag: &str,
    dir: Option<&Path>,
) -> Result<String, ConfigStoreError> {
    kind.version_of(file)?;
    if !file.exists() {
        return Err(ConfigStoreError::MissingFile(file.to_path_buf()));
    }
    let registered = match dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let Some(name) = file.file_name() else {
                return Err(ConfigStoreError::BadFileName(file.to_path_buf(), kind.label()));
            };
            let target = dir.join(name);
            if file.parent() != Some(dir) {
                std::fs::copy(file, &target)?;
                log::info!(
                    "Copied {} to {}",
                    file.to_string_lossy(),
                    target.to_string_lossy()
                );
            }
            target
        }
        None => file.to_path_buf(),
    };
    store.import_configuration(kind, &registered, tag)
}
