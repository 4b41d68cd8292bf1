//! Configuration management for datakeeper.
//!
//! Loads configuration from a TOML file with environment variable overrides.
//! Every field has a default, so an empty file (or no file) is valid.

use crate::history::manager::DEFAULT_MAX_ENTRIES;
use crate::utils::{KeeperError, Result};
use crate::version::{FeatureGates, VersionMetadata};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_DATA_DIR: &str = "DATAKEEPER_DATA_DIR";
pub const ENV_BACKUPS_DIR: &str = "DATAKEEPER_BACKUPS_DIR";
pub const ENV_LOG_LEVEL: &str = "DATAKEEPER_LOG_LEVEL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub history: HistoryConfig,
    pub autorecovery: AutorecoveryConfig,
    pub version: VersionConfig,
    pub services: ServicesConfig,
    pub feature_gates: FeatureGates,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Live data directory of the node
    pub data_dir: PathBuf,

    /// Storage of the backups made by the pre-run
    pub backups_dir: PathBuf,

    /// Boot history ledger
    pub history_file: PathBuf,

    /// Health file written by releases predating the history ledger
    pub legacy_health_file: PathBuf,

    /// Present when the host was booted from an OSTree deployment
    pub ostree_booted_marker: PathBuf,

    pub boot_id_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Number of boots kept in the ledger
    pub max_entries: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutorecoveryConfig {
    /// Keep the data replaced by a restore under `failed/`
    pub save_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    /// Version assumed for data without a version file
    pub legacy_data_version: VersionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServicesConfig {
    /// Units that must be stopped before a manual backup or restore
    pub guarded: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/microshift"),
            backups_dir: PathBuf::from("/var/lib/microshift-backups"),
            history_file: PathBuf::from("/var/lib/microshift-backups/history.json"),
            legacy_health_file: PathBuf::from("/var/lib/microshift-backups/health.json"),
            ostree_booted_marker: PathBuf::from("/run/ostree-booted"),
            boot_id_file: PathBuf::from("/proc/sys/kernel/random/boot_id"),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl Default for AutorecoveryConfig {
    fn default() -> Self {
        Self { save_failed: true }
    }
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            legacy_data_version: VersionMetadata::new(4, 13, 0),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            guarded: vec![
                "microshift.service".to_string(),
                "microshift-etcd.scope".to_string(),
            ],
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| KeeperError::io_at("read", path, e))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| KeeperError::Parse(format!("invalid configuration: {}", e)))
    }

    /// Loads `path` if given, the defaults otherwise, then applies the
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.paths.data_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(ENV_BACKUPS_DIR) {
            self.paths.backups_dir = PathBuf::from(dir);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log.level = level;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.paths.data_dir.as_os_str().is_empty() {
            return Err(KeeperError::EmptyArgument("paths.data_dir"));
        }
        if self.paths.backups_dir.as_os_str().is_empty() {
            return Err(KeeperError::EmptyArgument("paths.backups_dir"));
        }
        if self.history.max_entries == 0 {
            return Err(KeeperError::Parse(
                "history.max_entries must be at least 1".to_string(),
            ));
        }
        self.feature_gates.validate()
    }
}
