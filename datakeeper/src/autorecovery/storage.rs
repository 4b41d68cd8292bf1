//! Autorecovery backups, named `<yyyyMMddHHmmss>_<version>`.
//!
//! The version part is the deployment ID on OSTree hosts and the binary
//! version elsewhere, so a backup is only ever restored on a node running
//! the same software it was taken with.

use crate::data::{BackupName, StoragePath};
use crate::fs::paths::path_exists;
use crate::utils::{KeeperError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;

pub const CREATION_TIME_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryBackup {
    pub creation_time: NaiveDateTime,
    pub version: String,
}

impl RecoveryBackup {
    pub fn new(creation_time: DateTime<Utc>, version: impl Into<String>) -> Self {
        Self {
            creation_time: creation_time.naive_utc(),
            version: version.into(),
        }
    }

    pub fn name(&self) -> BackupName {
        BackupName::new(format!(
            "{}_{}",
            self.creation_time.format(CREATION_TIME_FORMAT),
            self.version
        ))
    }

    /// Parses a directory name. Names not following the convention yield
    /// `None`.
    pub fn parse(name: &str) -> Option<Self> {
        let (time, version) = name.split_once('_')?;
        if version.is_empty() || version.contains('_') {
            return None;
        }
        match NaiveDateTime::parse_from_str(time, CREATION_TIME_FORMAT) {
            // Single-digit fields parse too but would not map back to the
            // directory name.
            Ok(creation_time) if creation_time.format(CREATION_TIME_FORMAT).to_string() != time => {
                tracing::error!(name = %name, "Datetime part of the backup name is not zero-padded");
                None
            }
            Ok(creation_time) => Some(Self {
                creation_time,
                version: version.to_string(),
            }),
            Err(e) => {
                tracing::error!(name = %name, error = %e, "Failed to parse datetime part of the backup name");
                None
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryBackups(pub Vec<RecoveryBackup>);

impl RecoveryBackups {
    /// Reads the backups directly below `storage`, skipping files and
    /// directories not named like a backup (`failed/`, `restored/`, ...).
    pub fn load(storage: &StoragePath) -> Result<Self> {
        let root = storage.as_path();
        let entries = fs::read_dir(root).map_err(|e| KeeperError::io_at("read directory", root, e))?;

        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KeeperError::io_at("read directory", root, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| KeeperError::io_at("stat", &entry.path(), e))?;
            if file_type.is_dir() {
                dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        dirs.sort();

        let backups = Self::from_dir_names(&dirs);
        tracing::info!(dirs = ?dirs, backups = backups.0.len(), "Auto-recovery backup storage read");
        Ok(backups)
    }

    pub fn from_dir_names(names: &[String]) -> Self {
        Self(names.iter().filter_map(|n| RecoveryBackup::parse(n)).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn without(mut self, name: &BackupName) -> Self {
        let before = self.0.len();
        self.0.retain(|b| &b.name() != name);
        if self.0.len() != before {
            tracing::info!(removed = %name, "Filtered out previously restored backup");
        }
        self
    }

    pub fn filter_by_version(mut self, version: &str) -> Self {
        self.0.retain(|b| b.version == version);
        tracing::info!(version = %version, remaining = self.0.len(), "Filtered backups by version");
        self
    }

    pub fn most_recent(&self) -> Option<&RecoveryBackup> {
        self.0.iter().max_by_key(|b| b.creation_time)
    }
}

pub fn storage_should_exist(storage: &StoragePath) -> Result<()> {
    if !path_exists(storage.as_path())? {
        return Err(KeeperError::NotFound(storage.to_string()));
    }
    Ok(())
}
