//! Backup storage of the node data directory.
//!
//! A backup is a plain directory below a storage root holding a full copy of
//! the data directory. Backups are created and deleted, never modified.

pub mod manager;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub use manager::{DataManager, RestoreOutcome};

/// Top-level entries every restorable backup must contain.
/// `.nodename` is intentionally not required.
pub const EXPECTED_BACKUP_CONTENT: [&str; 5] =
    ["certs", "etcd", "kubelet-plugins", "resources", "version"];

/// Name of one backup directory inside a storage root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupName(String);

impl BackupName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for BackupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BackupName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Directory holding backups (one subdirectory per backup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath(PathBuf);

impl StoragePath {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn backup_path(&self, name: &BackupName) -> PathBuf {
        self.0.join(name.as_str())
    }

    /// Nested storage, e.g. `failed/` or `restored/` of the autorecovery root.
    pub fn sub_storage(&self, name: &str) -> StoragePath {
        StoragePath(self.0.join(name))
    }
}

impl fmt::Display for StoragePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}
