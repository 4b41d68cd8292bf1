//! Boot history ledger.
//!
//! Records, per boot, which deployment was booted, how healthy the node was
//! and how the pre-run went. The next boot uses it to decide what to do with
//! the data left behind by the previous one.

pub mod manager;
pub mod storage;

use crate::system::{Boot, BootId, DeploymentId};
use crate::utils::{KeeperError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use manager::HistoryManager;
pub use storage::{FileStorage, HistoryStorage};

/// Health of a boot as reported by the health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Health::Unknown => "unknown",
            Health::Healthy => "healthy",
            Health::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// Outcome of the pre-run for a boot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PreRunStatus {
    #[default]
    Unknown,
    Success,
    BackupFailed,
    RestoreFailed,
    MigrationFailed,
    MetadataUpdateFailed,
}

impl fmt::Display for PreRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PreRunStatus::Unknown => "unknown",
            PreRunStatus::Success => "success",
            PreRunStatus::BackupFailed => "backup-failed",
            PreRunStatus::RestoreFailed => "restore-failed",
            PreRunStatus::MigrationFailed => "migration-failed",
            PreRunStatus::MetadataUpdateFailed => "metadata-update-failed",
        };
        f.write_str(s)
    }
}

/// Fields of a history entry that can be updated after the boot was recorded.
/// `Unknown` means "leave as is".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BootInfo {
    pub health: Health,
    pub pre_run_status: PreRunStatus,
}

impl BootInfo {
    pub fn health(health: Health) -> Self {
        Self {
            health,
            ..Default::default()
        }
    }

    pub fn pre_run(status: PreRunStatus) -> Self {
        Self {
            pre_run_status: status,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: BootId,
    pub boot_time: DateTime<Utc>,
    pub deployment_id: DeploymentId,
    #[serde(default)]
    pub health: Health,
    #[serde(default)]
    pub pre_run_status: PreRunStatus,
}

impl HistoryEntry {
    pub fn new(boot: &Boot, info: BootInfo) -> Self {
        Self {
            id: boot.id.clone(),
            boot_time: boot.boot_time,
            deployment_id: boot.deployment_id.clone(),
            health: info.health,
            pre_run_status: info.pre_run_status,
        }
    }

    fn merge(&mut self, info: BootInfo) {
        if info.health != Health::Unknown {
            self.health = info.health;
        }
        if info.pre_run_status != PreRunStatus::Unknown {
            self.pre_run_status = info.pre_run_status;
        }
    }
}

/// Ordered collection of boots, unique by boot ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub boots: Vec<HistoryEntry>,
}

impl History {
    pub fn get_boot_by_id(&self, id: &BootId) -> Option<&HistoryEntry> {
        self.boots.iter().find(|b| &b.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.boots.is_empty()
    }

    /// Merges `info` into the entry of `boot`, appending a new entry if the
    /// boot is not known yet.
    pub fn add_or_update(&mut self, boot: &Boot, info: BootInfo) -> Result<()> {
        if boot.id.is_empty() {
            return Err(KeeperError::EmptyArgument("boot.id"));
        }
        if boot.deployment_id.is_empty() {
            return Err(KeeperError::EmptyArgument("boot.deployment_id"));
        }

        match self.boots.iter_mut().find(|b| b.id == boot.id) {
            Some(existing) => existing.merge(info),
            None => self.boots.push(HistoryEntry::new(boot, info)),
        }
        Ok(())
    }

    /// Sorts the boots most recent first.
    pub fn sort(&mut self) {
        self.boots.sort_by(|a, b| b.boot_time.cmp(&a.boot_time));
    }

    /// Keeps only the `max` most recent boots.
    pub fn remove_old_entries(&mut self, max: usize) {
        self.sort();
        self.boots.truncate(max);
    }
}
