//! Pointer to the backup restored last, kept in `state.json` inside the
//! autorecovery storage.

use crate::data::{BackupName, StoragePath};
use crate::fs::paths::{remove_path, rename_path, unique_sibling_path};
use crate::utils::{KeeperError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

pub const STATE_FILE_NAME: &str = "state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutorecoveryState {
    #[serde(rename = "LastBackup")]
    pub last_backup: BackupName,
}

impl AutorecoveryState {
    pub fn new(last_backup: BackupName) -> Self {
        Self { last_backup }
    }

    /// `None` before the first restore.
    pub fn load(storage: &StoragePath) -> Result<Option<Self>> {
        let path = storage.as_path().join(STATE_FILE_NAME);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!(storage = %storage, "State file does not exist");
                return Ok(None);
            }
            Err(e) => return Err(KeeperError::io_at("read", &path, e)),
        };

        let state: Self = serde_json::from_slice(&content)?;
        tracing::info!(last_backup = %state.last_backup, "Read state from the disk");
        Ok(Some(state))
    }

    /// Writes the state next to `state.json` without replacing it yet.
    pub fn save_to_intermediate(&self, storage: &StoragePath) -> Result<StagedState> {
        let destination = storage.as_path().join(STATE_FILE_NAME);
        let intermediate = unique_sibling_path(&destination, "new")?;
        let content = serde_json::to_vec(self)?;
        fs::write(&intermediate, content)
            .map_err(|e| KeeperError::io_at("write intermediate state", &intermediate, e))?;
        tracing::info!(path = %intermediate.display(), last_backup = %self.last_backup, "Saved intermediate state");
        Ok(StagedState {
            intermediate,
            destination,
        })
    }
}

/// State file written to an intermediate path, waiting to replace
/// `state.json`.
#[derive(Debug)]
pub struct StagedState {
    intermediate: PathBuf,
    destination: PathBuf,
}

impl StagedState {
    pub fn move_to_final(self) -> Result<()> {
        rename_path(&self.intermediate, &self.destination)
    }

    pub fn rollback(self) -> Result<()> {
        remove_path(&self.intermediate)
    }
}
