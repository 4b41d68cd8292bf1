//! Restore of the most recent compatible backup after a catastrophic failure.
//!
//! Unlike the PreRun engine this path is triggered explicitly and works on
//! its own storage root:
//!
//! ```text
//! <storage>/<yyyyMMddHHmmss>_<version>   backups
//! <storage>/state.json                   backup restored last
//! <storage>/failed/<name>                data that was replaced by a restore
//! <storage>/restored/<name>              backups that were restored before
//! ```
//!
//! A restore copies everything to intermediate locations first and only then
//! renames the copies into place, live data first.

pub mod state;
pub mod storage;

use crate::data::{BackupName, DataManager, StoragePath};
use crate::fs::atomic_copy::{AtomicDirCopy, CopyProgram};
use crate::fs::disk_space::{check_space_to_back_up, check_space_to_restore};
use crate::fs::paths::{ensure_dir_exists, path_exists, path_exists_and_is_not_empty};
use crate::system::{ostree, SystemInfo};
use crate::utils::{KeeperError, Result};
use crate::version::BuildInfo;
use chrono::{DateTime, Utc};
use state::StagedState;
use std::path::PathBuf;

pub use state::AutorecoveryState;
pub use storage::{RecoveryBackup, RecoveryBackups};

pub const FAILED_SUBSTORAGE: &str = "failed";
pub const RESTORED_SUBSTORAGE: &str = "restored";

/// Tag identifying the software a backup belongs to: the booted deployment
/// on OSTree hosts, the binary version otherwise.
pub fn version_tag(system: &dyn SystemInfo, build: &BuildInfo) -> Result<String> {
    if system.is_ostree()? {
        let deployments = system.deployments()?;
        return Ok(ostree::booted(&deployments)?.id.to_string());
    }
    Ok(build.version.to_string())
}

pub struct AutorecoveryManager {
    storage: StoragePath,
    data_dir: PathBuf,
    version_tag: String,
    save_failed: bool,
    copy_program: CopyProgram,
}

impl AutorecoveryManager {
    pub fn new(
        storage: StoragePath,
        data_dir: impl Into<PathBuf>,
        version_tag: impl Into<String>,
        save_failed: bool,
    ) -> Result<Self> {
        if storage.as_path().as_os_str().is_empty() {
            return Err(KeeperError::EmptyArgument("storage"));
        }
        let version_tag = version_tag.into();
        if version_tag.is_empty() {
            return Err(KeeperError::EmptyArgument("version_tag"));
        }
        Ok(Self {
            storage,
            data_dir: data_dir.into(),
            version_tag,
            save_failed,
            copy_program: CopyProgram::default(),
        })
    }

    pub fn with_copy_program(mut self, program: CopyProgram) -> Self {
        self.copy_program = program;
        self
    }

    fn new_backup_name(&self, now: DateTime<Utc>) -> BackupName {
        RecoveryBackup::new(now, self.version_tag.as_str()).name()
    }

    fn dir_copy(&self, source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> AtomicDirCopy {
        AtomicDirCopy::new(source, destination).with_program(self.copy_program.clone())
    }

    /// Backs up the live data into the storage, creating the storage if
    /// needed.
    pub fn create_backup(&self, now: DateTime<Utc>) -> Result<BackupName> {
        ensure_dir_exists(self.storage.as_path())?;
        let name = self.new_backup_name(now);
        DataManager::new(self.storage.clone(), &self.data_dir)?
            .with_copy_program(self.copy_program.clone())
            .backup(&name)?;
        Ok(name)
    }

    fn candidate_for_restore(&self, state: Option<&AutorecoveryState>) -> Result<RecoveryBackup> {
        let mut backups = RecoveryBackups::load(&self.storage)?;
        if let Some(state) = state {
            backups = backups.without(&state.last_backup);
        }
        if backups.is_empty() {
            return Err(KeeperError::NotFound(format!("backups for restoring in {}", self.storage)));
        }

        let backups = backups.filter_by_version(&self.version_tag);
        let candidate = backups.most_recent().cloned().ok_or_else(|| {
            KeeperError::NotFound(format!(
                "backups for restoring with version {} in {}",
                self.version_tag, self.storage
            ))
        })?;
        tracing::info!(candidate = %candidate.name(), "Candidate backup for restore");
        Ok(candidate)
    }

    /// Restores the most recent backup matching the version tag, except the
    /// one restored last time. Returns the name of the restored backup.
    pub fn perform_restore(&self, now: DateTime<Utc>) -> Result<BackupName> {
        storage::storage_should_exist(&self.storage)?;

        let existing_state = AutorecoveryState::load(&self.storage)?;
        let candidate = self.candidate_for_restore(existing_state.as_ref())?.name();
        let candidate_path = self.storage.backup_path(&candidate);

        check_space_to_restore(&candidate_path, &self.data_dir)?;

        let mut old_data = self.stage_failed_data(now)?;

        let mut new_data = self.dir_copy(&candidate_path, &self.data_dir);
        if let Err(err) = new_data.copy_to_intermediate() {
            return Err(rollback_all(err, old_data.as_mut(), None));
        }

        let state = match AutorecoveryState::new(candidate.clone()).save_to_intermediate(&self.storage) {
            Ok(staged) => staged,
            Err(err) => return Err(rollback_all(err, old_data.as_mut(), Some(&mut new_data))),
        };

        StagedRestore {
            new_data,
            old_data,
            state,
        }
        .finalize()?;

        if let Some(previous) = existing_state {
            self.archive_previously_restored(&previous.last_backup)?;
        }

        tracing::info!(restored = %candidate, "Auto-recovery restore completed");
        Ok(candidate)
    }

    /// Copies the live data towards `failed/`, unless disabled or there is no
    /// data to keep.
    fn stage_failed_data(&self, now: DateTime<Utc>) -> Result<Option<AtomicDirCopy>> {
        if !self.save_failed {
            return Ok(None);
        }
        if !path_exists_and_is_not_empty(&self.data_dir, &[])? {
            tracing::info!(path = %self.data_dir.display(), "No live data to save");
            return Ok(None);
        }

        check_space_to_back_up(&self.data_dir, self.storage.as_path())?;

        let failed = self.storage.sub_storage(FAILED_SUBSTORAGE);
        ensure_dir_exists(failed.as_path())?;
        let mut copy = self
            .dir_copy(&self.data_dir, failed.backup_path(&self.new_backup_name(now)))
            .keep_intermediate_on_failure();
        copy.copy_to_intermediate()?;
        Ok(Some(copy))
    }

    fn archive_previously_restored(&self, name: &BackupName) -> Result<()> {
        let previous = self.storage.backup_path(name);
        if !path_exists(&previous)? {
            return Ok(());
        }

        let restored = self.storage.sub_storage(RESTORED_SUBSTORAGE);
        ensure_dir_exists(restored.as_path())?;
        AtomicDirCopy::new(&previous, restored.backup_path(name)).rename_to_final()?;
        tracing::info!(name = %name, "Moved previously restored backup");
        Ok(())
    }
}

/// Everything a restore needs, copied and waiting to be renamed into place.
struct StagedRestore {
    new_data: AtomicDirCopy,
    old_data: Option<AtomicDirCopy>,
    state: StagedState,
}

impl StagedRestore {
    /// Renames the live data first, then the archive of the replaced data,
    /// then the state.
    ///
    /// Once the live data rename was attempted the archive may be the only
    /// copy of the previous data, so it is always kept. The state only moves
    /// into place when the live data did.
    fn finalize(mut self) -> Result<()> {
        let data_result = self.new_data.rename_to_final();
        let archive_result = match self.old_data.as_mut() {
            Some(old_data) => old_data.rename_to_final(),
            None => Ok(()),
        };

        if let Err(err) = data_result {
            tracing::error!(error = %err, "Failed to move restored data into place");
            let err = KeeperError::join_opt(err, archive_result.err());
            return Err(KeeperError::join_opt(err, self.state.rollback().err()));
        }

        let state_result = self.state.move_to_final();
        match (archive_result, state_result) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) | (Ok(()), Err(err)) => Err(err),
            (Err(archive_err), Err(state_err)) => Err(KeeperError::join(archive_err, state_err)),
        }
    }
}

fn rollback_all(
    err: KeeperError,
    old_data: Option<&mut AtomicDirCopy>,
    new_data: Option<&mut AtomicDirCopy>,
) -> KeeperError {
    let mut err = err;
    for copy in [old_data, new_data].into_iter().flatten() {
        if let Err(rollback_err) = copy.rollback_intermediate() {
            tracing::error!(error = %rollback_err, "Failed to roll back intermediate copy");
            err = KeeperError::join(err, rollback_err);
        }
    }
    err
}
