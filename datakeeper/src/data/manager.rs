//! Backup, restore and removal of the node data directory.

use super::{BackupName, StoragePath, EXPECTED_BACKUP_CONTENT};
use crate::fs::atomic_copy::{AtomicDirCopy, CopyProgram};
use crate::fs::disk_space;
use crate::fs::paths::{ensure_dir_exists, path_exists, remove_path, rename_path, unique_sibling_path};
use crate::utils::{CleanupWarning, KeeperError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Result of a successful restore.
#[derive(Debug, Default)]
pub struct RestoreOutcome {
    /// Best-effort cleanup steps that failed after the restore succeeded
    pub cleanup_warnings: Vec<CleanupWarning>,
}

/// Manages the backups of one data directory inside one storage root.
#[derive(Debug, Clone)]
pub struct DataManager {
    storage: StoragePath,
    data_dir: PathBuf,
    copy_program: CopyProgram,
}

impl DataManager {
    pub fn new(storage: StoragePath, data_dir: impl Into<PathBuf>) -> Result<Self> {
        if storage.as_path().as_os_str().is_empty() {
            return Err(KeeperError::EmptyArgument("storage"));
        }
        let data_dir = data_dir.into();
        if data_dir.as_os_str().is_empty() {
            return Err(KeeperError::EmptyArgument("data_dir"));
        }
        Ok(Self {
            storage,
            data_dir,
            copy_program: CopyProgram::default(),
        })
    }

    pub fn with_copy_program(mut self, program: CopyProgram) -> Self {
        self.copy_program = program;
        self
    }

    fn atomic_copy(&self, source: &Path, destination: &Path) -> Result<()> {
        AtomicDirCopy::new(source, destination)
            .with_program(self.copy_program.clone())
            .copy()
    }

    pub fn storage(&self) -> &StoragePath {
        &self.storage
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn backup_path(&self, name: &BackupName) -> PathBuf {
        self.storage.backup_path(name)
    }

    pub fn backup_exists(&self, name: &BackupName) -> Result<bool> {
        path_exists(&self.backup_path(name))
    }

    pub fn remove_backup(&self, name: &BackupName) -> Result<()> {
        tracing::info!(name = %name, "Removing backup");
        let path = self.backup_path(name);
        fs::remove_dir_all(&path).map_err(|e| {
            KeeperError::io(format!("failed to delete backup {}", name), e)
        })?;
        tracing::info!(name = %name, "Removed backup");
        Ok(())
    }

    /// Lists backups (directories) in the storage. Files are ignored and a
    /// missing storage yields an empty list.
    pub fn get_backup_list(&self) -> Result<Vec<BackupName>> {
        let root = self.storage.as_path();
        if !path_exists(root)? {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(root).map_err(|e| KeeperError::io_at("read directory", root, e))?;
        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| KeeperError::io_at("read directory", root, e))?;
            let file_type = entry
                .file_type()
                .map_err(|e| KeeperError::io_at("stat", &entry.path(), e))?;
            if file_type.is_dir() {
                backups.push(BackupName::new(entry.file_name().to_string_lossy()));
            }
        }
        backups.sort();
        Ok(backups)
    }

    /// Copies the data directory to `<storage>/<name>` and returns that path.
    pub fn backup(&self, name: &BackupName) -> Result<PathBuf> {
        tracing::info!(
            storage = %self.storage,
            name = %name,
            data = %self.data_dir.display(),
            "Copying data to backup directory"
        );

        if name.is_empty() {
            return Err(KeeperError::EmptyArgument("name"));
        }

        if self.backup_exists(name)? {
            return Err(KeeperError::AlreadyExists(format!("backup {}", name)));
        }

        if !path_exists(&self.data_dir)? {
            return Err(KeeperError::NotFound(format!(
                "data directory {}",
                self.data_dir.display()
            )));
        }

        ensure_dir_exists(self.storage.as_path())?;
        disk_space::check_space_to_back_up(&self.data_dir, self.storage.as_path())?;

        let dest = self.backup_path(name);
        self.atomic_copy(&self.data_dir, &dest)?;

        tracing::info!(
            backup = %dest.display(),
            data = %self.data_dir.display(),
            "Copied data to backup directory"
        );
        Ok(dest)
    }

    /// Replaces the data directory with the contents of backup `name`.
    ///
    /// The current data is renamed aside first; if copying the backup fails
    /// it is renamed back, so the data directory ends up either restored or
    /// exactly as before.
    pub fn restore(&self, name: &BackupName) -> Result<RestoreOutcome> {
        tracing::info!(
            storage = %self.storage,
            name = %name,
            data = %self.data_dir.display(),
            "Copying backup to data directory"
        );

        if name.is_empty() {
            return Err(KeeperError::EmptyArgument("name"));
        }

        let path = self.backup_path(name);
        if !path_exists(&path)? {
            return Err(KeeperError::NotFound(format!("backup {}", path.display())));
        }

        check_backup_contents(&path)?;
        disk_space::check_space_to_restore(&path, &self.data_dir)?;

        let saved = if path_exists(&self.data_dir)? {
            let saved = unique_sibling_path(&self.data_dir, "saved")?;
            tracing::info!(
                data = %self.data_dir.display(),
                renamed_to = %saved.display(),
                "Renaming existing data dir"
            );
            rename_path(&self.data_dir, &saved)?;
            Some(saved)
        } else {
            None
        };

        if let Err(copy_err) = self.atomic_copy(&path, &self.data_dir) {
            tracing::error!(error = %copy_err, "Failed to copy backup, restoring current data dir");
            return Err(KeeperError::join_opt(
                copy_err,
                self.put_back(saved.as_deref()).err(),
            ));
        }

        let mut outcome = RestoreOutcome::default();
        if let Some(saved) = saved {
            tracing::info!(path = %saved.display(), "Removing temporary data directory");
            if let Err(e) = remove_path(&saved) {
                outcome.cleanup_warnings.push(CleanupWarning::new(&saved, &e));
            }
        }

        tracing::info!(name = %name, data = %self.data_dir.display(), "Copied backup to data directory");
        Ok(outcome)
    }

    /// Deletes the data directory.
    pub fn remove_data(&self) -> Result<()> {
        tracing::info!(data = %self.data_dir.display(), "Starting data removal");
        remove_path(&self.data_dir)?;
        tracing::info!(data = %self.data_dir.display(), "Removed data");
        Ok(())
    }

    /// Undoes the rename-aside step of a failed restore.
    fn put_back(&self, saved: Option<&Path>) -> Result<()> {
        remove_path(&self.data_dir)?;
        if let Some(saved) = saved {
            rename_path(saved, &self.data_dir)?;
        }
        Ok(())
    }
}

/// Verifies that `path` contains every entry of [`EXPECTED_BACKUP_CONTENT`].
pub fn check_backup_contents(path: &Path) -> Result<()> {
    let entries = fs::read_dir(path).map_err(|e| KeeperError::io_at("read directory", path, e))?;
    let mut existing = BTreeSet::new();
    for entry in entries {
        let entry = entry.map_err(|e| KeeperError::io_at("read directory", path, e))?;
        existing.insert(entry.file_name().to_string_lossy().into_owned());
    }

    let missing: Vec<String> = EXPECTED_BACKUP_CONTENT
        .iter()
        .filter(|expected| !existing.contains(**expected))
        .map(|expected| expected.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(KeeperError::InvalidBackup {
            path: path.to_path_buf(),
            missing,
        });
    }
    Ok(())
}
