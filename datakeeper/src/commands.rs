//! Subcommand handlers: wire the configuration to the engine components.

use crate::autorecovery::{self, AutorecoveryManager};
use crate::config::Config;
use crate::data::{BackupName, DataManager, StoragePath};
use crate::fs::paths::path_exists;
use crate::history::{BootInfo, FileStorage, Health, HistoryManager};
use crate::prerun::{PreRunExecutor, Strategy, SystemAdvisor};
use crate::system::{OsSystemInfo, SystemInfo};
use crate::utils::{command, KeeperError, Result};
use crate::version::{BuildInfo, BundledAssets, FeatureGateLock, VersionGate};
use chrono::Utc;
use std::path::{Component, Path, PathBuf};

fn system_info(config: &Config) -> OsSystemInfo {
    OsSystemInfo::new(&config.paths.ostree_booted_marker, &config.paths.boot_id_file)
}

fn history_manager(config: &Config) -> HistoryManager<FileStorage> {
    HistoryManager::new(
        FileStorage::new(&config.paths.history_file),
        config.history.max_entries,
    )
}

/// Runs the once-per-boot decision engine, then the version gate.
pub fn pre_run(config: &Config, build: &BuildInfo) -> Result<()> {
    let system = system_info(config);
    let history = history_manager(config);
    let data = DataManager::new(
        StoragePath::new(&config.paths.backups_dir),
        &config.paths.data_dir,
    )?;

    let advisor = SystemAdvisor::new(
        &system,
        &history,
        &config.paths.data_dir,
        &config.paths.legacy_health_file,
    );
    let executor = PreRunExecutor::new(&data, &history, &system);
    Strategy::new(&advisor, &advisor, &advisor, &executor).run()?;

    version_check(config, build)
}

/// Validates the feature gate lock, then the version of the data. A rejected
/// start leaves the recorded data version untouched.
pub fn version_check(config: &Config, build: &BuildInfo) -> Result<()> {
    FeatureGateLock::new(&config.paths.data_dir, &config.feature_gates).check(build.version)?;
    VersionGate::new(
        &config.paths.data_dir,
        build,
        BundledAssets,
        config.version.legacy_data_version,
    )
    .check_and_update_data_version()
}

/// Backs up the data to `path` and returns where the backup was written.
///
/// With `auto_recovery`, `path` is the autorecovery storage and the backup
/// name is generated.
pub fn backup(config: &Config, build: &BuildInfo, path: &Path, auto_recovery: bool) -> Result<PathBuf> {
    ensure_root()?;
    ensure_services_inactive(&config.services.guarded)?;

    if auto_recovery {
        let manager = autorecovery_manager(config, build, path, config.autorecovery.save_failed)?;
        let name = manager.create_backup(Utc::now())?;
        return Ok(StoragePath::new(path).backup_path(&name));
    }

    let (storage, name) = backup_path_to_storage_and_name(path)?;
    if path_exists(path)? {
        return Err(KeeperError::AlreadyExists(path.display().to_string()));
    }
    DataManager::new(storage, &config.paths.data_dir)?.backup(&name)
}

/// Restores the data from `path` and returns the path of the restored
/// backup.
pub fn restore(
    config: &Config,
    build: &BuildInfo,
    path: &Path,
    auto_recovery: bool,
    dont_save_failed: bool,
) -> Result<PathBuf> {
    ensure_root()?;
    ensure_services_inactive(&config.services.guarded)?;

    if auto_recovery {
        let save_failed = config.autorecovery.save_failed && !dont_save_failed;
        let manager = autorecovery_manager(config, build, path, save_failed)?;
        let name = manager.perform_restore(Utc::now())?;
        return Ok(StoragePath::new(path).backup_path(&name));
    }

    let (storage, name) = backup_path_to_storage_and_name(path)?;
    if !path_exists(path)? {
        return Err(KeeperError::NotFound(path.display().to_string()));
    }
    let outcome = DataManager::new(storage, &config.paths.data_dir)?.restore(&name)?;
    if !outcome.cleanup_warnings.is_empty() {
        tracing::warn!(
            leftovers = ?outcome.cleanup_warnings.iter().map(|w| w.path.display().to_string()).collect::<Vec<_>>(),
            "Restore completed but left temporary paths behind"
        );
    }
    Ok(path.to_path_buf())
}

fn autorecovery_manager(
    config: &Config,
    build: &BuildInfo,
    storage: &Path,
    save_failed: bool,
) -> Result<AutorecoveryManager> {
    let tag = autorecovery::version_tag(&system_info(config), build)?;
    AutorecoveryManager::new(
        StoragePath::new(storage),
        &config.paths.data_dir,
        tag,
        save_failed,
    )
}

/// Boot history as pretty JSON; `{}` when nothing was recorded yet.
pub fn history_show(config: &Config) -> Result<String> {
    match history_manager(config).get()? {
        Some(history) => Ok(serde_json::to_string_pretty(&history)?),
        None => Ok("{}".to_string()),
    }
}

/// Merges the health of the current boot into the history.
pub fn record_health(config: &Config, health: Health) -> Result<()> {
    let boot = system_info(config).current_boot()?;
    history_manager(config).update(&boot, BootInfo::health(health))
}

/// Splits `/storage/name` into the storage and the backup name.
pub fn backup_path_to_storage_and_name(path: &Path) -> Result<(StoragePath, BackupName)> {
    let cleaned = clean_path(path);
    let name = cleaned
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .ok_or(KeeperError::EmptyArgument("backup name"))?;
    let storage = match cleaned.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Ok((StoragePath::new(storage), BackupName::new(name)))
}

/// Lexical cleanup: drops `.` components and resolves `..` where possible.
fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let can_pop = matches!(
                    cleaned.components().next_back(),
                    Some(Component::Normal(_))
                );
                if can_pop {
                    cleaned.pop();
                } else if !cleaned.has_root() {
                    cleaned.push("..");
                }
            }
            other => cleaned.push(other),
        }
    }
    cleaned
}

pub fn ensure_root() -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        return Err(KeeperError::Invariant(
            "command must be run as root".to_string(),
        ));
    }
    Ok(())
}

/// Fails unless every unit is `inactive` or `failed`.
pub fn ensure_services_inactive(units: &[String]) -> Result<()> {
    for unit in units {
        let output = command::run("systemctl", ["show", "-p", "ActiveState", "--value", unit.as_str()])?;
        let state = output.trim();
        if !is_stopped(state) {
            return Err(KeeperError::Invariant(format!(
                "{} is {}, it must be stopped first",
                unit, state
            )));
        }
        tracing::debug!(unit = %unit, state = %state, "Service is stopped");
    }
    Ok(())
}

fn is_stopped(active_state: &str) -> bool {
    matches!(active_state, "inactive" | "failed")
}
