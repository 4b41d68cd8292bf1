use crate::data::{BackupName, DataManager};
use crate::history::{BootInfo, HistoryEntry, HistoryManager, HistoryStorage, PreRunStatus};
use crate::prerun::backups::Backups;
use crate::system::{DeploymentId, SystemInfo};
use crate::utils::Result;

/// Name of the one-off backup of data written before version tracking.
pub const LEGACY_BACKUP_NAME: &str = "4.13";

/// Actions the PreRun strategy decides on.
pub trait Executor {
    /// Backs up the data as left by `previous`, then prunes superseded and
    /// dangling backups.
    fn backup_previous_boot(&self, previous: &HistoryEntry) -> Result<()>;

    fn backup_legacy_data(&self) -> Result<()>;

    /// Restores the most recent backup of `deployment`.
    /// Returns `false` when the deployment has no backup.
    fn restore_deployment_backup(&self, deployment: &DeploymentId) -> Result<bool>;

    /// Moves the data of an unhealthy boot out of the way so the node starts
    /// from scratch.
    fn archive_unhealthy_data(&self, previous: &HistoryEntry) -> Result<()>;

    fn update_pre_run_status(&self, status: PreRunStatus) -> Result<()>;
}

pub fn previous_boot_backup_name(previous: &HistoryEntry) -> BackupName {
    BackupName::new(format!("{}_{}", previous.deployment_id, previous.id))
}

pub struct PreRunExecutor<'a, S: SystemInfo, H: HistoryStorage> {
    data: &'a DataManager,
    history: &'a HistoryManager<H>,
    system: &'a S,
}

impl<'a, S: SystemInfo, H: HistoryStorage> PreRunExecutor<'a, S, H> {
    pub fn new(data: &'a DataManager, history: &'a HistoryManager<H>, system: &'a S) -> Self {
        Self {
            data,
            history,
            system,
        }
    }

    fn prune_dangling(&self, existing: &Backups) {
        let deployments = match self.system.deployments() {
            Ok(deployments) => deployments,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list deployments, not pruning dangling backups");
                return;
            }
        };
        let ids: Vec<DeploymentId> = deployments.into_iter().map(|d| d.id).collect();
        existing.dangling(&ids).remove_all(self.data);
    }
}

impl<S: SystemInfo, H: HistoryStorage> Executor for PreRunExecutor<'_, S, H> {
    fn backup_previous_boot(&self, previous: &HistoryEntry) -> Result<()> {
        let name = previous_boot_backup_name(previous);
        tracing::info!(deployment = %previous.deployment_id, name = %name, "Preparing to back up");

        let existing = Backups::load(self.data)?;
        let superseded = existing.for_deployment(&previous.deployment_id);
        if existing.has(&name) {
            tracing::info!(name = %name, "Skipping backup: backup already exists");
            return Ok(());
        }

        self.data.backup(&name)?;
        superseded.remove_all(self.data);
        self.prune_dangling(&existing);

        tracing::info!(deployment = %previous.deployment_id, name = %name, "Finished backup");
        Ok(())
    }

    fn backup_legacy_data(&self) -> Result<()> {
        let name = BackupName::new(LEGACY_BACKUP_NAME);
        if self.data.backup_exists(&name)? {
            tracing::info!(name = %name, "Skipping backup of legacy data: backup already exists");
            return Ok(());
        }
        self.data.backup(&name)?;
        Ok(())
    }

    fn restore_deployment_backup(&self, deployment: &DeploymentId) -> Result<bool> {
        let backups = Backups::load(self.data)?.for_deployment(deployment);
        let Some(name) = backups.most_recent(self.data) else {
            tracing::info!(deployment = %deployment, "No backup to restore for the deployment");
            return Ok(false);
        };

        tracing::info!(deployment = %deployment, name = %name, "Restoring backup");
        let outcome = self.data.restore(&name)?;
        tracing::info!(
            name = %name,
            cleanup_warnings = outcome.cleanup_warnings.len(),
            "Finished restore"
        );
        Ok(true)
    }

    fn archive_unhealthy_data(&self, previous: &HistoryEntry) -> Result<()> {
        let name = BackupName::new(format!("{}_unhealthy", previous_boot_backup_name(previous)));
        if self.data.backup_exists(&name)? {
            tracing::info!(name = %name, "Unhealthy data already archived");
        } else {
            self.data.backup(&name)?;
        }
        self.data.remove_data()?;
        tracing::info!(name = %name, "Archived unhealthy data, starting from scratch");
        Ok(())
    }

    fn update_pre_run_status(&self, status: PreRunStatus) -> Result<()> {
        let current = self.system.current_boot()?;
        self.history.update(&current, BootInfo::pre_run(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StoragePath;
    use crate::history::{FileStorage, Health};
    use crate::system::{Boot, BootId, Deployment};
    use chrono::{TimeZone, Utc};
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const CHECKSUM_A: &str = "35d7b5c80f0f1378d6846f6dc1304bbf1dcdc5847198fcd4e6099364eaf99048";
    const CHECKSUM_B: &str = "a4e5c0f8b4d3c2b1a0f9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e0d9c8b7";
    const BOOT_1: &str = "80364fcf3df54284a6902687e2cdd4c2";
    const BOOT_2: &str = "5d7c2bcb3ef44c1bae2e8ed1d1a3b0a1";
    const BOOT_3: &str = "0f1e2d3c4b5a69788796a5b4c3d2e1f0";

    fn deploy_a() -> DeploymentId {
        DeploymentId::new(format!("rhel-{CHECKSUM_A}.0"))
    }

    fn deploy_b() -> DeploymentId {
        DeploymentId::new(format!("rhel-{CHECKSUM_B}.0"))
    }

    struct FakeSystem {
        deployments: Vec<DeploymentId>,
    }

    impl SystemInfo for FakeSystem {
        fn is_ostree(&self) -> Result<bool> {
            Ok(true)
        }

        fn current_boot(&self) -> Result<Boot> {
            Ok(Boot {
                id: BootId::new(BOOT_3),
                boot_time: Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
                deployment_id: deploy_a(),
            })
        }

        fn previous_boot_id(&self) -> Result<Option<BootId>> {
            Ok(Some(BootId::new(BOOT_2)))
        }

        fn deployments(&self) -> Result<Vec<Deployment>> {
            Ok(self
                .deployments
                .iter()
                .enumerate()
                .map(|(idx, id)| Deployment {
                    id: id.clone(),
                    booted: idx == 0,
                    staged: false,
                    pinned: false,
                })
                .collect())
        }
    }

    struct Fixture {
        temp_dir: TempDir,
        data: DataManager,
        history: HistoryManager<FileStorage>,
    }

    impl Fixture {
        fn new() -> Self {
            let temp_dir = TempDir::new().unwrap();
            let data_dir = temp_dir.path().join("microshift");
            for dir in ["certs", "etcd", "kubelet-plugins", "resources"] {
                fs::create_dir_all(data_dir.join(dir)).unwrap();
            }
            fs::write(data_dir.join("version"), "4.18.1").unwrap();
            fs::write(data_dir.join("etcd/db"), "live").unwrap();

            let data = DataManager::new(
                StoragePath::new(temp_dir.path().join("microshift-backups")),
                &data_dir,
            )
            .unwrap();
            let history =
                HistoryManager::new(FileStorage::new(temp_dir.path().join("history.json")), 10);
            Self {
                temp_dir,
                data,
                history,
            }
        }

        fn data_dir(&self) -> &Path {
            self.data.data_dir()
        }

        fn backups(&self) -> Vec<String> {
            self.data
                .get_backup_list()
                .unwrap()
                .iter()
                .map(|b| b.to_string())
                .collect()
        }
    }

    fn entry(boot: &str, deployment: DeploymentId, health: Health) -> HistoryEntry {
        HistoryEntry {
            id: BootId::new(boot),
            boot_time: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            deployment_id: deployment,
            health,
            pre_run_status: PreRunStatus::Success,
        }
    }

    #[test]
    fn test_backup_previous_boot_supersedes_and_prunes() -> Result<()> {
        let fx = Fixture::new();
        let system = FakeSystem {
            deployments: vec![deploy_a()],
        };
        let executor = PreRunExecutor::new(&fx.data, &fx.history, &system);

        // Older backup of the same deployment, one of a deployment that is
        // gone, and a manual one.
        let older = format!("{}_{BOOT_1}", deploy_a());
        let gone = format!("{}_{BOOT_1}", deploy_b());
        fx.data.backup(&BackupName::new(&older))?;
        fx.data.backup(&BackupName::new(&gone))?;
        fx.data.backup(&BackupName::new("manual"))?;

        executor.backup_previous_boot(&entry(BOOT_2, deploy_a(), Health::Healthy))?;

        assert_eq!(
            fx.backups(),
            vec!["manual".to_string(), format!("{}_{BOOT_2}", deploy_a())]
        );
        Ok(())
    }

    #[test]
    fn test_backup_previous_boot_skips_existing() -> Result<()> {
        let fx = Fixture::new();
        let system = FakeSystem {
            deployments: vec![deploy_a()],
        };
        let executor = PreRunExecutor::new(&fx.data, &fx.history, &system);
        let previous = entry(BOOT_2, deploy_a(), Health::Healthy);

        executor.backup_previous_boot(&previous)?;
        fs::write(fx.data_dir().join("etcd/db"), "changed").unwrap();
        executor.backup_previous_boot(&previous)?;

        let backup = fx.data.backup_path(&previous_boot_backup_name(&previous));
        assert_eq!(fs::read_to_string(backup.join("etcd/db")).unwrap(), "live");
        Ok(())
    }

    #[test]
    fn test_backup_legacy_data_once() -> Result<()> {
        let fx = Fixture::new();
        let system = FakeSystem { deployments: vec![] };
        let executor = PreRunExecutor::new(&fx.data, &fx.history, &system);

        executor.backup_legacy_data()?;
        executor.backup_legacy_data()?;
        assert_eq!(fx.backups(), vec!["4.13".to_string()]);
        Ok(())
    }

    #[test]
    fn test_restore_deployment_backup() -> Result<()> {
        let fx = Fixture::new();
        let system = FakeSystem {
            deployments: vec![deploy_a(), deploy_b()],
        };
        let executor = PreRunExecutor::new(&fx.data, &fx.history, &system);

        assert!(!executor.restore_deployment_backup(&deploy_a())?);

        fx.data.backup(&BackupName::new(format!("{}_{BOOT_1}", deploy_a())))?;
        fs::write(fx.data_dir().join("etcd/db"), "broken").unwrap();

        assert!(executor.restore_deployment_backup(&deploy_a())?);
        assert_eq!(fs::read_to_string(fx.data_dir().join("etcd/db")).unwrap(), "live");
        assert!(!executor.restore_deployment_backup(&deploy_b())?);
        Ok(())
    }

    #[test]
    fn test_archive_unhealthy_data() -> Result<()> {
        let fx = Fixture::new();
        let system = FakeSystem { deployments: vec![] };
        let executor = PreRunExecutor::new(&fx.data, &fx.history, &system);

        executor.archive_unhealthy_data(&entry(BOOT_2, deploy_a(), Health::Unhealthy))?;

        assert!(!fx.data_dir().exists());
        assert_eq!(fx.backups(), vec![format!("{}_{BOOT_2}_unhealthy", deploy_a())]);
        Ok(())
    }

    #[test]
    fn test_update_pre_run_status_records_current_boot() -> Result<()> {
        let fx = Fixture::new();
        let system = FakeSystem { deployments: vec![] };
        let executor = PreRunExecutor::new(&fx.data, &fx.history, &system);

        executor.update_pre_run_status(PreRunStatus::BackupFailed)?;

        let history = fx.history.get()?.unwrap();
        let entry = history.get_boot_by_id(&BootId::new(BOOT_3)).unwrap();
        assert_eq!(entry.pre_run_status, PreRunStatus::BackupFailed);
        assert_eq!(entry.deployment_id, deploy_a());
        assert!(fx.temp_dir.path().join("history.json").exists());
        Ok(())
    }
}
