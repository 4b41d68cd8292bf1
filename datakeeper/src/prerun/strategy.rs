//! Once-per-boot decision whether to back up, restore or leave the data alone.

use crate::history::{Health, HistoryEntry, PreRunStatus};
use crate::prerun::advisors::{BackupAdvisor, LayoutAdvisor, PreconditionsAdvisor, PreviousBoot};
use crate::prerun::executor::Executor;
use crate::prerun::layout::LayoutCase;
use crate::utils::{KeeperError, Result};

pub struct Strategy<'a> {
    preconditions: &'a dyn PreconditionsAdvisor,
    backups: &'a dyn BackupAdvisor,
    layout: &'a dyn LayoutAdvisor,
    executor: &'a dyn Executor,
}

/// Result of the decision path: the status to record and the error, if any.
type Decision = (PreRunStatus, Result<()>);

fn succeeded() -> Decision {
    (PreRunStatus::Success, Ok(()))
}

fn failed(status: PreRunStatus, err: KeeperError) -> Decision {
    (status, Err(err))
}

impl<'a> Strategy<'a> {
    pub fn new(
        preconditions: &'a dyn PreconditionsAdvisor,
        backups: &'a dyn BackupAdvisor,
        layout: &'a dyn LayoutAdvisor,
        executor: &'a dyn Executor,
    ) -> Self {
        Self {
            preconditions,
            backups,
            layout,
            executor,
        }
    }

    pub fn run(&self) -> Result<()> {
        if !self.preconditions.is_ostree()? {
            tracing::info!("System is not OSTree-based, skipping pre-run");
            return Ok(());
        }

        match self.preconditions.current_boot_pre_run_status()? {
            Some(PreRunStatus::Success) => {
                tracing::info!("Pre-run already ran successfully during this boot");
                return Ok(());
            }
            Some(status) => {
                tracing::error!(status = %status, "Pre-run already ran during this boot and failed");
                return Err(KeeperError::PreRunFailed(status));
            }
            None => {}
        }

        let (status, result) = self.decide();
        tracing::info!(status = %status, "Pre-run finished, recording status");

        match (result, self.executor.update_pre_run_status(status)) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(err), Ok(())) => Err(err),
            (Ok(()), Err(persist_err)) => Err(persist_err),
            (Err(err), Err(persist_err)) => Err(KeeperError::join(err, persist_err)),
        }
    }

    fn decide(&self) -> Decision {
        match self.layout.data_layout() {
            Ok(layout) => match layout.classify() {
                LayoutCase::NoData => {
                    tracing::info!("No data to back up, assuming first start or data removed by hand");
                    return succeeded();
                }
                LayoutCase::LegacyData => {
                    tracing::info!("Data has no version file, backing up legacy data");
                    return match self.executor.backup_legacy_data() {
                        Ok(()) => succeeded(),
                        Err(e) => failed(PreRunStatus::BackupFailed, e),
                    };
                }
                LayoutCase::Versioned => {}
            },
            Err(e) => return failed(PreRunStatus::BackupFailed, e),
        }

        let previous = match self.backups.previous_boot() {
            Ok(previous) => previous,
            Err(e) => return failed(PreRunStatus::BackupFailed, e),
        };

        let previous = match previous {
            PreviousBoot::FirstBoot => {
                tracing::info!("First boot of the device, skipping backup");
                return succeeded();
            }
            PreviousBoot::NoHistory => {
                tracing::info!("Boot history does not exist yet, skipping backup");
                return succeeded();
            }
            PreviousBoot::NotRecorded => {
                tracing::info!("Boot history does not contain the previous boot, skipping backup");
                return succeeded();
            }
            PreviousBoot::Recorded(entry) => entry,
        };

        tracing::info!(
            boot = %previous.id,
            deployment = %previous.deployment_id,
            health = %previous.health,
            "Previous boot"
        );
        match previous.health {
            Health::Healthy => self.after_healthy_boot(&previous),
            Health::Unhealthy => self.after_unhealthy_boot(&previous),
            Health::Unknown => {
                tracing::info!("Health of the previous boot is unknown, skipping backup");
                succeeded()
            }
        }
    }

    fn after_healthy_boot(&self, previous: &HistoryEntry) -> Decision {
        if let Err(e) = self.executor.backup_previous_boot(previous) {
            tracing::error!(error = %e, "Failed to back up the previous boot");
            return failed(PreRunStatus::BackupFailed, e);
        }

        // Nothing was restored yet, so a lookup failure counts against the
        // backup step like the other advisor failures.
        let current = match self.backups.current_deployment() {
            Ok(current) => current,
            Err(e) => return failed(PreRunStatus::BackupFailed, e),
        };
        if current == previous.deployment_id {
            return succeeded();
        }

        // A backup of the current deployment means the host went back to a
        // deployment it already ran.
        tracing::info!(
            previous = %previous.deployment_id,
            current = %current,
            "Deployment changed since the previous boot"
        );
        match self.executor.restore_deployment_backup(&current) {
            Ok(true) => succeeded(),
            Ok(false) => {
                tracing::info!("No backup of the current deployment, continuing with existing data");
                succeeded()
            }
            Err(e) => failed(PreRunStatus::RestoreFailed, e),
        }
    }

    fn after_unhealthy_boot(&self, previous: &HistoryEntry) -> Decision {
        match self.remediate(previous) {
            Ok(()) => succeeded(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to remediate unhealthy data");
                failed(PreRunStatus::RestoreFailed, e)
            }
        }
    }

    fn remediate(&self, previous: &HistoryEntry) -> Result<()> {
        let current = self.backups.current_deployment()?;
        if self.executor.restore_deployment_backup(&current)? {
            return Ok(());
        }

        let Some(rollback) = self.backups.rollback_deployment()? else {
            tracing::info!("No rollback deployment, leaving data untouched");
            return Ok(());
        };
        if self.executor.restore_deployment_backup(&rollback)? {
            return Ok(());
        }

        tracing::info!(
            current = %current,
            rollback = %rollback,
            "No backup for current nor rollback deployment"
        );
        self.executor.archive_unhealthy_data(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prerun::layout::DataLayout;
    use crate::system::{BootId, DeploymentId};
    use chrono::Utc;
    use std::cell::{Cell, RefCell};

    /// Advisors and executor in one, recording every call.
    struct Fake {
        calls: RefCell<Vec<String>>,
        is_ostree: bool,
        pre_run_status: Option<PreRunStatus>,
        layout: DataLayout,
        previous: PreviousBoot,
        current_deployment: &'static str,
        rollback_deployment: Option<&'static str>,
        restorable: Vec<&'static str>,
        current_deployment_fails: bool,
        backup_fails: bool,
        restore_fails: bool,
        persist_fails: bool,
        persisted: Cell<Option<PreRunStatus>>,
    }

    impl Default for Fake {
        fn default() -> Self {
            Self {
                calls: RefCell::new(Vec::new()),
                is_ostree: true,
                pre_run_status: None,
                layout: DataLayout {
                    data_exists: true,
                    version_exists: true,
                    health_exists: false,
                },
                previous: PreviousBoot::FirstBoot,
                current_deployment: "deploy-a",
                rollback_deployment: None,
                restorable: Vec::new(),
                current_deployment_fails: false,
                backup_fails: false,
                restore_fails: false,
                persist_fails: false,
                persisted: Cell::new(None),
            }
        }
    }

    impl Fake {
        fn record(&self, call: impl Into<String>) {
            self.calls.borrow_mut().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }

        fn run(&self) -> Result<()> {
            Strategy::new(self, self, self, self).run()
        }
    }

    impl PreconditionsAdvisor for Fake {
        fn is_ostree(&self) -> Result<bool> {
            self.record("is_ostree");
            Ok(self.is_ostree)
        }

        fn current_boot_pre_run_status(&self) -> Result<Option<PreRunStatus>> {
            self.record("current_boot_pre_run_status");
            Ok(self.pre_run_status)
        }
    }

    impl BackupAdvisor for Fake {
        fn previous_boot(&self) -> Result<PreviousBoot> {
            self.record("previous_boot");
            Ok(self.previous.clone())
        }

        fn current_deployment(&self) -> Result<DeploymentId> {
            if self.current_deployment_fails {
                return Err(KeeperError::Command {
                    command: "rpm-ostree status".into(),
                    stderr: "daemon unavailable".into(),
                });
            }
            Ok(DeploymentId::new(self.current_deployment))
        }

        fn rollback_deployment(&self) -> Result<Option<DeploymentId>> {
            Ok(self.rollback_deployment.map(DeploymentId::new))
        }
    }

    impl LayoutAdvisor for Fake {
        fn data_layout(&self) -> Result<DataLayout> {
            Ok(self.layout)
        }
    }

    impl Executor for Fake {
        fn backup_previous_boot(&self, previous: &HistoryEntry) -> Result<()> {
            self.record(format!("backup_previous_boot {}", previous.id));
            if self.backup_fails {
                return Err(KeeperError::NotFound("no reason".into()));
            }
            Ok(())
        }

        fn backup_legacy_data(&self) -> Result<()> {
            self.record("backup_legacy_data");
            if self.backup_fails {
                return Err(KeeperError::NotFound("no reason".into()));
            }
            Ok(())
        }

        fn restore_deployment_backup(&self, deployment: &DeploymentId) -> Result<bool> {
            self.record(format!("restore {}", deployment));
            if self.restore_fails {
                return Err(KeeperError::NotFound("no reason".into()));
            }
            Ok(self.restorable.iter().any(|d| *d == deployment.as_str()))
        }

        fn archive_unhealthy_data(&self, previous: &HistoryEntry) -> Result<()> {
            self.record(format!("archive {}", previous.id));
            Ok(())
        }

        fn update_pre_run_status(&self, status: PreRunStatus) -> Result<()> {
            self.record(format!("update_pre_run_status {}", status));
            self.persisted.set(Some(status));
            if self.persist_fails {
                return Err(KeeperError::Invariant("history is read-only".into()));
            }
            Ok(())
        }
    }

    fn previous(health: Health, deployment: &str) -> PreviousBoot {
        PreviousBoot::Recorded(HistoryEntry {
            id: BootId::new("boot-1"),
            boot_time: Utc::now(),
            deployment_id: DeploymentId::new(deployment),
            health,
            pre_run_status: PreRunStatus::Success,
        })
    }

    #[test]
    fn test_does_not_run_on_non_ostree_systems() -> Result<()> {
        let fake = Fake {
            is_ostree: false,
            ..Default::default()
        };
        fake.run()?;
        assert_eq!(fake.calls(), vec!["is_ostree"]);
        assert_eq!(fake.persisted.get(), None);
        Ok(())
    }

    #[test]
    fn test_does_not_run_twice_per_boot() -> Result<()> {
        let fake = Fake {
            pre_run_status: Some(PreRunStatus::Success),
            ..Default::default()
        };
        fake.run()?;
        assert_eq!(fake.calls(), vec!["is_ostree", "current_boot_pre_run_status"]);
        Ok(())
    }

    #[test]
    fn test_previous_failure_of_this_boot_is_propagated() {
        let fake = Fake {
            pre_run_status: Some(PreRunStatus::BackupFailed),
            ..Default::default()
        };
        let err = fake.run().unwrap_err();
        assert!(matches!(err, KeeperError::PreRunFailed(PreRunStatus::BackupFailed)));
        assert_eq!(fake.persisted.get(), None);
    }

    #[test]
    fn test_skips_backup_without_previous_boot_information() -> Result<()> {
        for previous in [
            PreviousBoot::FirstBoot,
            PreviousBoot::NoHistory,
            PreviousBoot::NotRecorded,
            self::previous(Health::Unknown, "deploy-a"),
        ] {
            let fake = Fake {
                previous: previous.clone(),
                ..Default::default()
            };
            fake.run()?;
            assert_eq!(
                fake.calls(),
                vec![
                    "is_ostree",
                    "current_boot_pre_run_status",
                    "previous_boot",
                    "update_pre_run_status success"
                ],
                "{previous:?}"
            );
        }
        Ok(())
    }

    #[test]
    fn test_backs_up_after_healthy_boot() -> Result<()> {
        let fake = Fake {
            previous: previous(Health::Healthy, "deploy-a"),
            ..Default::default()
        };
        fake.run()?;
        assert_eq!(
            fake.calls()[2..],
            ["previous_boot", "backup_previous_boot boot-1", "update_pre_run_status success"]
        );
        Ok(())
    }

    #[test]
    fn test_failed_backup_is_recorded() {
        let fake = Fake {
            previous: previous(Health::Healthy, "deploy-a"),
            backup_fails: true,
            ..Default::default()
        };
        assert!(fake.run().is_err());
        assert_eq!(fake.persisted.get(), Some(PreRunStatus::BackupFailed));
    }

    #[test]
    fn test_persistence_error_is_joined_to_decision_error() {
        let fake = Fake {
            previous: previous(Health::Healthy, "deploy-a"),
            backup_fails: true,
            persist_fails: true,
            ..Default::default()
        };
        match fake.run().unwrap_err() {
            KeeperError::Multiple(errors) => {
                assert_eq!(errors.len(), 2);
                assert!(matches!(errors[0], KeeperError::NotFound(_)));
                assert!(matches!(errors[1], KeeperError::Invariant(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_persistence_error_alone_fails_the_run() {
        let fake = Fake {
            persist_fails: true,
            ..Default::default()
        };
        assert!(matches!(fake.run(), Err(KeeperError::Invariant(_))));
        assert_eq!(fake.persisted.get(), Some(PreRunStatus::Success));
    }

    #[test]
    fn test_restores_after_switching_to_known_deployment() -> Result<()> {
        let fake = Fake {
            previous: previous(Health::Healthy, "deploy-b"),
            restorable: vec!["deploy-a"],
            ..Default::default()
        };
        fake.run()?;
        assert_eq!(
            fake.calls()[3..],
            ["backup_previous_boot boot-1", "restore deploy-a", "update_pre_run_status success"]
        );
        Ok(())
    }

    #[test]
    fn test_deployment_lookup_failure_after_backup_is_recorded() {
        let fake = Fake {
            previous: previous(Health::Healthy, "deploy-b"),
            current_deployment_fails: true,
            ..Default::default()
        };
        assert!(matches!(fake.run(), Err(KeeperError::Command { .. })));
        assert_eq!(fake.persisted.get(), Some(PreRunStatus::BackupFailed));
        assert_eq!(
            fake.calls()[3..],
            ["backup_previous_boot boot-1", "update_pre_run_status backup-failed"]
        );
    }

    #[test]
    fn test_failed_restore_after_switch_is_recorded() {
        let fake = Fake {
            previous: previous(Health::Healthy, "deploy-b"),
            restore_fails: true,
            ..Default::default()
        };
        assert!(fake.run().is_err());
        assert_eq!(fake.persisted.get(), Some(PreRunStatus::RestoreFailed));
    }

    #[test]
    fn test_unhealthy_boot_restores_current_deployment() -> Result<()> {
        let fake = Fake {
            previous: previous(Health::Unhealthy, "deploy-a"),
            restorable: vec!["deploy-a"],
            rollback_deployment: Some("deploy-b"),
            ..Default::default()
        };
        fake.run()?;
        assert_eq!(
            fake.calls()[3..],
            ["restore deploy-a", "update_pre_run_status success"]
        );
        Ok(())
    }

    #[test]
    fn test_unhealthy_boot_falls_back_to_rollback_deployment() -> Result<()> {
        let fake = Fake {
            previous: previous(Health::Unhealthy, "deploy-a"),
            restorable: vec!["deploy-b"],
            rollback_deployment: Some("deploy-b"),
            ..Default::default()
        };
        fake.run()?;
        assert_eq!(
            fake.calls()[3..],
            ["restore deploy-a", "restore deploy-b", "update_pre_run_status success"]
        );
        Ok(())
    }

    #[test]
    fn test_unhealthy_boot_without_backups_starts_clean() -> Result<()> {
        let fake = Fake {
            previous: previous(Health::Unhealthy, "deploy-a"),
            rollback_deployment: Some("deploy-b"),
            ..Default::default()
        };
        fake.run()?;
        assert_eq!(
            fake.calls()[3..],
            [
                "restore deploy-a",
                "restore deploy-b",
                "archive boot-1",
                "update_pre_run_status success"
            ]
        );
        Ok(())
    }

    #[test]
    fn test_unhealthy_boot_without_rollback_leaves_data() -> Result<()> {
        let fake = Fake {
            previous: previous(Health::Unhealthy, "deploy-a"),
            ..Default::default()
        };
        fake.run()?;
        assert_eq!(
            fake.calls()[3..],
            ["restore deploy-a", "update_pre_run_status success"]
        );
        Ok(())
    }

    #[test]
    fn test_layout_without_data_skips_everything() -> Result<()> {
        let fake = Fake {
            layout: DataLayout {
                data_exists: false,
                version_exists: false,
                health_exists: true,
            },
            previous: previous(Health::Healthy, "deploy-a"),
            ..Default::default()
        };
        fake.run()?;
        assert_eq!(
            fake.calls(),
            vec!["is_ostree", "current_boot_pre_run_status", "update_pre_run_status success"]
        );
        Ok(())
    }

    #[test]
    fn test_legacy_data_is_backed_up() {
        let layout = DataLayout {
            data_exists: true,
            version_exists: false,
            health_exists: false,
        };
        let fake = Fake {
            layout,
            ..Default::default()
        };
        assert!(fake.run().is_ok());
        assert_eq!(fake.calls()[2..], ["backup_legacy_data", "update_pre_run_status success"]);

        let fake = Fake {
            layout,
            backup_fails: true,
            ..Default::default()
        };
        assert!(fake.run().is_err());
        assert_eq!(fake.persisted.get(), Some(PreRunStatus::BackupFailed));
    }
}
