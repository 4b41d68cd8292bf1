//! Questions the PreRun strategy asks about the host and its history.

use crate::fs::paths::path_exists_and_is_not_empty;
use crate::history::{HistoryEntry, HistoryManager, HistoryStorage, PreRunStatus};
use crate::prerun::layout::DataLayout;
use crate::system::{ostree, DeploymentId, SystemInfo};
use crate::utils::Result;
use crate::version::gate::VERSION_FILE_NAME;
use std::path::PathBuf;

/// What is known about the boot before the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreviousBoot {
    /// The device never booted before.
    FirstBoot,
    /// There is no boot history yet.
    NoHistory,
    /// The history does not mention the previous boot.
    NotRecorded,
    Recorded(HistoryEntry),
}

pub trait PreconditionsAdvisor {
    fn is_ostree(&self) -> Result<bool>;

    /// Status recorded for the current boot, `None` if the PreRun did not
    /// run yet during this boot.
    fn current_boot_pre_run_status(&self) -> Result<Option<PreRunStatus>>;
}

pub trait BackupAdvisor {
    fn previous_boot(&self) -> Result<PreviousBoot>;

    fn current_deployment(&self) -> Result<DeploymentId>;

    /// Deployment the host would roll back to, if there is one.
    fn rollback_deployment(&self) -> Result<Option<DeploymentId>>;
}

pub trait LayoutAdvisor {
    fn data_layout(&self) -> Result<DataLayout>;
}

/// Advisor answering from the live system and the boot history.
pub struct SystemAdvisor<'a, S: SystemInfo, H: HistoryStorage> {
    system: &'a S,
    history: &'a HistoryManager<H>,
    data_dir: PathBuf,
    legacy_health_file: PathBuf,
}

impl<'a, S: SystemInfo, H: HistoryStorage> SystemAdvisor<'a, S, H> {
    pub fn new(
        system: &'a S,
        history: &'a HistoryManager<H>,
        data_dir: impl Into<PathBuf>,
        legacy_health_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            system,
            history,
            data_dir: data_dir.into(),
            legacy_health_file: legacy_health_file.into(),
        }
    }
}

impl<S: SystemInfo, H: HistoryStorage> PreconditionsAdvisor for SystemAdvisor<'_, S, H> {
    fn is_ostree(&self) -> Result<bool> {
        self.system.is_ostree()
    }

    fn current_boot_pre_run_status(&self) -> Result<Option<PreRunStatus>> {
        let Some(history) = self.history.get()? else {
            return Ok(None);
        };
        let current = self.system.current_boot()?;
        let status = history
            .get_boot_by_id(&current.id)
            .map(|entry| entry.pre_run_status)
            .filter(|status| *status != PreRunStatus::Unknown);
        Ok(status)
    }
}

impl<S: SystemInfo, H: HistoryStorage> BackupAdvisor for SystemAdvisor<'_, S, H> {
    fn previous_boot(&self) -> Result<PreviousBoot> {
        let Some(previous_id) = self.system.previous_boot_id()? else {
            return Ok(PreviousBoot::FirstBoot);
        };
        let Some(history) = self.history.get()? else {
            return Ok(PreviousBoot::NoHistory);
        };
        Ok(match history.get_boot_by_id(&previous_id) {
            Some(entry) => PreviousBoot::Recorded(entry.clone()),
            None => PreviousBoot::NotRecorded,
        })
    }

    fn current_deployment(&self) -> Result<DeploymentId> {
        let deployments = self.system.deployments()?;
        Ok(ostree::booted(&deployments)?.id.clone())
    }

    fn rollback_deployment(&self) -> Result<Option<DeploymentId>> {
        let deployments = self.system.deployments()?;
        Ok(ostree::rollback(&deployments).map(|d| d.id.clone()))
    }
}

impl<S: SystemInfo, H: HistoryStorage> LayoutAdvisor for SystemAdvisor<'_, S, H> {
    fn data_layout(&self) -> Result<DataLayout> {
        let layout = DataLayout {
            data_exists: path_exists_and_is_not_empty(&self.data_dir, &[".nodename"])?,
            version_exists: path_exists_and_is_not_empty(
                &self.data_dir.join(VERSION_FILE_NAME),
                &[],
            )?,
            health_exists: path_exists_and_is_not_empty(&self.legacy_health_file, &[])?,
        };
        tracing::info!(
            data_exists = layout.data_exists,
            version_exists = layout.version_exists,
            health_exists = layout.health_exists,
            case = layout.case_number(),
            "Existence of important paths"
        );
        Ok(layout)
    }
}
