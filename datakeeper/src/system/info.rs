use crate::fs::paths::path_exists;
use crate::system::journal::{self, JournalBoot};
use crate::system::ostree::{self, Deployment};
use crate::system::{Boot, BootId, SystemInfo};
use crate::utils::{command, KeeperError, Result};
use std::fs;
use std::path::PathBuf;

/// [`SystemInfo`] backed by the host's tools: the journal, rpm-ostree and
/// the kernel boot ID.
#[derive(Debug, Clone)]
pub struct OsSystemInfo {
    ostree_booted_marker: PathBuf,
    boot_id_file: PathBuf,
}

impl OsSystemInfo {
    pub fn new(ostree_booted_marker: impl Into<PathBuf>, boot_id_file: impl Into<PathBuf>) -> Self {
        Self {
            ostree_booted_marker: ostree_booted_marker.into(),
            boot_id_file: boot_id_file.into(),
        }
    }

    fn kernel_boot_id(&self) -> Result<BootId> {
        let content = fs::read_to_string(&self.boot_id_file)
            .map_err(|e| KeeperError::io_at("read", &self.boot_id_file, e))?;
        Ok(normalize_boot_id(&content))
    }

    fn journal_boots(&self) -> Result<Vec<JournalBoot>> {
        let output = command::run("journalctl", ["--list-boots", "--output", "json"])?;
        journal::parse_list_boots(&output)
    }
}

/// The kernel reports the ID with dashes, the journal without.
fn normalize_boot_id(raw: &str) -> BootId {
    BootId::new(raw.trim().replace('-', ""))
}

impl SystemInfo for OsSystemInfo {
    fn is_ostree(&self) -> Result<bool> {
        path_exists(&self.ostree_booted_marker)
    }

    fn current_boot(&self) -> Result<Boot> {
        let id = self.kernel_boot_id()?;
        let boots = self.journal_boots()?;
        let entry = boots
            .iter()
            .find(|b| b.boot_id == id.as_str())
            .or_else(|| journal::boot_at(&boots, 0))
            .ok_or_else(|| KeeperError::NotFound(format!("boot {} in the journal", id)))?;

        let deployments = self.deployments()?;
        let deployment_id = ostree::booted(&deployments)?.id.clone();

        let boot = Boot {
            id,
            boot_time: entry.boot_time()?,
            deployment_id,
        };
        tracing::debug!(boot = %boot.id, deployment = %boot.deployment_id, "Current boot");
        Ok(boot)
    }

    fn previous_boot_id(&self) -> Result<Option<BootId>> {
        let boots = self.journal_boots()?;
        Ok(journal::boot_at(&boots, -1).map(JournalBoot::id))
    }

    fn deployments(&self) -> Result<Vec<Deployment>> {
        let output = command::run("rpm-ostree", ["status", "--json"])?;
        let deployments = ostree::parse_status(&output)?;
        tracing::info!(
            deployments = ?deployments.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
            "OSTree deployments"
        );
        Ok(deployments)
    }
}
