//! Helpers over the list of PreRun backups.

use crate::data::{BackupName, DataManager};
use crate::system::DeploymentId;
use crate::utils::Result;
use regex::Regex;
use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::sync::LazyLock;

/// `<osname>-<64 char checksum>.<serial>_<32 char boot ID>`, e.g.
/// `rhel-35d7...9048.0_80364fcf3df54284a6902687e2cdd4c2`.
const AUTOMATED_BACKUP_PATTERN: &str = r"^[\w-]+-[\d\w]{64}\.\d+_[\d\w]{32}$";

static AUTOMATED_BACKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(AUTOMATED_BACKUP_PATTERN).unwrap());

/// Whether the backup was created by the PreRun engine. Only those are ever
/// pruned automatically.
pub fn is_automated_backup(name: &BackupName) -> bool {
    AUTOMATED_BACKUP.is_match(name.as_str())
}

/// Deployment ID part of an automated backup name.
pub fn deployment_id_for_backup(name: &BackupName) -> Option<DeploymentId> {
    if !is_automated_backup(name) {
        return None;
    }
    name.as_str()
        .split_once('_')
        .map(|(deployment, _)| DeploymentId::new(deployment))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Backups(Vec<BackupName>);

impl Backups {
    pub fn load(data: &DataManager) -> Result<Self> {
        let backups = data.get_backup_list()?;
        tracing::info!(backups = ?backups, "List of existing backups");
        Ok(Self(backups))
    }

    pub fn names(&self) -> &[BackupName] {
        &self.0
    }

    pub fn has(&self, name: &BackupName) -> bool {
        self.0.contains(name)
    }

    fn filter(&self, pred: impl Fn(&BackupName) -> bool) -> Backups {
        Backups(self.0.iter().filter(|b| pred(b)).cloned().collect())
    }

    /// Automated backups of the given deployment.
    pub fn for_deployment(&self, deployment: &DeploymentId) -> Backups {
        let backups = self.filter(|b| deployment_id_for_backup(b).as_ref() == Some(deployment));
        tracing::info!(deployment = %deployment, backups = ?backups.0, "Backups for the deployment");
        backups
    }

    /// Automated backups whose deployment is not in `deployments` anymore.
    pub fn dangling(&self, deployments: &[DeploymentId]) -> Backups {
        let known: HashSet<&DeploymentId> = deployments.iter().collect();
        let mut unknown_owner = Vec::new();
        let mut dangling = Vec::new();

        for backup in &self.0 {
            match deployment_id_for_backup(backup) {
                Some(deployment) if !known.contains(&deployment) => dangling.push(backup.clone()),
                Some(_) => {}
                None => unknown_owner.push(backup),
            }
        }

        if !unknown_owner.is_empty() {
            tracing::info!(
                backups = ?unknown_owner,
                "Found backups not belonging to any deployment, they need to be deleted manually"
            );
        }
        Backups(dangling)
    }

    /// Newest backup by status change time of its directory.
    ///
    /// The modification time is copied from the data directory by
    /// `cp --preserve`, while the final rename into the storage updates the
    /// change time, so the latter tells when the backup was made.
    pub fn most_recent(&self, data: &DataManager) -> Option<BackupName> {
        self.0
            .iter()
            .map(|b| {
                let changed = std::fs::metadata(data.backup_path(b))
                    .map(|m| (m.ctime(), m.ctime_nsec()))
                    .unwrap_or((0, 0));
                (changed, b)
            })
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, b)| b.clone())
    }

    /// Removes every listed backup. Failures are logged and skipped.
    pub fn remove_all(&self, data: &DataManager) {
        if self.0.is_empty() {
            return;
        }

        tracing::info!("Starting pruning backups");
        for backup in &self.0 {
            if let Err(e) = data.remove_backup(backup) {
                tracing::error!(name = %backup, error = %e, "Failed to remove backup, ignoring");
            }
        }
        tracing::info!("Finished pruning backups");
    }
}

impl FromIterator<BackupName> for Backups {
    fn from_iter<I: IntoIterator<Item = BackupName>>(iter: I) -> Self {
        Backups(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StoragePath;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    const CHECKSUM: &str = "35d7b5c80f0f1378d6846f6dc1304bbf1dcdc5847198fcd4e6099364eaf99048";
    const BOOT: &str = "80364fcf3df54284a6902687e2cdd4c2";

    fn name(s: &str) -> BackupName {
        BackupName::new(s)
    }

    #[test]
    fn test_is_automated_backup() {
        let cases = [
            (format!("rhel-{CHECKSUM}.0_{BOOT}"), true),
            (format!("rhel-{CHECKSUM}._{BOOT}"), false),
            (format!("rhel-{CHECKSUM}.11_{BOOT}"), true),
            (format!("rhel-{CHECKSUM}.111_{BOOT}"), true),
            (format!("rhel-{}.0_{BOOT}", &CHECKSUM[..63]), false),
            (format!("rhel-{CHECKSUM}.0_{}", &BOOT[..31]), false),
            (format!("fedora-{CHECKSUM}.0_{BOOT}"), true),
            (format!("fedora-silverblue-{CHECKSUM}.0_{BOOT}"), true),
            (format!("rhel-{CHECKSUM}.0_{BOOT}_unhealthy"), false),
            ("4.14.0_20230815000000".to_string(), false),
        ];

        for (backup, expected) in cases {
            assert_eq!(is_automated_backup(&name(&backup)), expected, "{backup}");
        }
    }

    #[test]
    fn test_deployment_id_for_backup() {
        let cases = [
            (format!("rhel-{CHECKSUM}.0_{BOOT}"), Some(format!("rhel-{CHECKSUM}.0"))),
            (
                format!("fedora-silverblue-{CHECKSUM}.0_{BOOT}"),
                Some(format!("fedora-silverblue-{CHECKSUM}.0")),
            ),
            ("r-35d7b5c80f0f1378d6846f6dc1304bbf.0_80364fcf3df54284".to_string(), None),
            ("4.14.0_20230815000000".to_string(), None),
            ("custom001".to_string(), None),
            ("custom_001".to_string(), None),
        ];

        for (backup, expected) in cases {
            assert_eq!(
                deployment_id_for_backup(&name(&backup)),
                expected.map(DeploymentId::new),
                "{backup}"
            );
        }
    }

    #[test]
    fn test_for_deployment_and_dangling() {
        let deploy_a = format!("rhel-{CHECKSUM}.0");
        let deploy_b = format!("rhel-{CHECKSUM}.1");
        let backups: Backups = [
            format!("{deploy_a}_{BOOT}"),
            format!("{deploy_b}_{BOOT}"),
            format!("{deploy_a}_{BOOT}_unhealthy"),
            "4.13".to_string(),
        ]
        .iter()
        .map(|s| name(s))
        .collect();

        let for_a = backups.for_deployment(&DeploymentId::new(&deploy_a));
        assert_eq!(for_a.names(), &[name(&format!("{deploy_a}_{BOOT}"))]);

        let dangling = backups.dangling(&[DeploymentId::new(&deploy_a)]);
        assert_eq!(dangling.names(), &[name(&format!("{deploy_b}_{BOOT}"))]);

        assert!(backups
            .dangling(&[DeploymentId::new(&deploy_a), DeploymentId::new(&deploy_b)])
            .names()
            .is_empty());
    }

    #[test]
    fn test_remove_all_and_most_recent() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let storage = temp_dir.path().join("backups");
        let data = DataManager::new(StoragePath::new(&storage), temp_dir.path().join("data"))?;
        fs::create_dir_all(storage.join("old")).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::create_dir_all(storage.join("keep")).unwrap();

        let all = Backups::load(&data)?;
        assert_eq!(all.most_recent(&data), Some(name("keep")));

        Backups::from_iter([name("old"), name("missing")]).remove_all(&data);
        assert_eq!(Backups::load(&data)?.names(), &[name("keep")]);
        Ok(())
    }

    #[test]
    fn test_most_recent_ignores_preserved_mtime() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let storage = temp_dir.path().join("backups");
        let data = DataManager::new(StoragePath::new(&storage), temp_dir.path().join("data"))?;
        fs::create_dir_all(storage.join("first")).unwrap();
        // As if copied with `cp --preserve` from a recently modified data dir.
        let first = fs::File::open(storage.join("first")).unwrap();
        first
            .set_modified(SystemTime::now() + Duration::from_secs(3600))
            .unwrap();
        drop(first);
        std::thread::sleep(Duration::from_millis(20));
        fs::create_dir_all(storage.join("second")).unwrap();

        let all = Backups::load(&data)?;
        assert_eq!(all.most_recent(&data), Some(name("second")));
        Ok(())
    }
}
