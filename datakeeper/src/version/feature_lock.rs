//! Lock on custom feature gates.
//!
//! Custom feature gates cannot be reverted and make the node unsupported
//! for upgrades. The first start with custom gates records them, together
//! with the binary version, in `<data_dir>/no-upgrade`. Later starts fail
//! when either the gates or the version differ from the recorded ones.

use crate::fs::paths::{ensure_dir_exists, path_exists, write_atomically};
use crate::utils::{KeeperError, Result};
use crate::version::VersionMetadata;
use serde::{Deserialize, Serialize};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub const LOCK_FILE_NAME: &str = "no-upgrade";

pub const FEATURE_SET_CUSTOM: &str = "CustomNoUpgrade";
pub const FEATURE_SET_TECH_PREVIEW: &str = "TechPreviewNoUpgrade";
pub const FEATURE_SET_DEV_PREVIEW: &str = "DevPreviewNoUpgrade";

const CLEANUP_HINT: &str = "remove the data with `microshift-cleanup-data --all`, \
    drop the custom feature gates from the configuration and restart";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomNoUpgrade {
    pub enabled: Vec<String>,
    pub disabled: Vec<String>,
}

impl CustomNoUpgrade {
    fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty()
    }
}

/// Feature gates configured for the node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureGates {
    /// Empty, `CustomNoUpgrade`, `TechPreviewNoUpgrade` or `DevPreviewNoUpgrade`
    pub feature_set: String,

    /// Gates toggled one by one, only with `CustomNoUpgrade`
    pub custom_no_upgrade: CustomNoUpgrade,
}

impl FeatureGates {
    pub fn validate(&self) -> Result<()> {
        let set = self.feature_set.as_str();
        if !matches!(
            set,
            "" | FEATURE_SET_CUSTOM | FEATURE_SET_TECH_PREVIEW | FEATURE_SET_DEV_PREVIEW
        ) {
            return Err(KeeperError::Parse(format!(
                "feature_gates.feature_set {:?} is not one of {}, {}, {}",
                set, FEATURE_SET_CUSTOM, FEATURE_SET_TECH_PREVIEW, FEATURE_SET_DEV_PREVIEW
            )));
        }
        if set != FEATURE_SET_CUSTOM && !self.custom_no_upgrade.is_empty() {
            return Err(KeeperError::Parse(format!(
                "feature_gates.custom_no_upgrade requires feature_set {}",
                FEATURE_SET_CUSTOM
            )));
        }
        if set == FEATURE_SET_CUSTOM && self.custom_no_upgrade.is_empty() {
            return Err(KeeperError::Parse(format!(
                "feature_set {} requires enabled or disabled gates",
                FEATURE_SET_CUSTOM
            )));
        }
        Ok(())
    }

    /// Whether the gates take the node off the upgrade path.
    pub fn is_custom(&self) -> bool {
        match self.feature_set.as_str() {
            FEATURE_SET_TECH_PREVIEW | FEATURE_SET_DEV_PREVIEW => true,
            FEATURE_SET_CUSTOM => !self.custom_no_upgrade.is_empty(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFile {
    feature_set: String,
    custom_no_upgrade: CustomNoUpgrade,
    version: VersionMetadata,
}

pub struct FeatureGateLock<'a> {
    data_dir: PathBuf,
    gates: &'a FeatureGates,
}

impl<'a> FeatureGateLock<'a> {
    pub fn new(data_dir: impl Into<PathBuf>, gates: &'a FeatureGates) -> Self {
        Self {
            data_dir: data_dir.into(),
            gates,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE_NAME)
    }

    /// Creates the lock on the first start with custom gates, validates it
    /// on every later one.
    pub fn check(&self, version: VersionMetadata) -> Result<()> {
        if !self.gates.is_custom() {
            tracing::info!("No custom feature gates configured, skipping feature gate lock");
            return Ok(());
        }
        tracing::info!(feature_set = %self.gates.feature_set, "Custom feature gates configured");

        let path = self.path();
        if !path_exists(&path)? {
            return self.create(&path, version);
        }
        self.validate(&path, version)
    }

    fn create(&self, path: &Path, version: VersionMetadata) -> Result<()> {
        let lock = LockFile {
            feature_set: self.gates.feature_set.clone(),
            custom_no_upgrade: self.gates.custom_no_upgrade.clone(),
            version,
        };
        let content = serde_yaml::to_string(&lock)
            .map_err(|e| KeeperError::Parse(format!("failed to serialize feature gate lock: {}", e)))?;

        ensure_dir_exists(&self.data_dir)?;
        write_atomically(path, content.as_bytes())?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| KeeperError::io_at("set permissions of", path, e))?;
        tracing::warn!(
            path = %path.display(),
            feature_set = %lock.feature_set,
            version = %version,
            "Created feature gate lock, this node can no longer be upgraded"
        );
        Ok(())
    }

    fn validate(&self, path: &Path, version: VersionMetadata) -> Result<()> {
        let content = fs::read_to_string(path).map_err(|e| KeeperError::io_at("read", path, e))?;
        let lock: LockFile = serde_yaml::from_str(&content).map_err(|e| {
            KeeperError::Parse(format!("failed to parse feature gate lock {}: {}", path.display(), e))
        })?;

        if lock.feature_set != self.gates.feature_set {
            return Err(KeeperError::FeatureGatesLocked(format!(
                "feature set changed from {:?} to {:?}; custom feature gates cannot be changed \
                 or reverted once applied, {}",
                lock.feature_set, self.gates.feature_set, CLEANUP_HINT
            )));
        }
        if lock.custom_no_upgrade != self.gates.custom_no_upgrade {
            return Err(KeeperError::FeatureGatesLocked(format!(
                "custom feature gates changed from {:?} to {:?}; custom feature gates cannot be \
                 changed or reverted once applied, {}",
                lock.custom_no_upgrade, self.gates.custom_no_upgrade, CLEANUP_HINT
            )));
        }
        if lock.version != version {
            return Err(KeeperError::FeatureGatesLocked(format!(
                "version changed from {} to {} with custom feature gates ({}) applied; \
                 roll back to {} or {}",
                lock.version, version, lock.feature_set, lock.version, CLEANUP_HINT
            )));
        }

        tracing::info!(path = %path.display(), "Feature gate lock is valid");
        Ok(())
    }
}
