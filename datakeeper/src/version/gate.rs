//! Startup check of the binary version against the version of the data.

use crate::fs::paths::{ensure_dir_exists, path_exists_and_is_not_empty, write_atomically};
use crate::version::assets::{AssetSource, UPGRADE_BLOCKS_ASSET};
use crate::version::{BuildInfo, VersionMetadata};
use crate::utils::{KeeperError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Largest supported number of minor versions between data and binary.
pub const MAX_MINOR_SKEW: u32 = 1;

pub const VERSION_FILE_NAME: &str = "version";

/// Target version mapped to the versions it must not be upgraded from.
pub type BlockedEdges = HashMap<String, Vec<String>>;

pub struct VersionGate<'a, A: AssetSource> {
    data_dir: PathBuf,
    build: &'a BuildInfo,
    assets: A,
    legacy_data_version: VersionMetadata,
}

impl<'a, A: AssetSource> VersionGate<'a, A> {
    pub fn new(
        data_dir: impl Into<PathBuf>,
        build: &'a BuildInfo,
        assets: A,
        legacy_data_version: VersionMetadata,
    ) -> Self {
        Self {
            data_dir: data_dir.into(),
            build,
            assets,
            legacy_data_version,
        }
    }

    fn version_file(&self) -> PathBuf {
        self.data_dir.join(VERSION_FILE_NAME)
    }

    /// Version of the existing data, `None` when there is no data yet.
    /// Data without a version file predates version tracking.
    pub fn data_version(&self) -> Result<Option<VersionMetadata>> {
        let version_file = self.version_file();
        if path_exists_and_is_not_empty(&version_file, &[])? {
            let content = fs::read_to_string(&version_file)
                .map_err(|e| KeeperError::io_at("read", &version_file, e))?;
            return parse_version_file(&content).map(Some);
        }

        if path_exists_and_is_not_empty(&self.data_dir, &[".nodename"])? {
            tracing::info!(
                assumed = %self.legacy_data_version,
                "Data exists without a version file"
            );
            return Ok(Some(self.legacy_data_version));
        }
        Ok(None)
    }

    /// Rejects unsupported version changes, then records the binary version
    /// in the data directory.
    pub fn check_and_update_data_version(&self) -> Result<()> {
        let exec = self.build.version;
        let data = self.data_version()?;
        tracing::info!(
            exec = %exec,
            data = %data.map(|v| v.to_string()).unwrap_or_else(|| "none".into()),
            "Checking version of the data"
        );

        match data {
            Some(data) => {
                check_compatibility(exec, data)?;
                let edges = self.blocked_edges()?;
                if is_blocked(&edges, &exec.to_string(), &data.to_string()) {
                    return Err(KeeperError::UpgradeBlocked {
                        from: data.to_string(),
                        to: exec.to_string(),
                    });
                }
            }
            None => tracing::info!("No existing data, skipping compatibility checks"),
        }

        write_version_file(&self.data_dir, exec)?;
        tracing::info!(version = %exec, "Data version updated");
        Ok(())
    }

    fn blocked_edges(&self) -> Result<BlockedEdges> {
        let Some(bytes) = self.assets.load(UPGRADE_BLOCKS_ASSET) else {
            tracing::debug!("No upgrade blocklist available");
            return Ok(BlockedEdges::new());
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| KeeperError::Parse(format!("failed to parse upgrade blocklist: {}", e)))
    }
}

/// Version skew rules between the binary and the data.
pub fn check_compatibility(exec: VersionMetadata, data: VersionMetadata) -> Result<()> {
    if exec == data {
        return Ok(());
    }

    if exec.major != data.major {
        return Err(KeeperError::VersionSkew(format!(
            "major versions are different: data is {} and executable is {}",
            data.major, exec.major
        )));
    }

    if exec.minor < data.minor {
        return Err(KeeperError::VersionSkew(format!(
            "executable ({}) is older than existing data ({}): downgrading data is not supported",
            exec, data
        )));
    }

    let skew = exec.minor - data.minor;
    if skew > MAX_MINOR_SKEW {
        return Err(KeeperError::VersionSkew(format!(
            "executable ({}) is too recent compared to existing data ({}): minor version difference is {}, maximum allowed difference is {}",
            exec, data, skew, MAX_MINOR_SKEW
        )));
    }

    tracing::info!(exec = %exec, data = %data, "Versions are compatible");
    Ok(())
}

pub fn is_blocked(edges: &BlockedEdges, exec: &str, data: &str) -> bool {
    edges
        .get(exec)
        .is_some_and(|sources| sources.iter().any(|from| from == data))
}

#[derive(Deserialize)]
struct VersionFile {
    version: VersionMetadata,
}

/// Accepts both the plain `4.14.0` form and
/// `{"version":"4.14.0","deployment_id":"...","boot_id":"..."}`.
pub fn parse_version_file(content: &str) -> Result<VersionMetadata> {
    match serde_json::from_str::<VersionFile>(content) {
        Ok(file) => Ok(file.version),
        Err(json_err) => content.parse().map_err(|plain_err| {
            KeeperError::Parse(format!(
                "failed to parse version file {:?}: {}; {}",
                content.trim(),
                json_err,
                plain_err
            ))
        }),
    }
}

pub fn write_version_file(data_dir: &Path, version: VersionMetadata) -> Result<()> {
    ensure_dir_exists(data_dir)?;
    write_atomically(&data_dir.join(VERSION_FILE_NAME), version.to_string().as_bytes())
}
