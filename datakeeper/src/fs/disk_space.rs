//! Disk-space preflight checks.
//!
//! The checks are naive on purpose: the size of the tree to copy is compared
//! with the free space of the target filesystem and copy-on-write savings are
//! ignored. Failing early is preferred over running out of space mid-copy.

use crate::fs::walker;
use crate::utils::{KeeperError, Result};
use std::path::Path;

const MIB: u64 = 1024 * 1024;

/// Size in bytes of every file below `path`.
pub fn size_of_dir(path: &Path) -> Result<u64> {
    let summary = walker::summarize(path).map_err(|e| KeeperError::io_at("get size of", path, e))?;
    tracing::info!(
        path = %path.display(),
        files = summary.files,
        size_mib = summary.bytes / MIB,
        "Calculated size of directory"
    );
    Ok(summary.bytes)
}

/// Bytes available to unprivileged users on the filesystem holding `path`.
pub fn available_space(path: &Path) -> Result<u64> {
    let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| {
        KeeperError::io_at("get available disk space of", path, std::io::Error::from(errno))
    })?;
    let available = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
    tracing::info!(
        path = %path.display(),
        available_mib = available / MIB,
        "Calculated available disk space"
    );
    Ok(available)
}

/// Rejects an operation needing `required` bytes when only `available` are free.
pub fn ensure_enough_space(
    location: &Path,
    operation: &'static str,
    required: u64,
    available: u64,
) -> Result<()> {
    if available < required {
        return Err(KeeperError::InsufficientSpace {
            location: location.to_path_buf(),
            operation,
            required,
            available,
        });
    }
    Ok(())
}

/// Checks that `storage` can hold another copy of `data_dir`.
pub fn check_space_to_back_up(data_dir: &Path, storage: &Path) -> Result<()> {
    let required = size_of_dir(data_dir)?;
    let available = available_space(storage)?;
    ensure_enough_space(storage, "create a backup", required, available)
}

/// Checks that the filesystem holding `data_dir` can take a copy of `backup`.
///
/// Restoring renames the live data aside and copies the backup next to it,
/// so both exist at once until the old copy is deleted.
pub fn check_space_to_restore(backup: &Path, data_dir: &Path) -> Result<()> {
    let required = size_of_dir(backup)?;
    let target = existing_ancestor(data_dir);
    let available = available_space(target)?;
    ensure_enough_space(target, "restore the backup", required, available)
}

/// `statvfs` needs an existing path; the data directory itself may be absent.
fn existing_ancestor(path: &Path) -> &Path {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .unwrap_or_else(|| Path::new("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_enough_space() {
        let location = Path::new("/var/lib");
        assert!(ensure_enough_space(location, "create a backup", 10, 10).is_ok());
        assert!(ensure_enough_space(location, "create a backup", 0, 0).is_ok());

        let err = ensure_enough_space(location, "create a backup", 11, 10).unwrap_err();
        match err {
            KeeperError::InsufficientSpace {
                required,
                available,
                ..
            } => {
                assert_eq!(required, 11);
                assert_eq!(available, 10);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_space_checks_on_small_tree() -> Result<()> {
        let temp_dir = TempDir::new().unwrap();
        let data = temp_dir.path().join("data");
        let storage = temp_dir.path().join("storage");
        fs::create_dir_all(&data).unwrap();
        fs::create_dir_all(&storage).unwrap();
        fs::write(data.join("version"), b"4.18.1").unwrap();

        assert_eq!(size_of_dir(&data)?, 6);
        assert!(available_space(temp_dir.path())? > 0);
        check_space_to_back_up(&data, &storage)?;
        check_space_to_restore(&data, &temp_dir.path().join("missing/live"))?;
        Ok(())
    }
}
