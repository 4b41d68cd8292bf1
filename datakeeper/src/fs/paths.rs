//! Small path helpers shared by the data, history and autorecovery modules.

use crate::utils::{KeeperError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Returns whether `path` exists. Errors other than "not found" are propagated.
pub fn path_exists(path: &Path) -> Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(KeeperError::io_at("check existence of", path, e)),
    }
}

/// Returns whether `path` exists and has content.
///
/// A file has content when it is not zero-sized. A directory has content when
/// it holds at least one entry whose name is not listed in `ignores`.
pub fn path_exists_and_is_not_empty(path: &Path, ignores: &[&str]) -> Result<bool> {
    let metadata = match fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(KeeperError::io_at("check existence of", path, e)),
    };

    if !metadata.is_dir() {
        return Ok(metadata.len() != 0);
    }

    let entries = fs::read_dir(path).map_err(|e| KeeperError::io_at("read directory", path, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| KeeperError::io_at("read directory", path, e))?;
        let name = entry.file_name();
        if !ignores.iter().any(|ignored| name == *ignored) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Creates `path` (and its parents) if it does not exist yet.
pub fn ensure_dir_exists(path: &Path) -> Result<()> {
    if path_exists(path)? {
        tracing::debug!(path = %path.display(), "Directory already exists");
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| KeeperError::io_at("create directory", path, e))?;
    tracing::info!(path = %path.display(), "Directory created");
    Ok(())
}

/// Builds a unique, not yet existing path next to `path`:
/// `<dir>/<name>.<tag>.<random>`.
///
/// Living in the same directory keeps it on the same filesystem, which is
/// what makes the final rename atomic.
pub fn unique_sibling_path(path: &Path, tag: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| KeeperError::Invariant(format!("{} has no file name", path.display())))?
        .to_string_lossy()
        .into_owned();
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    loop {
        let random = uuid::Uuid::new_v4().simple().to_string();
        let candidate = parent.join(format!("{}.{}.{}", name, tag, &random[..8]));
        if !path_exists(&candidate)? {
            return Ok(candidate);
        }
    }
}

/// Removes a file or directory tree if it exists.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(KeeperError::io_at("stat", path, e)),
    };

    let removed = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.map_err(|e| KeeperError::io_at("remove", path, e))?;
    tracing::debug!(path = %path.display(), "Path removed");
    Ok(())
}

/// Renames `from` to `to`, wrapping the error with both paths.
pub fn rename_path(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| {
        KeeperError::io(
            format!("failed to rename {} to {}", from.display(), to.display()),
            e,
        )
    })?;
    tracing::info!(from = %from.display(), to = %to.display(), "Path renamed");
    Ok(())
}

/// Replaces the content of `path` by writing a sibling file first and
/// renaming it over the target.
pub fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let tmp = unique_sibling_path(path, "tmp")?;
    fs::write(&tmp, content).map_err(|e| KeeperError::io_at("write", &tmp, e))?;
    if let Err(err) = rename_path(&tmp, path) {
        return Err(KeeperError::join_opt(err, remove_path(&tmp).err()));
    }
    Ok(())
}
