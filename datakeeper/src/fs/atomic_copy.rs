//! Crash-safe directory copy.
//!
//! The source is first copied to an intermediate directory next to the
//! destination, then the intermediate directory is renamed into place.
//! A rename within one filesystem is atomic, so a reader of the destination
//! never sees a partially copied tree, even after a power loss.
//!
//! The two phases are exposed separately so that several copies can be
//! prepared first and finalized together (see `autorecovery`).

use crate::fs::paths::{path_exists, remove_path, unique_sibling_path};
use crate::utils::{command, KeeperError, Result};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments for `cp`: recursive, keep mode/ownership/timestamps,
/// use copy-on-write clones when the filesystem supports them.
const CP_ARGS: [&str; 3] = ["--recursive", "--preserve", "--reflink=auto"];

/// Program making the intermediate copy. It is invoked as
/// `<program> <args..> --recursive --preserve --reflink=auto <source>/. <intermediate>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyProgram {
    program: String,
    args: Vec<String>,
}

impl CopyProgram {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for CopyProgram {
    fn default() -> Self {
        Self::new("cp", Vec::<String>::new())
    }
}

#[derive(Debug)]
pub struct AtomicDirCopy {
    source: PathBuf,
    destination: PathBuf,
    intermediate: Option<PathBuf>,
    program: CopyProgram,
    keep_on_failure: bool,
}

impl AtomicDirCopy {
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            intermediate: None,
            program: CopyProgram::default(),
            keep_on_failure: false,
        }
    }

    pub fn with_program(mut self, program: CopyProgram) -> Self {
        self.program = program;
        self
    }

    /// Leaves the intermediate copy in place when the final rename fails,
    /// for copies that may end up being the only one of their source.
    pub fn keep_intermediate_on_failure(mut self) -> Self {
        self.keep_on_failure = true;
        self
    }

    /// Runs both phases: copy to an intermediate directory, then rename it
    /// to the destination.
    pub fn copy(mut self) -> Result<()> {
        self.copy_to_intermediate()?;
        self.rename_to_final()
    }

    pub fn intermediate(&self) -> Option<&Path> {
        self.intermediate.as_deref()
    }

    /// Copies the source into a fresh intermediate directory next to the
    /// destination. On failure the intermediate directory is removed.
    pub fn copy_to_intermediate(&mut self) -> Result<()> {
        let intermediate = unique_sibling_path(&self.destination, "tmp")?;
        fs::create_dir(&intermediate)
            .map_err(|e| KeeperError::io_at("create intermediate directory", &intermediate, e))?;
        self.intermediate = Some(intermediate.clone());

        // `<source>/.` copies the contents (and attributes) of the source
        // into the already existing intermediate directory.
        let contents = self.source.join(".");
        let copied = command::run(
            &self.program.program,
            self.program
                .args
                .iter()
                .map(OsStr::new)
                .chain(CP_ARGS.iter().map(OsStr::new))
                .chain([contents.as_os_str(), intermediate.as_os_str()]),
        );

        if let Err(err) = copied {
            tracing::error!(
                source = %self.source.display(),
                intermediate = %intermediate.display(),
                error = %err,
                "Failed to make an intermediate copy"
            );
            return Err(KeeperError::join_opt(err, self.rollback_intermediate().err()));
        }

        tracing::info!(
            source = %self.source.display(),
            intermediate = %intermediate.display(),
            "Made an intermediate copy"
        );
        Ok(())
    }

    /// Removes the intermediate copy, if one was made.
    pub fn rollback_intermediate(&mut self) -> Result<()> {
        let Some(intermediate) = self.intermediate.take() else {
            return Ok(());
        };
        remove_path(&intermediate)?;
        tracing::info!(path = %intermediate.display(), "Removed intermediate copy");
        Ok(())
    }

    /// Moves the intermediate copy (or, when no copy was made, the source
    /// itself) to the destination.
    ///
    /// An existing destination directory is removed first because `rename`
    /// cannot replace a non-empty directory. A crash between the removal and
    /// the rename leaves the destination absent.
    pub fn rename_to_final(&mut self) -> Result<()> {
        let src = match self.intermediate.take() {
            Some(intermediate) => intermediate,
            None => self.source.clone(),
        };

        if let Err(err) = remove_dir_if_exists(&self.destination) {
            return Err(self.discard_after_failure(&src, err));
        }

        if let Err(e) = fs::rename(&src, &self.destination) {
            tracing::error!(path = %src.display(), error = %e, "Failed to rename the path");
            let rename_err = KeeperError::io(
                format!(
                    "failed to rename {} to {}",
                    src.display(),
                    self.destination.display()
                ),
                e,
            );
            return Err(self.discard_after_failure(&src, rename_err));
        }

        tracing::info!(
            src = %src.display(),
            dest = %self.destination.display(),
            "Renamed to final destination"
        );
        Ok(())
    }

    /// Deletes an intermediate copy after a failed finalization, unless asked
    /// to keep it. The source is never deleted.
    fn discard_after_failure(&self, src: &Path, err: KeeperError) -> KeeperError {
        if src == self.source {
            return err;
        }
        if self.keep_on_failure {
            tracing::warn!(path = %src.display(), "Keeping intermediate copy after failed rename");
            return err;
        }
        KeeperError::join_opt(err, remove_path(src).err())
    }
}

fn remove_dir_if_exists(path: &Path) -> Result<()> {
    if !path_exists(path)? {
        return Ok(());
    }
    let metadata = fs::symlink_metadata(path).map_err(|e| KeeperError::io_at("stat", path, e))?;
    if metadata.is_dir() {
        fs::remove_dir_all(path).map_err(|e| KeeperError::io_at("remove", path, e))?;
    }
    Ok(())
}
