//! Error types shared by every layer of the engine.

use crate::history::PreRunStatus;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("argument `{0}` is empty")]
    EmptyArgument(&'static str),

    #[error("{0} does not exist")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error(
        "not enough disk space in {location} to {operation}: required={}M available={}M",
        required / 1024 / 1024,
        available / 1024 / 1024
    )]
    InsufficientSpace {
        location: PathBuf,
        operation: &'static str,
        required: u64,
        available: u64,
    },

    #[error("{path} is not a valid backup: missing {}", missing.join(", "))]
    InvalidBackup { path: PathBuf, missing: Vec<String> },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    VersionSkew(String),

    #[error("upgrade from {from} to {to} is blocked")]
    UpgradeBlocked { from: String, to: String },

    #[error("feature gates are locked: {0}")]
    FeatureGatesLocked(String),

    #[error("pre-run already ran during this boot and failed: {0}")]
    PreRunFailed(PreRunStatus),

    #[error("invariant violated: {0}")]
    Invariant(String),

    #[error("{}", ErrorList(.0))]
    Multiple(Vec<KeeperError>),
}

impl KeeperError {
    /// Wraps an I/O error with a description of the operation that failed.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        KeeperError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        Self::io(format!("failed to {} {}", action, path.display()), source)
    }

    /// Combines two errors, keeping `primary` first.
    pub fn join(primary: KeeperError, secondary: KeeperError) -> Self {
        let mut errors = match primary {
            KeeperError::Multiple(list) => list,
            other => vec![other],
        };
        match secondary {
            KeeperError::Multiple(list) => errors.extend(list),
            other => errors.push(other),
        }
        KeeperError::Multiple(errors)
    }

    /// Joins an optional follow-up failure (usually a rollback) onto `primary`.
    pub fn join_opt(primary: KeeperError, secondary: Option<KeeperError>) -> Self {
        match secondary {
            Some(secondary) => Self::join(primary, secondary),
            None => primary,
        }
    }
}

struct ErrorList<'a>(&'a [KeeperError]);

impl fmt::Display for ErrorList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, err) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

/// Non-fatal failure of a best-effort cleanup step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub message: String,
}

impl CleanupWarning {
    pub fn new(path: &Path, err: &dyn std::error::Error) -> Self {
        let warning = Self {
            path: path.to_path_buf(),
            message: err.to_string(),
        };
        tracing::warn!(path = %path.display(), error = %warning.message, "Cleanup failed, leaving path in place");
        warning
    }
}

pub type Result<T> = std::result::Result<T, KeeperError>;
