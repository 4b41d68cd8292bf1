use crate::fs::paths::{ensure_dir_exists, write_atomically};
use crate::history::History;
use crate::utils::{KeeperError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Persistence of the boot history document.
pub trait HistoryStorage {
    /// Returns `None` when no history was ever saved.
    fn load(&self) -> Result<Option<History>>;
    fn save(&self, history: &History) -> Result<()>;
}

/// History kept as a single JSON file, read and written wholesale.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStorage for FileStorage {
    fn load(&self) -> Result<Option<History>> {
        let content = match fs::read(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "History file does not exist");
                return Ok(None);
            }
            Err(e) => return Err(KeeperError::io_at("read history file", &self.path, e)),
        };

        let history: History = serde_json::from_slice(&content).map_err(|e| {
            KeeperError::Parse(format!(
                "failed to parse history file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(history))
    }

    fn save(&self, history: &History) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            ensure_dir_exists(parent)?;
        }

        let content = serde_json::to_vec_pretty(history)?;
        write_atomically(&self.path, &content)?;

        tracing::debug!(path = %self.path.display(), boots = history.boots.len(), "History saved");
        Ok(())
    }
}
