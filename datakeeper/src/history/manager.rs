use crate::history::{BootInfo, History, HistoryStorage};
use crate::system::Boot;
use crate::utils::Result;

pub const DEFAULT_MAX_ENTRIES: usize = 10;

/// Bounded boot history on top of a [`HistoryStorage`].
pub struct HistoryManager<S: HistoryStorage> {
    storage: S,
    max_entries: usize,
}

impl<S: HistoryStorage> HistoryManager<S> {
    pub fn new(storage: S, max_entries: usize) -> Self {
        Self {
            storage,
            max_entries,
        }
    }

    /// Returns the history sorted most recent first.
    /// An existing but empty ledger is reported as no history.
    pub fn get(&self) -> Result<Option<History>> {
        let Some(mut history) = self.storage.load()? else {
            return Ok(None);
        };
        if history.is_empty() {
            return Ok(None);
        }
        history.sort();
        Ok(Some(history))
    }

    /// Merges `info` into the entry of `boot` and evicts the oldest entries
    /// beyond the cap.
    pub fn update(&self, boot: &Boot, info: BootInfo) -> Result<()> {
        let mut history = self.storage.load()?.unwrap_or_default();
        history.add_or_update(boot, info)?;
        history.remove_old_entries(self.max_entries);
        self.storage.save(&history)?;

        tracing::info!(
            boot = %boot.id,
            deployment = %boot.deployment_id,
            health = %info.health,
            pre_run_status = %info.pre_run_status,
            "Boot history updated"
        );
        Ok(())
    }
}
