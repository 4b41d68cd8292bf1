//! Parsing of `journalctl --list-boots -o json`.

use crate::system::BootId;
use crate::utils::{KeeperError, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// One boot as recorded by the journal. `index` is 0 for the current boot,
/// -1 for the one before it, and so on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JournalBoot {
    pub index: i64,
    pub boot_id: String,
    /// Timestamp of the first journal entry, in microseconds since the epoch.
    pub first_entry: i64,
}

impl JournalBoot {
    pub fn id(&self) -> BootId {
        BootId::new(&self.boot_id)
    }

    pub fn boot_time(&self) -> Result<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.first_entry).ok_or_else(|| {
            KeeperError::Parse(format!(
                "invalid first entry timestamp {} of boot {}",
                self.first_entry, self.boot_id
            ))
        })
    }
}

pub fn parse_list_boots(output: &str) -> Result<Vec<JournalBoot>> {
    serde_json::from_str(output.trim()).map_err(|e| {
        KeeperError::Parse(format!("failed to parse journalctl boot list: {}", e))
    })
}

pub fn boot_at(boots: &[JournalBoot], index: i64) -> Option<&JournalBoot> {
    boots.iter().find(|b| b.index == index)
}
