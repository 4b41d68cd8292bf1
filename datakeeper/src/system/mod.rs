//! Identity of the running system: boots and OSTree deployments.

pub mod info;
pub mod journal;
pub mod ostree;

use crate::utils::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use info::OsSystemInfo;
pub use ostree::Deployment;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Kernel boot ID without dashes, as listed by `journalctl --list-boots`.
    BootId
);
string_id!(
    /// OSTree deployment ID, e.g. `rhel-<checksum>.0`.
    DeploymentId
);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boot {
    pub id: BootId,
    pub boot_time: DateTime<Utc>,
    pub deployment_id: DeploymentId,
}

/// Queries about the host the engine runs on.
pub trait SystemInfo {
    fn is_ostree(&self) -> Result<bool>;

    fn current_boot(&self) -> Result<Boot>;

    /// ID of the boot before the current one, `None` on the very first boot
    /// of the device.
    fn previous_boot_id(&self) -> Result<Option<BootId>>;

    fn deployments(&self) -> Result<Vec<Deployment>>;
}
