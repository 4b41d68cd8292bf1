//! Datakeeper library
//!
//! Keeps the data directory of a node consistent across OSTree deployment
//! changes: per-boot backups and restores driven by the boot history, a
//! version gate for the data, and a manual auto-recovery restore path.

pub mod autorecovery;
pub mod commands;
pub mod config;
pub mod data;
pub mod fs;
pub mod history;
pub mod prerun;
pub mod system;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::KeeperError;
pub type Result<T> = std::result::Result<T, KeeperError>;
