//! Error types, logging setup and external command execution.

pub mod command;
pub mod errors;
pub mod logger;

pub use errors::{CleanupWarning, KeeperError, Result};
