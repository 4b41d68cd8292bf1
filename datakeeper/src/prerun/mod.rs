//! Once-per-boot decision engine run before the node services start.
//!
//! Advisors answer questions about the host and its boot history, the
//! [`Strategy`] turns the answers into a decision and the [`Executor`]
//! carries it out. The resulting status is recorded in the boot history.

pub mod advisors;
pub mod backups;
pub mod executor;
pub mod layout;
pub mod strategy;

pub use advisors::{BackupAdvisor, LayoutAdvisor, PreconditionsAdvisor, PreviousBoot, SystemAdvisor};
pub use executor::{Executor, PreRunExecutor};
pub use strategy::Strategy;
