//! Datakeeper - Main entry point
//!
//! Boot-time backup, restore and version gate for node data.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use datakeeper::{commands, config::Config, history::Health, utils, version::BuildInfo};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up, restore or keep the data depending on the previous boot
    PreRun,

    /// Check the data version against this binary and record it
    VersionCheck,

    /// Back up the data to PATH
    Backup {
        path: PathBuf,

        /// Treat PATH as the auto-recovery storage and generate the name
        #[arg(long)]
        auto_recovery: bool,
    },

    /// Restore the data from PATH
    Restore {
        path: PathBuf,

        /// Restore the most recent suitable backup from the auto-recovery
        /// storage at PATH
        #[arg(long)]
        auto_recovery: bool,

        /// Do not keep the replaced data under the storage's failed/ directory
        #[arg(long, requires = "auto_recovery")]
        dont_save_failed: bool,
    },

    /// Inspect or update the boot history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },

    /// Print the version of this binary
    Version,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// Print the boot history as JSON
    Show,

    /// Record the health of the current boot
    RecordHealth { health: HealthArg },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum HealthArg {
    Healthy,
    Unhealthy,
}

impl From<HealthArg> for Health {
    fn from(arg: HealthArg) -> Self {
        match arg {
            HealthArg::Healthy => Health::Healthy,
            HealthArg::Unhealthy => Health::Unhealthy,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load(args.config.as_deref()).context("failed to load configuration")?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    let build = BuildInfo::from_build()?;
    tracing::info!(version = %build.version, command = ?args.command, "Starting datakeeper");

    // The engine is synchronous file and process work.
    let output = tokio::task::spawn_blocking(move || run(args.command, &config, &build))
        .await
        .context("command task panicked")??;

    if let Some(output) = output {
        println!("{}", output);
    }
    Ok(())
}

fn run(command: Command, config: &Config, build: &BuildInfo) -> Result<Option<String>> {
    let output = match command {
        Command::PreRun => {
            commands::pre_run(config, build)?;
            None
        }
        Command::VersionCheck => {
            commands::version_check(config, build)?;
            None
        }
        Command::Backup {
            path,
            auto_recovery,
        } => {
            let written = commands::backup(config, build, &path, auto_recovery)
                .with_context(|| format!("backup to {} failed", path.display()))?;
            Some(written.display().to_string())
        }
        Command::Restore {
            path,
            auto_recovery,
            dont_save_failed,
        } => {
            let restored = commands::restore(config, build, &path, auto_recovery, dont_save_failed)
                .with_context(|| format!("restore from {} failed", path.display()))?;
            Some(restored.display().to_string())
        }
        Command::History { command } => match command {
            HistoryCommand::Show => Some(commands::history_show(config)?),
            HistoryCommand::RecordHealth { health } => {
                commands::record_health(config, health.into())?;
                None
            }
        },
        Command::Version => Some(build.version.to_string()),
    };
    Ok(output)
}
