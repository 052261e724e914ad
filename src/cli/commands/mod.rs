//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Loads the configuration (except `completion`)
//! 2. Builds the services it needs
//! 3. Formats and displays output
//!
//! Handlers never call the backend directly; jobs do that through the
//! engine.

mod cache_cmd;
mod completion;
mod list;
mod run_jobs;

pub use cache_cmd::{list_snapshots, maint, update as cache_update};
pub use completion::completion;
pub use list::list;
pub use run_jobs::run_jobs;

use std::path::Path;

use anyhow::Result;
use tracing::warn;

use crate::cli::args::{CacheAction, Cli, Command};
use crate::core::config::Config;

/// Dispatch a command to its handler.
pub fn dispatch(cli: Cli) -> Result<()> {
    let filter = cli.command.job_filter();
    let Cli {
        config,
        really,
        command,
        ..
    } = cli;

    match command {
        Command::Completion { shell } => completion(shell),
        Command::List => list(&load_config(config.as_deref())?),
        Command::Cache { action } => {
            let config = load_config(config.as_deref())?;
            match action {
                CacheAction::Update { no_backup } => cache_update(&config, no_backup),
                CacheAction::ListSnapshots { json } => list_snapshots(&config, json),
                CacheAction::Maint { prune } => maint(&config, prune, really),
            }
        }
        Command::Snapshot { jobs }
        | Command::Clean { jobs }
        | Command::Copy { jobs }
        | Command::Jobset { jobsets: jobs } => {
            let config = load_config(config.as_deref())?;
            run_jobs(&config, filter, &jobs, really)?;
            Ok(())
        }
    }
}

/// Load configuration, logging any warnings.
fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let loaded = Config::load(explicit)?;
    for warning in &loaded.warnings {
        warn!(path = %warning.path.display(), "{}", warning.message);
    }
    Ok(loaded.config)
}
