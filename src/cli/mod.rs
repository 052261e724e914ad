//! cli
//!
//! Command-line interface layer for snapwarden.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Initialize logging
//! - Delegate to command handlers
//!
//! # Exit status
//!
//! Configuration errors and a retention store needing migration are
//! returned as errors (exit 1). Individual job failures are logged and do
//! not change the exit status.

pub mod args;
pub mod commands;

pub use args::{Cli, Shell};

use anyhow::Result;

use crate::logging;

/// Run the CLI application.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> Result<()> {
    let cli = Cli::parse_args();
    logging::init(cli.debug);
    commands::dispatch(cli)
}
