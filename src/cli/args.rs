//! cli::args
//!
//! Command-line argument definitions using clap derive.
//!
//! # Global Flags
//!
//! These flags are available on all commands:
//! - `--help` / `-h`: Show help
//! - `--version`: Show version
//! - `--config <path>` / `-c`: Configuration file
//! - `--debug`: Enable debug logging
//! - `--really` / `-r`: Perform destructive operations (default is a dry run)

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::jobs::JobType;

/// snapwarden - snapshot lifecycle and replication
#[derive(Parser, Debug)]
#[command(name = "snapwarden")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (default: $SNAPWARDEN_CONFIG, then the user and system config)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Really execute snapshot, destroy and send/receive commands
    #[arg(short, long, global = true)]
    pub really: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Parser::parse()
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Take snapshots of the named jobs' targets
    #[command(after_help = "\
EXAMPLES:
    # Preview every snapshot job
    snapwarden snapshot all

    # Snapshot the jobs of a jobset, for real
    snapwarden -r snapshot nightly")]
    Snapshot {
        /// Job or jobset names, or `all`
        #[arg(value_name = "JOB", required = true)]
        jobs: Vec<String>,
    },

    /// Destroy expired and redundant snapshots
    #[command(
        long_about = "Destroy expired and redundant snapshots.\n\n\
            Snapshots older than the job's keep window are destroyed. With squash \
            enabled, a snapshot identical to its successor is destroyed too. \
            Snapshots pinned by a copy job (keep-count above zero) are never touched."
    )]
    Clean {
        /// Job or jobset names, or `all`
        #[arg(value_name = "JOB", required = true)]
        jobs: Vec<String>,
    },

    /// Replicate the latest snapshot to the job's destination
    Copy {
        /// Job or jobset names, or `all`
        #[arg(value_name = "JOB", required = true)]
        jobs: Vec<String>,
    },

    /// Run every job of the named jobsets, in order
    Jobset {
        /// Jobset names, `all` or `all-jobsets`
        #[arg(value_name = "JOBSET", required = true)]
        jobsets: Vec<String>,
    },

    /// Show configured jobs and jobsets
    List,

    /// Retention store maintenance
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Generate shell completion scripts
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Command {
    /// Job type filter for the run actions; `None` for `jobset`.
    pub fn job_filter(&self) -> Option<JobType> {
        match self {
            Command::Snapshot { .. } => Some(JobType::Snapshot),
            Command::Clean { .. } => Some(JobType::Clean),
            Command::Copy { .. } => Some(JobType::Copy),
            _ => None,
        }
    }
}

/// Retention store maintenance actions.
#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// Migrate the store to the current schema version
    Update {
        /// Do not copy the store to `<path>.bak` first
        #[arg(long)]
        no_backup: bool,
    },

    /// Print every keep-count row
    ListSnapshots {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Report anomalies, optionally removing inert rows
    Maint {
        /// Delete rows whose count is zero and compact the file
        #[arg(long)]
        prune: bool,
    },
}

/// Supported shells for completion.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Shell {
    Bash,
    Zsh,
    Fish,
    PowerShell,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["snapwarden", "clean", "all", "-r", "--debug"]).unwrap();
        assert!(cli.really);
        assert!(cli.debug);
        assert_eq!(cli.command.job_filter(), Some(JobType::Clean));
    }

    #[test]
    fn run_actions_require_names() {
        assert!(Cli::try_parse_from(["snapwarden", "snapshot"]).is_err());
        assert!(Cli::try_parse_from(["snapwarden", "jobset"]).is_err());
    }

    #[test]
    fn dry_run_by_default() {
        let cli = Cli::try_parse_from(["snapwarden", "copy", "a", "b"]).unwrap();
        assert!(!cli.really);
        match cli.command {
            Command::Copy { jobs } => assert_eq!(jobs, vec!["a", "b"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cache_actions() {
        let cli = Cli::try_parse_from(["snapwarden", "cache", "update", "--no-backup"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Cache {
                action: CacheAction::Update { no_backup: true }
            }
        ));

        let cli = Cli::try_parse_from(["snapwarden", "cache", "list-snapshots", "--json"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Cache {
                action: CacheAction::ListSnapshots { json: true }
            }
        ));
    }

    #[test]
    fn jobset_has_no_type_filter() {
        let cli = Cli::try_parse_from(["snapwarden", "jobset", "nightly"]).unwrap();
        assert_eq!(cli.command.job_filter(), None);
    }
}
