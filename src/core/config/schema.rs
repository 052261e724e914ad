//! core::config::schema
//!
//! Configuration file schema.
//!
//! These types mirror the TOML file one to one. They are parsed with
//! `deny_unknown_fields` so typos surface as errors, then materialized into
//! [`Config`](super::Config) and a [`JobRegistry`](crate::jobs::JobRegistry).
//!
//! # Example
//!
//! ```toml
//! cache = "/var/cache/snapwarden/keep.sqlite"
//! hooks = "/etc/snapwarden/events"
//!
//! [commands]
//! sudo = "/usr/bin/sudo"
//!
//! [[snapshot]]
//! name = "home"
//! target = "tank/home"
//!
//! [[clean]]
//! name = "home"
//! target = { pool = "tank", dataset = "home" }
//! keep = { days = 14 }
//! squash = true
//!
//! [[copy]]
//! name = "home-offsite"
//! source = "tank/home"
//! incremental = true
//! destination = { pool = "backup", dataset = "home", create = true }
//!
//! [jobsets]
//! nightly = ["snapshot.home", "clean.home", "copy.home-offsite"]
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::core::types::{DatasetId, Retention};

fn default_true() -> bool {
    true
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    /// Retention store path.
    pub cache: Option<PathBuf>,

    /// Lock directory.
    pub locks: Option<PathBuf>,

    /// Directory of hook executables; no hooks when absent.
    pub hooks: Option<PathBuf>,

    /// Upper bound on waiting for one lock.
    pub lock_timeout_secs: Option<u64>,

    pub commands: CommandsConfig,

    pub snapshot: Vec<SnapshotJobConfig>,
    pub clean: Vec<CleanJobConfig>,
    pub copy: Vec<CopyJobConfig>,

    /// Jobset name -> members written as `type.name` or `jobset.name`.
    pub jobsets: BTreeMap<String, Vec<String>>,
}

/// External programs.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CommandsConfig {
    pub zfs: Option<PathBuf>,
    /// Privilege elevation for mutating commands.
    pub sudo: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SnapshotJobConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub target: DatasetId,
    #[serde(default)]
    pub recursive: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CleanJobConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub target: DatasetId,
    /// Without a retention window the job is disabled.
    pub keep: Option<Retention>,
    #[serde(default)]
    pub squash: bool,
    #[serde(default)]
    pub recurse: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CopyJobConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub source: DatasetId,
    pub destination: DestinationConfig,
    #[serde(default)]
    pub replicate: bool,
    #[serde(default)]
    pub incremental: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DestinationConfig {
    pub pool: String,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub rollback: bool,
    #[serde(default)]
    pub properties: PropertiesConfig,
}

/// Property handling on the receiving side.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PropertiesConfig {
    /// Forced on the received dataset.
    pub overwrite: BTreeMap<String, String>,
    /// Excluded from the received stream.
    pub ignore: Vec<String>,
}
