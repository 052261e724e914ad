//! core::config
//!
//! Configuration loading, validation and materialization.
//!
//! # Locations
//!
//! Searched in order, first hit wins:
//! 1. `--config <path>` on the command line
//! 2. `$SNAPWARDEN_CONFIG` if set
//! 3. `$XDG_CONFIG_HOME/snapwarden/config.toml` (or the platform config dir)
//! 4. `/etc/snapwarden/config.toml`
//!
//! # Validation
//!
//! Everything that could make a run misbehave is rejected at load time,
//! before any job runs:
//! - empty job or jobset names
//! - duplicate job names within a type
//! - jobset members with an unknown type prefix
//! - jobset members naming an undefined job or jobset
//!
//! Jobset cycles are not a load error; resolution guards against them.
//!
//! # Example
//!
//! ```no_run
//! use snapwarden::core::config::Config;
//!
//! let loaded = Config::load(None).unwrap();
//! for warning in &loaded.warnings {
//!     eprintln!("warning: {}", warning.message);
//! }
//! let config = loaded.config;
//! println!("{} jobs", config.registry.jobs().count());
//! ```

pub mod schema;

pub use schema::ConfigFile;

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::backend::DEFAULT_ZFS_PATH;
use crate::core::ops::DEFAULT_LOCK_TIMEOUT;
use crate::core::paths::{StatePaths, DEFAULT_CACHE_PATH, DEFAULT_LOCK_DIR};
use crate::core::types::{DatasetId, TypeError};
use crate::jobs::{
    CleanJob, CopyJob, Destination, Job, JobKind, JobRegistry, JobType, JobsetMember, SnapshotJob,
};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "SNAPWARDEN_CONFIG";

/// System-wide configuration file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/snapwarden/config.toml";

/// Errors from configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found (searched: {})", display_paths(searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {message}")]
    ParseError { path: PathBuf, message: String },

    #[error("invalid config value: {0}")]
    InvalidValue(String),

    #[error("{ty} job name cannot be empty")]
    EmptyJobName { ty: JobType },

    #[error("duplicate {ty} job '{name}'")]
    DuplicateJob { ty: JobType, name: String },

    #[error("jobset '{jobset}': unknown member type in '{member}' (expected snapshot., clean., copy. or jobset.)")]
    UnknownMemberType { jobset: String, member: String },

    #[error("jobset '{jobset}': '{member}' is not defined")]
    UndefinedMember { jobset: String, member: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<TypeError> for ConfigError {
    fn from(e: TypeError) -> Self {
        ConfigError::InvalidValue(e.to_string())
    }
}

/// A non-fatal finding during loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigWarning {
    pub message: String,
    pub path: PathBuf,
}

/// Result of loading configuration.
#[derive(Debug)]
pub struct ConfigLoadResult {
    pub config: Config,
    pub warnings: Vec<ConfigWarning>,
}

/// Materialized configuration.
#[derive(Debug)]
pub struct Config {
    pub paths: StatePaths,
    pub hooks_dir: Option<PathBuf>,
    pub lock_timeout: Duration,
    pub zfs: PathBuf,
    pub sudo: Option<PathBuf>,
    pub registry: JobRegistry,
    source: PathBuf,
}

impl Config {
    /// Locate, read and validate the configuration.
    pub fn load(explicit: Option<&Path>) -> Result<ConfigLoadResult, ConfigError> {
        let path = Self::locate(explicit, |key| std::env::var(key).ok())?;
        Self::from_path(&path)
    }

    /// Pick the configuration file.
    ///
    /// `env` looks up environment variables, so callers and tests control
    /// the environment explicitly.
    pub fn locate(
        explicit: Option<&Path>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let mut candidates = Vec::new();
        if let Some(path) = env(CONFIG_ENV) {
            candidates.push(PathBuf::from(path));
        }
        let config_home = env("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(dirs::config_dir);
        if let Some(dir) = config_home {
            candidates.push(dir.join("snapwarden/config.toml"));
        }
        candidates.push(PathBuf::from(SYSTEM_CONFIG_PATH));

        match candidates.iter().position(|p| p.is_file()) {
            Some(index) => Ok(candidates.swap_remove(index)),
            None => Err(ConfigError::NotFound {
                searched: candidates,
            }),
        }
    }

    /// Read and validate a configuration file.
    pub fn from_path(path: &Path) -> Result<ConfigLoadResult, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents, path)
    }

    /// Parse and validate configuration text; `path` is used in messages.
    pub fn from_toml(contents: &str, path: &Path) -> Result<ConfigLoadResult, ConfigError> {
        let file: ConfigFile = toml::from_str(contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::materialize(file, path)
    }

    fn materialize(file: ConfigFile, path: &Path) -> Result<ConfigLoadResult, ConfigError> {
        let ConfigFile {
            cache,
            locks,
            hooks,
            lock_timeout_secs,
            commands,
            snapshot,
            clean,
            copy,
            jobsets,
        } = file;
        let mut warnings = Vec::new();
        let mut registry = JobRegistry::new();

        let mut seen = HashSet::new();
        for job in snapshot {
            check_name(&mut seen, JobType::Snapshot, &job.name)?;
            registry.add_job(Job::new(
                job.name,
                job.enabled,
                JobKind::Snapshot(SnapshotJob {
                    target: job.target,
                    recursive: job.recursive,
                }),
            ));
        }

        let mut seen = HashSet::new();
        for job in clean {
            check_name(&mut seen, JobType::Clean, &job.name)?;
            let enabled = job.enabled && job.keep.is_some();
            if job.keep.is_none() {
                warnings.push(ConfigWarning {
                    message: format!("clean job '{}' has no keep window; disabling it", job.name),
                    path: path.to_path_buf(),
                });
            }
            registry.add_job(Job::new(
                job.name,
                enabled,
                JobKind::Clean(CleanJob {
                    target: job.target,
                    retention: job.keep.unwrap_or_default(),
                    squash: job.squash,
                    recurse: job.recurse,
                }),
            ));
        }

        let mut seen = HashSet::new();
        for job in copy {
            check_name(&mut seen, JobType::Copy, &job.name)?;
            let dest = job.destination;
            registry.add_job(Job::new(
                job.name,
                job.enabled,
                JobKind::Copy(CopyJob {
                    source: job.source,
                    destination: Destination {
                        dataset: DatasetId::new(dest.pool, dest.dataset.as_deref())?,
                        create: dest.create,
                        rollback: dest.rollback,
                        property_overwrites: dest.properties.overwrite,
                        property_ignores: dest.properties.ignore,
                    },
                    replicate: job.replicate,
                    incremental: job.incremental,
                }),
            ));
        }

        for (name, members) in &jobsets {
            if name.is_empty() {
                return Err(ConfigError::InvalidValue("jobset name cannot be empty".into()));
            }
            let resolved = members
                .iter()
                .map(|member| resolve_member(&registry, &jobsets, name, member))
                .collect::<Result<Vec<_>, _>>()?;
            registry.add_jobset(name.clone(), resolved);
        }

        let config = Config {
            paths: StatePaths::new(
                cache.unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_PATH)),
                locks.unwrap_or_else(|| PathBuf::from(DEFAULT_LOCK_DIR)),
            ),
            hooks_dir: hooks,
            lock_timeout: lock_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_LOCK_TIMEOUT),
            zfs: commands
                .zfs
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ZFS_PATH)),
            sudo: commands.sudo,
            registry,
            source: path.to_path_buf(),
        };

        Ok(ConfigLoadResult { config, warnings })
    }

    /// The file this configuration was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }
}

fn check_name(seen: &mut HashSet<String>, ty: JobType, name: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::EmptyJobName { ty });
    }
    if !seen.insert(name.to_string()) {
        return Err(ConfigError::DuplicateJob {
            ty,
            name: name.to_string(),
        });
    }
    Ok(())
}

fn resolve_member(
    registry: &JobRegistry,
    jobsets: &BTreeMap<String, Vec<String>>,
    jobset: &str,
    member: &str,
) -> Result<JobsetMember, ConfigError> {
    let unknown = || ConfigError::UnknownMemberType {
        jobset: jobset.to_string(),
        member: member.to_string(),
    };
    let undefined = || ConfigError::UndefinedMember {
        jobset: jobset.to_string(),
        member: member.to_string(),
    };

    let (prefix, name) = member.split_once('.').ok_or_else(unknown)?;
    if prefix == "jobset" {
        return if jobsets.contains_key(name) {
            Ok(JobsetMember::Jobset(name.to_string()))
        } else {
            Err(undefined())
        };
    }

    let ty: JobType = prefix.parse().map_err(|_| unknown())?;
    registry
        .find(ty, name)
        .map(JobsetMember::Job)
        .ok_or_else(undefined)
}
