//! hooks
//!
//! Lifecycle hooks run around job steps.
//!
//! # Architecture
//!
//! Jobs call [`HookRunner::run`] with an event name (`before_snapshot`,
//! `after_snapshot`) and a small context map. The binary wires in
//! [`ExecHookRunner`], which looks for an executable named after the event in
//! a configured directory; without a hooks directory, [`NoHooks`] is used.
//!
//! # Invariants
//!
//! - A missing hook is success (status 0), never an error
//! - Context keys are exported as `SNAPWARDEN_<KEY>` environment variables,
//!   plus `SNAPWARDEN_REALLY` carrying the dry-run flag
//! - Hooks run in dry-run mode too; they decide for themselves what the
//!   `SNAPWARDEN_REALLY` flag means

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use thiserror::Error;
use tracing::{debug, error};

/// Environment variable prefix for hook context.
pub const ENV_PREFIX: &str = "SNAPWARDEN_";

/// Errors from hook execution.
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook exists but could not be started.
    #[error("failed to run hook '{}': {source}", path.display())]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Runs lifecycle hooks.
pub trait HookRunner {
    /// Run the hook for `event`; returns its exit status (0 when absent).
    fn run(&self, event: &str, context: &BTreeMap<String, String>) -> Result<i32, HookError>;
}

/// Hook runner used when no hooks directory is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl HookRunner for NoHooks {
    fn run(&self, event: &str, _context: &BTreeMap<String, String>) -> Result<i32, HookError> {
        debug!(event, "no hooks configured");
        Ok(0)
    }
}

/// Runs `<dir>/<event>` when it is an executable file.
#[derive(Debug, Clone)]
pub struct ExecHookRunner {
    dir: PathBuf,
    really: bool,
}

impl ExecHookRunner {
    pub fn new(dir: impl Into<PathBuf>, really: bool) -> Self {
        Self {
            dir: dir.into(),
            really,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Environment passed to a hook for the given context.
    pub fn environment(&self, context: &BTreeMap<String, String>) -> Vec<(String, String)> {
        let mut env: Vec<(String, String)> = context
            .iter()
            .map(|(k, v)| (format!("{ENV_PREFIX}{}", k.to_uppercase()), v.clone()))
            .collect();
        env.push((format!("{ENV_PREFIX}REALLY"), self.really.to_string()));
        env
    }
}

#[cfg(unix)]
fn is_executable(meta: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_meta: &fs::Metadata) -> bool {
    true
}

fn first_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

impl HookRunner for ExecHookRunner {
    fn run(&self, event: &str, context: &BTreeMap<String, String>) -> Result<i32, HookError> {
        let path = self.dir.join(event);

        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => {
                debug!(event, path = %path.display(), "no hook found, skipping event");
                return Ok(0);
            }
        };
        if !meta.is_file() {
            debug!(event, path = %path.display(), "hook is not a file, skipping event");
            return Ok(0);
        }
        if !is_executable(&meta) {
            debug!(event, path = %path.display(), "hook is not executable, skipping event");
            return Ok(0);
        }

        debug!(event, path = %path.display(), "running hook");
        let output = Command::new(&path)
            .envs(self.environment(context))
            .stdin(Stdio::null())
            .output()
            .map_err(|source| HookError::Spawn {
                path: path.clone(),
                source,
            })?;

        // A hook killed by a signal has no exit code.
        let status = output.status.code().unwrap_or(-1);
        if status != 0 {
            error!(
                event,
                status,
                stderr = %first_line(&output.stderr),
                "hook failed"
            );
            return Ok(status);
        }

        debug!(event, stdout = %first_line(&output.stdout), "hook succeeded");
        Ok(0)
    }
}
