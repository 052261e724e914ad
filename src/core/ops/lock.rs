//! core::ops::lock
//!
//! Named, timeout-bounded exclusive locks over pools and datasets.
//!
//! # Architecture
//!
//! Every mutating backend call (snapshot, destroy, send/receive) runs while
//! holding the lock for the pool it touches. Locks are per-resource files in
//! the shared lock directory, locked with OS-level exclusive locks via `fs2`,
//! so they serialize independent invocations of this tool across processes.
//!
//! # Invariants
//!
//! - Acquisition blocks for at most the given timeout, polling every 100ms
//! - A timeout is reported as [`LockError::Timeout`]; callers skip the
//!   operation and carry on with the rest of the run
//! - The lock is released when the guard is dropped, on every exit path
//! - Without `--really`, acquisition is simulated: it always succeeds, logs
//!   intent and never touches the filesystem
//!
//! # Example
//!
//! ```ignore
//! use snapwarden::core::ops::lock::LockManager;
//! use std::time::Duration;
//!
//! let locks = LockManager::new(&paths, true);
//! let lock = locks.acquire("tank", Duration::from_secs(30))?;
//!
//! // destroy snapshots of tank/... while holding the lock
//!
//! // lock released when `lock` goes out of scope
//! ```

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use fs2::FileExt;
use thiserror::Error;
use tracing::{debug, info};

use crate::core::paths::StatePaths;

/// Default timeout for lock acquisition (30 seconds).
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Polling interval when waiting for a lock (100ms).
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another process held the lock for the whole timeout.
    #[error("timed out after {waited:?} waiting for lock on '{resource}'")]
    Timeout { resource: String, waited: Duration },

    /// Failed to create lock file or directory.
    #[error("failed to create lock: {0}")]
    CreateFailed(String),

    /// Failed to acquire the OS lock.
    #[error("failed to acquire lock: {0}")]
    AcquireFailed(String),

    /// Failed to release the lock.
    #[error("failed to release lock: {0}")]
    ReleaseFailed(String),
}

impl LockError {
    /// True for a timeout, which callers treat as "skip and continue".
    pub fn is_timeout(&self) -> bool {
        matches!(self, LockError::Timeout { .. })
    }
}

/// Hands out [`ResourceLock`]s rooted at the configured lock directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    paths: StatePaths,
    really: bool,
}

impl LockManager {
    /// Create a lock manager.
    ///
    /// When `really` is false every acquisition is simulated.
    pub fn new(paths: &StatePaths, really: bool) -> Self {
        Self {
            paths: paths.clone(),
            really,
        }
    }

    /// Whether locks touch the filesystem.
    pub fn really(&self) -> bool {
        self.really
    }

    /// Acquire the lock for `resource`, blocking up to `timeout`.
    ///
    /// # Errors
    ///
    /// - [`LockError::Timeout`] if the lock stays held elsewhere past `timeout`
    /// - [`LockError::CreateFailed`] if the lock file cannot be created
    /// - [`LockError::AcquireFailed`] if the OS lock call fails
    pub fn acquire(&self, resource: &str, timeout: Duration) -> Result<ResourceLock, LockError> {
        let path = self.paths.lock_path(resource);

        if !self.really {
            info!(resource, path = %path.display(), "would lock");
            return Ok(ResourceLock {
                resource: resource.to_string(),
                path,
                file: None,
                simulated: true,
            });
        }

        fs::create_dir_all(&self.paths.lock_dir).map_err(|e| {
            LockError::CreateFailed(format!(
                "cannot create {}: {}",
                self.paths.lock_dir.display(),
                e
            ))
        })?;

        let started = Instant::now();
        let deadline = started + timeout;

        loop {
            if let Some(lock) = Self::try_acquire_internal(resource, &path)? {
                debug!(resource, waited = ?started.elapsed(), "lock acquired");
                return Ok(lock);
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    resource: resource.to_string(),
                    waited: started.elapsed(),
                });
            }
            thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    /// Acquire locks for several resources.
    ///
    /// Keys are de-duplicated and taken in sorted order so that two processes
    /// locking the same pair cannot deadlock. On failure, locks already taken
    /// are released before returning.
    pub fn acquire_all(
        &self,
        resources: &[&str],
        timeout: Duration,
    ) -> Result<Vec<ResourceLock>, LockError> {
        let mut keys: Vec<&str> = resources.to_vec();
        keys.sort_unstable();
        keys.dedup();

        let mut held = Vec::with_capacity(keys.len());
        for key in keys {
            held.push(self.acquire(key, timeout)?);
        }
        Ok(held)
    }

    /// Non-blocking acquisition. `Ok(None)` means the lock is held elsewhere.
    fn try_acquire_internal(resource: &str, path: &Path) -> Result<Option<ResourceLock>, LockError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| {
                LockError::CreateFailed(format!("cannot open {}: {}", path.display(), e))
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(ResourceLock {
                resource: resource.to_string(),
                path: path.to_path_buf(),
                file: Some(file),
                simulated: false,
            })),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Ok(None),
            Err(e) => Err(LockError::AcquireFailed(e.to_string())),
        }
    }
}

/// An exclusive lock on one pool or dataset.
///
/// Released when dropped (RAII).
#[derive(Debug)]
pub struct ResourceLock {
    resource: String,
    path: PathBuf,
    file: Option<File>,
    simulated: bool,
}

impl ResourceLock {
    /// Check if this guard still holds the lock.
    ///
    /// Simulated locks report `false`: nothing is held.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// True for a dry-run lock.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    /// The resource key this lock protects.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Get the path to the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release the lock explicitly.
    ///
    /// Called automatically on drop; calling it more than once is safe.
    pub fn release(&mut self) -> Result<(), LockError> {
        if let Some(file) = self.file.take() {
            file.unlock()
                .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
            debug!(resource = %self.resource, "lock released");
        }
        Ok(())
    }
}

impl Drop for ResourceLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}
