//! core::paths
//!
//! Centralized path routing for shared on-disk state.
//!
//! # Storage Layout
//!
//! Two locations are shared by every invocation on a host:
//! - the retention store, a single SQLite file (default
//!   `/var/cache/snapwarden/keep.sqlite`)
//! - the lock directory (default `/var/lock/snapwarden`), holding one
//!   `<resource>.lock` file per pool or dataset
//!
//! **Hard rule:** no code outside this module computes lock file names.
//!
//! # Example
//!
//! ```
//! use snapwarden::core::paths::StatePaths;
//! use std::path::PathBuf;
//!
//! let paths = StatePaths::new(
//!     PathBuf::from("/var/cache/snapwarden/keep.sqlite"),
//!     PathBuf::from("/var/lock/snapwarden"),
//! );
//!
//! assert_eq!(
//!     paths.lock_path("tank"),
//!     PathBuf::from("/var/lock/snapwarden/tank.lock")
//! );
//! ```

use std::path::{Path, PathBuf};

/// Default location of the retention store.
pub const DEFAULT_CACHE_PATH: &str = "/var/cache/snapwarden/keep.sqlite";

/// Default lock directory.
pub const DEFAULT_LOCK_DIR: &str = "/var/lock/snapwarden";

/// Paths to shared, cross-process state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatePaths {
    /// The SQLite retention store.
    pub cache_path: PathBuf,

    /// Directory holding per-resource lock files.
    pub lock_dir: PathBuf,
}

impl StatePaths {
    pub fn new(cache_path: PathBuf, lock_dir: PathBuf) -> Self {
        Self {
            cache_path,
            lock_dir,
        }
    }

    /// Lock file for a pool or dataset.
    ///
    /// `/` in the resource key becomes `%`, which cannot appear in pool or
    /// dataset names, so distinct keys never share a file.
    pub fn lock_path(&self, resource: &str) -> PathBuf {
        self.lock_dir
            .join(format!("{}.lock", resource.replace('/', "%")))
    }

    /// Backup written by `cache update` before migrating.
    ///
    /// This is `<cache_path>.bak`.
    pub fn cache_backup_path(&self) -> PathBuf {
        let mut name = self
            .cache_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".bak");
        self.cache_path.with_file_name(name)
    }

    /// Get the cache path as a Path reference.
    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Ensure the parent directory of the cache and the lock directory exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::create_dir_all(&self.lock_dir)?;
        Ok(())
    }
}

impl Default for StatePaths {
    fn default() -> Self {
        Self::new(
            PathBuf::from(DEFAULT_CACHE_PATH),
            PathBuf::from(DEFAULT_LOCK_DIR),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_path_for_pool() {
        let paths = StatePaths::new(PathBuf::from("/c/keep.sqlite"), PathBuf::from("/l"));
        assert_eq!(paths.lock_path("tank"), PathBuf::from("/l/tank.lock"));
    }

    #[test]
    fn lock_path_escapes_dataset_separator() {
        let paths = StatePaths::new(PathBuf::from("/c/keep.sqlite"), PathBuf::from("/l"));
        assert_eq!(
            paths.lock_path("tank/home/alice"),
            PathBuf::from("/l/tank%home%alice.lock")
        );
        assert_ne!(paths.lock_path("tank/a_b"), paths.lock_path("tank/a/b"));
    }

    #[test]
    fn cache_backup_path_appends_suffix() {
        let paths = StatePaths::new(PathBuf::from("/c/keep.sqlite"), PathBuf::from("/l"));
        assert_eq!(
            paths.cache_backup_path(),
            PathBuf::from("/c/keep.sqlite.bak")
        );
    }

    #[test]
    fn defaults() {
        let paths = StatePaths::default();
        assert_eq!(paths.cache_path(), Path::new(DEFAULT_CACHE_PATH));
        assert_eq!(paths.lock_dir, PathBuf::from(DEFAULT_LOCK_DIR));
    }

    #[test]
    fn ensure_dirs_creates_both() {
        let temp = tempfile::TempDir::new().unwrap();
        let paths = StatePaths::new(
            temp.path().join("cache/keep.sqlite"),
            temp.path().join("locks"),
        );
        paths.ensure_dirs().unwrap();
        assert!(temp.path().join("cache").is_dir());
        assert!(temp.path().join("locks").is_dir());
    }
}
