//! cache
//!
//! Reference-counted retention store ("keep-counts").
//!
//! # Overview
//!
//! A keep-count protects a snapshot from clean jobs while a replication still
//! depends on it. Counts are keyed by `(dataset, snapshot)`, default to 0 and
//! live in a SQLite file shared by every invocation on the host.
//!
//! # Invariants
//!
//! - `increase` / `decrease` are single-statement upserts, so concurrent
//!   processes never lose an update
//! - `get` after N increases and M decreases returns N - M, even when negative
//! - Rows are created on first mutation and never deleted by this module
//! - Operations refuse to run against a store whose schema version is not
//!   current (see [`RetentionCache::open_current`])
//!
//! # Dry Run
//!
//! [`RetentionCache::dry_run`] keeps mutations in an in-process overlay:
//! `get` observes them for the rest of the run, nothing is written.
//!
//! # Example
//!
//! ```
//! use snapwarden::cache::RetentionCache;
//! use snapwarden::core::types::DatasetId;
//!
//! let mut cache = RetentionCache::open_in_memory().unwrap();
//! cache.migrate().unwrap();
//!
//! let ds = DatasetId::parse("tank/home").unwrap();
//! assert_eq!(cache.get(&ds, "202401010000").unwrap(), 0);
//! cache.increase(&ds, "202401010000").unwrap();
//! assert_eq!(cache.get(&ds, "202401010000").unwrap(), 1);
//! ```

pub mod migrations;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::types::DatasetId;

/// How long a statement waits for another process's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the retention store.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to open retention store '{path}': {source}")]
    Open {
        path: PathBuf,
        source: rusqlite::Error,
    },

    #[error(
        "retention store '{path}' does not exist; \
         run 'snapwarden cache update' to create it"
    )]
    Missing { path: PathBuf },

    #[error(
        "retention store is at version {found}, expected {expected}; \
         run 'snapwarden cache update' to migrate it"
    )]
    Stale { found: u32, expected: u32 },

    #[error("retention store is at version {found}, newer than supported version {expected}")]
    TooNew { found: u32, expected: u32 },

    #[error("migration to version {version} failed: {source}")]
    Migration {
        version: u32,
        source: rusqlite::Error,
    },

    #[error("retention store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// One persisted keep-count row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeepEntry {
    pub dataset: String,
    pub snapshot: String,
    pub count: i64,
}

/// Handle to the retention store.
pub struct RetentionCache {
    conn: Connection,
    /// Pending deltas when running without `--really`.
    overlay: Option<RefCell<HashMap<(String, String), i64>>>,
}

impl std::fmt::Debug for RetentionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionCache")
            .field("path", &self.conn.path())
            .field("dry_run", &self.overlay.is_some())
            .finish()
    }
}

impl RetentionCache {
    /// Open the store at `path` without checking its schema version.
    ///
    /// Use this for maintenance (`migrate`, `version`); job execution should
    /// go through [`open_current`](Self::open_current).
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        Self::connect(path, OpenFlags::default())
    }

    /// Open an existing store and refuse to continue unless it is fully
    /// migrated. A missing file is reported, never created.
    pub fn open_current(path: &Path) -> Result<Self, CacheError> {
        if !path.exists() {
            return Err(CacheError::Missing {
                path: path.to_path_buf(),
            });
        }
        let flags = OpenFlags::default() - OpenFlags::SQLITE_OPEN_CREATE;
        let cache = Self::connect(path, flags)?;
        cache.ensure_current()?;
        Ok(cache)
    }

    fn connect(path: &Path, flags: OpenFlags) -> Result<Self, CacheError> {
        debug!(path = %path.display(), "opening retention store");
        let conn = Connection::open_with_flags(path, flags).map_err(|source| CacheError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            overlay: None,
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn,
            overlay: None,
        })
    }

    /// Switch to dry-run mode: mutations go to an in-process overlay.
    pub fn dry_run(mut self) -> Self {
        self.overlay = Some(RefCell::new(HashMap::new()));
        self
    }

    /// True when mutations are not persisted.
    pub fn is_dry_run(&self) -> bool {
        self.overlay.is_some()
    }

    /// Current schema version (0 for an uninitialized store).
    pub fn version(&self) -> Result<u32, CacheError> {
        migrations::read_version(&self.conn)
    }

    /// True when the schema matches this build.
    pub fn is_current(&self) -> Result<bool, CacheError> {
        Ok(self.version()? == migrations::target_version())
    }

    /// Fail with [`CacheError::Stale`] or [`CacheError::TooNew`] unless current.
    pub fn ensure_current(&self) -> Result<(), CacheError> {
        let found = self.version()?;
        let expected = migrations::target_version();
        if found < expected {
            return Err(CacheError::Stale { found, expected });
        }
        if found > expected {
            return Err(CacheError::TooNew { found, expected });
        }
        Ok(())
    }

    /// Upgrade the schema to the current version, one step at a time.
    ///
    /// Idempotent: a current store is left untouched. Returns the versions
    /// applied by this call.
    pub fn migrate(&mut self) -> Result<Vec<u32>, CacheError> {
        let found = self.version()?;
        let expected = migrations::target_version();
        if found > expected {
            return Err(CacheError::TooNew { found, expected });
        }
        migrations::apply_pending(&mut self.conn)
    }

    /// Keep-count for a snapshot; 0 when no row exists.
    pub fn get(&self, dataset: &DatasetId, snapshot: &str) -> Result<i64, CacheError> {
        let key = dataset.joined();
        let stored: Option<i64> = self
            .conn
            .query_row(
                "SELECT count FROM keep_snapshots WHERE dataset = ?1 AND snapshot = ?2",
                params![key, snapshot],
                |row| row.get(0),
            )
            .optional()?;

        let pending = self.overlay.as_ref().map_or(0, |overlay| {
            overlay
                .borrow()
                .get(&(key, snapshot.to_string()))
                .copied()
                .unwrap_or(0)
        });

        Ok(stored.unwrap_or(0) + pending)
    }

    /// Add one to the keep-count. Returns the new count.
    pub fn increase(&self, dataset: &DatasetId, snapshot: &str) -> Result<i64, CacheError> {
        let count = self.adjust(dataset, snapshot, 1)?;
        debug!(dataset = %dataset, snapshot, count, "increased keep-count");
        Ok(count)
    }

    /// Subtract one from the keep-count. Returns the new count.
    ///
    /// The count may go negative; that transition is logged as a warning
    /// since it points at a decrease without a matching increase.
    pub fn decrease(&self, dataset: &DatasetId, snapshot: &str) -> Result<i64, CacheError> {
        let count = self.adjust(dataset, snapshot, -1)?;
        if count < 0 {
            warn!(
                dataset = %dataset,
                snapshot,
                count,
                "keep-count dropped below zero"
            );
        } else {
            debug!(dataset = %dataset, snapshot, count, "decreased keep-count");
        }
        Ok(count)
    }

    fn adjust(&self, dataset: &DatasetId, snapshot: &str, delta: i64) -> Result<i64, CacheError> {
        let key = dataset.joined();

        if let Some(overlay) = &self.overlay {
            *overlay
                .borrow_mut()
                .entry((key, snapshot.to_string()))
                .or_insert(0) += delta;
            let count = self.get(dataset, snapshot)?;
            info!(dataset = %dataset, snapshot, count, "would set keep-count");
            return Ok(count);
        }

        let count = self.conn.query_row(
            "INSERT INTO keep_snapshots (dataset, snapshot, count) VALUES (?1, ?2, ?3)
             ON CONFLICT(dataset, snapshot) DO UPDATE SET count = count + excluded.count
             RETURNING count",
            params![key, snapshot, delta],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Every persisted row, ordered by dataset then snapshot.
    pub fn entries(&self) -> Result<Vec<KeepEntry>, CacheError> {
        let mut stmt = self.conn.prepare(
            "SELECT dataset, snapshot, count FROM keep_snapshots ORDER BY dataset, snapshot",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(KeepEntry {
                    dataset: row.get(0)?,
                    snapshot: row.get(1)?,
                    count: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete rows at count 0 and compact the file. Returns rows removed.
    ///
    /// Operator maintenance only; jobs never delete rows.
    pub fn prune_inert(&self) -> Result<usize, CacheError> {
        if self.is_dry_run() {
            let inert = self.entries()?.iter().filter(|e| e.count == 0).count();
            info!(rows = inert, "would prune inert keep-count rows");
            return Ok(inert);
        }
        let removed = self
            .conn
            .execute("DELETE FROM keep_snapshots WHERE count = 0", [])?;
        self.conn.execute_batch("VACUUM")?;
        Ok(removed)
    }
}
