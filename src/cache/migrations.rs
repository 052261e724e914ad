//! cache::migrations
//!
//! Ordered schema steps for the retention store.
//!
//! The store records its version in `db_version`; version 0 means the table
//! does not exist yet. Each step runs in its own immediate transaction and
//! re-reads the version inside it, so two processes migrating at once apply
//! every step exactly once.

use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use tracing::info;

use super::CacheError;

/// One schema step, upgrading the store to `version`.
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in order. The last entry's version is the current one.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "keep-count and version tables",
        sql: include_str!("../../migrations/001_keep_snapshots.sql"),
    },
    Migration {
        version: 2,
        description: "non-null keep-count columns",
        sql: include_str!("../../migrations/002_not_null_columns.sql"),
    },
];

/// Version a fully migrated store reports.
pub fn target_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Read the schema version; 0 if the store was never initialized.
pub fn read_version(conn: &Connection) -> Result<u32, CacheError> {
    let has_table: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'db_version'",
        [],
        |row| row.get(0),
    )?;
    if !has_table {
        return Ok(0);
    }

    let version: Option<Option<i64>> = conn
        .query_row("SELECT version FROM db_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()?;

    Ok(version.flatten().unwrap_or(0).max(0) as u32)
}

/// Apply every step newer than the store's version.
///
/// Returns the versions that were applied; empty when already current.
pub fn apply_pending(conn: &mut Connection) -> Result<Vec<u32>, CacheError> {
    let mut applied = Vec::new();

    for migration in MIGRATIONS {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if read_version(&tx)? >= migration.version {
            continue;
        }

        tx.execute_batch(migration.sql)
            .map_err(|source| CacheError::Migration {
                version: migration.version,
                source,
            })?;
        tx.commit().map_err(|source| CacheError::Migration {
            version: migration.version,
            source,
        })?;

        info!(
            version = migration.version,
            description = migration.description,
            "applied retention store migration"
        );
        applied.push(migration.version);
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_are_strictly_increasing() {
        let versions: Vec<u32> = MIGRATIONS.iter().map(|m| m.version).collect();
        assert!(versions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(target_version(), 2);
    }

    #[test]
    fn fresh_store_is_version_zero() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_version(&conn).unwrap(), 0);
    }

    #[test]
    fn apply_pending_from_scratch() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(apply_pending(&mut conn).unwrap(), vec![1, 2]);
        assert_eq!(read_version(&conn).unwrap(), 2);
    }

    #[test]
    fn apply_pending_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        apply_pending(&mut conn).unwrap();
        assert!(apply_pending(&mut conn).unwrap().is_empty());
        assert_eq!(read_version(&conn).unwrap(), 2);
    }

    #[test]
    fn failed_step_leaves_previous_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        // A conflicting table makes step 1 fail inside its transaction.
        conn.execute_batch("CREATE TABLE keep_snapshots (x INT);")
            .unwrap();

        let err = apply_pending(&mut conn).unwrap_err();
        assert!(matches!(err, CacheError::Migration { version: 1, .. }));
        assert_eq!(read_version(&conn).unwrap(), 0);
    }
}
