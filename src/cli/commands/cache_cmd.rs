//! cache command - Retention store maintenance
//!
//! # Subcommands
//!
//! - `update`: back up the store to `<path>.bak`, then migrate it
//! - `list-snapshots`: print every keep-count row
//! - `maint`: report negative counts; `--prune` removes rows at zero
//!
//! `update` always writes: it is the step operators are told to run when a
//! job refuses a stale store. `maint --prune` is gated by `--really`.

use std::fs;

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use crate::cache::{KeepEntry, RetentionCache};
use crate::core::config::Config;

/// Back up and migrate the store.
pub fn update(config: &Config, no_backup: bool) -> Result<()> {
    let paths = &config.paths;
    let path = paths.cache_path();
    paths
        .ensure_dirs()
        .with_context(|| format!("creating directories for {}", path.display()))?;

    if !no_backup && path.exists() {
        let backup = paths.cache_backup_path();
        if backup.exists() {
            info!(path = %backup.display(), "removing old backup");
            fs::remove_file(&backup)
                .with_context(|| format!("removing {}", backup.display()))?;
        }
        info!(from = %path.display(), to = %backup.display(), "backing up retention store");
        fs::copy(path, &backup).with_context(|| format!("copying to {}", backup.display()))?;
    }

    let mut cache = RetentionCache::open(path)
        .with_context(|| format!("retention store {}", path.display()))?;
    let applied = cache.migrate().context("migrating retention store")?;
    if applied.is_empty() {
        println!("Retention store is up to date (version {})", cache.version()?);
    } else {
        for version in &applied {
            info!(version, "applied migration");
        }
        println!("Retention store migrated to version {}", cache.version()?);
    }
    Ok(())
}

/// Tab-separated `dataset snapshot count` lines.
pub fn format_entries(entries: &[KeepEntry]) -> Vec<String> {
    entries
        .iter()
        .map(|e| format!("{}\t{}\t{}", e.dataset, e.snapshot, e.count))
        .collect()
}

/// Print every keep-count row.
pub fn list_snapshots(config: &Config, json: bool) -> Result<()> {
    let cache = open_current(config)?;
    let entries = cache.entries()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    for line in format_entries(&entries) {
        println!("{line}");
    }
    Ok(())
}

/// Report negative counts and optionally prune inert rows.
pub fn maint(config: &Config, prune: bool, really: bool) -> Result<()> {
    let cache = open_current(config)?;

    let negative: Vec<KeepEntry> = cache
        .entries()?
        .into_iter()
        .filter(|e| e.count < 0)
        .collect();
    for entry in &negative {
        warn!(
            dataset = %entry.dataset,
            snapshot = %entry.snapshot,
            count = entry.count,
            "negative keep-count"
        );
    }
    println!("{} negative keep-count row(s)", negative.len());

    if prune {
        let cache = if really { cache } else { cache.dry_run() };
        let removed = cache.prune_inert()?;
        if really {
            println!("Removed {removed} inert row(s)");
        } else {
            println!("Would remove {removed} inert row(s)");
        }
    }
    Ok(())
}

fn open_current(config: &Config) -> Result<RetentionCache> {
    let path = config.paths.cache_path();
    RetentionCache::open_current(path)
        .with_context(|| format!("retention store {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::DatasetId;
    use std::path::Path;
    use tempfile::TempDir;

    fn config_in(temp: &TempDir) -> Config {
        let text = format!(
            "cache = {:?}\nlocks = {:?}\n",
            temp.path().join("state/keep.sqlite"),
            temp.path().join("locks")
        );
        Config::from_toml(&text, Path::new("test.toml")).unwrap().config
    }

    #[test]
    fn update_creates_and_migrates() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);

        update(&config, false).unwrap();
        let cache = RetentionCache::open_current(config.paths.cache_path());
        assert!(cache.is_ok());
        // Nothing existed to back up.
        assert!(!config.paths.cache_backup_path().exists());
    }

    #[test]
    fn update_replaces_old_backup() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        update(&config, true).unwrap();

        let backup = config.paths.cache_backup_path();
        fs::write(&backup, b"stale").unwrap();
        update(&config, false).unwrap();

        let copied = fs::read(&backup).unwrap();
        assert_ne!(copied, b"stale");
        assert!(copied.starts_with(b"SQLite format 3"));
    }

    #[test]
    fn update_without_backup_leaves_none() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        update(&config, true).unwrap();
        update(&config, true).unwrap();
        assert!(!config.paths.cache_backup_path().exists());
    }

    #[test]
    fn maint_prune_respects_really() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        update(&config, true).unwrap();

        let tank = DatasetId::parse("tank").unwrap();
        {
            let cache = RetentionCache::open_current(config.paths.cache_path()).unwrap();
            cache.increase(&tank, "a").unwrap();
            cache.decrease(&tank, "a").unwrap();
            cache.increase(&tank, "b").unwrap();
        }

        maint(&config, true, false).unwrap();
        let cache = RetentionCache::open_current(config.paths.cache_path()).unwrap();
        assert_eq!(cache.entries().unwrap().len(), 2);
        drop(cache);

        maint(&config, true, true).unwrap();
        let cache = RetentionCache::open_current(config.paths.cache_path()).unwrap();
        let entries = cache.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].snapshot, "b");
    }

    #[test]
    fn entries_are_tab_separated() {
        let entries = vec![KeepEntry {
            dataset: "tank/home".into(),
            snapshot: "202401010000".into(),
            count: 2,
        }];
        assert_eq!(format_entries(&entries), vec!["tank/home\t202401010000\t2"]);
    }

    #[test]
    fn stale_store_is_refused() {
        let temp = TempDir::new().unwrap();
        let config = config_in(&temp);
        config.paths.ensure_dirs().unwrap();
        let err = list_snapshots(&config, false).unwrap_err();
        assert!(format!("{err:#}").contains("cache update"));
    }
}
