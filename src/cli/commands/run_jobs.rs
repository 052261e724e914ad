//! run command - Resolve job names and run them as one batch
//!
//! Used by `snapshot`, `clean`, `copy` and `jobset`. Without `--really`,
//! every mutation is logged instead of performed and keep-count changes stay
//! in memory.

use anyhow::{Context as _, Result};
use tracing::{info, warn};

use crate::backend::ZfsBackend;
use crate::cache::RetentionCache;
use crate::core::config::Config;
use crate::core::ops::LockManager;
use crate::engine::{run_batch, BatchReport, Context, Services};
use crate::hooks::{ExecHookRunner, HookRunner, NoHooks};
use crate::jobs::JobType;

/// Run the jobs selected by `names`.
///
/// Per-job failures are part of the returned report, not errors.
pub fn run_jobs(
    config: &Config,
    filter: Option<JobType>,
    names: &[String],
    really: bool,
) -> Result<BatchReport> {
    let ctx = Context::new(really);
    let cache = open_cache(config, &ctx)?;

    let resolution = config.registry.resolve(names, filter);
    if resolution.jobs.is_empty() {
        warn!("no jobs matched {}", names.join(", "));
        return Ok(BatchReport::default());
    }

    if !ctx.really {
        info!("dry run, pass --really to execute");
    }

    let backend = ZfsBackend::new(&config.zfs, config.sudo.clone(), ctx.really);
    let hooks: Box<dyn HookRunner> = match &config.hooks_dir {
        Some(dir) => Box::new(ExecHookRunner::new(dir, ctx.really)),
        None => Box::new(NoHooks),
    };
    let locks = LockManager::new(&config.paths, ctx.really);
    let services = Services::new(&backend, hooks.as_ref(), &cache, &locks)
        .with_lock_timeout(config.lock_timeout);

    Ok(run_batch(&config.registry, &resolution.jobs, &ctx, &services))
}

/// Open the retention store, refusing a store that needs migrating.
///
/// Outside a real run the store is wrapped in its in-memory overlay.
fn open_cache(config: &Config, ctx: &Context) -> Result<RetentionCache> {
    let path = config.paths.cache_path();
    let cache = RetentionCache::open_current(path)
        .with_context(|| format!("retention store {}", path.display()))?;
    Ok(if ctx.really { cache } else { cache.dry_run() })
}
