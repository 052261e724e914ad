//! list command - Show configured jobs and jobsets

use anyhow::Result;

use crate::core::config::Config;
use crate::jobs::{Job, JobKind, JobRegistry};

/// One line describing a job.
pub fn describe(job: &Job) -> String {
    let state = if job.enabled { "enabled" } else { "disabled" };
    let detail = match &job.kind {
        JobKind::Snapshot(s) => {
            let mut d = s.target.to_string();
            if s.recursive {
                d.push_str(" (recursive)");
            }
            d
        }
        JobKind::Clean(c) => {
            let mut d = format!("{} keep {}", c.target, c.retention);
            if c.squash {
                d.push_str(" squash");
            }
            if c.recurse {
                d.push_str(" recurse");
            }
            d
        }
        JobKind::Copy(c) => {
            let mut d = format!("{} -> {}", c.source, c.destination.dataset);
            if c.incremental {
                d.push_str(" incremental");
            }
            if c.replicate {
                d.push_str(" replicate");
            }
            d
        }
    };
    format!("{:<24} {:<8} {}", job.qualified_name(), state, detail)
}

/// Lines for every job followed by every jobset.
pub fn render(registry: &JobRegistry) -> Vec<String> {
    let mut lines: Vec<String> = registry.jobs().map(|(_, job)| describe(job)).collect();

    let mut jobsets = registry.jobsets().peekable();
    if jobsets.peek().is_some() {
        lines.push(String::new());
        lines.push("jobsets:".to_string());
        for (name, members) in jobsets {
            let labels: Vec<String> = members.iter().map(|m| registry.member_label(m)).collect();
            lines.push(format!("  {}: {}", name, labels.join(", ")));
        }
    }
    lines
}

/// Print configured jobs and jobsets.
pub fn list(config: &Config) -> Result<()> {
    let lines = render(&config.registry);
    if lines.is_empty() {
        println!("No jobs configured in {}", config.source().display());
        return Ok(());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}
