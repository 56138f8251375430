pub mod cancel;
pub mod config;
pub mod launch;
pub mod status;

use anyhow::Context;
use launcher_core::handle::{list_handles, JobHandle};
use launcher_core::job::JobState;
use std::path::Path;

/// Handles recorded under `launch_dir`; an empty directory is an error.
pub(crate) fn load_handles(launch_dir: &Path) -> anyhow::Result<Vec<JobHandle>> {
    let handles = list_handles(launch_dir)
        .with_context(|| format!("reading launch directory {}", launch_dir.display()))?;
    if handles.is_empty() {
        anyhow::bail!("No job handles found in {}", launch_dir.display());
    }
    Ok(handles)
}

pub(crate) fn print_table(handles: &[JobHandle]) {
    println!(
        "{:<24} {:<6} {:<8} {:<10} {:<6} {}",
        "JOB ID", "INDEX", "BACKEND", "STATE", "EXIT", "OVERRIDES"
    );
    println!("{}", "-".repeat(80));
    for h in handles {
        println!(
            "{:<24} {:<6} {:<8} {:<10} {:<6} {}",
            h.id(),
            h.index(),
            h.backend(),
            h.state(),
            h.exit_code().map(|c| c.to_string()).unwrap_or_else(|| "-".into()),
            h.overrides()
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(" "),
        );
    }
}

pub(crate) fn print_counts(handles: &[JobHandle]) {
    let count = |state: JobState| handles.iter().filter(|h| h.state() == state).count();
    println!();
    println!(
        "{} job(s): {} completed, {} failed, {} timeout, {} cancelled, {} running, {} pending",
        handles.len(),
        count(JobState::Completed),
        count(JobState::Failed),
        count(JobState::Timeout),
        count(JobState::Cancelled),
        count(JobState::Running),
        count(JobState::Pending),
    );
}
