//! Rendering of the `sbatch` array script.
//!
//! Array element `i` selects its overrides through `SLURM_ARRAY_TASK_ID`: the
//! script holds one `case` arm per job index that `set --`s that element's
//! `key=value` arguments, and the wrapped command is invoked with `"$@"`.

use launcher_core::config::QueueConfig;
use launcher_core::handle::{RESULT_FILE_NAME, STDERR_FILE_NAME, STDOUT_FILE_NAME};
use launcher_core::job::JobRequest;
use std::path::Path;

pub const SCRIPT_FILE_NAME: &str = "submission.sh";

/// Full batch script for `batch`, running `command` (already wrapped) with
/// artifacts under `launch_dir/<index>/`.
pub fn render(
    batch: &[JobRequest],
    config: &QueueConfig,
    command: &[String],
    launch_dir: &Path,
) -> String {
    let launch = launch_dir.to_string_lossy();
    let mut lines = vec!["#!/usr/bin/env bash".to_string()];

    lines.push(format!("#SBATCH --job-name={}", config.job_name));
    lines.push(format!(
        "#SBATCH --array={}%{}",
        array_spec(batch),
        config.array_parallelism
    ));
    lines.push(format!("#SBATCH --output={}/%a/{}", launch, STDOUT_FILE_NAME));
    lines.push(format!("#SBATCH --error={}/%a/{}", launch, STDERR_FILE_NAME));
    lines.push(format!("#SBATCH --time={}", config.timeout_min));
    lines.push("#SBATCH --ntasks=1".to_string());
    if let Some(partition) = &config.partition {
        lines.push(format!("#SBATCH --partition={}", partition));
    }
    if let Some(account) = &config.account {
        lines.push(format!("#SBATCH --account={}", account));
    }
    if let Some(qos) = &config.qos {
        lines.push(format!("#SBATCH --qos={}", qos));
    }
    if let Some(constraint) = &config.constraint {
        lines.push(format!("#SBATCH --constraint={}", constraint));
    }
    if let Some(cpus) = config.cpus_per_task {
        lines.push(format!("#SBATCH --cpus-per-task={}", cpus));
    }
    if let Some(mem) = config.mem_gb {
        lines.push(format!("#SBATCH --mem={}G", mem));
    }
    if let Some(gpus) = config.gpus_per_node {
        if gpus > 0 {
            lines.push(format!("#SBATCH --gpus-per-node={}", gpus));
        }
    }

    lines.push(String::new());
    lines.push("set -u".to_string());
    lines.push("export SWEEP_JOB_INDEX=\"$SLURM_ARRAY_TASK_ID\"".to_string());
    lines.push(format!(
        "export SWEEP_JOB_DIR={}/\"$SLURM_ARRAY_TASK_ID\"",
        shell_escape(&launch)
    ));
    lines.push(format!(
        "export SWEEP_RESULT_PATH=\"$SWEEP_JOB_DIR\"/{}",
        RESULT_FILE_NAME
    ));
    lines.push("cd \"$SWEEP_JOB_DIR\" || exit 1".to_string());
    lines.push(String::new());

    lines.push("case \"$SLURM_ARRAY_TASK_ID\" in".to_string());
    for request in batch {
        let mut arm = format!("  {}) set --", request.index);
        for arg in request.override_args() {
            arm.push(' ');
            arm.push_str(&shell_escape(&arg));
        }
        arm.push_str(" ;;");
        lines.push(arm);
    }
    lines.push(
        "  *) echo \"no overrides for array index $SLURM_ARRAY_TASK_ID\" >&2; exit 2 ;;".to_string(),
    );
    lines.push("esac".to_string());
    lines.push(String::new());

    for setup in &config.setup {
        lines.push(setup.clone());
    }

    lines.push("started_at=$(date +%s)".to_string());
    lines.push(format!(
        "{} \"$@\"",
        command
            .iter()
            .map(|a| shell_escape(a))
            .collect::<Vec<_>>()
            .join(" ")
    ));
    lines.push("rc=$?".to_string());
    lines.push("finished_at=$(date +%s)".to_string());
    lines.push(
        "printf '{\"index\":%s,\"exit_code\":%s,\"started_at\":%s,\"finished_at\":%s}\\n' \
         \"$SLURM_ARRAY_TASK_ID\" \"$rc\" \"$started_at\" \"$finished_at\" > \"$SWEEP_RESULT_PATH\""
            .to_string(),
    );
    lines.push("exit \"$rc\"".to_string());

    lines.join("\n") + "\n"
}

/// `--array` index list: consecutive indices collapse into ranges.
pub fn array_spec(batch: &[JobRequest]) -> String {
    let mut indices: Vec<usize> = batch.iter().map(|r| r.index).collect();
    indices.sort_unstable();

    let mut parts = Vec::new();
    let mut iter = indices.into_iter();
    let Some(mut start) = iter.next() else {
        return String::new();
    };
    let mut end = start;
    for index in iter {
        if index == end + 1 {
            end = index;
            continue;
        }
        parts.push(range(start, end));
        start = index;
        end = index;
    }
    parts.push(range(start, end));
    parts.join(",")
}

fn range(start: usize, end: usize) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{}-{}", start, end)
    }
}

fn shell_escape(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}
