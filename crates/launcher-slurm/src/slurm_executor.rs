use crate::script::{self, SCRIPT_FILE_NAME};
use chrono::Utc;
use launcher_core::config::{Backend, QueueConfig, SLURM_MAX_ARRAY_SIZE};
use launcher_core::error::LauncherError;
use launcher_core::executor::{job_dir, Executor, JobMonitor, LaunchContext};
use launcher_core::handle::JobHandle;
use launcher_core::job::{validate_batch, FailureCause, JobId, JobRequest, JobState, JobStatus};
use launcher_core::wrapper;
use std::path::Path;
use std::process::Output;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Names of the SLURM client binaries. Overridable for non-standard installs
/// and for tests.
#[derive(Debug, Clone)]
pub struct SlurmCommands {
    pub sbatch: String,
    pub sacct: String,
    pub scancel: String,
}

impl Default for SlurmCommands {
    fn default() -> Self {
        Self {
            sbatch: "sbatch".to_string(),
            sacct: "sacct".to_string(),
            scancel: "scancel".to_string(),
        }
    }
}

/// SLURM executor: submits a whole batch as a single array job.
pub struct SlurmExecutor {
    context: LaunchContext,
    commands: SlurmCommands,
}

impl SlurmExecutor {
    pub fn new(context: LaunchContext) -> Self {
        Self {
            context,
            commands: SlurmCommands::default(),
        }
    }

    pub fn with_commands(mut self, commands: SlurmCommands) -> Self {
        self.commands = commands;
        self
    }

    /// Run a SLURM client command and return its raw output.
    async fn run_cmd(&self, program: &str, args: &[&str]) -> Result<Output, std::io::Error> {
        debug!("Running: {} {}", program, args.join(" "));
        Command::new(program).args(args).output().await
    }

    async fn sbatch(&self, script_path: &Path) -> Result<String, LauncherError> {
        let script = script_path.to_string_lossy();
        let output = self
            .run_cmd(&self.commands.sbatch, &["--parsable", &script])
            .await
            .map_err(|e| {
                LauncherError::Submission(format!("failed to run {}: {}", self.commands.sbatch, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(LauncherError::Submission(format!(
                "{} rejected the batch: {}",
                self.commands.sbatch,
                stderr.trim()
            )));
        }

        parse_job_id(&String::from_utf8_lossy(&output.stdout))
    }
}

#[async_trait::async_trait]
impl JobMonitor for SlurmExecutor {
    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, LauncherError> {
        let id = handle.id().as_str();
        let output = self
            .run_cmd(
                &self.commands.sacct,
                &[
                    "-j",
                    id,
                    "--format=State,ExitCode",
                    "--noheader",
                    "--parsable2",
                    "-X",
                ],
            )
            .await
            .map_err(|e| LauncherError::Poll(format!("failed to run {}: {}", self.commands.sacct, e)))?;

        if !output.status.success() {
            return Err(LauncherError::Poll(format!(
                "{} -j {} failed: {}",
                self.commands.sacct,
                id,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_sacct(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait::async_trait]
impl Executor for SlurmExecutor {
    fn backend(&self) -> Backend {
        Backend::Slurm
    }

    async fn submit(
        &self,
        batch: &[JobRequest],
        config: &QueueConfig,
    ) -> Result<Vec<JobHandle>, LauncherError> {
        config.validate(Backend::Slurm)?;
        validate_batch(batch)?;
        if batch.is_empty() {
            warn!("Empty batch, nothing to submit");
            return Ok(Vec::new());
        }
        if let Some(max) = batch.iter().map(|r| r.index).max() {
            if max >= SLURM_MAX_ARRAY_SIZE {
                return Err(LauncherError::Config(format!(
                    "array index {} exceeds the SLURM array limit of {}",
                    max, SLURM_MAX_ARRAY_SIZE
                )));
            }
        }

        let (launch_id, launch_dir) = self.context.prepare_launch_dir(batch)?;
        let command = wrapper::wrap(&self.context.command_line(), config);
        let script_path = launch_dir.join(SCRIPT_FILE_NAME);
        std::fs::write(
            &script_path,
            script::render(batch, config, &command, &launch_dir),
        )?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(&script_path)?.permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&script_path, perms)?;
        }

        let array_id = self.sbatch(&script_path).await?;
        info!(
            launch = %launch_id,
            array_id = %array_id,
            jobs = batch.len(),
            parallelism = config.array_parallelism,
            "Submitted SLURM array job"
        );

        Ok(batch
            .iter()
            .map(|request| {
                JobHandle::new(
                    JobId::element(&array_id, request.index),
                    Backend::Slurm,
                    request,
                    job_dir(&launch_dir, request.index),
                )
            })
            .collect())
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), LauncherError> {
        if handle.is_terminal() {
            return Ok(());
        }
        warn!("Cancelling SLURM job {}", handle.id());
        let output = self
            .run_cmd(&self.commands.scancel, &[handle.id().as_str()])
            .await
            .map_err(|e| {
                LauncherError::Cancel(format!("failed to run {}: {}", self.commands.scancel, e))
            })?;
        if !output.status.success() {
            return Err(LauncherError::Cancel(format!(
                "{} {} failed: {}",
                self.commands.scancel,
                handle.id(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// `sbatch --parsable` prints `<id>` or `<id>;<cluster>`.
fn parse_job_id(stdout: &str) -> Result<String, LauncherError> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let id = line.split(';').next().unwrap_or("").trim();
    if id.is_empty() || !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(LauncherError::Submission(format!(
            "unexpected sbatch output: '{}'",
            stdout.trim()
        )));
    }
    Ok(id.to_string())
}

/// Map `sacct --parsable2` output (`STATE|EXIT:SIGNAL`) onto a status.
/// No output means the element is not in the accounting database yet.
fn parse_sacct(stdout: &str) -> JobStatus {
    let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return JobStatus::pending();
    };

    let mut fields = line.split('|');
    // "CANCELLED by 1000"
    let state = fields
        .next()
        .and_then(|s| s.split_whitespace().next())
        .unwrap_or("")
        .trim_end_matches('+');
    let exit_code = fields
        .next()
        .and_then(|s| s.split(':').next())
        .and_then(|s| s.parse::<i32>().ok());

    match state {
        "PENDING" | "REQUEUED" | "REQUEUE_FED" | "REQUEUE_HOLD" | "RESV_DEL_HOLD" => {
            JobStatus::pending()
        }
        "CONFIGURING" | "RUNNING" | "COMPLETING" | "SUSPENDED" | "STOPPED" | "RESIZING"
        | "SIGNALING" | "STAGE_OUT" => JobStatus::running(Utc::now()),
        "COMPLETED" => JobStatus::exited(exit_code.unwrap_or(0)),
        "FAILED" => JobStatus::exited(exit_code.filter(|c| *c != 0).unwrap_or(1)),
        "CANCELLED" | "REVOKED" => JobStatus::cancelled(),
        "TIMEOUT" | "DEADLINE" => JobStatus::timed_out(),
        other => {
            let mut status = JobStatus::failed(
                FailureCause::Backend,
                format!("SLURM reported {}", other),
            );
            status.exit_code = exit_code;
            status
        }
    }
}
