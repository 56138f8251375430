use chrono::Utc;
use launcher_core::config::{Backend, QueueConfig};
use launcher_core::error::LauncherError;
use launcher_core::executor::{job_dir, Executor, JobMonitor, LaunchContext};
use launcher_core::handle::JobHandle;
use launcher_core::job::{validate_batch, FailureCause, JobId, JobRequest, JobStatus};
use launcher_core::result::JobResult;
use launcher_core::wrapper;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{oneshot, Mutex, Semaphore};
use tracing::{debug, error, info, warn};

pub const ENV_JOB_INDEX: &str = "SWEEP_JOB_INDEX";
pub const ENV_JOB_DIR: &str = "SWEEP_JOB_DIR";
pub const ENV_RESULT_PATH: &str = "SWEEP_RESULT_PATH";

/// Local executor: runs every job of a batch as a child process of this one,
/// at most `array_parallelism` at a time.
pub struct LocalExecutor {
    context: LaunchContext,
    watchdog: Option<Duration>,
    jobs: Arc<Mutex<HashMap<JobId, LocalJob>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct LocalJob {
    status: JobStatus,
    cancel: Option<oneshot::Sender<()>>,
}

/// Everything a background job task needs, resolved at submit time.
struct PreparedJob {
    id: JobId,
    index: usize,
    argv: Vec<String>,
    dir: PathBuf,
    stdout: PathBuf,
    stderr: PathBuf,
    result: PathBuf,
    timeout: Duration,
}

enum Outcome {
    Exited(i32),
    Signalled,
    TimedOut,
    Cancelled,
    WaitFailed(String),
}

impl LocalExecutor {
    pub fn new(context: LaunchContext) -> Self {
        Self {
            context,
            watchdog: None,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the per-job watchdog derived from `timeout_min`.
    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = Some(watchdog);
        self
    }

    /// Highest number of child processes alive at the same time so far.
    pub fn peak_running(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Number of child processes alive right now.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Jobs still held in memory: unfinished ones, plus finished ones whose
    /// final status has not been read yet.
    pub async fn tracked_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }
}

#[async_trait::async_trait]
impl JobMonitor for LocalExecutor {
    /// A terminal status is handed out once; the job is forgotten afterwards.
    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, LauncherError> {
        let mut jobs = self.jobs.lock().await;
        let status = jobs
            .get(handle.id())
            .map(|job| job.status.clone())
            .ok_or_else(|| LauncherError::JobNotFound(handle.id().to_string()))?;
        if status.state.is_terminal() {
            jobs.remove(handle.id());
        }
        Ok(status)
    }
}

#[async_trait::async_trait]
impl Executor for LocalExecutor {
    fn backend(&self) -> Backend {
        Backend::Local
    }

    async fn submit(
        &self,
        batch: &[JobRequest],
        config: &QueueConfig,
    ) -> Result<Vec<JobHandle>, LauncherError> {
        config.validate(Backend::Local)?;
        validate_batch(batch)?;
        if batch.is_empty() {
            warn!("Empty batch, nothing to run");
            return Ok(Vec::new());
        }

        let (launch_id, launch_dir) = self.context.prepare_launch_dir(batch)?;
        let command = wrapper::wrap(&self.context.command_line(), config);
        let timeout = self.watchdog.unwrap_or_else(|| config.timeout());
        let permits = Arc::new(Semaphore::new(config.array_parallelism));

        info!(
            launch = %launch_id,
            jobs = batch.len(),
            parallelism = config.array_parallelism,
            "Submitting local batch to {}",
            launch_dir.display()
        );
        debug!("Local command: {:?}", command);

        let mut handles = Vec::with_capacity(batch.len());
        let mut jobs = self.jobs.lock().await;
        for request in batch {
            let id = JobId::element(&launch_id, request.index);
            let handle = JobHandle::new(
                id.clone(),
                Backend::Local,
                request,
                job_dir(&launch_dir, request.index),
            );

            let mut argv = command.clone();
            argv.extend(request.override_args());
            let prepared = PreparedJob {
                id: id.clone(),
                index: request.index,
                argv,
                dir: handle.job_dir().to_path_buf(),
                stdout: handle.stdout_path().to_path_buf(),
                stderr: handle.stderr_path().to_path_buf(),
                result: handle.result_path().to_path_buf(),
                timeout,
            };

            let (cancel_tx, cancel_rx) = oneshot::channel();
            jobs.insert(
                id,
                LocalJob {
                    status: JobStatus::pending(),
                    cancel: Some(cancel_tx),
                },
            );
            tokio::spawn(run_job(
                prepared,
                permits.clone(),
                cancel_rx,
                self.jobs.clone(),
                self.running.clone(),
                self.peak.clone(),
            ));
            handles.push(handle);
        }

        Ok(handles)
    }

    async fn cancel(&self, handle: &JobHandle) -> Result<(), LauncherError> {
        if handle.is_terminal() {
            return Ok(());
        }
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(handle.id())
            .ok_or_else(|| LauncherError::JobNotFound(handle.id().to_string()))?;
        if job.status.state.is_terminal() {
            return Ok(());
        }
        if let Some(cancel) = job.cancel.take() {
            warn!("Cancelling local job {}", handle.id());
            let _ = cancel.send(());
        }
        Ok(())
    }
}

async fn run_job(
    job: PreparedJob,
    permits: Arc<Semaphore>,
    cancel: oneshot::Receiver<()>,
    jobs: Arc<Mutex<HashMap<JobId, LocalJob>>>,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
) {
    // A dropped sender is not a cancellation request.
    let cancelled = async move {
        if cancel.await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(cancelled);

    let _permit = tokio::select! {
        permit = permits.acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(e) => {
                record(&jobs, &job.id, JobStatus::failed(FailureCause::Spawn, e.to_string())).await;
                return;
            }
        },
        _ = &mut cancelled => {
            info!("Job {} cancelled before it started", job.id);
            record(&jobs, &job.id, JobStatus::cancelled().with_finished_at(Utc::now())).await;
            return;
        }
    };

    let (program, args) = match job.argv.split_first() {
        Some(split) => split,
        None => {
            record(
                &jobs,
                &job.id,
                JobStatus::failed(FailureCause::Spawn, "empty command line".into()),
            )
            .await;
            return;
        }
    };

    let (stdout, stderr) = match open_logs(&job) {
        Ok(files) => files,
        Err(e) => {
            error!("Job {}: cannot open log files: {}", job.id, e);
            record(&jobs, &job.id, JobStatus::failed(FailureCause::Spawn, e.to_string())).await;
            return;
        }
    };

    let mut command = Command::new(program);
    // Own process group, so a timeout or cancel reaches everything the job forks.
    #[cfg(unix)]
    command.process_group(0);
    let spawned = command
        .args(args)
        .current_dir(&job.dir)
        .env(ENV_JOB_INDEX, job.index.to_string())
        .env(ENV_JOB_DIR, &job.dir)
        .env(ENV_RESULT_PATH, &job.result)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .kill_on_drop(true)
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(e) => {
            warn!("Job {} failed to spawn {}: {}", job.id, program, e);
            let _ = std::fs::write(&job.stderr, format!("failed to spawn {}: {}\n", program, e));
            record(
                &jobs,
                &job.id,
                JobStatus::failed(FailureCause::Spawn, format!("failed to spawn {}: {}", program, e))
                    .with_finished_at(Utc::now()),
            )
            .await;
            return;
        }
    };

    let pgid = child.id();
    let started_at = Utc::now();
    let now_running = running.fetch_add(1, Ordering::SeqCst) + 1;
    peak.fetch_max(now_running, Ordering::SeqCst);
    debug!(pid = ?child.id(), running = now_running, "Job {} started", job.id);
    record(&jobs, &job.id, JobStatus::running(started_at)).await;

    let outcome = tokio::select! {
        waited = child.wait() => match waited {
            Ok(status) => status.code().map_or(Outcome::Signalled, Outcome::Exited),
            Err(e) => Outcome::WaitFailed(e.to_string()),
        },
        _ = tokio::time::sleep(job.timeout) => Outcome::TimedOut,
        _ = &mut cancelled => Outcome::Cancelled,
    };

    if matches!(outcome, Outcome::TimedOut | Outcome::Cancelled) {
        kill_process_group(&job.id, pgid);
        if let Err(e) = child.kill().await {
            error!("Job {}: failed to kill process: {}", job.id, e);
        }
    }
    if running.fetch_sub(1, Ordering::SeqCst) == 1 {
        info!(peak = peak.load(Ordering::SeqCst), "No local jobs running");
    }
    let finished_at = Utc::now();

    let (status, exit_code) = match outcome {
        Outcome::Exited(code) => (JobStatus::exited(code), Some(code)),
        Outcome::Signalled => (
            JobStatus::failed(FailureCause::ExitCode, "terminated by signal".into()),
            None,
        ),
        Outcome::TimedOut => {
            warn!("Job {} exceeded its {:?} budget, killed", job.id, job.timeout);
            (JobStatus::timed_out(), None)
        }
        Outcome::Cancelled => (JobStatus::cancelled(), None),
        Outcome::WaitFailed(e) => (JobStatus::failed(FailureCause::Backend, e), None),
    };

    let result = JobResult {
        index: job.index,
        exit_code,
        started_at: started_at.timestamp(),
        finished_at: finished_at.timestamp(),
    };
    if let Err(e) = result.write_to_file(&job.result) {
        warn!("Job {}: failed to write result: {}", job.id, e);
    }

    info!(state = %status.state, "Job {} finished", job.id);
    record(
        &jobs,
        &job.id,
        status
            .with_started_at(Some(started_at))
            .with_finished_at(finished_at),
    )
    .await;
}

#[cfg(unix)]
fn kill_process_group(id: &JobId, pgid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pgid) = pgid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        debug!("Job {}: killpg({}) failed: {}", id, pgid, e);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_id: &JobId, _pgid: Option<u32>) {}

fn open_logs(job: &PreparedJob) -> Result<(Stdio, Stdio), std::io::Error> {
    let stdout = std::fs::File::create(&job.stdout)?;
    let stderr = std::fs::File::create(&job.stderr)?;
    Ok((Stdio::from(stdout), Stdio::from(stderr)))
}

async fn record(jobs: &Mutex<HashMap<JobId, LocalJob>>, id: &JobId, status: JobStatus) {
    let mut jobs = jobs.lock().await;
    if let Some(job) = jobs.get_mut(id) {
        if job.status.state.is_terminal() {
            return;
        }
        if status.state.is_terminal() {
            job.cancel = None;
        }
        job.status = status;
    }
}
