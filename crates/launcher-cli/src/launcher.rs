use crate::dispatch;
use launcher_core::config::{Backend, QueueConfig};
use launcher_core::error::LauncherError;
use launcher_core::executor::{Executor, JobMonitor, LaunchContext};
use launcher_core::handle::JobHandle;
use launcher_core::job::{validate_batch, JobRequest, JobStatus};
use launcher_core::poll::PollLoop;
use std::collections::HashMap;
use tracing::{info, warn};

/// Entry point for running a sweep: picks the executor for a backend,
/// submits the batch and routes later status queries back to it.
pub struct Launcher {
    context: LaunchContext,
    executors: HashMap<Backend, Box<dyn Executor>>,
}

impl Launcher {
    pub fn new(context: LaunchContext) -> Self {
        let executors = Backend::ALL
            .iter()
            .map(|&backend| (backend, dispatch::create_executor(backend, context.clone())))
            .collect();
        Self { context, executors }
    }

    /// Replace the executor registered for its backend.
    pub fn with_executor(mut self, executor: Box<dyn Executor>) -> Self {
        self.executors.insert(executor.backend(), executor);
        self
    }

    pub fn context(&self) -> &LaunchContext {
        &self.context
    }

    pub fn executor(&self, backend: Backend) -> Result<&dyn Executor, LauncherError> {
        self.executors
            .get(&backend)
            .map(|e| e.as_ref())
            .ok_or_else(|| LauncherError::Config(format!("no executor for backend '{}'", backend)))
    }

    /// Submit `batch` to the backend named `backend_name`.
    ///
    /// Fails before anything is submitted if the backend is unknown, the base
    /// command is empty, the batch has duplicate indices or `config` is invalid.
    pub async fn launch(
        &self,
        batch: &[JobRequest],
        backend_name: &str,
        config: &QueueConfig,
    ) -> Result<Vec<JobHandle>, LauncherError> {
        let backend: Backend = backend_name.parse()?;
        if self.context.base_command.is_empty() {
            return Err(LauncherError::Config("base command is empty".into()));
        }
        config.validate(backend)?;
        validate_batch(batch)?;

        let executor = self.executor(backend)?;
        let handles = executor.submit(batch, config).await?;
        for handle in &handles {
            if let Err(e) = handle.write_to_dir() {
                warn!(job = %handle.id(), "failed to record handle: {}", e);
            }
        }
        info!(backend = %backend, jobs = handles.len(), "launch submitted");
        Ok(handles)
    }

    pub async fn cancel(&self, handle: &JobHandle) -> Result<(), LauncherError> {
        self.executor(handle.backend())?.cancel(handle).await
    }

    /// Poll `handles` until every one of them is terminal.
    pub async fn await_completion(
        &self,
        handles: &mut [JobHandle],
        poll: &PollLoop,
    ) -> Result<(), LauncherError> {
        poll.await_completion(self, handles).await
    }
}

#[async_trait::async_trait]
impl JobMonitor for Launcher {
    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, LauncherError> {
        self.executor(handle.backend())?.status(handle).await
    }
}
