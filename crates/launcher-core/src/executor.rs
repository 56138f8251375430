use crate::config::{Backend, QueueConfig};
use crate::error::LauncherError;
use crate::handle::JobHandle;
use crate::job::{JobRequest, JobStatus};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Anything that can report the status of a submitted job.
#[async_trait::async_trait]
pub trait JobMonitor: Send + Sync {
    /// Current status of the job behind `handle`.
    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, LauncherError>;
}

/// Core executor trait. Every backend implements this.
///
/// `submit` either returns one handle per request or an error; a batch is
/// never partially submitted.
#[async_trait::async_trait]
pub trait Executor: JobMonitor {
    fn backend(&self) -> Backend;

    /// Submit a batch under one queue configuration.
    async fn submit(
        &self,
        batch: &[JobRequest],
        config: &QueueConfig,
    ) -> Result<Vec<JobHandle>, LauncherError>;

    /// Request cancellation of a job. Terminal jobs are left alone.
    async fn cancel(&self, handle: &JobHandle) -> Result<(), LauncherError>;
}

/// What every executor needs besides the batch: the program to run and where
/// to put its artifacts.
///
/// Jobs run inside their own job directory, so relative paths are resolved
/// against `submit_dir`, the directory the launch was started from.
#[derive(Debug, Clone)]
pub struct LaunchContext {
    pub base_command: Vec<String>,
    pub sweep_dir: PathBuf,
    pub submit_dir: PathBuf,
}

impl LaunchContext {
    /// Context submitted from the current working directory.
    pub fn new(base_command: Vec<String>, sweep_dir: impl Into<PathBuf>) -> Self {
        let submit_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::in_dir(base_command, sweep_dir, submit_dir)
    }

    pub fn in_dir(
        base_command: Vec<String>,
        sweep_dir: impl Into<PathBuf>,
        submit_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_command,
            sweep_dir: sweep_dir.into(),
            submit_dir: submit_dir.into(),
        }
    }

    /// The base command with every relative path that exists under
    /// `submit_dir` made absolute. Flags and `key=value` tokens are kept as is.
    pub fn command_line(&self) -> Vec<String> {
        self.base_command
            .iter()
            .map(|token| {
                let path = Path::new(token);
                if token.starts_with('-') || token.contains('=') || path.is_absolute() {
                    return token.clone();
                }
                let resolved = self.submit_dir.join(path);
                if resolved.exists() {
                    resolved.to_string_lossy().into_owned()
                } else {
                    token.clone()
                }
            })
            .collect()
    }

    /// Create a fresh, uniquely named launch directory and one job directory
    /// per request. Returns the launch id and its absolute directory.
    pub fn prepare_launch_dir(
        &self,
        batch: &[JobRequest],
    ) -> Result<(String, PathBuf), LauncherError> {
        let short = uuid::Uuid::new_v4().simple().to_string();
        let launch_id = format!("{}-{}", Utc::now().format("%Y%m%d-%H%M%S"), &short[..8]);
        let launch_dir = self.submit_dir.join(&self.sweep_dir).join(&launch_id);
        std::fs::create_dir_all(&launch_dir)?;
        let launch_dir = std::fs::canonicalize(&launch_dir)?;
        for request in batch {
            std::fs::create_dir_all(job_dir(&launch_dir, request.index))?;
        }
        Ok((launch_id, launch_dir))
    }
}

/// Directory owned by the job at `index` inside a launch directory.
pub fn job_dir(launch_dir: &Path, index: usize) -> PathBuf {
    launch_dir.join(index.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn relative_sweep_dir_yields_an_absolute_launch_dir() {
        let submit = tempfile::tempdir().unwrap();
        let context = LaunchContext::in_dir(vec!["true".into()], "multirun", submit.path());

        let (launch_id, launch_dir) = context
            .prepare_launch_dir(&[JobRequest::new(0, BTreeMap::new())])
            .unwrap();

        assert!(launch_dir.is_absolute());
        assert!(launch_dir.ends_with(format!("multirun/{}", launch_id)));
        assert!(launch_dir.starts_with(std::fs::canonicalize(submit.path()).unwrap()));
        assert!(job_dir(&launch_dir, 0).is_dir());
    }

    #[test]
    fn command_line_resolves_existing_relative_paths() {
        let submit = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(submit.path().join("scripts")).unwrap();
        std::fs::write(submit.path().join("scripts/train.py"), "").unwrap();
        let context = LaunchContext::in_dir(
            vec![
                "python".into(),
                "scripts/train.py".into(),
                "--epochs".into(),
                "data=conf.yaml".into(),
            ],
            "multirun",
            submit.path(),
        );

        let argv = context.command_line();
        assert_eq!(argv[0], "python");
        assert_eq!(
            Path::new(&argv[1]),
            submit.path().join("scripts/train.py").as_path()
        );
        assert_eq!(&argv[2..], ["--epochs", "data=conf.yaml"]);
    }
}
