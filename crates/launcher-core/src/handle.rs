use crate::config::Backend;
use crate::job::{FailureCause, JobId, JobRequest, JobState, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const HANDLE_FILE_NAME: &str = "handle.json";
pub const STDOUT_FILE_NAME: &str = "stdout";
pub const STDERR_FILE_NAME: &str = "stderr";
pub const RESULT_FILE_NAME: &str = "result.json";

/// Reference to one submitted unit of work.
///
/// Handles are created PENDING by an executor at submission time. Their state
/// only moves forward through [`JobHandle::apply`], which the poll loop drives;
/// once a terminal state is reached the handle no longer changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    id: JobId,
    index: usize,
    backend: Backend,
    state: JobState,
    overrides: BTreeMap<String, String>,
    job_dir: PathBuf,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    result_path: PathBuf,
    submitted_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    exit_code: Option<i32>,
    error: Option<String>,
    cause: Option<FailureCause>,
}

impl JobHandle {
    pub fn new(id: JobId, backend: Backend, request: &JobRequest, job_dir: PathBuf) -> Self {
        Self {
            id,
            index: request.index,
            backend,
            state: JobState::Pending,
            overrides: request.overrides.clone(),
            stdout_path: job_dir.join(STDOUT_FILE_NAME),
            stderr_path: job_dir.join(STDERR_FILE_NAME),
            result_path: job_dir.join(RESULT_FILE_NAME),
            job_dir,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            exit_code: None,
            error: None,
            cause: None,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn overrides(&self) -> &BTreeMap<String, String> {
        &self.overrides
    }

    pub fn job_dir(&self) -> &Path {
        &self.job_dir
    }

    pub fn stdout_path(&self) -> &Path {
        &self.stdout_path
    }

    pub fn stderr_path(&self) -> &Path {
        &self.stderr_path
    }

    pub fn result_path(&self) -> &Path {
        &self.result_path
    }

    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn cause(&self) -> Option<FailureCause> {
        self.cause
    }

    /// Apply a status snapshot. Returns true if the state changed.
    /// Updates to a terminal handle, and RUNNING -> PENDING (a scheduler
    /// requeue), are ignored.
    pub(crate) fn apply(&mut self, status: JobStatus) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        if self.state == JobState::Running && status.state == JobState::Pending {
            debug!(job = %self.id, "ignoring requeue of a running job");
            return false;
        }
        let changed = self.state != status.state;
        if changed {
            debug!(job = %self.id, from = %self.state, to = %status.state, "job state transition");
        }

        self.state = status.state;
        if self.started_at.is_none() {
            self.started_at = status.started_at;
        }
        if status.state.is_terminal() {
            self.finished_at = Some(status.finished_at.unwrap_or_else(Utc::now));
            self.exit_code = status.exit_code;
            self.error = status.error;
            self.cause = status.cause;
        }
        changed
    }

    /// The backend could not be queried often enough to know the outcome.
    pub(crate) fn mark_poll_failed(&mut self, error: String) {
        self.apply(JobStatus::failed(FailureCause::PollFailure, error));
    }

    /// Write the handle as `handle.json` in its job directory.
    pub fn write_to_dir(&self) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(self.job_dir.join(HANDLE_FILE_NAME), json)
    }

    /// Read a handle from a `handle.json` file.
    pub fn read_from_file(path: &Path) -> Result<Self, std::io::Error> {
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Structured JSON for status output.
    pub fn to_summary_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id.0,
            "index": self.index,
            "backend": self.backend,
            "state": self.state,
            "overrides": self.overrides,
            "job_dir": self.job_dir,
            "submitted_at": self.submitted_at.to_rfc3339(),
            "started_at": self.started_at.map(|t| t.to_rfc3339()),
            "finished_at": self.finished_at.map(|t| t.to_rfc3339()),
            "exit_code": self.exit_code,
            "error": self.error,
            "cause": self.cause,
        })
    }
}

/// Every handle recorded under a launch directory, ordered by job index.
pub fn list_handles(launch_dir: &Path) -> Result<Vec<JobHandle>, std::io::Error> {
    let mut handles = Vec::new();
    for entry in std::fs::read_dir(launch_dir)? {
        let path = entry?.path().join(HANDLE_FILE_NAME);
        if !path.is_file() {
            continue;
        }
        match JobHandle::read_from_file(&path) {
            Ok(handle) => handles.push(handle),
            Err(e) => debug!("Skipping unreadable handle {}: {}", path.display(), e),
        }
    }
    handles.sort_by_key(|h| h.index);
    Ok(handles)
}
