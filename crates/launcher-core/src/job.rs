use crate::error::LauncherError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    /// Composite `<parent>_<index>` id, the shape scheduler array elements use.
    pub fn element(parent: &str, index: usize) -> Self {
        Self(format!("{}_{}", parent, index))
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One element of a sweep: its position in the batch and the parameter
/// overrides handed to the target program.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobRequest {
    pub index: usize,
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

impl JobRequest {
    pub fn new(index: usize, overrides: BTreeMap<String, String>) -> Self {
        Self { index, overrides }
    }

    /// Overrides rendered as `key=value` arguments, in key order.
    pub fn override_args(&self) -> Vec<String> {
        self.overrides
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Reject batches whose indices collide; they address array elements and
/// job directories.
pub fn validate_batch(batch: &[JobRequest]) -> Result<(), LauncherError> {
    let mut seen = HashSet::with_capacity(batch.len());
    for request in batch {
        if !seen.insert(request.index) {
            return Err(LauncherError::Config(format!(
                "duplicate job index {} in batch",
                request.index
            )));
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled | JobState::Timeout
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Running => write!(f, "running"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Timeout => write!(f, "timeout"),
        }
    }
}

/// Why a job ended up FAILED.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The job ran and exited non-zero.
    ExitCode,
    /// The process could not be started at all.
    Spawn,
    /// The backend reported a failure state of its own (node failure, OOM, ...).
    Backend,
    /// The backend could not be queried; the job's real outcome is unknown.
    PollFailure,
}

/// A status snapshot reported by an executor for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub state: JobState,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub cause: Option<FailureCause>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobStatus {
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            exit_code: None,
            error: None,
            cause: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn running(started_at: DateTime<Utc>) -> Self {
        Self {
            state: JobState::Running,
            started_at: Some(started_at),
            ..Self::pending()
        }
    }

    /// The process exited; zero is COMPLETED, anything else FAILED.
    pub fn exited(exit_code: i32) -> Self {
        if exit_code == 0 {
            Self {
                state: JobState::Completed,
                exit_code: Some(0),
                ..Self::pending()
            }
        } else {
            Self {
                state: JobState::Failed,
                exit_code: Some(exit_code),
                error: Some(format!("exited with code {}", exit_code)),
                cause: Some(FailureCause::ExitCode),
                ..Self::pending()
            }
        }
    }

    pub fn failed(cause: FailureCause, error: String) -> Self {
        Self {
            state: JobState::Failed,
            error: Some(error),
            cause: Some(cause),
            ..Self::pending()
        }
    }

    pub fn timed_out() -> Self {
        Self {
            state: JobState::Timeout,
            error: Some("wall-clock timeout exceeded".to_string()),
            ..Self::pending()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            state: JobState::Cancelled,
            ..Self::pending()
        }
    }

    pub fn with_started_at(mut self, started_at: Option<DateTime<Utc>>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn with_finished_at(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = Some(finished_at);
        self
    }
}
