use thiserror::Error;

#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Submission failed: {0}")]
    Submission(String),

    #[error("Status query failed: {0}")]
    Poll(String),

    #[error("Timed out waiting for {remaining} job(s) to finish")]
    PollTimeout { remaining: usize },

    #[error("Cancellation failed: {0}")]
    Cancel(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl LauncherError {
    /// Errors raised before anything reached a backend.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(self, LauncherError::Config(_) | LauncherError::Submission(_))
    }
}
