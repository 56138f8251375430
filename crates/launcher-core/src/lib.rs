pub mod config;
pub mod error;
pub mod executor;
pub mod handle;
pub mod job;
pub mod poll;
pub mod result;
pub mod wrapper;

pub use config::{Backend, Config, QueueConfig, QueueSettings};
pub use error::LauncherError;
pub use executor::{Executor, JobMonitor, LaunchContext};
pub use handle::JobHandle;
pub use job::{FailureCause, JobId, JobRequest, JobState, JobStatus};
pub use poll::PollLoop;
pub use result::JobResult;
