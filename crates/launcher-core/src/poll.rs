use crate::config::PollSettings;
use crate::error::LauncherError;
use crate::executor::JobMonitor;
use crate::handle::JobHandle;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Drives job handles to a terminal state by polling their backend.
///
/// The returned futures only suspend inside status queries and the interval
/// sleep, so dropping them (for example from a `tokio::select!` on Ctrl-C)
/// stops polling at once. Backend jobs are never cancelled by that; handles
/// keep their last observed state.
#[derive(Debug, Clone)]
pub struct PollLoop {
    pub poll_interval: Duration,
    pub overall_timeout: Option<Duration>,
    /// Consecutive failed status queries tolerated per handle.
    pub max_poll_failures: u32,
}

impl Default for PollLoop {
    fn default() -> Self {
        Self::from(&PollSettings::default())
    }
}

impl From<&PollSettings> for PollLoop {
    fn from(settings: &PollSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.interval_secs),
            overall_timeout: settings.timeout_secs.map(Duration::from_secs),
            max_poll_failures: settings.max_failures.max(1),
        }
    }
}

impl PollLoop {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            ..Self::default()
        }
    }

    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = Some(timeout);
        self
    }

    pub fn with_max_poll_failures(mut self, max: u32) -> Self {
        self.max_poll_failures = max.max(1);
        self
    }

    /// Poll until every handle is terminal.
    ///
    /// On `overall_timeout` this returns [`LauncherError::PollTimeout`] and the
    /// unfinished handles stay in whatever state was last observed.
    pub async fn await_completion(
        &self,
        monitor: &dyn JobMonitor,
        handles: &mut [JobHandle],
    ) -> Result<(), LauncherError> {
        let deadline = self.overall_timeout.map(|t| Instant::now() + t);
        let mut failures = vec![0u32; handles.len()];

        loop {
            self.poll_once(monitor, handles, &mut failures).await;

            let remaining = handles.iter().filter(|h| !h.is_terminal()).count();
            if remaining == 0 {
                info!(jobs = handles.len(), "all jobs finished");
                return Ok(());
            }

            let mut nap = self.poll_interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    warn!(remaining, "overall timeout reached while jobs are still active");
                    return Err(LauncherError::PollTimeout { remaining });
                }
                nap = nap.min(deadline - now);
            }
            debug!(remaining, "waiting {:?} before next poll", nap);
            tokio::time::sleep(nap).await;
        }
    }

    /// Query every non-terminal handle once. Unlike [`Self::await_completion`]
    /// a failed query leaves the handle untouched.
    pub async fn refresh(&self, monitor: &dyn JobMonitor, handles: &mut [JobHandle]) {
        for handle in handles.iter_mut().filter(|h| !h.is_terminal()) {
            match monitor.status(handle).await {
                Ok(status) => {
                    if handle.apply(status) && handle.is_terminal() {
                        persist(handle);
                    }
                }
                Err(e) => warn!(job = %handle.id(), "status query failed: {}", e),
            }
        }
    }

    async fn poll_once(
        &self,
        monitor: &dyn JobMonitor,
        handles: &mut [JobHandle],
        failures: &mut [u32],
    ) {
        for (handle, failures) in handles.iter_mut().zip(failures.iter_mut()) {
            if handle.is_terminal() {
                continue;
            }
            match monitor.status(handle).await {
                Ok(status) => {
                    *failures = 0;
                    if handle.apply(status) && handle.is_terminal() {
                        info!(job = %handle.id(), state = %handle.state(), "job finished");
                        persist(handle);
                    }
                }
                Err(e) => {
                    *failures += 1;
                    warn!(
                        job = %handle.id(),
                        attempt = *failures,
                        max = self.max_poll_failures,
                        "status query failed: {}",
                        e
                    );
                    if *failures >= self.max_poll_failures {
                        handle.mark_poll_failed(format!(
                            "status unavailable after {} attempts: {}",
                            failures, e
                        ));
                        persist(handle);
                    }
                }
            }
        }
    }
}

fn persist(handle: &JobHandle) {
    if !handle.job_dir().is_dir() {
        return;
    }
    if let Err(e) = handle.write_to_dir() {
        warn!(job = %handle.id(), "failed to record handle: {}", e);
    }
}
