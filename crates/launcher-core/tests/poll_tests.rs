use chrono::Utc;
use launcher_core::config::Backend;
use launcher_core::job::{FailureCause, JobId, JobRequest, JobState, JobStatus};
use launcher_core::{JobHandle, JobMonitor, LauncherError, PollLoop};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Replays a fixed sequence of answers per job. The last answer repeats.
struct ScriptedMonitor {
    script: Mutex<HashMap<String, VecDeque<Option<JobStatus>>>>,
    queries: Mutex<usize>,
}

impl ScriptedMonitor {
    fn new(script: Vec<(&str, Vec<Option<JobStatus>>)>) -> Self {
        Self {
            script: Mutex::new(
                script
                    .into_iter()
                    .map(|(id, answers)| (id.to_string(), answers.into()))
                    .collect(),
            ),
            queries: Mutex::new(0),
        }
    }

    fn queries(&self) -> usize {
        *self.queries.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl JobMonitor for ScriptedMonitor {
    async fn status(&self, handle: &JobHandle) -> Result<JobStatus, LauncherError> {
        *self.queries.lock().unwrap() += 1;
        let mut script = self.script.lock().unwrap();
        let answers = script
            .get_mut(handle.id().as_str())
            .ok_or_else(|| LauncherError::JobNotFound(handle.id().to_string()))?;
        let answer = if answers.len() > 1 {
            answers.pop_front().unwrap()
        } else {
            answers.front().cloned().unwrap()
        };
        answer.ok_or_else(|| LauncherError::Poll("backend unreachable".into()))
    }
}

fn handle(id: &str, index: usize) -> JobHandle {
    let request = JobRequest::new(index, BTreeMap::new());
    JobHandle::new(
        JobId::from_string(id.to_string()),
        Backend::Slurm,
        &request,
        PathBuf::from("/nonexistent/sweep").join(index.to_string()),
    )
}

fn fast_loop() -> PollLoop {
    PollLoop::new(Duration::from_millis(5))
}

#[tokio::test]
async fn returns_only_once_every_handle_is_terminal() {
    let running = Some(JobStatus::running(Utc::now()));
    let monitor = ScriptedMonitor::new(vec![
        (
            "a",
            vec![Some(JobStatus::pending()), running.clone(), Some(JobStatus::exited(0))],
        ),
        (
            "b",
            vec![
                Some(JobStatus::pending()),
                Some(JobStatus::pending()),
                running.clone(),
                running.clone(),
                running,
                Some(JobStatus::exited(3)),
            ],
        ),
    ]);
    let mut handles = vec![handle("a", 0), handle("b", 1)];

    fast_loop()
        .await_completion(&monitor, &mut handles)
        .await
        .unwrap();

    assert!(handles.iter().all(|h| h.state().is_terminal()));
    assert_eq!(handles[0].state(), JobState::Completed);
    assert_eq!(handles[1].state(), JobState::Failed);
    assert_eq!(handles[1].exit_code(), Some(3));
    assert!(handles[1].started_at().is_some());
}

#[tokio::test]
async fn terminal_handles_are_not_polled_again() {
    let monitor = ScriptedMonitor::new(vec![("a", vec![Some(JobStatus::exited(0))])]);
    let mut handles = vec![handle("a", 0)];

    let poll = fast_loop();
    poll.await_completion(&monitor, &mut handles).await.unwrap();
    poll.await_completion(&monitor, &mut handles).await.unwrap();

    assert_eq!(monitor.queries(), 1);
}

#[tokio::test]
async fn transient_poll_failures_are_retried() {
    let monitor = ScriptedMonitor::new(vec![(
        "a",
        vec![None, None, Some(JobStatus::exited(0))],
    )]);
    let mut handles = vec![handle("a", 0)];

    fast_loop()
        .with_max_poll_failures(3)
        .await_completion(&monitor, &mut handles)
        .await
        .unwrap();

    assert_eq!(handles[0].state(), JobState::Completed);
}

#[tokio::test]
async fn persistent_poll_failure_fails_only_that_handle() {
    let monitor = ScriptedMonitor::new(vec![
        ("broken", vec![None]),
        (
            "fine",
            vec![
                Some(JobStatus::running(Utc::now())),
                Some(JobStatus::running(Utc::now())),
                Some(JobStatus::running(Utc::now())),
                Some(JobStatus::running(Utc::now())),
                Some(JobStatus::exited(0)),
            ],
        ),
    ]);
    let mut handles = vec![handle("broken", 0), handle("fine", 1)];

    fast_loop()
        .with_max_poll_failures(2)
        .await_completion(&monitor, &mut handles)
        .await
        .unwrap();

    assert_eq!(handles[0].state(), JobState::Failed);
    assert_eq!(handles[0].cause(), Some(FailureCause::PollFailure));
    assert_eq!(handles[1].state(), JobState::Completed);
    assert_eq!(handles[1].cause(), None);
}

#[tokio::test]
async fn overall_timeout_keeps_last_observed_state() {
    let monitor = ScriptedMonitor::new(vec![
        ("done", vec![Some(JobStatus::exited(0))]),
        ("stuck", vec![Some(JobStatus::running(Utc::now()))]),
    ]);
    let mut handles = vec![handle("done", 0), handle("stuck", 1)];

    let err = fast_loop()
        .with_overall_timeout(Duration::from_millis(50))
        .await_completion(&monitor, &mut handles)
        .await
        .unwrap_err();

    assert!(matches!(err, LauncherError::PollTimeout { remaining: 1 }));
    assert_eq!(handles[0].state(), JobState::Completed);
    assert_eq!(handles[1].state(), JobState::Running);
}

#[tokio::test]
async fn dropping_the_poll_future_stops_polling() {
    let monitor = ScriptedMonitor::new(vec![("stuck", vec![Some(JobStatus::pending())])]);
    let mut handles = vec![handle("stuck", 0)];

    let outcome = tokio::time::timeout(
        Duration::from_millis(30),
        fast_loop().await_completion(&monitor, &mut handles),
    )
    .await;
    assert!(outcome.is_err());

    let seen = monitor.queries();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(monitor.queries(), seen);
    assert_eq!(handles[0].state(), JobState::Pending);
}

#[tokio::test]
async fn refresh_applies_a_single_round() {
    let monitor = ScriptedMonitor::new(vec![(
        "a",
        vec![Some(JobStatus::running(Utc::now())), Some(JobStatus::exited(0))],
    )]);
    let mut handles = vec![handle("a", 0)];

    fast_loop().refresh(&monitor, &mut handles).await;
    assert_eq!(handles[0].state(), JobState::Running);
    fast_loop().refresh(&monitor, &mut handles).await;
    assert_eq!(handles[0].state(), JobState::Completed);
}
