use launcher_core::job::{JobRequest, JobState};
use launcher_core::{JobResult, LaunchContext, LauncherError, PollLoop, QueueConfig};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use sweep_launch::batch::parse_batch;
use sweep_launch::Launcher;

fn launcher(sweep_dir: &Path, script: &str) -> Launcher {
    Launcher::new(LaunchContext::new(
        vec!["sh".into(), "-c".into(), script.into(), "job".into()],
        sweep_dir,
    ))
}

fn config(parallelism: usize) -> QueueConfig {
    QueueConfig {
        array_parallelism: parallelism,
        ..QueueConfig::default()
    }
}

fn batch(n: usize) -> Vec<JobRequest> {
    (0..n)
        .map(|i| JobRequest::new(i, BTreeMap::from([("seed".to_string(), i.to_string())])))
        .collect()
}

fn poll() -> PollLoop {
    PollLoop::new(Duration::from_millis(20)).with_overall_timeout(Duration::from_secs(30))
}

#[tokio::test]
async fn local_batch_runs_to_completion() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = launcher(dir.path(), "true");

    let mut handles = launcher.launch(&batch(2), "local", &config(2)).await.unwrap();
    assert_eq!(handles.len(), 2);
    launcher.await_completion(&mut handles, &poll()).await.unwrap();

    let launch_dir = handles[0].job_dir().parent().unwrap().to_path_buf();
    for (index, h) in handles.iter().enumerate() {
        assert_eq!(h.state(), JobState::Completed);
        let result_path = launch_dir.join(index.to_string()).join("result.json");
        assert_eq!(h.result_path(), result_path.as_path());
        let result = JobResult::read_from_file(&result_path).unwrap();
        assert_eq!(result.index, index);
        assert_eq!(result.exit_code, Some(0));
    }

    // handle.json reflects the final state
    let recorded = launcher_core::handle::list_handles(&launch_dir).unwrap();
    assert!(recorded.iter().all(|h| h.state() == JobState::Completed));
}

#[tokio::test]
async fn parallelism_one_runs_jobs_one_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = launcher(dir.path(), "sleep 0.3");

    let mut handles = launcher.launch(&batch(3), "local", &config(1)).await.unwrap();

    let poll = PollLoop::new(Duration::from_millis(20));
    let mut max_running = 0;
    while handles.iter().any(|h| !h.is_terminal()) {
        poll.refresh(&launcher, &mut handles).await;
        let running = handles
            .iter()
            .filter(|h| h.state() == JobState::Running)
            .count();
        max_running = max_running.max(running);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(max_running, 1);
    assert!(handles.iter().all(|h| h.state() == JobState::Completed));
}

#[tokio::test]
async fn unknown_backend_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = launcher(dir.path(), "true");

    let err = launcher.launch(&batch(1), "kubernetes", &config(1)).await.unwrap_err();
    assert!(matches!(err, LauncherError::Config(_)));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn empty_base_command_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = Launcher::new(LaunchContext::new(Vec::new(), dir.path()));

    let err = launcher.launch(&batch(1), "local", &config(1)).await.unwrap_err();
    assert!(matches!(err, LauncherError::Config(_)));
}

#[tokio::test]
async fn duplicate_indices_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = launcher(dir.path(), "true");
    let batch = vec![
        JobRequest::new(0, BTreeMap::new()),
        JobRequest::new(0, BTreeMap::new()),
    ];

    let err = launcher.launch(&batch, "local", &config(1)).await.unwrap_err();
    assert!(matches!(err, LauncherError::Config(_)));
}

#[tokio::test]
async fn repeated_launches_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = launcher(dir.path(), r#"echo "$@" > args.txt"#);
    let batch = batch(1);

    let mut first = launcher.launch(&batch, "local", &config(1)).await.unwrap();
    let mut second = launcher.launch(&batch, "local", &config(1)).await.unwrap();
    launcher.await_completion(&mut first, &poll()).await.unwrap();
    launcher.await_completion(&mut second, &poll()).await.unwrap();

    assert_ne!(first[0].job_dir(), second[0].job_dir());
    for h in first.iter().chain(second.iter()) {
        assert_eq!(
            std::fs::read_to_string(h.job_dir().join("args.txt")).unwrap(),
            "seed=0\n"
        );
    }
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[tokio::test]
async fn batch_file_overrides_reach_each_job() {
    let dir = tempfile::tempdir().unwrap();
    let launcher = launcher(dir.path(), r#"printf '%s\n' "$@" > args.txt"#);
    let batch = parse_batch("- {lr: 0.1, model: small}\n- {lr: 0.01, model: large}\n").unwrap();

    let mut handles = launcher.launch(&batch, "local", &config(2)).await.unwrap();
    launcher.await_completion(&mut handles, &poll()).await.unwrap();

    let args: Vec<_> = handles
        .iter()
        .map(|h| std::fs::read_to_string(h.job_dir().join("args.txt")).unwrap())
        .collect();
    assert_eq!(args, vec!["lr=0.1\nmodel=small\n", "lr=0.01\nmodel=large\n"]);
}
