use super::{load_handles, print_counts, print_table};
use launcher_core::config::Backend;
use launcher_core::executor::LaunchContext;
use launcher_core::handle::JobHandle;
use launcher_core::poll::PollLoop;
use std::path::Path;
use sweep_launch::Launcher;

pub async fn run(launch_dir: &Path, json: bool, refresh: bool) -> anyhow::Result<()> {
    let mut handles = load_handles(launch_dir)?;

    // Only scheduler jobs can be asked about after the fact.
    if refresh {
        let launcher = Launcher::new(LaunchContext::new(Vec::new(), launch_dir));
        let poll = PollLoop::default();
        for handle in handles.iter_mut().filter(|h| h.backend() == Backend::Slurm) {
            poll.refresh(&launcher, std::slice::from_mut(handle)).await;
        }
    }

    if json {
        let summary: Vec<_> = handles.iter().map(JobHandle::to_summary_json).collect();
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_table(&handles);
        print_counts(&handles);
    }

    Ok(())
}
