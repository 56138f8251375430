use super::load_handles;
use launcher_core::config::Backend;
use launcher_core::executor::LaunchContext;
use std::path::Path;
use sweep_launch::Launcher;
use tracing::warn;

pub async fn run(launch_dir: &Path) -> anyhow::Result<()> {
    let handles = load_handles(launch_dir)?;
    let launcher = Launcher::new(LaunchContext::new(Vec::new(), launch_dir));

    let mut cancelled = 0;
    for handle in handles.iter().filter(|h| !h.is_terminal()) {
        if handle.backend() == Backend::Local {
            warn!(job = %handle.id(), "local jobs stop with the process that launched them");
            continue;
        }
        launcher.cancel(handle).await?;
        cancelled += 1;
    }

    println!("Cancellation requested for {} job(s).", cancelled);
    Ok(())
}
