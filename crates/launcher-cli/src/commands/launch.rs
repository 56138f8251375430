use super::{print_counts, print_table};
use anyhow::Context;
use clap::Args;
use launcher_core::config::{Backend, Config, QueueSettings};
use launcher_core::executor::LaunchContext;
use launcher_core::job::{JobRequest, JobState};
use launcher_core::poll::PollLoop;
use std::collections::BTreeMap;
use std::path::PathBuf;
use sweep_launch::batch::load_batch;
use sweep_launch::Launcher;
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct LaunchArgs {
    /// Backend to run on: local or slurm (default from config, else local)
    #[arg(short, long)]
    pub backend: Option<String>,

    /// YAML file with one override map per job; without it a single job runs
    #[arg(long)]
    pub batch: Option<PathBuf>,

    /// Root directory for launch artifacts
    #[arg(long)]
    pub sweep_dir: Option<PathBuf>,

    /// Return right after submission (slurm only)
    #[arg(short, long)]
    pub detach: bool,

    #[command(flatten)]
    pub queue: QueueOverrides,

    /// Program to run, e.g. `-- python train.py --epochs 3`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}

/// Queue settings given on the command line; they win over the config file.
#[derive(Args, Debug, Default)]
pub struct QueueOverrides {
    #[arg(long)]
    pub timeout_min: Option<u64>,
    #[arg(long)]
    pub array_parallelism: Option<usize>,
    #[arg(long)]
    pub python: Option<String>,
    #[arg(long)]
    pub container_image: Option<String>,
    #[arg(long)]
    pub container_exec_prefix: Option<String>,
    #[arg(long)]
    pub partition: Option<String>,
    #[arg(long)]
    pub account: Option<String>,
    #[arg(long)]
    pub qos: Option<String>,
    #[arg(long)]
    pub job_name: Option<String>,
}

impl From<QueueOverrides> for QueueSettings {
    fn from(o: QueueOverrides) -> Self {
        QueueSettings {
            timeout_min: o.timeout_min,
            array_parallelism: o.array_parallelism,
            python_executable: o.python,
            container_image: o.container_image,
            container_exec_prefix: o.container_exec_prefix,
            partition: o.partition,
            account: o.account,
            qos: o.qos,
            job_name: o.job_name,
            ..QueueSettings::default()
        }
    }
}

pub async fn run(config: &Config, args: LaunchArgs) -> anyhow::Result<()> {
    let backend_name = args
        .backend
        .clone()
        .or_else(|| config.backend.map(|b| b.as_str().to_string()))
        .unwrap_or_else(|| Backend::Local.as_str().to_string());
    let backend: Backend = backend_name.parse()?;
    if args.detach && backend != Backend::Slurm {
        anyhow::bail!("--detach is only supported by the slurm backend");
    }

    let queue = config.resolve(backend, args.queue.into())?;
    let batch = match &args.batch {
        Some(path) => load_batch(path)?,
        None => vec![JobRequest::new(0, BTreeMap::new())],
    };
    let sweep_dir = args.sweep_dir.clone().unwrap_or_else(|| config.sweep_dir());

    let launcher = Launcher::new(LaunchContext::new(args.command, &sweep_dir));
    let mut handles = launcher
        .launch(&batch, &backend_name, &queue)
        .await
        .context("launch failed")?;
    let Some(first) = handles.first() else {
        println!("Nothing to launch.");
        return Ok(());
    };
    let launch_dir = first
        .job_dir()
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| sweep_dir.clone());

    println!("Launched {} job(s) on {}:", handles.len(), backend);
    println!("  Dir: {}", launch_dir.display());

    if args.detach {
        println!("Check progress with `sweep-launch status {}`", launch_dir.display());
        return Ok(());
    }

    let poll = PollLoop::from(&config.poll);
    let finished = tokio::select! {
        result = launcher.await_completion(&mut handles, &poll) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match finished {
        Some(result) => result?,
        None => {
            warn!("Interrupted, cancelling unfinished jobs");
            for handle in handles.iter().filter(|h| !h.is_terminal()) {
                if let Err(e) = launcher.cancel(handle).await {
                    warn!(job = %handle.id(), "cancel failed: {}", e);
                }
            }
            anyhow::bail!("interrupted");
        }
    }

    print_table(&handles);
    print_counts(&handles);

    let unsuccessful = handles
        .iter()
        .filter(|h| h.state() != JobState::Completed)
        .count();
    if unsuccessful > 0 {
        anyhow::bail!("{} of {} job(s) did not complete", unsuccessful, handles.len());
    }
    info!(launch = %launch_dir.display(), "sweep finished");
    Ok(())
}
