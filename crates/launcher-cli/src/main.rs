use anyhow::Result;
use clap::{Parser, Subcommand};
use launcher_core::config::Config;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "sweep-launch")]
#[command(about = "Launch parameter sweeps locally or on a SLURM cluster", long_about = None)]
struct Cli {
    /// Config file (default: ~/.config/sweep-launch/launcher.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a batch and wait for it to finish
    Launch(commands::launch::LaunchArgs),

    /// Show the jobs of a launch directory
    Status {
        /// Launch directory printed by `launch`
        launch_dir: PathBuf,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,

        /// Ask the scheduler for fresh states first
        #[arg(short, long)]
        refresh: bool,
    },

    /// Cancel the unfinished scheduler jobs of a launch directory
    Cancel {
        /// Launch directory printed by `launch`
        launch_dir: PathBuf,
    },

    /// Show or initialize configuration
    Config {
        /// Print the config file path
        #[arg(long)]
        path: bool,

        /// Write a sample config
        #[arg(long)]
        init: bool,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    Ok(match path {
        Some(path) => Config::load_from(path)?,
        None => Config::load_default()?,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Launch(args) => {
            let config = load_config(config_path)?;
            commands::launch::run(&config, args).await?;
        }
        Commands::Status {
            launch_dir,
            json,
            refresh,
        } => {
            commands::status::run(&launch_dir, json, refresh).await?;
        }
        Commands::Cancel { launch_dir } => {
            commands::cancel::run(&launch_dir).await?;
        }
        Commands::Config { path, init } => {
            commands::config::run(config_path, path, init).await?;
        }
    }

    Ok(())
}
