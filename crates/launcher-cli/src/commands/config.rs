use launcher_core::config::{Backend, Config, QueueSettings};
use std::path::Path;

const SAMPLE_CONFIG: &str = r#"# sweep-launch configuration

backend: local
sweep_dir: multirun

poll:
  interval_secs: 5
  max_failures: 3

# Applies to every backend.
queue:
  timeout_min: 60
  python: python3

local:
  array_parallelism: 4

slurm:
  array_parallelism: 64
  partition: gpu
  cpus_per_task: 4
  mem_gb: 16
  gpus_per_node: 1
  container_image: /images/train.sif
  container_exec_prefix: apptainer exec --nv {image}
  setup:
    - module load apptainer
"#;

pub async fn run(config_path: Option<&Path>, path: bool, init: bool) -> anyhow::Result<()> {
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(Config::default_path);

    if path {
        println!("{}", config_path.display());
        return Ok(());
    }

    if init {
        if config_path.exists() {
            println!("Config already exists at: {}", config_path.display());
            println!("Remove it first if you want to reinitialize.");
            return Ok(());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, SAMPLE_CONFIG)?;
        println!("Sample config written to: {}", config_path.display());
        return Ok(());
    }

    // Default: show the resolved queue config of every backend
    println!("Config path: {}", config_path.display());
    let config = if config_path.exists() {
        Config::load_from(&config_path)?
    } else {
        println!("Status:      not found, using built-in defaults");
        println!("Run `sweep-launch config --init` to create one.");
        Config::default()
    };
    println!("Sweep dir:   {}", config.sweep_dir().display());
    if let Some(backend) = config.backend {
        println!("Backend:     {}", backend);
    }

    for backend in Backend::ALL {
        println!();
        println!("[{}]", backend);
        match config.resolve(backend, QueueSettings::default()) {
            Ok(queue) => print!("{}", serde_yaml::to_string(&queue)?),
            Err(e) => println!("  invalid: {}", e),
        }
    }

    Ok(())
}
