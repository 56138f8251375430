use launcher_core::config::{Backend, Config, QueueConfig, QueueSettings};
use launcher_core::job::{validate_batch, JobRequest};
use launcher_core::LauncherError;
use std::collections::BTreeMap;

const SAMPLE: &str = r#"
backend: slurm
sweep_dir: /scratch/sweeps
poll:
  interval_secs: 10
queue:
  timeout_min: 30
  python: "apptainer exec /img/train.sif python"
slurm:
  partition: gpu
  cpus_per_task: 8
  mem_gb: 32
  gpus_per_node: 1
  array_parallelism: 16
  timeout_min: 120
local:
  array_parallelism: 2
"#;

#[test]
fn backend_names_parse() {
    assert_eq!("local".parse::<Backend>().unwrap(), Backend::Local);
    assert_eq!("slurm".parse::<Backend>().unwrap(), Backend::Slurm);
    assert!(matches!(
        "kubernetes".parse::<Backend>(),
        Err(LauncherError::Config(_))
    ));
}

#[test]
fn built_in_queue_defaults() {
    let config = QueueSettings::default().resolve(Backend::Slurm).unwrap();
    assert_eq!(config.timeout_min, 60);
    assert_eq!(config.array_parallelism, 256);
    assert_eq!(config.python_executable, None);
    assert_eq!(config.partition, None);
    assert_eq!(config.job_name, "sweep");
}

#[test]
fn backend_section_overrides_shared_section() {
    let file = Config::from_yaml(SAMPLE).unwrap();
    assert_eq!(file.backend, Some(Backend::Slurm));
    assert_eq!(file.poll.interval_secs, 10);

    let slurm = file.resolve(Backend::Slurm, QueueSettings::default()).unwrap();
    assert_eq!(slurm.timeout_min, 120);
    assert_eq!(slurm.partition.as_deref(), Some("gpu"));
    assert_eq!(slurm.mem_gb, Some(32));
    assert_eq!(slurm.array_parallelism, 16);
    assert_eq!(
        slurm.python_executable.as_deref(),
        Some("apptainer exec /img/train.sif python")
    );

    let local = file.resolve(Backend::Local, QueueSettings::default()).unwrap();
    assert_eq!(local.timeout_min, 30);
    assert_eq!(local.array_parallelism, 2);
    assert_eq!(local.partition, None);
}

#[test]
fn invocation_overrides_win() {
    let file = Config::from_yaml(SAMPLE).unwrap();
    let overrides = QueueSettings {
        timeout_min: Some(5),
        partition: Some("debug".into()),
        ..QueueSettings::default()
    };
    let config = file.resolve(Backend::Slurm, overrides).unwrap();
    assert_eq!(config.timeout_min, 5);
    assert_eq!(config.partition.as_deref(), Some("debug"));
    assert_eq!(config.cpus_per_task, Some(8));
}

#[test]
fn container_image_fills_prefix_template() {
    let settings = QueueSettings {
        container_image: Some("/img/env.sif".into()),
        ..QueueSettings::default()
    };
    let config = settings.resolve(Backend::Local).unwrap();
    assert_eq!(
        config.container_exec_prefix.as_deref(),
        Some("apptainer exec /img/env.sif")
    );

    let settings = QueueSettings {
        container_image: Some("/img/env.sif".into()),
        container_exec_prefix: Some("singularity exec --nv {image}".into()),
        ..QueueSettings::default()
    };
    let config = settings.resolve(Backend::Local).unwrap();
    assert_eq!(
        config.container_exec_prefix.as_deref(),
        Some("singularity exec --nv /img/env.sif")
    );
}

#[test]
fn image_placeholder_without_image_is_rejected() {
    let settings = QueueSettings {
        container_exec_prefix: Some("apptainer exec {image}".into()),
        ..QueueSettings::default()
    };
    assert!(matches!(
        settings.resolve(Backend::Slurm),
        Err(LauncherError::Config(_))
    ));
}

#[test]
fn invalid_values_fail_fast() {
    let zero_timeout = QueueSettings {
        timeout_min: Some(0),
        ..QueueSettings::default()
    };
    assert!(matches!(
        zero_timeout.resolve(Backend::Local),
        Err(LauncherError::Config(_))
    ));

    let zero_parallelism = QueueSettings {
        array_parallelism: Some(0),
        ..QueueSettings::default()
    };
    assert!(matches!(
        zero_parallelism.resolve(Backend::Slurm),
        Err(LauncherError::Config(_))
    ));

    let too_wide = QueueConfig {
        array_parallelism: Backend::Slurm.parallelism_ceiling() + 1,
        ..QueueConfig::default()
    };
    assert!(too_wide.validate(Backend::Slurm).is_err());
}

#[test]
fn negative_resources_and_unknown_keys_are_rejected() {
    assert!(Config::from_yaml("queue:\n  mem_gb: -4\n").is_err());
    assert!(Config::from_yaml("queue:\n  walltime: 10\n").is_err());
    assert!(Config::from_yaml("backend: pbs\n").is_err());
}

#[test]
fn duplicate_indices_are_a_configuration_error() {
    let batch = vec![
        JobRequest::new(0, BTreeMap::new()),
        JobRequest::new(1, BTreeMap::new()),
        JobRequest::new(0, BTreeMap::new()),
    ];
    assert!(matches!(validate_batch(&batch), Err(LauncherError::Config(_))));
    assert!(validate_batch(&batch[..2]).is_ok());
}

#[test]
fn overrides_render_in_key_order() {
    let request = JobRequest::new(
        0,
        BTreeMap::from([
            ("seed".to_string(), "1".to_string()),
            ("lr".to_string(), "0.1".to_string()),
        ]),
    );
    assert_eq!(request.override_args(), vec!["lr=0.1", "seed=1"]);
}
