use crate::error::LauncherError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Largest array a stock SLURM install accepts (`MaxArraySize`).
pub const SLURM_MAX_ARRAY_SIZE: usize = 1001;

const LOCAL_MAX_PARALLELISM: usize = 1024;
const DEFAULT_CONTAINER_EXEC: &str = "apptainer exec {image}";

/// Top-level configuration.
/// Loaded from ~/.config/sweep-launch/launcher.yaml
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub backend: Option<Backend>,
    #[serde(default)]
    pub sweep_dir: Option<PathBuf>,
    #[serde(default)]
    pub poll: PollSettings,
    /// Settings shared by every backend.
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub local: QueueSettings,
    #[serde(default)]
    pub slurm: QueueSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Local,
    Slurm,
}

impl Backend {
    pub const ALL: [Backend; 2] = [Backend::Local, Backend::Slurm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Local => "local",
            Backend::Slurm => "slurm",
        }
    }

    /// Upper bound for `array_parallelism` on this backend.
    pub fn parallelism_ceiling(&self) -> usize {
        match self {
            Backend::Local => LOCAL_MAX_PARALLELISM,
            Backend::Slurm => SLURM_MAX_ARRAY_SIZE,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = LauncherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Backend::Local),
            "slurm" => Ok(Backend::Slurm),
            other => Err(LauncherError::Config(format!(
                "unknown backend '{}' (expected 'local' or 'slurm')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_max_poll_failures")]
    pub max_failures: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval_secs(),
            timeout_secs: None,
            max_failures: default_max_poll_failures(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_max_poll_failures() -> u32 {
    3
}

/// One layer of queue settings. Every field is optional so layers can be
/// stacked: built-in defaults, the shared `queue` section, the backend
/// section, then per-invocation overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueSettings {
    #[serde(default)]
    pub timeout_min: Option<u64>,
    #[serde(default, alias = "python")]
    pub python_executable: Option<String>,
    #[serde(default)]
    pub container_exec_prefix: Option<String>,
    #[serde(default)]
    pub container_image: Option<String>,
    #[serde(default)]
    pub array_parallelism: Option<usize>,
    #[serde(default)]
    pub partition: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub qos: Option<String>,
    #[serde(default)]
    pub constraint: Option<String>,
    #[serde(default)]
    pub cpus_per_task: Option<u32>,
    #[serde(default)]
    pub mem_gb: Option<u32>,
    #[serde(default)]
    pub gpus_per_node: Option<u32>,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub setup: Option<Vec<String>>,
}

/// Resolved, validated queue configuration for one launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub timeout_min: u64,
    pub python_executable: Option<String>,
    pub container_exec_prefix: Option<String>,
    pub array_parallelism: usize,
    pub partition: Option<String>,
    pub account: Option<String>,
    pub qos: Option<String>,
    pub constraint: Option<String>,
    pub cpus_per_task: Option<u32>,
    pub mem_gb: Option<u32>,
    pub gpus_per_node: Option<u32>,
    pub job_name: String,
    pub setup: Vec<String>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            timeout_min: 60,
            python_executable: None,
            container_exec_prefix: None,
            array_parallelism: 256,
            partition: None,
            account: None,
            qos: None,
            constraint: None,
            cpus_per_task: None,
            mem_gb: None,
            gpus_per_node: None,
            job_name: "sweep".to_string(),
            setup: Vec::new(),
        }
    }
}

impl QueueConfig {
    /// Wall-clock budget of a single job.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_min.saturating_mul(60))
    }

    /// Check the invariants every backend relies on.
    pub fn validate(&self, backend: Backend) -> Result<(), LauncherError> {
        if self.timeout_min == 0 {
            return Err(LauncherError::Config(
                "timeout_min must be at least 1".into(),
            ));
        }
        if self.array_parallelism == 0 {
            return Err(LauncherError::Config(
                "array_parallelism must be at least 1".into(),
            ));
        }
        let ceiling = backend.parallelism_ceiling();
        if self.array_parallelism > ceiling {
            return Err(LauncherError::Config(format!(
                "array_parallelism {} exceeds the {} backend limit of {}",
                self.array_parallelism, backend, ceiling
            )));
        }
        if let Some(prefix) = &self.container_exec_prefix {
            if prefix.split_whitespace().next().is_none() {
                return Err(LauncherError::Config(
                    "container_exec_prefix must not be blank".into(),
                ));
            }
            if prefix.contains("{image}") {
                return Err(LauncherError::Config(
                    "container_exec_prefix uses {image} but no container_image is set".into(),
                ));
            }
        }
        if let Some(python) = &self.python_executable {
            if python.split_whitespace().next().is_none() {
                return Err(LauncherError::Config(
                    "python_executable must not be blank".into(),
                ));
            }
        }
        if self.job_name.trim().is_empty() {
            return Err(LauncherError::Config("job_name must not be empty".into()));
        }
        Ok(())
    }
}

impl QueueSettings {
    /// Built-in defaults for a backend, the bottom layer of every resolution.
    pub fn defaults_for(backend: Backend) -> Self {
        let defaults = QueueConfig::default();
        let array_parallelism = match backend {
            Backend::Local => defaults
                .array_parallelism
                .min(std::thread::available_parallelism().map_or(1, |n| n.get())),
            Backend::Slurm => defaults.array_parallelism,
        };
        Self {
            timeout_min: Some(defaults.timeout_min),
            array_parallelism: Some(array_parallelism),
            job_name: Some(defaults.job_name),
            ..Self::default()
        }
    }

    /// Overlay `other` on top of `self`; fields set in `other` win.
    pub fn merge(self, other: QueueSettings) -> Self {
        Self {
            timeout_min: other.timeout_min.or(self.timeout_min),
            python_executable: other.python_executable.or(self.python_executable),
            container_exec_prefix: other.container_exec_prefix.or(self.container_exec_prefix),
            container_image: other.container_image.or(self.container_image),
            array_parallelism: other.array_parallelism.or(self.array_parallelism),
            partition: other.partition.or(self.partition),
            account: other.account.or(self.account),
            qos: other.qos.or(self.qos),
            constraint: other.constraint.or(self.constraint),
            cpus_per_task: other.cpus_per_task.or(self.cpus_per_task),
            mem_gb: other.mem_gb.or(self.mem_gb),
            gpus_per_node: other.gpus_per_node.or(self.gpus_per_node),
            job_name: other.job_name.or(self.job_name),
            setup: other.setup.or(self.setup),
        }
    }

    /// Resolve this layer (on top of the backend defaults) into a validated config.
    pub fn resolve(self, backend: Backend) -> Result<QueueConfig, LauncherError> {
        let settings = Self::defaults_for(backend).merge(self);
        let fallback = QueueConfig::default();

        let container_exec_prefix = match (settings.container_exec_prefix, settings.container_image) {
            (Some(prefix), Some(image)) => Some(prefix.replace("{image}", &image)),
            (Some(prefix), None) => Some(prefix),
            (None, Some(image)) => Some(DEFAULT_CONTAINER_EXEC.replace("{image}", &image)),
            (None, None) => None,
        };

        let config = QueueConfig {
            timeout_min: settings.timeout_min.unwrap_or(fallback.timeout_min),
            python_executable: settings.python_executable,
            container_exec_prefix,
            array_parallelism: settings
                .array_parallelism
                .unwrap_or(fallback.array_parallelism),
            partition: settings.partition,
            account: settings.account,
            qos: settings.qos,
            constraint: settings.constraint,
            cpus_per_task: settings.cpus_per_task,
            mem_gb: settings.mem_gb,
            gpus_per_node: settings.gpus_per_node,
            job_name: settings.job_name.unwrap_or(fallback.job_name),
            setup: settings.setup.unwrap_or_default(),
        };
        config.validate(backend)?;
        Ok(config)
    }
}

impl Config {
    /// Load config from the default path, or an empty config if there is none.
    pub fn load_default() -> Result<Self, LauncherError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, LauncherError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, LauncherError> {
        serde_yaml::from_str(contents).map_err(|e| LauncherError::Config(e.to_string()))
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("sweep-launch")
            .join("launcher.yaml")
    }

    /// Settings from this file for `backend`: the shared section with the
    /// backend section layered on top.
    pub fn settings_for(&self, backend: Backend) -> QueueSettings {
        let specific = match backend {
            Backend::Local => self.local.clone(),
            Backend::Slurm => self.slurm.clone(),
        };
        self.queue.clone().merge(specific)
    }

    /// Resolve the full layer stack for `backend`, with `overrides` on top.
    pub fn resolve(
        &self,
        backend: Backend,
        overrides: QueueSettings,
    ) -> Result<QueueConfig, LauncherError> {
        self.settings_for(backend).merge(overrides).resolve(backend)
    }

    pub fn sweep_dir(&self) -> PathBuf {
        self.sweep_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("multirun"))
    }
}
