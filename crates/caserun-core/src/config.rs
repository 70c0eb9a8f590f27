use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
/// Loaded from ~/.config/caserun/config.yaml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_root_directory")]
    pub root_directory: PathBuf,
    #[serde(default = "default_timeout_minutes")]
    pub timeout_minutes: u64,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_interpreter")]
    pub interpreter: String,
    #[serde(default = "default_script_extension")]
    pub script_extension: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,
    #[serde(default = "default_output_drain_secs")]
    pub output_drain_secs: u64,
    #[serde(default = "default_auto_cleanup")]
    pub auto_cleanup: bool,
    #[serde(default)]
    pub sweep_filter: Option<String>,
    #[serde(default)]
    pub log_store_url: Option<String>,
    #[serde(default)]
    pub default_result_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_directory: default_root_directory(),
            timeout_minutes: default_timeout_minutes(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            interpreter: default_interpreter(),
            script_extension: default_script_extension(),
            locale: default_locale(),
            poll_interval_ms: default_poll_interval_ms(),
            grace_period_secs: default_grace_period_secs(),
            output_drain_secs: default_output_drain_secs(),
            auto_cleanup: default_auto_cleanup(),
            sweep_filter: None,
            log_store_url: None,
            default_result_url: None,
        }
    }
}

fn default_root_directory() -> PathBuf {
    std::env::temp_dir().join("caserun")
}

fn default_timeout_minutes() -> u64 {
    1
}

fn default_max_concurrent_tasks() -> usize {
    10
}

fn default_interpreter() -> String {
    "python".to_string()
}

fn default_script_extension() -> String {
    "py".to_string()
}

fn default_locale() -> String {
    "C.UTF-8".to_string()
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_grace_period_secs() -> u64 {
    5
}

fn default_output_drain_secs() -> u64 {
    5
}

fn default_auto_cleanup() -> bool {
    true
}

impl Config {
    /// Load config from the default path, or defaults if the file does not exist.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("caserun")
            .join("config.yaml")
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.timeout_minutes == 0 {
            anyhow::bail!("timeout_minutes must be at least 1");
        }
        if self.max_concurrent_tasks == 0 {
            anyhow::bail!("max_concurrent_tasks must be at least 1");
        }
        if self.interpreter.trim().is_empty() {
            anyhow::bail!("interpreter must not be empty");
        }
        Ok(())
    }

    pub fn case_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }

    /// Poll interval for completion checks, never longer than one second.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(10, 1000))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn output_drain(&self) -> Duration {
        Duration::from_secs(self.output_drain_secs)
    }

    /// Substring a foreign command line must contain, besides the task id or
    /// script name, to be hit by an emergency sweep.
    pub fn sweep_filter(&self) -> Option<String> {
        match &self.sweep_filter {
            Some(filter) if filter.trim().is_empty() => None,
            Some(filter) => Some(filter.clone()),
            None => Path::new(&self.interpreter)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        }
    }

    /// Working directory owned by one task.
    pub fn task_dir(&self, task_id: &str) -> PathBuf {
        self.root_directory.join(task_id)
    }

    pub fn logs_dir(&self, task_id: &str) -> PathBuf {
        self.task_dir(task_id).join("logs")
    }
}
