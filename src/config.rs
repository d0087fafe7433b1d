use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::core::task::DEFAULT_MAX_RETRIES;
use crate::{Error, Result};

pub const DEFAULT_MAX_CONCURRENT_TASKS: usize = 4;

fn default_max_concurrent_tasks() -> usize {
    DEFAULT_MAX_CONCURRENT_TASKS
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// Applied to tasks that do not set their own timeout.
    pub default_task_timeout_secs: Option<f64>,
    #[serde(default)]
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: DEFAULT_MAX_CONCURRENT_TASKS,
            default_max_retries: DEFAULT_MAX_RETRIES,
            default_task_timeout_secs: None,
            debug: false,
        }
    }
}

impl Config {
    pub fn siteflow_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".siteflow"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::siteflow_dir()?.join("siteflow.toml"))
    }

    pub fn default_task_timeout(&self) -> Option<Duration> {
        self.default_task_timeout_secs
            .filter(|secs| secs.is_finite() && *secs > 0.0)
            .map(Duration::from_secs_f64)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_tasks == 0 {
            return Err(Error::Validation(
                "max_concurrent_tasks must be at least 1".to_string(),
            ));
        }
        if let Some(secs) = self.default_task_timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(Error::Validation(format!(
                    "default_task_timeout_secs must be positive, got {}",
                    secs
                )));
            }
        }
        Ok(())
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        debug!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            default_max_retries = config.default_max_retries,
            timeout = ?config.default_task_timeout_secs,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                debug!(dir = %dir.display(), "creating config directory");
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }
}
