//! Configuration of exchanges and of the execution runtime
//!
//! Settings are resolved from environment variables first, then from the
//! config file, then from built-in defaults. The config file is looked up at
//! `$REQUEST_TASK_CONFIG` if set, else at `request-task/config.toml` under
//! `$XDG_CONFIG_HOME` (falling back to `~/.config`).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;


/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    pub exchange: ExchangeConfig,
    pub runtime: RuntimeConfig,
}
//
impl TaskConfig {
    /// Load the configuration, see the module docs for where from
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TaskConfig::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Path of the config file
    pub fn file_path() -> PathBuf {
        std::env::var("REQUEST_TASK_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Apply the REQUEST_TASK_* overrides, looked up through `var`
    fn apply_overrides<F>(&mut self, var: F)
        where F: Fn(&str) -> Option<String>
    {
        if let Some(v) = var("REQUEST_TASK_TIMEOUT_MS") {
            match v.parse() {
                Ok(ms) => self.exchange.timeout_millis = ms,
                Err(_) => {
                    tracing::warn!(value = %v, "ignoring invalid REQUEST_TASK_TIMEOUT_MS")
                }
            }
        }
        if let Some(v) = var("REQUEST_TASK_MAX_BODY_BYTES") {
            match v.parse() {
                Ok(bytes) => self.exchange.max_body_bytes = bytes,
                Err(_) => {
                    tracing::warn!(value = %v, "ignoring invalid REQUEST_TASK_MAX_BODY_BYTES")
                }
            }
        }
        if let Some(v) = var("REQUEST_TASK_WORKERS") {
            match v.parse() {
                Ok(n) => self.runtime.worker_threads = n,
                Err(_) => {
                    tracing::warn!(value = %v, "ignoring invalid REQUEST_TASK_WORKERS")
                }
            }
        }
    }
}


/// How exchanges talk to the network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Deadline of a whole exchange, 0 means none
    pub timeout_millis: u64,

    /// Bodies longer than this are truncated and flagged incomplete
    pub max_body_bytes: u64,

    pub user_agent: String,
}
//
impl Default for ExchangeConfig {
    fn default() -> Self {
        ExchangeConfig {
            timeout_millis: 30_000,
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: concat!("threaded_request_task/", env!("CARGO_PKG_VERSION"))
                .to_string(),
        }
    }
}
//
impl ExchangeConfig {
    pub fn timeout(&self) -> Option<Duration> {
        match self.timeout_millis {
            0 => None,
            millis => Some(Duration::from_millis(millis)),
        }
    }
}


/// Where request tasks run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Size of the worker pool, 0 means one thread per task
    pub worker_threads: usize,

    /// How long the delivery loop waits for a notification before looking
    /// at other input
    pub delivery_wait_millis: u64,
}
//
impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            worker_threads: 0,
            delivery_wait_millis: 50,
        }
    }
}
//
impl RuntimeConfig {
    pub fn delivery_wait(&self) -> Duration {
        Duration::from_millis(self.delivery_wait_millis.max(1))
    }
}


/// Loading the config file failed
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),

    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
}


/// Directory holding the config file
fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("request-task")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
