use std::time::Duration;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_HISTORY_LIMIT: usize = 16; // past instance results kept per job
pub const DEFAULT_EVENT_BUFFER: usize = 256;
pub const DEFAULT_LOG_FILTER: &str = "kairos=info";

/// Top-level config (kairos.toml + KAIROS_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KairosConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Tuning knobs for a `Scheduler` instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Budget applied to `await_result` calls that pass no explicit timeout.
    /// `None` waits until the job reaches a terminal status.
    #[serde(default)]
    pub await_timeout_ms: Option<u64>,
    /// How long `shutdown` waits for job tasks to exit before aborting them.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    /// Number of past execution results retained per job id.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Capacity of the status-event channel handed to the scheduler.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            await_timeout_ms: None,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            history_limit: DEFAULT_HISTORY_LIMIT,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl SchedulerConfig {
    pub fn await_timeout(&self) -> Option<Duration> {
        self.await_timeout_ms.map(Duration::from_millis)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_shutdown_timeout_ms() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT_MS
}
fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}
fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}
fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

impl KairosConfig {
    /// Load config from a TOML file with KAIROS_* env var overrides.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `KAIROS_SCHEDULER__HISTORY_LIMIT=32`. A missing file is not an error;
    /// every field has a default.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: KairosConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("KAIROS_").split("__"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.kairos/kairos.toml", home)
}
