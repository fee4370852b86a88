//! Application configuration.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::AppResult;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Queue identity and worker pool configuration.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Admission control configuration.
    #[serde(default)]
    pub flow: FlowConfig,
    /// Operator daemon configuration.
    #[serde(default)]
    pub server: ServerConfig,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
}

/// What the worker does with an envelope whose handler failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Push the envelope back onto the pending list (no backoff).
    #[default]
    Requeue,
    /// Move the envelope onto the error list.
    DeadLetter,
}

/// Queue identity and worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Include a queue name segment in every list key.
    #[serde(default)]
    pub use_queue_name: bool,
    /// Fixed queue name. A random one is generated when unset.
    #[serde(default)]
    pub name: Option<String>,
    /// Server identity. Defaults to the host name.
    #[serde(default)]
    pub server_name: Option<String>,
    /// Port appended to the server identity as `:port`.
    #[serde(default)]
    pub port: Option<u16>,
    /// Number of workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Bounded wait of a single consume call, in seconds.
    #[serde(default = "default_consume_timeout_secs")]
    pub consume_timeout_secs: u64,
    /// Maximum time `stop` waits for workers, in seconds.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    /// Handling of envelopes whose handler failed.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

/// Admission control configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FlowConfig {
    /// Gate publishes.
    #[serde(default)]
    pub inbound_enabled: bool,
    /// Gate processing.
    #[serde(default)]
    pub outbound_enabled: bool,
    /// Key flows per server instead of per queue.
    #[serde(default)]
    pub group_by_server: bool,
    /// Use a Redis counter shared by every process instead of a local one.
    #[serde(default)]
    pub distributed: bool,
    /// Maximum operations per window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Window length in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Cooldown after the limit is hit, in seconds.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Operator daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interval between backlog reports, in seconds.
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    /// Run the recovery sweep for this host's identity on startup.
    #[serde(default)]
    pub recover_on_start: bool,
}

const fn default_workers() -> usize {
    8
}

const fn default_consume_timeout_secs() -> u64 {
    5
}

const fn default_shutdown_timeout_secs() -> u64 {
    30
}

const fn default_max_requests() -> u32 {
    1000
}

const fn default_window_secs() -> u64 {
    1
}

const fn default_cooldown_secs() -> u64 {
    0
}

const fn default_status_interval_secs() -> u64 {
    30
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            use_queue_name: false,
            name: None,
            server_name: None,
            port: None,
            workers: default_workers(),
            consume_timeout_secs: default_consume_timeout_secs(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl QueueConfig {
    /// Bounded wait of a single consume call.
    ///
    /// Never shorter than one second; a zero timeout would block forever on
    /// a blocking pop.
    #[must_use]
    pub const fn consume_timeout(&self) -> Duration {
        let secs = if self.consume_timeout_secs == 0 {
            1
        } else {
            self.consume_timeout_secs
        };
        Duration::from_secs(secs)
    }

    /// Maximum time `stop` waits for workers.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            inbound_enabled: false,
            outbound_enabled: false,
            group_by_server: false,
            distributed: false,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            status_interval_secs: default_status_interval_secs(),
            recover_on_start: false,
        }
    }
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `.env` (if present)
    /// 2. `config/default.toml`
    /// 3. `config/{environment}.toml` (based on `TASKLINE_ENV`)
    /// 4. Environment variables with `TASKLINE__` prefix
    pub fn load() -> AppResult<Self> {
        dotenvy::dotenv().ok();
        let env = std::env::var("TASKLINE_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("TASKLINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("TASKLINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
