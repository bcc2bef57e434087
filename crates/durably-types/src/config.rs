//! Global configuration types for durably.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls
//! storage location, workflow timeouts, polling cadence, and the outbound
//! endpoints used by the approval workflow.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::idempotency::DEFAULT_IDEMPOTENCY_TTL_SECS;

/// Top-level configuration.
///
/// Loaded from `~/.durably/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Explicit database URL (defaults to `{data_dir}/durably.db`).
    #[serde(default)]
    pub database_url: Option<String>,

    /// How long a connection waits on a locked database before failing.
    #[serde(default = "default_database_busy_timeout_ms")]
    pub database_busy_timeout_ms: u64,

    /// Size of the read-only connection pool.
    #[serde(default = "default_database_max_readers")]
    pub database_max_readers: u32,

    /// Lifetime of idempotency markers.
    #[serde(default = "default_idempotency_ttl_secs")]
    pub idempotency_ttl_secs: u64,

    /// How long the approval callback may stay unanswered.
    #[serde(default = "default_callback_timeout_secs")]
    pub approval_timeout_secs: u64,

    /// How long each command callback may stay unanswered.
    #[serde(default = "default_callback_timeout_secs")]
    pub command_timeout_secs: u64,

    /// Delay between condition poller evaluations.
    #[serde(default = "default_condition_poll_interval_secs")]
    pub condition_poll_interval_secs: u64,

    /// Evaluations allowed before the condition poller gives up.
    #[serde(default = "default_condition_max_attempts")]
    pub condition_max_attempts: u32,

    /// Interval of the wake-up worker's sweep for due waits.
    #[serde(default = "default_wake_poll_interval_secs")]
    pub wake_poll_interval_secs: u64,

    /// Maximum lifetime of an execution before it is failed.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,

    /// Outbound endpoints. Unset endpoints fall back to log-only adapters.
    #[serde(default)]
    pub endpoints: EndpointConfig,
}

fn default_database_busy_timeout_ms() -> u64 {
    5_000
}

fn default_database_max_readers() -> u32 {
    8
}

fn default_idempotency_ttl_secs() -> u64 {
    DEFAULT_IDEMPOTENCY_TTL_SECS
}

fn default_callback_timeout_secs() -> u64 {
    60 * 60
}

fn default_condition_poll_interval_secs() -> u64 {
    10 * 60
}

fn default_condition_max_attempts() -> u32 {
    10
}

fn default_wake_poll_interval_secs() -> u64 {
    30
}

fn default_execution_timeout_secs() -> u64 {
    2 * 24 * 60 * 60
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            database_busy_timeout_ms: default_database_busy_timeout_ms(),
            database_max_readers: default_database_max_readers(),
            idempotency_ttl_secs: default_idempotency_ttl_secs(),
            approval_timeout_secs: default_callback_timeout_secs(),
            command_timeout_secs: default_callback_timeout_secs(),
            condition_poll_interval_secs: default_condition_poll_interval_secs(),
            condition_max_attempts: default_condition_max_attempts(),
            wake_poll_interval_secs: default_wake_poll_interval_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            endpoints: EndpointConfig::default(),
        }
    }
}

impl GlobalConfig {
    pub fn database_busy_timeout(&self) -> Duration {
        Duration::from_millis(self.database_busy_timeout_ms)
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn approval_timeout(&self) -> Duration {
        Duration::from_secs(self.approval_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn condition_poll_interval(&self) -> Duration {
        Duration::from_secs(self.condition_poll_interval_secs)
    }

    pub fn wake_poll_interval(&self) -> Duration {
        Duration::from_secs(self.wake_poll_interval_secs)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }
}

/// Outbound endpoints for notifications and commands.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Where approval notifications are published.
    #[serde(default)]
    pub approval_topic_url: Option<String>,
    /// Public callback API URL embedded in approval messages.
    #[serde(default)]
    pub approval_api_url: Option<String>,
    /// Queue endpoint for command one.
    #[serde(default)]
    pub command_queue_url: Option<String>,
    /// HTTP endpoint for command two.
    #[serde(default)]
    pub command_url: Option<String>,
}
