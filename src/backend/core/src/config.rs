//! Configuration management.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{KernelError, Result};
use crate::telemetry::TelemetryConfig;

/// Environment variable prefix, e.g. `BLUEPRINT__EVENT_STORE__RETRY__MAX_ATTEMPTS`.
const ENV_PREFIX: &str = "BLUEPRINT";

/// Main kernel configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Event store configuration
    #[serde(default)]
    pub event_store: EventStoreConfig,

    /// Projection configuration
    #[serde(default)]
    pub projections: ProjectionConfig,

    /// Logging and metrics configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventStoreConfig {
    /// Retry policy for conflicting or transiently failing commands
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Bounded exponential backoff, used by `Repository::execute` and by the
/// projection dispatcher.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_initial_backoff", with = "humantime_serde")]
    pub initial_backoff: Duration,

    /// Upper bound for any single delay
    #[serde(default = "default_max_backoff", with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_initial_backoff(),
            max_backoff: default_max_backoff(),
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    fn validate(&self, section: &str) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(KernelError::configuration(format!(
                "{section}.max_attempts must be at least 1"
            )));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(KernelError::configuration(format!(
                "{section}.initial_backoff must not exceed max_backoff"
            )));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectionConfig {
    /// Capacity of the dispatcher queue (batches)
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Collection holding the workspace read model
    #[serde(default = "default_workspace_collection")]
    pub workspace_collection: String,

    /// Retry policy for a builder that fails to handle an event
    #[serde(default)]
    pub delivery_retry: RetryConfig,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            workspace_collection: default_workspace_collection(),
            delivery_retry: RetryConfig::default(),
        }
    }
}

// Default value functions
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff() -> Duration { Duration::from_millis(10) }
fn default_max_backoff() -> Duration { Duration::from_millis(200) }
fn default_channel_capacity() -> usize { 1024 }
fn default_workspace_collection() -> String { "workspaces".to_string() }

impl Config {
    /// Load configuration from `.env` and `BLUEPRINT__*` environment variables.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load from a file, with environment variables taking precedence.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject settings the kernel cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.event_store.retry.validate("event_store.retry")?;
        self.projections.delivery_retry.validate("projections.delivery_retry")?;
        if self.projections.channel_capacity == 0 {
            return Err(KernelError::configuration(
                "projections.channel_capacity must be greater than 0",
            ));
        }
        if self.projections.workspace_collection.trim().is_empty() {
            return Err(KernelError::configuration(
                "projections.workspace_collection must not be empty",
            ));
        }
        Ok(())
    }
}
