//! Application configuration.
//!
//! Aggregates configuration for the channel pub/sub, retry policy, router,
//! and demo binary into a single Config struct that can be loaded from YAML
//! files or environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::middleware::RetryPolicy;
use crate::pubsub::ChannelPubSubConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "SWITCHYARD_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "SWITCHYARD";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "SWITCHYARD_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Channel pub/sub configuration.
    pub channel: ChannelPubSubConfig,
    /// Retry middleware configuration.
    pub retry: RetryConfig,
    /// Router configuration.
    pub router: RouterConfig,
    /// Demo binary configuration.
    pub demo: DemoConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        // Add config file from path argument if provided
        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        // Add config file from CONFIG_ENV_VAR env var if set
        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            // Environment variables with CONFIG_ENV_PREFIX prefix, e.g.
            // SWITCHYARD__ROUTER__CLOSE_TIMEOUT_MS=5000
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }
}

/// Retry middleware configuration.
///
/// Converted into a [`RetryPolicy`] via [`policy`](Self::policy); the policy
/// is validated when the middleware is constructed, not here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum retries after the initial attempt.
    pub max_retries: usize,
    /// Delay before the first retry, in milliseconds.
    pub initial_interval_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_interval_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Total retrying budget in milliseconds; `null` disables the cap.
    pub max_elapsed_time_ms: Option<u64>,
    /// Randomize delays to avoid thundering herds.
    pub jitter: bool,
}

impl RetryConfig {
    /// Build the runtime retry policy from this configuration.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_interval: Duration::from_millis(self.initial_interval_ms),
            max_interval: Duration::from_millis(self.max_interval_ms),
            multiplier: self.multiplier,
            max_elapsed_time: self.max_elapsed_time_ms.map(Duration::from_millis),
            jitter: self.jitter,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_retries: policy.max_retries,
            initial_interval_ms: policy.initial_interval.as_millis() as u64,
            max_interval_ms: policy.max_interval.as_millis() as u64,
            multiplier: policy.multiplier,
            max_elapsed_time_ms: policy.max_elapsed_time.map(|d| d.as_millis() as u64),
            jitter: policy.jitter,
        }
    }
}

/// Router configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Grace period for workers to drain on shutdown, in milliseconds.
    pub close_timeout_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let config = crate::router::RouterConfig::default();
        Self {
            close_timeout_ms: config.close_timeout.as_millis() as u64,
        }
    }
}

impl From<RouterConfig> for crate::router::RouterConfig {
    fn from(config: RouterConfig) -> Self {
        Self {
            close_timeout: Duration::from_millis(config.close_timeout_ms),
        }
    }
}

/// Demo binary configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Number of messages the generator publishes.
    pub message_count: usize,
    /// Pause between generated messages, in milliseconds.
    pub publish_interval_ms: u64,
    /// Simulated work inside the handler, in milliseconds.
    pub process_delay_ms: u64,
    /// Every n-th message fails terminally; 0 disables failures.
    pub fail_every: usize,
    /// Topic the generator publishes to.
    pub input_topic: String,
    /// Topic processed messages are published to.
    pub output_topic: String,
    /// Topic exhausted messages are dead-lettered to.
    pub dead_letter_topic: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            message_count: 10,
            publish_interval_ms: 250,
            process_delay_ms: 500,
            fail_every: 3,
            input_topic: "demo.incoming".to_string(),
            output_topic: "demo.processed".to_string(),
            dead_letter_topic: "demo.dead-letters".to_string(),
        }
    }
}
