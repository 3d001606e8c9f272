//! Sync engine configuration
//!
//! Provides the tunables for send spacing, reconnection backoff and
//! projector bookkeeping. Values come from [`Default`], the builder,
//! `FARMCHAT_*` environment variables, or a TOML document.

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_MIN_SEND_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SEND_STALE_AFTER_MS: u64 = 5_000;
const DEFAULT_DUPLICATE_WINDOW_MS: u64 = 5_000;
const DEFAULT_RETRY_BASE_MS: u64 = 200;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_LEDGER_CAPACITY: usize = 4_096;
const DEFAULT_PREVIEW_LEN: usize = 80;
const DEFAULT_FEED_BUFFER: usize = 256;

/// Send-side spacing and idempotency policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendPolicy {
    /// Minimum spacing between successful sends of one user
    pub min_interval: Duration,
    /// Age after which an in-flight send is considered lost
    pub stale_after: Duration,
    /// Window in which an identical submission is collapsed
    pub duplicate_window: Duration,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(DEFAULT_MIN_SEND_INTERVAL_MS),
            stale_after: Duration::from_millis(DEFAULT_SEND_STALE_AFTER_MS),
            duplicate_window: Duration::from_millis(DEFAULT_DUPLICATE_WINDOW_MS),
        }
    }
}

/// Exponential, capped backoff used for feed (re)connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Attempts before giving up
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_RETRY_MAX_DELAY_MS),
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
        }
    }
}

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub send: SendPolicy,
    pub retry: RetryPolicy,
    /// Message ids remembered per projector for deduplication
    pub ledger_capacity: usize,
    /// Characters kept in a conversation preview
    pub preview_len: usize,
    /// Per-feed buffer of the in-memory store
    pub feed_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            send: SendPolicy::default(),
            retry: RetryPolicy::default(),
            ledger_capacity: DEFAULT_LEDGER_CAPACITY,
            preview_len: DEFAULT_PREVIEW_LEN,
            feed_buffer: DEFAULT_FEED_BUFFER,
        }
    }
}

impl SyncConfig {
    /// Create a new SyncConfigBuilder
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Load from `FARMCHAT_*` environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut builder = Self::builder();
        if let Some(ms) = env_u64("FARMCHAT_MIN_SEND_INTERVAL_MS")? {
            builder = builder.min_send_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = env_u64("FARMCHAT_SEND_STALE_AFTER_MS")? {
            builder = builder.send_stale_after(Duration::from_millis(ms));
        }
        if let Some(ms) = env_u64("FARMCHAT_DUPLICATE_WINDOW_MS")? {
            builder = builder.duplicate_window(Duration::from_millis(ms));
        }
        if let Some(ms) = env_u64("FARMCHAT_RETRY_BASE_MS")? {
            builder = builder.retry_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = env_u64("FARMCHAT_RETRY_MAX_DELAY_MS")? {
            builder = builder.retry_max_delay(Duration::from_millis(ms));
        }
        if let Some(n) = env_u64("FARMCHAT_RETRY_MAX_ATTEMPTS")? {
            let n = u32::try_from(n)
                .map_err(|_| ConfigError::InvalidValue("FARMCHAT_RETRY_MAX_ATTEMPTS", n.to_string()))?;
            builder = builder.retry_max_attempts(n);
        }
        if let Some(n) = env_u64("FARMCHAT_LEDGER_CAPACITY")? {
            builder = builder.ledger_capacity(n as usize);
        }
        if let Some(n) = env_u64("FARMCHAT_PREVIEW_LEN")? {
            builder = builder.preview_len(n as usize);
        }
        builder.build()
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// ```rust
    /// use farmchat::shared::config::SyncConfig;
    ///
    /// let config = SyncConfig::from_toml_str(r#"
    ///     [send]
    ///     min_interval_ms = 1500
    /// "#).unwrap();
    /// assert_eq!(config.send.min_interval.as_millis(), 1500);
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        file.into_builder().build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.send.min_interval >= self.send.stale_after {
            return Err(ConfigError::Inconsistent(
                "send.min_interval must be shorter than send.stale_after",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Inconsistent("retry.max_attempts must be non-zero"));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::Inconsistent(
                "retry.base_delay must not exceed retry.max_delay",
            ));
        }
        if self.ledger_capacity == 0 {
            return Err(ConfigError::MissingValue("ledger_capacity"));
        }
        if self.feed_buffer == 0 {
            return Err(ConfigError::MissingValue("feed_buffer"));
        }
        Ok(())
    }
}

fn env_u64(name: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        Err(_) => Ok(None),
    }
}

/// Builder for SyncConfig
#[derive(Debug, Default)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn min_send_interval(mut self, interval: Duration) -> Self {
        self.config.send.min_interval = interval;
        self
    }

    pub fn send_stale_after(mut self, ceiling: Duration) -> Self {
        self.config.send.stale_after = ceiling;
        self
    }

    pub fn duplicate_window(mut self, window: Duration) -> Self {
        self.config.send.duplicate_window = window;
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    pub fn retry_max_delay(mut self, delay: Duration) -> Self {
        self.config.retry.max_delay = delay;
        self
    }

    pub fn retry_max_attempts(mut self, attempts: u32) -> Self {
        self.config.retry.max_attempts = attempts;
        self
    }

    pub fn ledger_capacity(mut self, capacity: usize) -> Self {
        self.config.ledger_capacity = capacity;
        self
    }

    pub fn preview_len(mut self, len: usize) -> Self {
        self.config.preview_len = len;
        self
    }

    pub fn feed_buffer(mut self, buffer: usize) -> Self {
        self.config.feed_buffer = buffer;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<SyncConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    send: SendSection,
    retry: RetrySection,
    ledger_capacity: Option<usize>,
    preview_len: Option<usize>,
    feed_buffer: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct SendSection {
    min_interval_ms: Option<u64>,
    stale_after_ms: Option<u64>,
    duplicate_window_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RetrySection {
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    max_attempts: Option<u32>,
}

impl ConfigFile {
    fn into_builder(self) -> SyncConfigBuilder {
        let mut builder = SyncConfig::builder();
        if let Some(ms) = self.send.min_interval_ms {
            builder = builder.min_send_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.send.stale_after_ms {
            builder = builder.send_stale_after(Duration::from_millis(ms));
        }
        if let Some(ms) = self.send.duplicate_window_ms {
            builder = builder.duplicate_window(Duration::from_millis(ms));
        }
        if let Some(ms) = self.retry.base_delay_ms {
            builder = builder.retry_base_delay(Duration::from_millis(ms));
        }
        if let Some(ms) = self.retry.max_delay_ms {
            builder = builder.retry_max_delay(Duration::from_millis(ms));
        }
        if let Some(n) = self.retry.max_attempts {
            builder = builder.retry_max_attempts(n);
        }
        if let Some(n) = self.ledger_capacity {
            builder = builder.ledger_capacity(n);
        }
        if let Some(n) = self.preview_len {
            builder = builder.preview_len(n);
        }
        if let Some(n) = self.feed_buffer {
            builder = builder.feed_buffer(n);
        }
        builder
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
    #[error("missing value: {0}")]
    MissingValue(&'static str),
    #[error("inconsistent configuration: {0}")]
    Inconsistent(&'static str),
    #[error("failed to parse configuration: {0}")]
    Parse(String),
}
