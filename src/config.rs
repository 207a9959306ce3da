//! Relay configuration parsing and validation.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Flush cadence, backoff, and finalization settings for a stream session.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct StreamConfig {
    /// Delay before the first flush after an idle period.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Delay between flushes while the queue stays non-empty.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Base unit multiplied by `failures + 1` to compute a retry delay.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
    /// Amount added to the failure counter on each failed send.
    #[serde(default = "default_failure_penalty")]
    pub failure_penalty: u32,
    /// A flush drains `queue_len / batch_divisor` fragments (rounded, at least one).
    #[serde(default = "default_batch_divisor")]
    pub batch_divisor: u32,
    /// Upper bound on how long `close()` waits for the stream to settle.
    #[serde(default = "default_finalize_timeout_seconds")]
    pub finalize_timeout_seconds: u64,
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_interval_ms() -> u64 {
    500
}

fn default_backoff_unit_ms() -> u64 {
    500
}

fn default_failure_penalty() -> u32 {
    2
}

fn default_batch_divisor() -> u32 {
    10
}

fn default_finalize_timeout_seconds() -> u64 {
    30
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            interval_ms: default_interval_ms(),
            backoff_unit_ms: default_backoff_unit_ms(),
            failure_penalty: default_failure_penalty(),
            batch_divisor: default_batch_divisor(),
            finalize_timeout_seconds: default_finalize_timeout_seconds(),
        }
    }
}

impl StreamConfig {
    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Normal flush interval as a [`Duration`].
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Backoff unit as a [`Duration`].
    #[must_use]
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }

    /// Finalization timeout as a [`Duration`].
    #[must_use]
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_secs(self.finalize_timeout_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.debounce_ms == 0 || self.interval_ms == 0 || self.backoff_unit_ms == 0 {
            return Err(AppError::Config(
                "stream intervals must be greater than zero".into(),
            ));
        }
        if self.failure_penalty == 0 {
            return Err(AppError::Config(
                "failure_penalty must be greater than zero".into(),
            ));
        }
        if self.batch_divisor == 0 {
            return Err(AppError::Config(
                "batch_divisor must be greater than zero".into(),
            ));
        }
        if self.finalize_timeout_seconds == 0 {
            return Err(AppError::Config(
                "finalize_timeout_seconds must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// SSE transport settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TransportConfig {
    /// Frames buffered between the session and the HTTP response body.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// How long a single frame write may wait for buffer space.
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

fn default_channel_capacity() -> usize {
    64
}

fn default_write_timeout_ms() -> u64 {
    5000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl TransportConfig {
    /// Write timeout as a [`Duration`].
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

fn default_http_port() -> u16 {
    3000
}

/// Global configuration parsed from `relay.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// HTTP port for the SSE endpoint.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Per-session flush and finalization behavior.
    #[serde(default)]
    pub stream: StreamConfig,
    /// Outbound SSE buffering.
    #[serde(default)]
    pub transport: TransportConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            stream: StreamConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.stream.validate()?;
        if self.transport.channel_capacity == 0 {
            return Err(AppError::Config(
                "transport.channel_capacity must be greater than zero".into(),
            ));
        }
        if self.transport.write_timeout_ms == 0 {
            return Err(AppError::Config(
                "transport.write_timeout_ms must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
