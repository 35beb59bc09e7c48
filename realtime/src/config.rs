//! Realtime service configuration.
//!
//! Provides configuration options for the server, batcher, compressor,
//! rate limiter and publishers.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compression::CompressionAlgorithm;

/// Default payload size below which messages are never compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 1024;

/// Default latency ring buffer capacity.
pub const DEFAULT_LATENCY_CAPACITY: usize = 1000;

/// Configuration for the realtime service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Bind host.
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Outbound queue depth per client.
    pub client_buffer_size: usize,

    /// Control messages allowed per connection per window.
    pub rate_limit_max_requests: u32,

    /// Rate limit window in milliseconds.
    pub rate_limit_window_ms: u64,

    /// Interval between expired-window sweeps in milliseconds.
    pub rate_limit_cleanup_ms: u64,

    /// Batch flush interval in milliseconds.
    pub batch_interval_ms: u64,

    /// Batch size that triggers an immediate flush.
    pub max_batch_size: usize,

    /// Compression algorithm for batched payloads.
    pub compression: CompressionAlgorithm,

    /// Minimum serialized size in bytes before compressing.
    pub compression_threshold: usize,

    /// Compression level.
    pub compression_level: u32,

    /// Latency samples retained by the metrics collector.
    pub latency_capacity: usize,

    /// Periodic publisher interval in milliseconds.
    pub publish_interval_ms: u64,

    /// Postgres connection string. `None` selects the in-memory store.
    pub database_url: Option<String>,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            client_buffer_size: 100,
            rate_limit_max_requests: 100,
            rate_limit_window_ms: 60_000,
            rate_limit_cleanup_ms: 60_000,
            batch_interval_ms: 100,
            max_batch_size: 50,
            compression: CompressionAlgorithm::None,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            compression_level: 6,
            latency_capacity: DEFAULT_LATENCY_CAPACITY,
            publish_interval_ms: 1000,
            database_url: None,
        }
    }
}

impl FeedConfig {
    /// Loads configuration from `MARKETWIRE_*` environment variables,
    /// falling back to defaults for unset values.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            host: env::var("MARKETWIRE_HOST").unwrap_or(defaults.host),
            port: env_or("MARKETWIRE_PORT", defaults.port)?,
            client_buffer_size: env_or("MARKETWIRE_CLIENT_BUFFER", defaults.client_buffer_size)?,
            rate_limit_max_requests: env_or(
                "MARKETWIRE_RATE_LIMIT_MAX",
                defaults.rate_limit_max_requests,
            )?,
            rate_limit_window_ms: env_or(
                "MARKETWIRE_RATE_LIMIT_WINDOW_MS",
                defaults.rate_limit_window_ms,
            )?,
            rate_limit_cleanup_ms: env_or(
                "MARKETWIRE_RATE_LIMIT_CLEANUP_MS",
                defaults.rate_limit_cleanup_ms,
            )?,
            batch_interval_ms: env_or("MARKETWIRE_BATCH_INTERVAL_MS", defaults.batch_interval_ms)?,
            max_batch_size: env_or("MARKETWIRE_MAX_BATCH_SIZE", defaults.max_batch_size)?,
            compression: env_or("MARKETWIRE_COMPRESSION", defaults.compression)?,
            compression_threshold: env_or(
                "MARKETWIRE_COMPRESSION_THRESHOLD",
                defaults.compression_threshold,
            )?,
            compression_level: env_or(
                "MARKETWIRE_COMPRESSION_LEVEL",
                defaults.compression_level,
            )?,
            latency_capacity: env_or("MARKETWIRE_LATENCY_CAPACITY", defaults.latency_capacity)?,
            publish_interval_ms: env_or(
                "MARKETWIRE_PUBLISH_INTERVAL_MS",
                defaults.publish_interval_ms,
            )?,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    /// Sets the bind address.
    #[must_use]
    pub fn with_address(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Sets the rate limit.
    #[must_use]
    pub fn with_rate_limit(mut self, max_requests: u32, window_ms: u64) -> Self {
        self.rate_limit_max_requests = max_requests;
        self.rate_limit_window_ms = window_ms;
        self
    }

    /// Sets the batching parameters.
    #[must_use]
    pub fn with_batching(mut self, interval_ms: u64, max_batch_size: usize) -> Self {
        self.batch_interval_ms = interval_ms;
        self.max_batch_size = max_batch_size;
        self
    }

    /// Sets the compression parameters.
    #[must_use]
    pub fn with_compression(
        mut self,
        algorithm: CompressionAlgorithm,
        threshold: usize,
        level: u32,
    ) -> Self {
        self.compression = algorithm;
        self.compression_threshold = threshold;
        self.compression_level = level;
        self
    }

    /// Sets the periodic publish interval.
    #[must_use]
    pub fn with_publish_interval(mut self, ms: u64) -> Self {
        self.publish_interval_ms = ms;
        self
    }

    /// Returns the socket address string to bind.
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Returns the rate limit window.
    #[must_use]
    pub const fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// Returns the batch flush interval.
    #[must_use]
    pub const fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }

    /// Returns the periodic publish interval.
    #[must_use]
    pub const fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_buffer_size == 0 {
            return Err(ConfigError::InvalidClientBuffer);
        }

        if self.rate_limit_max_requests == 0 {
            return Err(ConfigError::InvalidRateLimit);
        }

        if self.rate_limit_window_ms == 0
            || self.rate_limit_cleanup_ms == 0
            || self.batch_interval_ms == 0
            || self.publish_interval_ms == 0
        {
            return Err(ConfigError::InvalidInterval);
        }

        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        if self.latency_capacity == 0 {
            return Err(ConfigError::InvalidLatencyCapacity);
        }

        if self.compression_level > self.compression.max_level() {
            return Err(ConfigError::InvalidCompressionLevel {
                level: self.compression_level,
                max: self.compression.max_level(),
            });
        }

        Ok(())
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A variable could not be parsed.
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },

    /// Client buffer must hold at least one message.
    #[error("client_buffer_size must be > 0")]
    InvalidClientBuffer,

    /// Rate limit must allow at least one request.
    #[error("rate_limit_max_requests must be > 0")]
    InvalidRateLimit,

    /// Intervals must be non-zero.
    #[error("intervals must be > 0")]
    InvalidInterval,

    /// Batch size must be non-zero.
    #[error("max_batch_size must be > 0")]
    InvalidBatchSize,

    /// Latency buffer must hold at least one sample.
    #[error("latency_capacity must be > 0")]
    InvalidLatencyCapacity,

    /// Compression level out of range for the algorithm.
    #[error("compression_level {level} exceeds maximum {max}")]
    InvalidCompressionLevel {
        /// Configured level.
        level: u32,
        /// Maximum for the algorithm.
        max: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = FeedConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.batch_interval_ms, 100);
        assert_eq!(config.max_batch_size, 50);
        assert_eq!(config.compression, CompressionAlgorithm::None);
        assert_eq!(config.compression_threshold, 1024);
        assert_eq!(config.latency_capacity, 1000);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = FeedConfig::default()
            .with_address("127.0.0.1", 9000)
            .with_rate_limit(10, 1000)
            .with_batching(50, 20)
            .with_compression(CompressionAlgorithm::Brotli, 512, 11)
            .with_publish_interval(250);

        assert_eq!(config.bind_address(), "127.0.0.1:9000");
        assert_eq!(config.rate_limit_max_requests, 10);
        assert_eq!(config.rate_limit_window(), Duration::from_millis(1000));
        assert_eq!(config.batch_interval(), Duration::from_millis(50));
        assert_eq!(config.max_batch_size, 20);
        assert_eq!(config.compression_threshold, 512);
        assert_eq!(config.publish_interval(), Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_valid() {
        assert!(FeedConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_validate_zero_batch_size() {
        let config = FeedConfig::default().with_batching(100, 0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBatchSize)
        ));
    }

    #[test]
    fn test_config_validate_zero_interval() {
        let config = FeedConfig::default().with_publish_interval(0);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidInterval)));
    }

    #[test]
    fn test_config_validate_zero_rate_limit() {
        let config = FeedConfig::default().with_rate_limit(0, 1000);
        assert!(matches!(config.validate(), Err(ConfigError::InvalidRateLimit)));
    }

    #[test]
    fn test_config_validate_compression_level() {
        let config = FeedConfig::default().with_compression(CompressionAlgorithm::Gzip, 1024, 10);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidCompressionLevel { level: 10, max: 9 })
        ));

        let config = FeedConfig::default().with_compression(CompressionAlgorithm::Brotli, 1024, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serde() {
        let config = FeedConfig::default().with_compression(CompressionAlgorithm::Deflate, 256, 3);
        let json = serde_json::to_string(&config).expect("serialize");
        assert!(json.contains("\"compression\":\"deflate\""));

        let parsed: FeedConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.compression, CompressionAlgorithm::Deflate);
        assert_eq!(parsed.compression_level, 3);
    }
}
