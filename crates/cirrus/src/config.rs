//! Configuration loading and validation

use std::path::{Path, PathBuf};

use cirrus_cache::CacheConfig;
use cirrus_common::OptimizationStrategy;
use cirrus_dispatch::{BatchConfig, QueueConfig, ThrottleConfig};
use cirrus_performance::{MonitorConfig, OptimizerConfig};
use cirrus_prefetch::PrefetchConfig;
use cirrus_recovery::{BulkConfig, RetryConfig};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Configuration result type
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Complete configuration of a resource session
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CirrusConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub throttle: ThrottleConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub prefetch: PrefetchConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

impl CirrusConfig {
    /// Strategy matching the configured component settings
    ///
    /// The optimizer derives every later strategy from this one.
    pub fn baseline_strategy(&self) -> OptimizationStrategy {
        let defaults = OptimizationStrategy::default();
        OptimizationStrategy {
            cache_capacity: self.cache.max_entries,
            max_concurrent: self.queue.max_concurrent,
            batch_size: self.batch.max_batch_size,
            inter_request_delay_ms: u64::try_from(self.throttle.min_interval().as_millis())
                .unwrap_or(u64::MAX),
            request_timeout_ms: self.batch.request_timeout_ms,
            retry_count: self.retry.max_retries,
            chunk_size: self.bulk.batch_size,
            chunk_pause_ms: self.bulk.batch_pause_ms,
            ..defaults
        }
    }

    /// Reject settings no component can run with
    pub fn validate(&self) -> Result<()> {
        let rate = self.throttle.max_requests_per_second;
        if !rate.is_finite() || rate <= 0.0 {
            return invalid("throttle.max_requests_per_second must be a positive number");
        }
        if self.queue.max_concurrent == 0 {
            return invalid("queue.max_concurrent must be greater than 0");
        }
        if self.cache.max_entries == 0 {
            return invalid("cache.max_entries must be greater than 0");
        }
        if self.batch.max_batch_size == 0 {
            return invalid("batch.max_batch_size must be greater than 0");
        }
        if self.batch.request_timeout_ms == 0 {
            return invalid("batch.request_timeout_ms must be greater than 0");
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if !(self.retry.multiplier >= 1.0) {
            return invalid("retry.multiplier must be at least 1");
        }
        if self.bulk.batch_size == 0 {
            return invalid("bulk.batch_size must be greater than 0");
        }
        if self.prefetch.max_concurrent == 0 {
            return invalid("prefetch.max_concurrent must be greater than 0");
        }
        if self.monitor.window_size == 0 {
            return invalid("monitor.window_size must be greater than 0");
        }
        if self.monitor.low_activity_threshold > self.monitor.high_activity_threshold {
            return invalid("monitor.low_activity_threshold must not exceed high_activity_threshold");
        }

        let optimizer = &self.optimizer;
        if !(optimizer.low_water_mb < optimizer.high_water_mb
            && optimizer.high_water_mb <= optimizer.critical_mb)
        {
            return invalid("optimizer memory thresholds must satisfy low_water < high_water <= critical");
        }
        if optimizer.fast_latency_ms >= optimizer.slow_latency_ms {
            return invalid("optimizer.fast_latency_ms must be below slow_latency_ms");
        }
        if !(0.0..=1.0).contains(&optimizer.error_rate_threshold) {
            return invalid("optimizer.error_rate_threshold must be between 0 and 1");
        }
        if optimizer.interval_ms == 0 {
            return invalid("optimizer.interval_ms must be greater than 0");
        }
        if self.logging.level.trim().is_empty() {
            return invalid("logging.level must not be empty");
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(ConfigError::Validation(message.to_string()))
}

/// Loads `CirrusConfig` from an optional TOML file and the environment
///
/// Environment variables override the file: `CIRRUS__THROTTLE__MAX_REQUESTS_PER_SECOND=5`.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: Option<PathBuf>,
    env_prefix: String,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            path: None,
            env_prefix: "CIRRUS".to_string(),
        }
    }

    /// Read this TOML file first; a missing file is not an error
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn load(&self) -> Result<CirrusConfig> {
        let mut builder = Config::builder();
        if let Some(path) = &self.path {
            debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(File::from(path.clone()).required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .separator("__")
                .try_parsing(true),
        );

        let config: CirrusConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write `config` as TOML, creating parent directories
    pub fn save(&self, config: &CirrusConfig, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let toml = config.to_toml()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml)?;
        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
