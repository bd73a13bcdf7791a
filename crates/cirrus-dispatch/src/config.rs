//! Dispatch configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Rate throttle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Dispatch starts allowed per second
    #[serde(default = "default_max_requests_per_second")]
    pub max_requests_per_second: f64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: default_max_requests_per_second(),
        }
    }
}

impl ThrottleConfig {
    pub fn new(max_requests_per_second: f64) -> Self {
        Self {
            max_requests_per_second,
        }
    }

    /// `1000 / max_requests_per_second` milliseconds
    pub fn min_interval(&self) -> Duration {
        interval_for_rate(self.max_requests_per_second)
    }
}

/// Rates too small to express as a `Duration` saturate to `Duration::MAX`
pub(crate) fn interval_for_rate(max_requests_per_second: f64) -> Duration {
    if max_requests_per_second.is_finite() && max_requests_per_second > 0.0 {
        Duration::try_from_secs_f64(1.0 / max_requests_per_second).unwrap_or(Duration::MAX)
    } else {
        Duration::ZERO
    }
}

/// Whole nanoseconds of `duration`, saturating at `u64::MAX`
pub(crate) fn saturating_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Priority request queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Operations allowed in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl QueueConfig {
    pub fn new(max_concurrent: usize) -> Self {
        Self { max_concurrent }
    }
}

/// Batch aggregator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Collection window before a flush (milliseconds)
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Hard per-flush ceiling; reaching it flushes immediately
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Deadline for one physical call (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_batch_size: default_max_batch_size(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl BatchConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_max_batch_size(mut self, size: usize) -> Self {
        self.max_batch_size = size;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }
}

// Default value functions for serde
fn default_max_requests_per_second() -> f64 {
    10.0
}

fn default_max_concurrent() -> usize {
    6
}

fn default_window_ms() -> u64 {
    50
}

fn default_max_batch_size() -> usize {
    10
}

fn default_request_timeout_ms() -> u64 {
    30_000
}
