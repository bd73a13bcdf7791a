//! Retry configuration and backoff

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry (milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the exponential part of the delay (milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Upper bound of the random delay added to every wait (milliseconds)
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl RetryConfig {
    /// Backoff before retry `attempt` (1-based), jitter excluded
    ///
    /// `min(base * multiplier^(attempt-1), max)`
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_ms = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let capped = if delay_ms.is_finite() {
            delay_ms.min(self.max_delay_ms as f64)
        } else {
            self.max_delay_ms as f64
        };
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// `calculate_delay` plus a uniform jitter in `[0, jitter_ms)`
    pub fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..self.jitter_ms)
        } else {
            0
        };
        self.calculate_delay(attempt) + Duration::from_millis(jitter)
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter_ms = jitter.as_millis() as u64;
        self
    }

    /// Same configuration without jitter
    pub fn without_jitter(self) -> Self {
        self.with_jitter(Duration::ZERO)
    }
}

// Default value functions for serde
fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter_ms() -> u64 {
    1_000
}
