//! Strategy adjustment rules
//!
//! Each rule inspects one telemetry dimension and nudges the strategy. Rules
//! are independent and run in sequence on the same strategy; floors are
//! applied once after all of them.

use cirrus_common::OptimizationStrategy;

use crate::monitor::{TelemetrySnapshot, UserActivity};

/// One composable adjustment
pub trait AdjustmentRule: Send + Sync {
    fn name(&self) -> &'static str;

    /// Adjust `strategy` for `telemetry`; true if anything changed
    fn adjust(&self, telemetry: &TelemetrySnapshot, strategy: &mut OptimizationStrategy) -> bool;
}

pub const MIN_CACHE_CAPACITY: usize = 10;
pub const MIN_CONCURRENCY: usize = 1;
pub const MIN_BATCH_SIZE: usize = 3;
pub const MIN_REQUEST_TIMEOUT_MS: u64 = 1_000;
pub const MIN_RETRY_COUNT: u32 = 1;
pub const MIN_CHUNK_SIZE: usize = 1;

/// Clamp every parameter to its floor
pub fn apply_floors(strategy: &mut OptimizationStrategy) {
    strategy.cache_capacity = strategy.cache_capacity.max(MIN_CACHE_CAPACITY);
    strategy.max_concurrent = strategy.max_concurrent.max(MIN_CONCURRENCY);
    strategy.batch_size = strategy.batch_size.max(MIN_BATCH_SIZE);
    strategy.request_timeout_ms = strategy.request_timeout_ms.max(MIN_REQUEST_TIMEOUT_MS);
    strategy.retry_count = strategy.retry_count.max(MIN_RETRY_COUNT);
    strategy.chunk_size = strategy.chunk_size.max(MIN_CHUNK_SIZE);
}

fn scale(value: usize, factor: f64) -> usize {
    (value as f64 * factor).floor() as usize
}

fn scale_ms(value: u64, factor: f64) -> u64 {
    (value as f64 * factor).round() as u64
}

/// Shrinks resource usage under memory pressure, grows it when memory is plentiful
#[derive(Debug, Clone)]
pub struct MemoryPressureRule {
    pub low_water_bytes: u64,
    pub high_water_bytes: u64,
    pub critical_bytes: u64,
}

impl AdjustmentRule for MemoryPressureRule {
    fn name(&self) -> &'static str {
        "memory_pressure"
    }

    fn adjust(&self, telemetry: &TelemetrySnapshot, strategy: &mut OptimizationStrategy) -> bool {
        let memory = telemetry.memory_bytes;
        if memory > self.critical_bytes {
            strategy.cache_capacity = scale(strategy.cache_capacity, 0.25);
            strategy.max_concurrent = scale(strategy.max_concurrent, 0.5);
            strategy.batch_size = scale(strategy.batch_size, 0.5);
            strategy.chunk_size = scale(strategy.chunk_size, 0.5);
            true
        } else if memory > self.high_water_bytes {
            strategy.cache_capacity = scale(strategy.cache_capacity, 0.5);
            strategy.max_concurrent = scale(strategy.max_concurrent, 0.75);
            strategy.batch_size = scale(strategy.batch_size, 0.75);
            strategy.chunk_size = scale(strategy.chunk_size, 0.75);
            true
        } else if memory < self.low_water_bytes {
            strategy.cache_capacity = scale(strategy.cache_capacity, 1.5);
            strategy.max_concurrent = strategy.max_concurrent.saturating_add(2);
            strategy.batch_size = scale(strategy.batch_size, 1.25);
            strategy.chunk_size = scale(strategy.chunk_size, 1.5);
            true
        } else {
            false
        }
    }
}

/// Backs off when calls are slow, speeds up when they are fast
#[derive(Debug, Clone)]
pub struct LatencyRule {
    pub slow_ms: f64,
    pub fast_ms: f64,
}

impl AdjustmentRule for LatencyRule {
    fn name(&self) -> &'static str {
        "latency"
    }

    fn adjust(&self, telemetry: &TelemetrySnapshot, strategy: &mut OptimizationStrategy) -> bool {
        // No samples, no signal
        if telemetry.mean_latency_ms <= 0.0 {
            return false;
        }

        if telemetry.mean_latency_ms > self.slow_ms {
            strategy.inter_request_delay_ms = strategy.inter_request_delay_ms.saturating_mul(2).max(100);
            strategy.request_timeout_ms = scale_ms(strategy.request_timeout_ms, 1.5);
            strategy.batch_size = scale(strategy.batch_size, 0.75);
            true
        } else if telemetry.mean_latency_ms < self.fast_ms {
            strategy.inter_request_delay_ms /= 2;
            strategy.batch_size = scale(strategy.batch_size, 1.25);
            true
        } else {
            false
        }
    }
}

/// Retries harder and calls less eagerly when errors climb
#[derive(Debug, Clone)]
pub struct ErrorRateRule {
    pub threshold: f64,
}

impl AdjustmentRule for ErrorRateRule {
    fn name(&self) -> &'static str {
        "error_rate"
    }

    fn adjust(&self, telemetry: &TelemetrySnapshot, strategy: &mut OptimizationStrategy) -> bool {
        if telemetry.error_rate <= self.threshold {
            return false;
        }
        strategy.retry_count = strategy.retry_count.saturating_add(2);
        strategy.inter_request_delay_ms = scale_ms(strategy.inter_request_delay_ms, 1.5).max(100);
        strategy.max_concurrent = scale(strategy.max_concurrent, 0.5);
        true
    }
}

/// Uses idle time for background work and yields to an active user
#[derive(Debug, Clone, Default)]
pub struct UserActivityRule;

impl AdjustmentRule for UserActivityRule {
    fn name(&self) -> &'static str {
        "user_activity"
    }

    fn adjust(&self, telemetry: &TelemetrySnapshot, strategy: &mut OptimizationStrategy) -> bool {
        match telemetry.user_activity {
            UserActivity::Low => {
                strategy.background_processing = true;
                strategy.chunk_size = scale(strategy.chunk_size, 2.0);
                true
            }
            UserActivity::High => {
                strategy.background_processing = false;
                strategy.chunk_size = scale(strategy.chunk_size, 0.5);
                strategy.chunk_pause_ms = strategy.chunk_pause_ms.saturating_mul(2).max(50);
                true
            }
            UserActivity::Normal => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    fn memory_rule() -> MemoryPressureRule {
        MemoryPressureRule {
            low_water_bytes: 50 * MB,
            high_water_bytes: 200 * MB,
            critical_bytes: 400 * MB,
        }
    }

    fn telemetry() -> TelemetrySnapshot {
        TelemetrySnapshot {
            memory_bytes: 100 * MB,
            ..Default::default()
        }
    }

    #[test]
    fn test_memory_bands() {
        let baseline = OptimizationStrategy::default();
        let rule = memory_rule();

        let mut critical = baseline.clone();
        assert!(rule.adjust(&TelemetrySnapshot { memory_bytes: 450 * MB, ..telemetry() }, &mut critical));
        let mut high = baseline.clone();
        assert!(rule.adjust(&TelemetrySnapshot { memory_bytes: 250 * MB, ..telemetry() }, &mut high));
        let mut low = baseline.clone();
        assert!(rule.adjust(&TelemetrySnapshot { memory_bytes: 10 * MB, ..telemetry() }, &mut low));
        let mut normal = baseline.clone();
        assert!(!rule.adjust(&telemetry(), &mut normal));

        assert!(critical.cache_capacity < high.cache_capacity);
        assert!(high.cache_capacity < baseline.cache_capacity);
        assert!(low.cache_capacity > baseline.cache_capacity);
        assert!(critical.max_concurrent < baseline.max_concurrent);
        assert!(low.max_concurrent > baseline.max_concurrent);
        assert_eq!(normal, baseline);
    }

    #[test]
    fn test_latency_rule() {
        let rule = LatencyRule {
            slow_ms: 2000.0,
            fast_ms: 200.0,
        };
        let baseline = OptimizationStrategy::default();

        let mut slow = baseline.clone();
        rule.adjust(&TelemetrySnapshot { mean_latency_ms: 3000.0, ..telemetry() }, &mut slow);
        assert!(slow.inter_request_delay_ms > baseline.inter_request_delay_ms);
        assert!(slow.request_timeout_ms > baseline.request_timeout_ms);
        assert!(slow.batch_size < baseline.batch_size);

        let mut fast = baseline.clone();
        rule.adjust(&TelemetrySnapshot { mean_latency_ms: 50.0, ..telemetry() }, &mut fast);
        assert!(fast.inter_request_delay_ms < baseline.inter_request_delay_ms);
        assert!(fast.batch_size > baseline.batch_size);

        let mut idle = baseline.clone();
        assert!(!rule.adjust(&telemetry(), &mut idle));
    }

    #[test]
    fn test_error_rate_rule() {
        let rule = ErrorRateRule { threshold: 0.1 };
        let baseline = OptimizationStrategy::default();

        let mut failing = baseline.clone();
        assert!(rule.adjust(&TelemetrySnapshot { error_rate: 0.4, ..telemetry() }, &mut failing));
        assert!(failing.retry_count > baseline.retry_count);
        assert!(failing.inter_request_delay_ms > baseline.inter_request_delay_ms);
        assert!(failing.max_concurrent < baseline.max_concurrent);

        let mut healthy = baseline.clone();
        assert!(!rule.adjust(&TelemetrySnapshot { error_rate: 0.05, ..telemetry() }, &mut healthy));
    }

    #[test]
    fn test_user_activity_rule() {
        let baseline = OptimizationStrategy::default();

        let mut idle = baseline.clone();
        UserActivityRule.adjust(&TelemetrySnapshot { user_activity: UserActivity::Low, ..telemetry() }, &mut idle);
        assert!(idle.background_processing);
        assert!(idle.chunk_size > baseline.chunk_size);

        let mut busy = baseline.clone();
        UserActivityRule.adjust(&TelemetrySnapshot { user_activity: UserActivity::High, ..telemetry() }, &mut busy);
        assert!(!busy.background_processing);
        assert!(busy.chunk_size < baseline.chunk_size);
        assert!(busy.chunk_pause_ms > baseline.chunk_pause_ms);
    }

    #[test]
    fn test_extreme_strategy_saturates() {
        let mut strategy = OptimizationStrategy {
            inter_request_delay_ms: u64::MAX,
            chunk_pause_ms: u64::MAX,
            retry_count: u32::MAX,
            max_concurrent: usize::MAX,
            ..Default::default()
        };
        let stressed = TelemetrySnapshot {
            memory_bytes: 10 * MB,
            mean_latency_ms: 5_000.0,
            error_rate: 0.9,
            user_activity: UserActivity::High,
            ..telemetry()
        };

        memory_rule().adjust(&stressed, &mut strategy);
        LatencyRule { slow_ms: 2000.0, fast_ms: 200.0 }.adjust(&stressed, &mut strategy);
        ErrorRateRule { threshold: 0.1 }.adjust(&stressed, &mut strategy);
        UserActivityRule.adjust(&stressed, &mut strategy);

        assert_eq!(strategy.inter_request_delay_ms, u64::MAX);
        assert_eq!(strategy.chunk_pause_ms, u64::MAX);
        assert_eq!(strategy.retry_count, u32::MAX);
    }

    #[test]
    fn test_floors() {
        let mut strategy = OptimizationStrategy {
            cache_capacity: 0,
            max_concurrent: 0,
            batch_size: 1,
            request_timeout_ms: 10,
            retry_count: 0,
            chunk_size: 0,
            ..Default::default()
        };
        apply_floors(&mut strategy);

        assert_eq!(strategy.cache_capacity, MIN_CACHE_CAPACITY);
        assert_eq!(strategy.max_concurrent, 1);
        assert_eq!(strategy.batch_size, 3);
        assert_eq!(strategy.request_timeout_ms, 1_000);
        assert_eq!(strategy.retry_count, 1);
        assert_eq!(strategy.chunk_size, 1);
    }
}
