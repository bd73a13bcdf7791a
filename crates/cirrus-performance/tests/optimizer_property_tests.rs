//! Property tests for strategy derivation

use std::sync::Arc;

use cirrus_common::OptimizationStrategy;
use cirrus_performance::{
    FixedMemory, MonitorConfig, OptimizerConfig, PerformanceMonitor, ResourceOptimizer,
    TelemetrySnapshot, UserActivity,
};
use proptest::prelude::*;

const MB: u64 = 1024 * 1024;

fn optimizer() -> ResourceOptimizer {
    let monitor = Arc::new(PerformanceMonitor::with_memory_source(
        MonitorConfig::default(),
        Arc::new(FixedMemory::default()),
    ));
    ResourceOptimizer::new(OptimizerConfig::default(), OptimizationStrategy::default(), monitor)
}

fn activity() -> impl Strategy<Value = UserActivity> {
    prop_oneof![
        Just(UserActivity::Low),
        Just(UserActivity::Normal),
        Just(UserActivity::High),
    ]
}

fn telemetry() -> impl Strategy<Value = TelemetrySnapshot> {
    (0u64..1_000, 0.0f64..10_000.0, 0.0f64..=1.0, activity()).prop_map(
        |(memory_mb, mean_latency_ms, error_rate, user_activity)| TelemetrySnapshot {
            memory_bytes: memory_mb * MB,
            mean_latency_ms,
            p95_latency_ms: mean_latency_ms,
            error_rate,
            user_activity,
            ..Default::default()
        },
    )
}

proptest! {
    #[test]
    fn prop_floors_always_hold(telemetry in telemetry()) {
        let (strategy, _) = optimizer().optimize_for(&telemetry);

        prop_assert!(strategy.cache_capacity >= 10);
        prop_assert!(strategy.max_concurrent >= 1);
        prop_assert!(strategy.batch_size >= 3);
        prop_assert!(strategy.request_timeout_ms >= 1_000);
        prop_assert!(strategy.retry_count >= 1);
        prop_assert!(strategy.chunk_size >= 1);
    }

    #[test]
    fn prop_derivation_is_deterministic(telemetry in telemetry()) {
        let optimizer = optimizer();
        let (first, _) = optimizer.optimize_for(&telemetry);
        let (second, _) = optimizer.optimize_for(&telemetry);
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_critical_memory_shrinks_cache_and_concurrency(
        memory_mb in 401u64..4_096,
        mean_latency_ms in 0.0f64..10_000.0,
        error_rate in 0.0f64..=1.0,
        user_activity in activity(),
    ) {
        let optimizer = optimizer();
        let telemetry = TelemetrySnapshot {
            memory_bytes: memory_mb * MB,
            mean_latency_ms,
            error_rate,
            user_activity,
            ..Default::default()
        };

        let (strategy, _) = optimizer.optimize_for(&telemetry);
        prop_assert!(strategy.cache_capacity < optimizer.baseline().cache_capacity);
        prop_assert!(strategy.max_concurrent < optimizer.baseline().max_concurrent);
    }
}
