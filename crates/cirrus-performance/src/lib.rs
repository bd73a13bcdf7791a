//! Telemetry and closed-loop tuning
//!
//! - `PerformanceMonitor` collects latency, outcome and user-activity samples
//!   and produces `TelemetrySnapshot`s
//! - `MemorySource` supplies the memory figure (`sysinfo` by default)
//! - `ResourceOptimizer` derives an `OptimizationStrategy` from the baseline
//!   through composable `AdjustmentRule`s and pushes it to registered
//!   `Tunable` components on a cancellable schedule

pub mod memory;
pub mod monitor;
pub mod optimizer;
pub mod rules;

pub use memory::{FixedMemory, MemorySource, SysinfoMemory};
pub use monitor::{MonitorConfig, OperationMetrics, PerformanceMonitor, TelemetrySnapshot, UserActivity};
pub use optimizer::{OptimizationReport, OptimizerConfig, ResourceOptimizer};
pub use rules::{
    apply_floors, AdjustmentRule, ErrorRateRule, LatencyRule, MemoryPressureRule, UserActivityRule,
};
