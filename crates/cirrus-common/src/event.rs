//! Signals broadcast by the resource optimizer

use std::sync::Arc;

use crate::strategy::OptimizationStrategy;

/// Event observed by collaborators subscribed to the optimizer
#[derive(Debug, Clone)]
pub enum ResourceEvent {
    /// A new strategy replaced the current one
    StrategyChanged(Arc<OptimizationStrategy>),
    /// Memory crossed the cleanup threshold; release what you can
    FreeResources { memory_bytes: u64 },
}
