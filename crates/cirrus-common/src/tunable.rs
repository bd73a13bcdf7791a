//! Contract between the resource optimizer and the components it tunes

use crate::{error::TuneError, strategy::OptimizationStrategy};

/// A component whose operating parameters can be replaced at runtime
///
/// Components register themselves with the optimizer at construction. Each
/// implementation picks out the fields it cares about and ignores the rest.
pub trait Tunable: Send + Sync {
    /// Short component name used in logs
    fn component(&self) -> &'static str;

    /// Apply a freshly published strategy
    fn apply_parameters(&self, strategy: &OptimizationStrategy) -> Result<(), TuneError>;

    /// Best-effort cleanup requested under memory pressure
    fn release_resources(&self) {}
}
