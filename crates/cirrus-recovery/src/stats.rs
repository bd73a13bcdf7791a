//! Per-operation recovery statistics

use std::collections::{BTreeMap, HashMap};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::classifier::ErrorCategory;

/// Counters for one operation name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStats {
    /// Calls to the primary operation
    pub total_attempts: u64,
    /// Executions that succeeded after at least one retry
    pub successful_retries: u64,
    pub fallback_used: u64,
    /// Executions that ended without data
    pub failures: u64,
    /// Primary-operation failures by category
    pub error_histogram: BTreeMap<ErrorCategory, u64>,
}

impl RecoveryStats {
    pub fn errors(&self) -> u64 {
        self.error_histogram.values().sum()
    }
}

/// Distinct operation names kept before the least active is evicted
pub const MAX_TRACKED_OPERATIONS: usize = 256;

/// Concurrent map of operation name to counters
///
/// Holds at most `MAX_TRACKED_OPERATIONS` names; a new name past that evicts
/// the name with the fewest recorded attempts and errors.
#[derive(Debug, Default)]
pub(crate) struct StatsRegistry {
    entries: DashMap<String, RecoveryStats>,
}

impl StatsRegistry {
    pub(crate) fn update(&self, name: &str, f: impl FnOnce(&mut RecoveryStats)) {
        if !self.entries.contains_key(name) && self.entries.len() >= MAX_TRACKED_OPERATIONS {
            self.evict_least_active();
        }
        let mut entry = self.entries.entry(name.to_string()).or_default();
        f(entry.value_mut());
    }

    fn evict_least_active(&self) {
        let victim = self
            .entries
            .iter()
            .min_by_key(|entry| entry.value().total_attempts + entry.value().errors())
            .map(|entry| entry.key().clone());
        if let Some(victim) = victim {
            self.entries.remove(&victim);
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<RecoveryStats> {
        self.entries.get(name).map(|entry| entry.value().clone())
    }

    pub(crate) fn snapshot(&self) -> HashMap<String, RecoveryStats> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}
