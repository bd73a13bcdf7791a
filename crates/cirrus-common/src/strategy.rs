//! Tunable-parameter bundle produced by the resource optimizer

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Operating parameters for every tunable component
///
/// Immutable once published: the optimizer derives a fresh value from the
/// baseline each cycle and replaces the current one wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationStrategy {
    /// Maximum number of cache entries
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Concurrency ceiling of the request queue
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Per-flush ceiling of the batch aggregator
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Minimum spacing between dispatches (milliseconds)
    #[serde(default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Retries before falling back
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    /// Items per concurrent batch of bulk work
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Pause between bulk chunks (milliseconds)
    #[serde(default = "default_chunk_pause_ms")]
    pub chunk_pause_ms: u64,

    /// Whether speculative background work (prefetching) may run
    #[serde(default)]
    pub background_processing: bool,
}

impl Default for OptimizationStrategy {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            max_concurrent: default_max_concurrent(),
            batch_size: default_batch_size(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_count: default_retry_count(),
            chunk_size: default_chunk_size(),
            chunk_pause_ms: default_chunk_pause_ms(),
            background_processing: false,
        }
    }
}

impl OptimizationStrategy {
    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_millis(self.inter_request_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    /// Names of the fields that differ from `other`
    pub fn diff(&self, other: &OptimizationStrategy) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.cache_capacity != other.cache_capacity {
            changed.push("cache_capacity");
        }
        if self.max_concurrent != other.max_concurrent {
            changed.push("max_concurrent");
        }
        if self.batch_size != other.batch_size {
            changed.push("batch_size");
        }
        if self.inter_request_delay_ms != other.inter_request_delay_ms {
            changed.push("inter_request_delay_ms");
        }
        if self.request_timeout_ms != other.request_timeout_ms {
            changed.push("request_timeout_ms");
        }
        if self.retry_count != other.retry_count {
            changed.push("retry_count");
        }
        if self.chunk_size != other.chunk_size {
            changed.push("chunk_size");
        }
        if self.chunk_pause_ms != other.chunk_pause_ms {
            changed.push("chunk_pause_ms");
        }
        if self.background_processing != other.background_processing {
            changed.push("background_processing");
        }
        changed
    }
}

fn default_cache_capacity() -> usize {
    500
}

fn default_max_concurrent() -> usize {
    6
}

fn default_batch_size() -> usize {
    10
}

fn default_inter_request_delay_ms() -> u64 {
    100
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_retry_count() -> u32 {
    3
}

fn default_chunk_size() -> usize {
    5
}

fn default_chunk_pause_ms() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_strategy() {
        let strategy = OptimizationStrategy::default();
        assert_eq!(strategy.cache_capacity, 500);
        assert_eq!(strategy.max_concurrent, 6);
        assert_eq!(strategy.request_timeout(), Duration::from_secs(30));
        assert!(!strategy.background_processing);
    }

    #[test]
    fn test_diff_lists_changed_fields() {
        let base = OptimizationStrategy::default();
        let changed = OptimizationStrategy {
            batch_size: 4,
            background_processing: true,
            ..base.clone()
        };

        assert!(base.diff(&base).is_empty());
        assert_eq!(changed.diff(&base), vec!["batch_size", "background_processing"]);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let strategy: OptimizationStrategy =
            serde_json::from_str(r#"{"max_concurrent": 2}"#).unwrap();
        assert_eq!(strategy.max_concurrent, 2);
        assert_eq!(strategy.cache_capacity, 500);
    }
}
