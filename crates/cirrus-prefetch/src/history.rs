//! Access history and priority scoring

use std::{collections::HashMap, time::Duration};

use tokio::time::Instant;

const RECENCY_WEIGHT: f64 = 0.7;
const FREQUENCY_WEIGHT: f64 = 0.3;
const RECENCY_HORIZON: Duration = Duration::from_secs(24 * 60 * 60);
const FREQUENCY_SATURATION: f64 = 10.0;

/// `0.7 * recency + 0.3 * frequency`
///
/// Recency falls linearly from 1 to 0 over 24 hours; frequency saturates at
/// ten accesses.
pub fn priority_score(age: Duration, access_count: u32) -> f64 {
    let recency = (1.0 - age.as_secs_f64() / RECENCY_HORIZON.as_secs_f64()).max(0.0);
    let frequency = (f64::from(access_count) / FREQUENCY_SATURATION).min(1.0);
    RECENCY_WEIGHT * recency + FREQUENCY_WEIGHT * frequency
}

/// History of one resource
#[derive(Debug, Clone, PartialEq)]
pub struct AccessRecord {
    pub resource_id: String,
    pub access_count: u32,
    pub last_accessed: Instant,
    /// Score as of the last access or ranking
    pub priority_score: f64,
}

impl AccessRecord {
    pub fn score_at(&self, now: Instant) -> f64 {
        priority_score(now.saturating_duration_since(self.last_accessed), self.access_count)
    }
}

/// Per-resource access frequency and recency
#[derive(Debug, Default)]
pub struct AccessHistory {
    records: HashMap<String, AccessRecord>,
}

impl AccessHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an access to `resource_id` at `at`
    pub fn record(&mut self, resource_id: &str, at: Instant) -> &AccessRecord {
        let record = self
            .records
            .entry(resource_id.to_string())
            .or_insert_with(|| AccessRecord {
                resource_id: resource_id.to_string(),
                access_count: 0,
                last_accessed: at,
                priority_score: 0.0,
            });
        record.access_count = record.access_count.saturating_add(1);
        record.last_accessed = at;
        record.priority_score = record.score_at(at);
        record
    }

    pub fn get(&self, resource_id: &str) -> Option<&AccessRecord> {
        self.records.get(resource_id)
    }

    /// The `limit` highest-scoring resources as of `now`, best first
    ///
    /// Ties break on resource id so the order is stable.
    pub fn top(&mut self, now: Instant, limit: usize) -> Vec<String> {
        let mut scored: Vec<(&String, f64)> = self
            .records
            .iter_mut()
            .map(|(id, record)| {
                record.priority_score = record.score_at(now);
                (id, record.priority_score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        scored
            .into_iter()
            .take(limit)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
