//! Bulk execution over collections with partial-failure tolerance

use std::{fmt, future::Future, sync::Arc, time::Duration};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::{RecoveryEngine, RecoveryOptions, RecoveryOutcome};

/// Progress after each settled item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkProgress {
    pub completed: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

pub type ProgressCallback = Arc<dyn Fn(&BulkProgress) + Send + Sync>;

/// Engine-wide bulk batching used when a call does not set its own
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Items executed concurrently per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pause between batches (milliseconds)
    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
        }
    }
}

impl BulkConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_pause_ms() -> u64 {
    100
}

/// Options for `execute_bulk_with_recovery`
#[derive(Clone)]
pub struct BulkOptions {
    /// Statistics key for every item
    pub operation_name: String,
    /// Items executed concurrently per batch; `None` uses the engine's
    pub batch_size: Option<usize>,
    /// Pause between batches; `None` uses the engine's
    pub batch_pause: Option<Duration>,
    /// Keep going after an item fails; otherwise later batches are skipped
    pub continue_on_error: bool,
    pub on_progress: Option<ProgressCallback>,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            operation_name: "bulk".to_string(),
            batch_size: None,
            batch_pause: None,
            continue_on_error: true,
            on_progress: None,
        }
    }
}

impl BulkOptions {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_batch_pause(mut self, pause: Duration) -> Self {
        self.batch_pause = Some(pause);
        self
    }

    pub fn stop_on_error(mut self) -> Self {
        self.continue_on_error = false;
        self
    }

    pub fn with_progress(mut self, callback: impl Fn(&BulkProgress) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for BulkOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkOptions")
            .field("operation_name", &self.operation_name)
            .field("batch_size", &self.batch_size)
            .field("batch_pause", &self.batch_pause)
            .field("continue_on_error", &self.continue_on_error)
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}

/// Outcome of one item, by position in the input
#[derive(Debug, Clone)]
pub struct BulkItemResult<T, E> {
    pub index: usize,
    pub outcome: RecoveryOutcome<T, E>,
}

/// Aggregate report of a bulk run
#[derive(Debug, Clone)]
pub struct BulkReport<T, E> {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Items never attempted because an earlier item failed
    pub skipped: usize,
    /// Executed items in input order
    pub results: Vec<BulkItemResult<T, E>>,
}

impl<T, E> BulkReport<T, E> {
    pub fn all_succeeded(&self) -> bool {
        self.succeeded == self.total
    }
}

impl RecoveryEngine {
    /// Run `operation` over `items` in fixed-size concurrent batches
    ///
    /// Every item goes through the same retry machine as
    /// `execute_with_recovery`. Batches are separated by `batch_pause`.
    /// Batch size and pause not set in `options` come from `bulk_config`.
    pub async fn execute_bulk_with_recovery<I, F, Fut, T, E>(
        &self,
        items: Vec<I>,
        operation: F,
        options: BulkOptions,
    ) -> BulkReport<T, E>
    where
        I: Clone,
        F: Fn(I) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let total = items.len();
        let defaults = self.bulk_config();
        let batch_size = options.batch_size.unwrap_or(defaults.batch_size).max(1);
        let batch_pause = options.batch_pause.unwrap_or_else(|| defaults.batch_pause());
        let mut report = BulkReport {
            total,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            results: Vec::with_capacity(total),
        };

        let mut remaining = items.into_iter().enumerate().peekable();
        let mut batch_number = 0usize;
        while remaining.peek().is_some() {
            if batch_number > 0 && !batch_pause.is_zero() {
                tokio::time::sleep(batch_pause).await;
            }
            batch_number += 1;

            let batch: Vec<(usize, I)> = remaining.by_ref().take(batch_size).collect();
            debug!(
                operation = %options.operation_name,
                batch = batch_number,
                size = batch.len(),
                "Executing bulk batch"
            );

            let operation = &operation;
            let outcomes = join_all(batch.into_iter().map(|(index, item)| {
                let options = RecoveryOptions::new(options.operation_name.clone());
                async move {
                    let outcome = self
                        .execute_with_recovery(move || operation(item.clone()), options)
                        .await;
                    BulkItemResult { index, outcome }
                }
            }))
            .await;

            let mut batch_failed = false;
            for result in outcomes {
                if result.outcome.success() {
                    report.succeeded += 1;
                } else {
                    report.failed += 1;
                    batch_failed = true;
                }
                report.results.push(result);

                if let Some(callback) = &options.on_progress {
                    callback(&BulkProgress {
                        completed: report.succeeded + report.failed,
                        total,
                        succeeded: report.succeeded,
                        failed: report.failed,
                    });
                }
            }

            if batch_failed && !options.continue_on_error {
                report.skipped = remaining.count();
                break;
            }
        }

        info!(
            operation = %options.operation_name,
            total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            "Bulk execution finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use cirrus_common::{OptimizationStrategy, Tunable};
    use tokio::time::Instant;

    fn engine() -> RecoveryEngine {
        RecoveryEngine::new(
            RetryConfig::default()
                .with_max_retries(1)
                .with_base_delay(Duration::from_millis(10))
                .without_jitter(),
        )
    }

    async fn square_unless_odd(n: u32) -> Result<u32, String> {
        if n % 2 == 1 {
            Err(format!("item {n} rejected"))
        } else {
            Ok(n * n)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_continue_on_error_runs_everything() {
        let report = engine()
            .execute_bulk_with_recovery((0..7).collect(), square_unless_odd, BulkOptions::new("squares"))
            .await;

        assert_eq!(report.total, 7);
        assert_eq!(report.succeeded, 4);
        assert_eq!(report.failed, 3);
        assert_eq!(report.skipped, 0);
        let indices: Vec<usize> = report.results.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
        assert_eq!(report.results[4].outcome.data(), Some(&16));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_error_skips_later_batches() {
        let report = engine()
            .execute_bulk_with_recovery(
                vec![2, 4, 5, 6, 8, 10],
                square_unless_odd,
                BulkOptions::new("squares").with_batch_size(3).stop_on_error(),
            )
            .await;

        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.results.len(), 3);
        assert!(!report.all_succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_are_paused_and_progress_streamed() {
        let progress = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&progress);
        let start = Instant::now();

        let report = engine()
            .execute_bulk_with_recovery(
                vec![0u32; 12],
                |n| async move { Ok::<_, String>(n) },
                BulkOptions::new("zeros")
                    .with_batch_pause(Duration::from_millis(100))
                    .with_progress(move |p| sink.lock().push(p.completed)),
            )
            .await;

        assert!(report.all_succeeded());
        // Batches of five, five and two: two pauses.
        assert_eq!(start.elapsed(), Duration::from_millis(200));
        assert_eq!(*progress.lock(), (1..=12).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tuned_chunking_sets_default_batches() {
        let engine = engine();
        engine
            .apply_parameters(&OptimizationStrategy {
                chunk_size: 2,
                chunk_pause_ms: 300,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(engine.bulk_config().batch_size, 2);

        let batches = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let seen = Arc::clone(&batches);
        let start = Instant::now();
        let report = engine
            .execute_bulk_with_recovery(
                (0..6).collect(),
                |n: u32| {
                    seen.lock().push(Instant::now());
                    async move { Ok::<_, String>(n) }
                },
                BulkOptions::new("tuned"),
            )
            .await;

        assert!(report.all_succeeded());
        // Three batches of two, separated by the tuned pause
        assert_eq!(start.elapsed(), Duration::from_millis(600));
        let starts = batches.lock();
        assert_eq!(starts[1], starts[0]);
        assert_eq!(starts[2] - starts[0], Duration::from_millis(300));

        // Explicit options still win over the tuned defaults
        let start = Instant::now();
        engine
            .execute_bulk_with_recovery(
                (0..6).collect(),
                |n: u32| async move { Ok::<_, String>(n) },
                BulkOptions::new("explicit")
                    .with_batch_size(6)
                    .with_batch_pause(Duration::from_millis(50)),
            )
            .await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_item_failures_are_retried() {
        let engine = engine();
        let attempts = parking_lot::Mutex::new(std::collections::HashMap::<u32, u32>::new());

        let report = engine
            .execute_bulk_with_recovery(
                vec![1, 2],
                |n| {
                    let seen = {
                        let mut attempts = attempts.lock();
                        let count = attempts.entry(n).or_default();
                        *count += 1;
                        *count
                    };
                    async move {
                        if seen == 1 {
                            Err::<u32, _>("HTTP 503: unavailable".to_string())
                        } else {
                            Ok(n)
                        }
                    }
                },
                BulkOptions::default(),
            )
            .await;

        assert!(report.all_succeeded());
        assert!(report.results.iter().all(|r| r.outcome.attempts == 2));
        assert_eq!(engine.stats("bulk").unwrap().successful_retries, 2);
    }
}
