//! Retry-with-fallback execution

use std::{collections::HashMap, fmt, future::Future};

use cirrus_common::{OptimizationStrategy, TuneError, Tunable};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    bulk::BulkConfig,
    classifier::ErrorClassifier,
    config::RetryConfig,
    stats::{RecoveryStats, StatsRegistry},
};

/// How an execution reached its result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryPath {
    /// First attempt succeeded
    Direct,
    /// Succeeded after one or more retries
    Retry,
    /// The fallback produced the result
    Fallback,
    /// Nothing produced a result
    Failed,
}

impl RecoveryPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryPath::Direct => "direct",
            RecoveryPath::Retry => "retry",
            RecoveryPath::Fallback => "fallback",
            RecoveryPath::Failed => "failed",
        }
    }
}

/// Structured result of a recovered execution
#[derive(Debug, Clone)]
pub struct RecoveryOutcome<T, E> {
    result: Result<T, E>,
    /// Calls made to the primary operation
    pub attempts: u32,
    pub used_fallback: bool,
    pub recovery_path: RecoveryPath,
}

impl<T, E> RecoveryOutcome<T, E> {
    fn succeeded(data: T, attempts: u32, used_fallback: bool, recovery_path: RecoveryPath) -> Self {
        Self {
            result: Ok(data),
            attempts,
            used_fallback,
            recovery_path,
        }
    }

    fn failed(error: E, attempts: u32, used_fallback: bool) -> Self {
        Self {
            result: Err(error),
            attempts,
            used_fallback,
            recovery_path: RecoveryPath::Failed,
        }
    }

    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn data(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// Last error seen: the fallback's if it ran and failed, else the primary's
    pub fn error(&self) -> Option<&E> {
        self.result.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, E> {
        self.result
    }

    /// Collapse into data, discarding the error
    pub fn into_data(self) -> Option<T> {
        self.result.ok()
    }
}

/// Last-resort operation run once after the primary gives up
pub type Fallback<T, E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<T, E>> + Send>;

/// Per-call recovery options
pub struct RecoveryOptions<T, E> {
    /// Key under which statistics are aggregated
    pub operation_name: String,
    /// Overrides the engine's retry configuration for this call
    pub retry: Option<RetryConfig>,
    pub fallback: Option<Fallback<T, E>>,
}

impl<T, E> RecoveryOptions<T, E> {
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            retry: None,
            fallback: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: 'static,
        E: 'static,
    {
        self.fallback = Some(Box::new(move || -> BoxFuture<'static, Result<T, E>> {
            Box::pin(fallback())
        }));
        self
    }
}

impl<T, E> Default for RecoveryOptions<T, E> {
    fn default() -> Self {
        Self::new("default")
    }
}

impl<T, E> fmt::Debug for RecoveryOptions<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryOptions")
            .field("operation_name", &self.operation_name)
            .field("retry", &self.retry)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

/// Wraps operations with classification, backoff and fallback
///
/// Callers always receive a `RecoveryOutcome`; errors never escape as `Err`.
pub struct RecoveryEngine {
    classifier: ErrorClassifier,
    configured: RetryConfig,
    effective: RwLock<RetryConfig>,
    bulk: RwLock<BulkConfig>,
    stats: StatsRegistry,
}

impl RecoveryEngine {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_classifier(config, ErrorClassifier::default())
    }

    pub fn with_classifier(config: RetryConfig, classifier: ErrorClassifier) -> Self {
        Self {
            classifier,
            effective: RwLock::new(config.clone()),
            configured: config,
            bulk: RwLock::new(BulkConfig::default()),
            stats: StatsRegistry::default(),
        }
    }

    /// Replace the default bulk batching
    pub fn with_bulk_config(self, bulk: BulkConfig) -> Self {
        *self.bulk.write() = bulk;
        self
    }

    /// Bulk batching used when a call does not set its own
    pub fn bulk_config(&self) -> BulkConfig {
        self.bulk.read().clone()
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.classifier
    }

    /// Retry configuration currently in force, tuning included
    pub fn retry_config(&self) -> RetryConfig {
        self.effective.read().clone()
    }

    /// Run `operation`, retrying transient failures and falling back once
    pub async fn execute_with_recovery<F, Fut, T, E>(
        &self,
        mut operation: F,
        options: RecoveryOptions<T, E>,
    ) -> RecoveryOutcome<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let RecoveryOptions {
            operation_name: name,
            retry,
            fallback,
        } = options;
        let config = retry.unwrap_or_else(|| self.retry_config());

        let mut attempts = 0u32;
        let last_error = loop {
            attempts += 1;
            match operation().await {
                Ok(data) => {
                    let path = if attempts > 1 {
                        debug!(operation = %name, attempts, "Operation recovered after retry");
                        RecoveryPath::Retry
                    } else {
                        RecoveryPath::Direct
                    };
                    self.stats.update(&name, |s| {
                        s.total_attempts += u64::from(attempts);
                        if attempts > 1 {
                            s.successful_retries += 1;
                        }
                    });
                    return RecoveryOutcome::succeeded(data, attempts, false, path);
                }
                Err(error) => {
                    let message = error.to_string();
                    let category = self.classifier.categorize(&message);
                    self.stats.update(&name, |s| {
                        *s.error_histogram.entry(category).or_default() += 1;
                    });

                    if !self.classifier.is_retryable(&message) {
                        debug!(operation = %name, error = %message, "Non-retryable error");
                        break error;
                    }
                    if attempts > config.max_retries {
                        break error;
                    }

                    let delay = config.delay_with_jitter(attempts);
                    warn!(
                        operation = %name,
                        attempt = attempts,
                        max_retries = config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Operation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        self.stats
            .update(&name, |s| s.total_attempts += u64::from(attempts));

        let Some(fallback) = fallback else {
            self.stats.update(&name, |s| s.failures += 1);
            return RecoveryOutcome::failed(last_error, attempts, false);
        };

        warn!(operation = %name, attempts, error = %last_error, "Using fallback");
        self.stats.update(&name, |s| s.fallback_used += 1);
        match fallback().await {
            Ok(data) => RecoveryOutcome::succeeded(data, attempts, true, RecoveryPath::Fallback),
            Err(error) => {
                warn!(operation = %name, error = %error, "Fallback failed");
                self.stats.update(&name, |s| s.failures += 1);
                RecoveryOutcome::failed(error, attempts, true)
            }
        }
    }

    pub fn stats(&self, operation_name: &str) -> Option<RecoveryStats> {
        self.stats.get(operation_name)
    }

    pub fn all_stats(&self) -> HashMap<String, RecoveryStats> {
        self.stats.snapshot()
    }

    pub fn clear_stats(&self) {
        self.stats.clear();
    }
}

impl Default for RecoveryEngine {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

impl Tunable for RecoveryEngine {
    fn component(&self) -> &'static str {
        "recovery"
    }

    fn apply_parameters(&self, strategy: &OptimizationStrategy) -> Result<(), TuneError> {
        let mut tuned = self.configured.clone();
        tuned.max_retries = strategy.retry_count;
        tuned.base_delay_ms = tuned.base_delay_ms.max(strategy.inter_request_delay_ms);
        if tuned.base_delay_ms > tuned.max_delay_ms {
            tuned.max_delay_ms = tuned.base_delay_ms;
        }
        *self.effective.write() = tuned;

        *self.bulk.write() = BulkConfig {
            batch_size: strategy.chunk_size.max(1),
            batch_pause_ms: strategy.chunk_pause_ms,
        };
        Ok(())
    }

    /// Statistics are diagnostics; drop them under memory pressure
    fn release_resources(&self) {
        self.stats.clear();
    }
}
