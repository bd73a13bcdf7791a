//! Batch aggregation of remote calls
//!
//! Calls enqueued within a short window are flushed together. Each flush is
//! split into chunks no larger than the batch ceiling; identical requests in a
//! chunk share one physical slot, and every caller settles from its own slot.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

use async_trait::async_trait;
use cirrus_common::{ApiError, OptimizationStrategy, TuneError, Tunable};
use futures::future::join_all;
use http::Method;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::config::BatchConfig;

/// One logical call to the remote API
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequest {
    pub id: String,
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl BatchRequest {
    pub fn new(id: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            method,
            path: path.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Identity used for deduplication: method, path and canonical body
    ///
    /// Encoded as a JSON array so no path or body text can run into the next
    /// field. Object keys serialise in sorted order, so bodies that differ
    /// only in key order share a fingerprint.
    pub fn fingerprint(&self) -> String {
        let method = self.method.as_str();
        match &self.body {
            Some(body) => serde_json::json!([method, self.path, body]).to_string(),
            None => serde_json::json!([method, self.path]).to_string(),
        }
    }
}

/// Performs physical calls on behalf of the aggregator
#[async_trait]
pub trait BatchTransport: Send + Sync {
    /// Execute a single request
    async fn send(&self, request: &BatchRequest) -> Result<Value, ApiError>;

    /// Execute a chunk of requests, one result per request in order
    ///
    /// The default runs every `send` concurrently and waits for all of them,
    /// so one failure never aborts its siblings.
    async fn send_batch(&self, requests: &[BatchRequest]) -> Vec<Result<Value, ApiError>> {
        join_all(requests.iter().map(|request| self.send(request))).await
    }
}

/// Aggregator counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Logical requests enqueued
    pub requests: u64,
    /// Chunks handed to the transport
    pub physical_calls: u64,
    /// Requests that shared a slot with an identical request
    pub deduplicated: u64,
    pub flushes: u64,
}

/// Settlement of one enqueued request
pub struct BatchTicket {
    rx: oneshot::Receiver<Result<Value, ApiError>>,
}

impl Future for BatchTicket {
    type Output = Result<Value, ApiError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(ApiError::other(
                "batch aggregator dropped the request before it settled",
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

struct PendingRequest {
    request: BatchRequest,
    tx: oneshot::Sender<Result<Value, ApiError>>,
}

struct BatchState {
    pending: Vec<PendingRequest>,
    /// Bumped on every flush so a stale window timer does nothing
    generation: u64,
    timer_armed: bool,
}

struct BatchInner {
    transport: Arc<dyn BatchTransport>,
    state: Mutex<BatchState>,
    window_ms: AtomicU64,
    max_batch_size: AtomicUsize,
    request_timeout_ms: AtomicU64,
    requests: AtomicU64,
    physical_calls: AtomicU64,
    deduplicated: AtomicU64,
    flushes: AtomicU64,
}

/// Coalesces calls issued within a window into fewer physical calls
#[derive(Clone)]
pub struct BatchAggregator {
    inner: Arc<BatchInner>,
}

impl BatchAggregator {
    pub fn new(transport: Arc<dyn BatchTransport>, config: BatchConfig) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                transport,
                state: Mutex::new(BatchState {
                    pending: Vec::new(),
                    generation: 0,
                    timer_armed: false,
                }),
                window_ms: AtomicU64::new(config.window_ms),
                max_batch_size: AtomicUsize::new(config.max_batch_size.max(1)),
                request_timeout_ms: AtomicU64::new(config.request_timeout_ms),
                requests: AtomicU64::new(0),
                physical_calls: AtomicU64::new(0),
                deduplicated: AtomicU64::new(0),
                flushes: AtomicU64::new(0),
            }),
        }
    }

    /// Collect a call for the next flush
    pub fn enqueue(
        &self,
        id: impl Into<String>,
        method: Method,
        path: impl Into<String>,
        body: Option<Value>,
    ) -> BatchTicket {
        self.submit(BatchRequest {
            id: id.into(),
            method,
            path: path.into(),
            body,
        })
    }

    /// Collect a prepared request for the next flush
    ///
    /// Reaching the batch ceiling flushes at once; otherwise the first request
    /// of a window arms the window timer.
    pub fn submit(&self, request: BatchRequest) -> BatchTicket {
        let (tx, rx) = oneshot::channel();
        self.inner.requests.fetch_add(1, Ordering::Relaxed);

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(id = %request.id, "Batch request submitted outside a tokio runtime");
                let _ = tx.send(Err(ApiError::other("no async runtime available for batch dispatch")));
                return BatchTicket { rx };
            }
        };

        let ceiling = self.max_batch_size();
        let mut state = self.inner.state.lock();
        state.pending.push(PendingRequest { request, tx });

        if state.pending.len() >= ceiling {
            let batch = Self::take_pending(&mut state);
            drop(state);
            debug!(size = batch.len(), "Batch ceiling reached, flushing immediately");
            let inner = Arc::clone(&self.inner);
            handle.spawn(async move { Self::dispatch(&inner, batch).await });
        } else if !state.timer_armed {
            state.timer_armed = true;
            let generation = state.generation;
            drop(state);

            let inner = Arc::clone(&self.inner);
            let window = Duration::from_millis(inner.window_ms.load(Ordering::Relaxed));
            handle.spawn(async move {
                tokio::time::sleep(window).await;
                let batch = {
                    let mut state = inner.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    Self::take_pending(&mut state)
                };
                Self::dispatch(&inner, batch).await;
            });
        }

        BatchTicket { rx }
    }

    /// Flush everything collected so far without waiting for the window
    ///
    /// Returns the number of logical requests flushed.
    pub async fn flush(&self) -> usize {
        let batch = Self::take_pending(&mut self.inner.state.lock());
        let count = batch.len();
        Self::dispatch(&self.inner, batch).await;
        count
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn max_batch_size(&self) -> usize {
        self.inner.max_batch_size.load(Ordering::Relaxed)
    }

    pub fn set_max_batch_size(&self, size: usize) {
        self.inner.max_batch_size.store(size.max(1), Ordering::Relaxed);
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.request_timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_request_timeout(&self, timeout: Duration) {
        self.inner
            .request_timeout_ms
            .store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> BatchStats {
        BatchStats {
            requests: self.inner.requests.load(Ordering::Relaxed),
            physical_calls: self.inner.physical_calls.load(Ordering::Relaxed),
            deduplicated: self.inner.deduplicated.load(Ordering::Relaxed),
            flushes: self.inner.flushes.load(Ordering::Relaxed),
        }
    }

    fn take_pending(state: &mut BatchState) -> Vec<PendingRequest> {
        state.generation = state.generation.wrapping_add(1);
        state.timer_armed = false;
        std::mem::take(&mut state.pending)
    }

    async fn dispatch(inner: &Arc<BatchInner>, batch: Vec<PendingRequest>) {
        if batch.is_empty() {
            return;
        }

        inner.flushes.fetch_add(1, Ordering::Relaxed);
        let ceiling = inner.max_batch_size.load(Ordering::Relaxed).max(1);
        let timeout = Duration::from_millis(inner.request_timeout_ms.load(Ordering::Relaxed));

        let mut chunks: Vec<Vec<PendingRequest>> = Vec::new();
        let mut members = batch.into_iter().peekable();
        while members.peek().is_some() {
            chunks.push(members.by_ref().take(ceiling).collect());
        }
        debug!(chunks = chunks.len(), ceiling, "Flushing batch");

        join_all(
            chunks
                .into_iter()
                .map(|chunk| Self::dispatch_chunk(inner, chunk, timeout)),
        )
        .await;
    }

    async fn dispatch_chunk(inner: &Arc<BatchInner>, chunk: Vec<PendingRequest>, timeout: Duration) {
        let mut slots: HashMap<String, usize> = HashMap::new();
        let mut unique: Vec<BatchRequest> = Vec::new();
        let mut callers: Vec<(usize, oneshot::Sender<Result<Value, ApiError>>)> =
            Vec::with_capacity(chunk.len());

        for PendingRequest { request, tx } in chunk {
            let fingerprint = request.fingerprint();
            let slot = match slots.get(&fingerprint) {
                Some(&slot) => {
                    inner.deduplicated.fetch_add(1, Ordering::Relaxed);
                    slot
                }
                None => {
                    let slot = unique.len();
                    slots.insert(fingerprint, slot);
                    unique.push(request);
                    slot
                }
            };
            callers.push((slot, tx));
        }

        inner.physical_calls.fetch_add(1, Ordering::Relaxed);
        let results = match tokio::time::timeout(timeout, inner.transport.send_batch(&unique)).await {
            Ok(results) => results,
            Err(_) => {
                debug!(size = unique.len(), timeout_ms = timeout.as_millis() as u64, "Batch chunk timed out");
                let error = ApiError::timeout(format!(
                    "batch call exceeded {} ms",
                    timeout.as_millis()
                ));
                vec![Err(error); unique.len()]
            }
        };

        if results.len() < unique.len() {
            warn!(
                expected = unique.len(),
                received = results.len(),
                "Transport returned fewer results than requests"
            );
        }

        for (slot, tx) in callers {
            let result = match results.get(slot) {
                Some(result) => result.clone(),
                None => Err(ApiError::other(format!(
                    "transport returned no result for request '{}'",
                    unique[slot].id
                ))),
            };
            let _ = tx.send(result);
        }
    }
}

impl Tunable for BatchAggregator {
    fn component(&self) -> &'static str {
        "batch"
    }

    fn apply_parameters(&self, strategy: &OptimizationStrategy) -> Result<(), TuneError> {
        if strategy.batch_size == 0 {
            return Err(TuneError::InvalidParameter {
                component: "batch",
                parameter: "batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        self.set_max_batch_size(strategy.batch_size);
        self.set_request_timeout(strategy.request_timeout());
        Ok(())
    }
}
