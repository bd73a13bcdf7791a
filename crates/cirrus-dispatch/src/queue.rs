//! Priority request queue with bounded concurrency

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use cirrus_common::{OptimizationStrategy, Priority, TuneError, Tunable};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, warn};

use crate::{config::QueueConfig, error::DispatchError};

/// Queue counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub dispatched: u64,
    pub completed: u64,
    /// Entries superseded by a newer entry with the same id
    pub cancelled: u64,
    /// Highest number of operations in flight at once
    pub peak_active: u64,
}

enum Rejection {
    Superseded,
    Closed,
}

/// Type-erased unit of queued work
trait QueuedJob: Send {
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;
    fn reject(self: Box<Self>, reason: Rejection);
}

struct Job<F, T, E> {
    id: String,
    factory: F,
    tx: oneshot::Sender<Result<T, DispatchError<E>>>,
}

impl<F, Fut, T, E> QueuedJob for Job<F, T, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let Job { factory, tx, .. } = *self;
        Box::pin(async move {
            let result = factory().await.map_err(DispatchError::Operation);
            // The caller may have dropped its ticket; nothing to settle then.
            let _ = tx.send(result);
        })
    }

    fn reject(self: Box<Self>, reason: Rejection) {
        let error = match reason {
            Rejection::Superseded => DispatchError::Cancelled { id: self.id },
            Rejection::Closed => DispatchError::Closed,
        };
        let _ = self.tx.send(Err(error));
    }
}

struct PendingEntry {
    id: String,
    priority: Priority,
    enqueued_at: Instant,
    job: Box<dyn QueuedJob>,
}

struct QueueState {
    pending: VecDeque<PendingEntry>,
    active: usize,
    max_concurrent: usize,
    closed: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    enqueued: AtomicU64,
    dispatched: AtomicU64,
    completed: AtomicU64,
    cancelled: AtomicU64,
    peak_active: AtomicU64,
}

/// Settlement of one enqueued operation
///
/// Resolves exactly once: with the operation's result, or with
/// `Cancelled`/`Closed` if the entry never dispatched.
pub struct QueueTicket<T, E> {
    rx: oneshot::Receiver<Result<T, DispatchError<E>>>,
}

impl<T, E> Future for QueueTicket<T, E> {
    type Output = Result<T, DispatchError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            // Sender dropped without settling: the operation panicked or the
            // runtime is going away.
            Poll::Ready(Err(_)) => Poll::Ready(Err(DispatchError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Bounded-concurrency dispatcher ordered by priority band
///
/// Cloning yields another handle to the same queue. Operations are spawned on
/// the current tokio runtime, so `enqueue` must be called from within one.
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    active: 0,
                    max_concurrent: config.max_concurrent.max(1),
                    closed: false,
                }),
                enqueued: AtomicU64::new(0),
                dispatched: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
                peak_active: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_max_concurrent(max_concurrent: usize) -> Self {
        Self::new(QueueConfig::new(max_concurrent))
    }

    /// Queue `factory` under `id`
    ///
    /// A pending entry with the same id is removed and settles with
    /// `Cancelled`. The new entry goes ahead of every strictly lower priority
    /// entry and behind entries of the same or higher priority.
    pub fn enqueue<F, Fut, T, E>(
        &self,
        id: impl Into<String>,
        factory: F,
        priority: Priority,
    ) -> QueueTicket<T, E>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let id = id.into();
        let (tx, rx) = oneshot::channel();
        let job: Box<dyn QueuedJob> = Box::new(Job {
            id: id.clone(),
            factory,
            tx,
        });

        let superseded = {
            let mut state = self.inner.state.lock();
            if state.closed {
                drop(state);
                job.reject(Rejection::Closed);
                return QueueTicket { rx };
            }

            let superseded = state
                .pending
                .iter()
                .position(|entry| entry.id == id)
                .and_then(|index| state.pending.remove(index));

            let position = state
                .pending
                .iter()
                .position(|entry| entry.priority < priority)
                .unwrap_or(state.pending.len());
            state.pending.insert(
                position,
                PendingEntry {
                    id,
                    priority,
                    enqueued_at: Instant::now(),
                    job,
                },
            );
            superseded
        };

        self.inner.enqueued.fetch_add(1, Ordering::Relaxed);
        if let Some(entry) = superseded {
            debug!(id = %entry.id, "Superseding pending request");
            self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
            entry.job.reject(Rejection::Superseded);
        }

        Self::pump(&self.inner);
        QueueTicket { rx }
    }

    /// Whether `id` is waiting (not yet dispatched)
    pub fn is_pending(&self, id: &str) -> bool {
        self.inner
            .state
            .lock()
            .pending
            .iter()
            .any(|entry| entry.id == id)
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.inner.state.lock().active
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.state.lock().max_concurrent
    }

    /// Change the concurrency ceiling; raising it dispatches immediately
    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        self.inner.state.lock().max_concurrent = max_concurrent.max(1);
        Self::pump(&self.inner);
    }

    /// Reject every pending entry with `Closed` and refuse new ones
    ///
    /// Operations already in flight run to completion.
    pub fn shutdown(&self) {
        let drained: Vec<PendingEntry> = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            state.pending.drain(..).collect()
        };

        if !drained.is_empty() {
            debug!(count = drained.len(), "Rejecting pending requests on shutdown");
        }
        for entry in drained {
            entry.job.reject(Rejection::Closed);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.inner.enqueued.load(Ordering::Relaxed),
            dispatched: self.inner.dispatched.load(Ordering::Relaxed),
            completed: self.inner.completed.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
            peak_active: self.inner.peak_active.load(Ordering::Relaxed),
        }
    }

    fn pump(inner: &Arc<QueueInner>) {
        if inner.state.lock().pending.is_empty() {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("Request queue pumped outside a tokio runtime; dispatch deferred");
                return;
            }
        };

        let ready: Vec<PendingEntry> = {
            let mut state = inner.state.lock();
            let mut ready = Vec::new();
            while !state.closed && state.active < state.max_concurrent {
                match state.pending.pop_front() {
                    Some(entry) => {
                        state.active += 1;
                        ready.push(entry);
                    }
                    None => break,
                }
            }
            inner
                .peak_active
                .fetch_max(state.active as u64, Ordering::Relaxed);
            ready
        };

        for entry in ready {
            inner.dispatched.fetch_add(1, Ordering::Relaxed);
            debug!(
                id = %entry.id,
                priority = entry.priority.as_str(),
                waited_ms = entry.enqueued_at.elapsed().as_millis() as u64,
                "Dispatching queued request"
            );

            let slot = ActiveSlot {
                inner: Arc::clone(inner),
            };
            handle.spawn(async move {
                let _slot = slot;
                entry.job.run().await;
            });
        }
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

/// Releases an in-flight slot when the operation settles, even by panic
struct ActiveSlot {
    inner: Arc<QueueInner>,
}

impl Drop for ActiveSlot {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.active = state.active.saturating_sub(1);
        }
        self.inner.completed.fetch_add(1, Ordering::Relaxed);
        RequestQueue::pump(&self.inner);
    }
}

impl Tunable for RequestQueue {
    fn component(&self) -> &'static str {
        "queue"
    }

    fn apply_parameters(&self, strategy: &OptimizationStrategy) -> Result<(), TuneError> {
        if self.is_closed() {
            return Err(TuneError::ShutDown { component: "queue" });
        }
        if strategy.max_concurrent == 0 {
            return Err(TuneError::InvalidParameter {
                component: "queue",
                parameter: "max_concurrent",
                reason: "must be at least 1".to_string(),
            });
        }
        self.set_max_concurrent(strategy.max_concurrent);
        Ok(())
    }
}
