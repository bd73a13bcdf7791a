//! Dispatch error types

use thiserror::Error;

/// Failure surfaced by the request queue
#[derive(Debug, Error)]
pub enum DispatchError<E> {
    /// A newer entry with the same id replaced this one before it dispatched
    #[error("Request '{id}' was superseded before dispatch")]
    Cancelled { id: String },

    /// The queue shut down while the entry was pending
    #[error("Request queue is shut down")]
    Closed,

    /// The operation itself failed
    #[error("{0}")]
    Operation(E),
}

impl<E> DispatchError<E> {
    /// Check if this is the supersede-by-id cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Cancelled { .. })
    }

    /// The wrapped operation error, if that is what failed
    pub fn into_operation(self) -> Option<E> {
        match self {
            DispatchError::Operation(e) => Some(e),
            _ => None,
        }
    }
}
