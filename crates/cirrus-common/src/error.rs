//! Error types shared across cirrus crates

use thiserror::Error;

/// Broad category of a remote-call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiErrorKind {
    /// Connection-level failure (reset, refused, DNS)
    Network,
    /// The call did not complete in time
    Timeout,
    /// The remote answered with a non-success status
    Status,
    /// Anything else
    Other,
}

/// Failure of a call to the remote API
///
/// Cloneable so one physical failure can be fanned out to every caller that
/// shared it. The `Display` text is what the recovery classifier inspects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Connection-level failure
    pub fn network(message: impl Into<String>) -> Self {
        ApiError::Network(message.into())
    }

    /// Call exceeded its deadline
    pub fn timeout(message: impl Into<String>) -> Self {
        ApiError::Timeout(message.into())
    }

    /// Non-success HTTP-style status
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ApiError::Status {
            status,
            message: message.into(),
        }
    }

    /// Uncategorised failure
    pub fn other(message: impl Into<String>) -> Self {
        ApiError::Other(message.into())
    }

    pub fn kind(&self) -> ApiErrorKind {
        match self {
            ApiError::Network(_) => ApiErrorKind::Network,
            ApiError::Timeout(_) => ApiErrorKind::Timeout,
            ApiError::Status { .. } => ApiErrorKind::Status,
            ApiError::Other(_) => ApiErrorKind::Other,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ApiError::Network(message)
            | ApiError::Timeout(message)
            | ApiError::Other(message)
            | ApiError::Status { message, .. } => message,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A component rejected a new strategy
#[derive(Debug, Error)]
pub enum TuneError {
    #[error("{component} rejected parameter {parameter}: {reason}")]
    InvalidParameter {
        component: &'static str,
        parameter: &'static str,
        reason: String,
    },

    #[error("{component} is shut down")]
    ShutDown { component: &'static str },
}
