//! Error types for the trust service client.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for transport calls
pub type Result<T> = std::result::Result<T, TransportError>;

/// A remote call that produced no usable answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Service endpoint refused or dropped the connection
    #[error("trust service unavailable: {0}")]
    Unavailable(String),

    /// Overall call deadline passed
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// Stream failed mid-call
    #[error("io error: {0}")]
    Io(String),

    /// Service answered with an error status
    #[error("service error: {message}")]
    Status { message: String },

    /// Response frame could not be decoded
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request could not be encoded
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The caller cancelled the call
    #[error("call cancelled")]
    Cancelled,

    /// Transport worker thread is gone
    #[error("transport worker stopped")]
    WorkerGone,

    /// Handler-style call made outside a tokio runtime
    #[error("no runtime to deliver the response on")]
    NoRuntime,
}

impl TransportError {
    /// Returns true if another attempt may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Io(_))
    }
}

impl From<beacon_core::CoreError> for TransportError {
    fn from(err: beacon_core::CoreError) -> Self {
        match err {
            beacon_core::CoreError::Io(e) => Self::Io(e.to_string()),
            other => Self::InvalidResponse(other.to_string()),
        }
    }
}

/// Process manager failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagerError {
    /// Service process could not be started
    #[error("failed launching {name}: {reason}")]
    Launch { name: String, reason: String },

    /// Control channel write failed
    #[error("control channel error: {0}")]
    Control(String),

    /// Host is shutting down; no new service is bound
    #[error("host is shutting down")]
    HostShuttingDown,

    /// Manager task has stopped
    #[error("trust service manager stopped")]
    Stopped,

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),
}
