//! Error types for the trust service.

use beacon_core::ServiceErrorCode;
use beacon_hns::{EngineError, ResolveError};
use thiserror::Error;

/// Result type alias for service operations
pub type Result<T> = std::result::Result<T, ServiceError>;

/// Failures starting or running the service
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Resolver engine could not be started
    #[error("resolver engine: {0}")]
    Engine(#[from] EngineError),

    /// RPC listener could not be bound
    #[error("failed binding {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// TLSA resolver could not be created
    #[error("dns resolver error: {0}")]
    Resolver(String),

    /// Configuration is invalid
    #[error("config error: {0}")]
    Config(String),

    /// The service was shut down
    #[error("service stopped")]
    Stopped,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a DANE verification could not reach a verdict
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DaneError {
    /// Request or certificate is unusable
    #[error("certificate verification failed: {0}")]
    CertVerifyFailed(String),

    /// TLSA records exist but none matches the certificate
    #[error("dns authentication failed")]
    DnsAuthFailed,

    #[error("lookup timed out")]
    Timeout,

    #[error("lookup cancelled")]
    Cancelled,

    #[error("name chain is not synced")]
    NotSynced,

    #[error("no peers")]
    NoPeers,

    /// TLSA lookup failed
    #[error("tlsa lookup failed: {0}")]
    Lookup(String),

    /// Zone of the top-level name could not be fetched
    #[error("zone lookup failed: {0}")]
    Zone(String),

    /// Signatures over the TLSA records or their zone chain do not verify
    #[error("dnssec validation failed: {0}")]
    Bogus(String),
}

impl DaneError {
    /// Returns true if another lookup attempt may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Lookup(_))
    }

    /// Wire code reported in a BOGUS answer.
    #[must_use]
    pub const fn code(&self) -> ServiceErrorCode {
        match self {
            Self::DnsAuthFailed => ServiceErrorCode::DnssecPinnedKeyNotInCertChain,
            Self::Timeout => ServiceErrorCode::DnsTimedOut,
            Self::Cancelled => ServiceErrorCode::Aborted,
            Self::NotSynced => ServiceErrorCode::HnsIsSyncing,
            Self::NoPeers => ServiceErrorCode::HnsNoPeers,
            Self::CertVerifyFailed(_) | Self::Lookup(_) | Self::Zone(_) | Self::Bogus(_) => {
                ServiceErrorCode::DnssecBogus
            }
        }
    }
}

impl From<ResolveError> for DaneError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Timeout => Self::Timeout,
            ResolveError::NotSynced => Self::NotSynced,
            ResolveError::NoPeers => Self::NoPeers,
            ResolveError::Shutdown => Self::Cancelled,
            other => Self::Zone(other.to_string()),
        }
    }
}
