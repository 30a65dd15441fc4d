//! Error types for the Handshake engine.

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a stored header record was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Corruption {
    /// Fewer bytes than one record
    Short { len: usize, need: usize },
    /// Trailing size field does not match the raw header size
    SizeMismatch { found: u16 },
    /// Record height does not follow the previous record
    HeightGap { expected: u32, found: u32 },
}

impl std::fmt::Display for Corruption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Short { len, need } => write!(f, "short record: {len} of {need} bytes"),
            Self::SizeMismatch { found } => write!(f, "size checksum mismatch: {found}"),
            Self::HeightGap { expected, found } => {
                write!(f, "height gap: expected {expected}, found {found}")
            }
        }
    }
}

/// Header codec failure
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("corrupt header record: {0}")]
    CorruptRecord(Corruption),
}

/// Failures reported by the peer pool
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("peer request timed out")]
    Timeout,
    #[error("bad arguments: {0}")]
    BadArgs(String),
    #[error("pool failure: {0}")]
    Failure(String),
    #[error("out of memory")]
    OutOfMemory,
    #[error("pool error: {0}")]
    Other(String),
}

/// Numeric status codes handed to resolution callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0,
    OutOfMemory = 1,
    Timeout = 2,
    Failure = 3,
    BadArgs = 4,
    NoPeers = 5,
    NotSynced = 6,
    Unknown = 7,
}

/// A name resolution that did not produce an answer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("request timed out")]
    Timeout,
    #[error("resolution failed")]
    Failure,
    #[error("bad arguments")]
    BadArgs,
    #[error("no peers")]
    NoPeers,
    #[error("client is still syncing")]
    NotSynced,
    #[error("unknown resolver error")]
    Unknown,
    /// The engine stopped before answering
    #[error("resolver is shutting down")]
    Shutdown,
    /// Payload could not be decoded as a resource
    #[error("failed decoding resource: {0}")]
    Decode(String),
}

impl ResolveError {
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::OutOfMemory => StatusCode::OutOfMemory,
            Self::Timeout => StatusCode::Timeout,
            Self::Failure => StatusCode::Failure,
            Self::BadArgs => StatusCode::BadArgs,
            Self::NoPeers => StatusCode::NoPeers,
            Self::NotSynced => StatusCode::NotSynced,
            Self::Unknown | Self::Shutdown | Self::Decode(_) => StatusCode::Unknown,
        }
    }

    /// Returns true if the caller may retry later
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::NotSynced | Self::NoPeers | Self::Timeout)
    }
}

impl From<PoolError> for ResolveError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout => Self::Timeout,
            PoolError::BadArgs(_) => Self::BadArgs,
            PoolError::Failure(_) => Self::Failure,
            PoolError::OutOfMemory => Self::OutOfMemory,
            PoolError::Other(_) => Self::Unknown,
        }
    }
}

/// Engine lifecycle and persistence failures
#[derive(Error, Debug)]
pub enum EngineError {
    /// Runtime, timer or signal setup failed
    #[error("failed creating context: {0}")]
    Create(String),

    /// `start` was called on an engine that is not freshly created
    #[error("engine already started or no longer valid")]
    AlreadyStarted,

    /// Peer pool could not be opened
    #[error("failed opening pool: {0}")]
    Pool(#[from] PoolError),

    /// Header file could not be parsed
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Configuration is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// Header file I/O failed
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StatusCode::Success as u8, 0);
        assert_eq!(ResolveError::NotSynced.status() as u8, 6);
        assert_eq!(ResolveError::NoPeers.status() as u8, 5);
        assert_eq!(ResolveError::Shutdown.status(), StatusCode::Unknown);
    }

    #[test]
    fn test_pool_error_mapping() {
        assert_eq!(ResolveError::from(PoolError::Timeout), ResolveError::Timeout);
        assert_eq!(
            ResolveError::from(PoolError::BadArgs("name".into())),
            ResolveError::BadArgs
        );
        assert_eq!(
            ResolveError::from(PoolError::Other("weird".into())),
            ResolveError::Unknown
        );
    }

    #[test]
    fn test_corruption_display() {
        let err = CodecError::CorruptRecord(Corruption::HeightGap {
            expected: 3,
            found: 4,
        });
        assert_eq!(
            err.to_string(),
            "corrupt header record: height gap: expected 3, found 4"
        );
    }
}
