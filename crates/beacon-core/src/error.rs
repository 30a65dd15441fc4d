//! Error types shared across the trust pipeline.
//!
//! Two families live here. [`CoreError`] covers local failures (certificate
//! parsing, frame encoding). [`VerifyError`] is the verdict taxonomy handed
//! back to certificate verification callers; it is layered by domain, and
//! integer codes coming off the wire only enter it through
//! [`map_service_error`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the core types and the frame codec
#[derive(Error, Debug)]
pub enum CoreError {
    /// DER certificate could not be parsed
    #[error("certificate parse failed: {0}")]
    CertParse(String),

    /// Certificate chain was empty
    #[error("certificate chain is empty")]
    EmptyChain,

    /// Frame exceeded the maximum allowed length
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge {
        /// Announced frame length
        len: usize,
        /// Largest accepted frame
        max: usize,
    },

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error on the underlying stream
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Certificate errors reported by the upstream verifier
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CertError {
    #[error("certificate common name invalid")]
    CommonNameInvalid,
    #[error("certificate date invalid")]
    DateInvalid,
    #[error("certificate authority invalid")]
    AuthorityInvalid,
    #[error("certificate revoked")]
    Revoked,
    #[error("certificate invalid")]
    Invalid,
    #[error("certificate uses a weak signature algorithm")]
    WeakSignatureAlgorithm,
    #[error("certificate name is not unique")]
    NonUniqueName,
    #[error("certificate key is weak")]
    WeakKey,
    #[error("certificate violates name constraints")]
    NameConstraintViolation,
    #[error("certificate validity too long")]
    ValidityTooLong,
    #[error("known interception certificate blocked")]
    KnownInterceptionBlocked,
}

/// DNSSEC and DANE failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnssecError {
    #[error("DNSSEC validation failed")]
    Bogus,
    #[error("DNSSEC signature expired")]
    SignatureExpired,
    #[error("DNSSEC signature missing")]
    SignatureMissing,
    #[error("DNSSEC DNSKEY missing")]
    DnskeyMissing,
    #[error("DNSSEC denial of existence missing")]
    NsecMissing,
    #[error("pinned key not in certificate chain")]
    PinnedKeyNotInCertChain,
    #[error("DNSSEC chain fetch failed")]
    FetchFailed,
    #[error("DNSSEC chain fetch timed out")]
    FetchTimedOut,
}

/// Handshake light client failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HnsError {
    #[error("handshake chain is syncing")]
    IsSyncing,
    #[error("no handshake peers")]
    NoPeers,
    #[error("handshake peer timed out")]
    PeerTimedOut,
    #[error("handshake request failed")]
    RequestFailed,
}

/// Conventional DNS failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsError {
    #[error("secure resolver hostname resolution failed")]
    SecureResolverHostnameResolutionFailed,
    #[error("DNS timed out")]
    TimedOut,
    #[error("DNS server failed")]
    ServerFailed,
    #[error("DNS response malformed")]
    MalformedResponse,
    #[error("DNS request cancelled")]
    RequestCancelled,
}

/// Failures talking to the trust service
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrustServiceError {
    #[error("trust service request failed")]
    RequestFailed,
    #[error("trust service request timed out")]
    RequestTimedOut,
    #[error("trust service request invalid")]
    RequestInvalid,
    #[error("trust service response invalid")]
    ResponseInvalid,
}

/// Final verdict error delivered to certificate verification callers.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerifyError {
    #[error(transparent)]
    Cert(#[from] CertError),
    #[error(transparent)]
    Dnssec(#[from] DnssecError),
    #[error(transparent)]
    Hns(#[from] HnsError),
    #[error(transparent)]
    Dns(#[from] DnsError),
    #[error(transparent)]
    TrustService(#[from] TrustServiceError),
    #[error("verification failed")]
    Failed,
    #[error("verification aborted")]
    Aborted,
    #[error("unexpected error")]
    Unexpected,
}

impl VerifyError {
    /// Returns true for upstream certificate errors that an alternate trust
    /// root is allowed to override.
    #[must_use]
    pub const fn is_overridable(&self) -> bool {
        matches!(
            self,
            Self::Cert(
                CertError::AuthorityInvalid | CertError::DateInvalid | CertError::CommonNameInvalid
            )
        )
    }

    /// Numeric error code as reported to hosts (negative, `0` is success).
    #[must_use]
    pub fn code(&self) -> i32 {
        ServiceErrorCode::from(*self).code()
    }
}

/// Returns true when an upstream verification outcome is worth a trust
/// service round trip: success, or one of the overridable certificate errors.
#[must_use]
pub fn is_benign(outcome: &std::result::Result<(), VerifyError>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(e) => e.is_overridable(),
    }
}

/// Flat error code space carried on the trust service wire.
///
/// Codes follow the host network stack numbering; the Beacon-specific
/// ranges start at -3500 (DNSSEC) and -3600 (light client and service).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i32", from = "i32")]
pub enum ServiceErrorCode {
    Ok,
    Failed,
    Aborted,
    Unexpected,
    CertCommonNameInvalid,
    CertDateInvalid,
    CertAuthorityInvalid,
    CertRevoked,
    CertInvalid,
    CertWeakSignatureAlgorithm,
    CertNonUniqueName,
    CertWeakKey,
    CertNameConstraintViolation,
    CertValidityTooLong,
    CertKnownInterceptionBlocked,
    DnsMalformedResponse,
    DnsServerFailed,
    DnsTimedOut,
    DnsSecureResolverHostnameResolutionFailed,
    DnsRequestCancelled,
    DnssecBogus,
    DnssecSignatureExpired,
    DnssecSignatureMissing,
    DnssecDnskeyMissing,
    DnssecNsecMissing,
    DnssecPinnedKeyNotInCertChain,
    DnssecFetchFailed,
    DnssecFetchTimedOut,
    HnsIsSyncing,
    HnsNoPeers,
    HnsPeerTimedOut,
    HnsRequestFailed,
    TrustServiceRequestFailed,
    TrustServiceRequestTimedOut,
    TrustServiceRequestInvalid,
    TrustServiceResponseInvalid,
    /// Any code this build does not know about
    Unknown(i32),
}

const CODE_TABLE: &[(ServiceErrorCode, i32)] = &[
    (ServiceErrorCode::Ok, 0),
    (ServiceErrorCode::Failed, -2),
    (ServiceErrorCode::Aborted, -3),
    (ServiceErrorCode::Unexpected, -9),
    (ServiceErrorCode::CertCommonNameInvalid, -200),
    (ServiceErrorCode::CertDateInvalid, -201),
    (ServiceErrorCode::CertAuthorityInvalid, -202),
    (ServiceErrorCode::CertRevoked, -206),
    (ServiceErrorCode::CertInvalid, -207),
    (ServiceErrorCode::CertWeakSignatureAlgorithm, -208),
    (ServiceErrorCode::CertNonUniqueName, -210),
    (ServiceErrorCode::CertWeakKey, -211),
    (ServiceErrorCode::CertNameConstraintViolation, -212),
    (ServiceErrorCode::CertValidityTooLong, -213),
    (ServiceErrorCode::CertKnownInterceptionBlocked, -217),
    (ServiceErrorCode::DnsMalformedResponse, -800),
    (ServiceErrorCode::DnsServerFailed, -802),
    (ServiceErrorCode::DnsTimedOut, -803),
    (ServiceErrorCode::DnsSecureResolverHostnameResolutionFailed, -808),
    (ServiceErrorCode::DnsRequestCancelled, -810),
    (ServiceErrorCode::DnssecBogus, -3500),
    (ServiceErrorCode::DnssecSignatureExpired, -3501),
    (ServiceErrorCode::DnssecSignatureMissing, -3502),
    (ServiceErrorCode::DnssecDnskeyMissing, -3503),
    (ServiceErrorCode::DnssecNsecMissing, -3504),
    (ServiceErrorCode::DnssecPinnedKeyNotInCertChain, -3505),
    (ServiceErrorCode::DnssecFetchFailed, -3506),
    (ServiceErrorCode::DnssecFetchTimedOut, -3507),
    (ServiceErrorCode::HnsIsSyncing, -3600),
    (ServiceErrorCode::HnsNoPeers, -3601),
    (ServiceErrorCode::HnsPeerTimedOut, -3602),
    (ServiceErrorCode::HnsRequestFailed, -3603),
    (ServiceErrorCode::TrustServiceRequestFailed, -3606),
    (ServiceErrorCode::TrustServiceRequestTimedOut, -3607),
    (ServiceErrorCode::TrustServiceRequestInvalid, -3608),
    (ServiceErrorCode::TrustServiceResponseInvalid, -3609),
];

impl ServiceErrorCode {
    /// Integer value carried on the wire
    #[must_use]
    pub fn code(self) -> i32 {
        if let Self::Unknown(code) = self {
            return code;
        }
        CODE_TABLE
            .iter()
            .find(|(c, _)| *c == self)
            .map_or(-9, |(_, n)| *n)
    }

    /// Decode a wire integer; unknown values are preserved as [`Self::Unknown`]
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        CODE_TABLE
            .iter()
            .find(|(_, n)| *n == code)
            .map_or(Self::Unknown(code), |(c, _)| *c)
    }
}

impl From<i32> for ServiceErrorCode {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl From<ServiceErrorCode> for i32 {
    fn from(code: ServiceErrorCode) -> Self {
        code.code()
    }
}

impl From<VerifyError> for ServiceErrorCode {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Cert(e) => match e {
                CertError::CommonNameInvalid => Self::CertCommonNameInvalid,
                CertError::DateInvalid => Self::CertDateInvalid,
                CertError::AuthorityInvalid => Self::CertAuthorityInvalid,
                CertError::Revoked => Self::CertRevoked,
                CertError::Invalid => Self::CertInvalid,
                CertError::WeakSignatureAlgorithm => Self::CertWeakSignatureAlgorithm,
                CertError::NonUniqueName => Self::CertNonUniqueName,
                CertError::WeakKey => Self::CertWeakKey,
                CertError::NameConstraintViolation => Self::CertNameConstraintViolation,
                CertError::ValidityTooLong => Self::CertValidityTooLong,
                CertError::KnownInterceptionBlocked => Self::CertKnownInterceptionBlocked,
            },
            VerifyError::Dnssec(e) => match e {
                DnssecError::Bogus => Self::DnssecBogus,
                DnssecError::SignatureExpired => Self::DnssecSignatureExpired,
                DnssecError::SignatureMissing => Self::DnssecSignatureMissing,
                DnssecError::DnskeyMissing => Self::DnssecDnskeyMissing,
                DnssecError::NsecMissing => Self::DnssecNsecMissing,
                DnssecError::PinnedKeyNotInCertChain => Self::DnssecPinnedKeyNotInCertChain,
                DnssecError::FetchFailed => Self::DnssecFetchFailed,
                DnssecError::FetchTimedOut => Self::DnssecFetchTimedOut,
            },
            VerifyError::Hns(e) => match e {
                HnsError::IsSyncing => Self::HnsIsSyncing,
                HnsError::NoPeers => Self::HnsNoPeers,
                HnsError::PeerTimedOut => Self::HnsPeerTimedOut,
                HnsError::RequestFailed => Self::HnsRequestFailed,
            },
            VerifyError::Dns(e) => match e {
                DnsError::SecureResolverHostnameResolutionFailed => {
                    Self::DnsSecureResolverHostnameResolutionFailed
                }
                DnsError::TimedOut => Self::DnsTimedOut,
                DnsError::ServerFailed => Self::DnsServerFailed,
                DnsError::MalformedResponse => Self::DnsMalformedResponse,
                DnsError::RequestCancelled => Self::DnsRequestCancelled,
            },
            VerifyError::TrustService(e) => match e {
                TrustServiceError::RequestFailed => Self::TrustServiceRequestFailed,
                TrustServiceError::RequestTimedOut => Self::TrustServiceRequestTimedOut,
                TrustServiceError::RequestInvalid => Self::TrustServiceRequestInvalid,
                TrustServiceError::ResponseInvalid => Self::TrustServiceResponseInvalid,
            },
            VerifyError::Failed => Self::Failed,
            VerifyError::Aborted => Self::Aborted,
            VerifyError::Unexpected => Self::Unexpected,
        }
    }
}

/// Map a trust service error code onto a verification verdict.
///
/// Never yields success: `Ok` and unknown codes become
/// [`VerifyError::Unexpected`].
#[must_use]
pub const fn map_service_error(code: ServiceErrorCode) -> VerifyError {
    use ServiceErrorCode as C;
    match code {
        C::DnssecBogus => VerifyError::Dnssec(DnssecError::Bogus),
        C::DnssecSignatureExpired => VerifyError::Dnssec(DnssecError::SignatureExpired),
        C::DnssecSignatureMissing => VerifyError::Dnssec(DnssecError::SignatureMissing),
        C::DnssecDnskeyMissing => VerifyError::Dnssec(DnssecError::DnskeyMissing),
        C::DnssecNsecMissing => VerifyError::Dnssec(DnssecError::NsecMissing),
        C::DnssecPinnedKeyNotInCertChain => {
            VerifyError::Dnssec(DnssecError::PinnedKeyNotInCertChain)
        }
        C::DnssecFetchFailed => VerifyError::Dnssec(DnssecError::FetchFailed),
        C::DnssecFetchTimedOut => VerifyError::Dnssec(DnssecError::FetchTimedOut),
        C::HnsIsSyncing => VerifyError::Hns(HnsError::IsSyncing),
        C::HnsNoPeers => VerifyError::Hns(HnsError::NoPeers),
        C::HnsPeerTimedOut => VerifyError::Hns(HnsError::PeerTimedOut),
        C::HnsRequestFailed => VerifyError::Hns(HnsError::RequestFailed),
        C::TrustServiceRequestFailed => VerifyError::TrustService(TrustServiceError::RequestFailed),
        C::TrustServiceRequestTimedOut => {
            VerifyError::TrustService(TrustServiceError::RequestTimedOut)
        }
        C::TrustServiceRequestInvalid => {
            VerifyError::TrustService(TrustServiceError::RequestInvalid)
        }
        C::TrustServiceResponseInvalid => {
            VerifyError::TrustService(TrustServiceError::ResponseInvalid)
        }
        C::DnsSecureResolverHostnameResolutionFailed => {
            VerifyError::Dns(DnsError::SecureResolverHostnameResolutionFailed)
        }
        C::DnsTimedOut => VerifyError::Dns(DnsError::TimedOut),
        C::DnsServerFailed => VerifyError::Dns(DnsError::ServerFailed),
        C::DnsMalformedResponse => VerifyError::Dns(DnsError::MalformedResponse),
        C::DnsRequestCancelled => VerifyError::Dns(DnsError::RequestCancelled),
        C::CertCommonNameInvalid => VerifyError::Cert(CertError::CommonNameInvalid),
        C::CertDateInvalid => VerifyError::Cert(CertError::DateInvalid),
        C::CertAuthorityInvalid => VerifyError::Cert(CertError::AuthorityInvalid),
        C::CertRevoked => VerifyError::Cert(CertError::Revoked),
        C::CertInvalid => VerifyError::Cert(CertError::Invalid),
        C::CertWeakSignatureAlgorithm => VerifyError::Cert(CertError::WeakSignatureAlgorithm),
        C::CertNonUniqueName => VerifyError::Cert(CertError::NonUniqueName),
        C::CertWeakKey => VerifyError::Cert(CertError::WeakKey),
        C::CertNameConstraintViolation => VerifyError::Cert(CertError::NameConstraintViolation),
        C::CertValidityTooLong => VerifyError::Cert(CertError::ValidityTooLong),
        C::CertKnownInterceptionBlocked => VerifyError::Cert(CertError::KnownInterceptionBlocked),
        C::Failed => VerifyError::Failed,
        C::Aborted => VerifyError::Aborted,
        C::Ok | C::Unexpected | C::Unknown(_) => VerifyError::Unexpected,
    }
}
