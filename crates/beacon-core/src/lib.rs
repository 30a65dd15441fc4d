//! Core types for the Beacon certificate trust pipeline.
//!
//! This crate provides the pieces shared by the resolver engine, the trust
//! service and the verification client:
//!
//! - **Types**: certificates, verification results and trust service payloads
//! - **Errors**: local failures ([`CoreError`]) and the layered verdict
//!   taxonomy ([`VerifyError`]) with its wire code mapping
//! - **Hostnames**: canonicalisation and DNSSEC eligibility
//! - **Wire**: length-prefixed JSON frames for the local service channel
//!
//! # Example
//!
//! ```rust,ignore
//! use beacon_core::{hostname, map_service_error, ServiceErrorCode};
//!
//! assert!(hostname::is_dnssec_eligible("welcome"));
//! assert!(!hostname::is_dnssec_eligible("example.com"));
//! let verdict = map_service_error(ServiceErrorCode::HnsIsSyncing);
//! println!("{verdict}");
//! ```

mod error;
pub mod hostname;
pub mod tld;
pub mod types;
pub mod wire;

pub use error::{
    is_benign, map_service_error, CertError, CoreError, DnsError, DnssecError, HnsError, Result,
    ServiceErrorCode, TrustServiceError, VerifyError,
};
pub use types::*;
