//! Client side of the Beacon trust service.
//!
//! This crate provides the pieces a host process needs to consult the trust
//! service during certificate verification:
//!
//! - [`Transport`]: request/response calls to the service with retry,
//!   deadline and drop-based cancellation, driven on a dedicated worker
//! - [`TrustServiceManager`]: lazily binds one service instance, restarts it
//!   after a crash and notifies crash observers
//! - [`ChildProcessLauncher`]: hosts the service as a child process
//! - [`DnssecCertVerifier`]: decorator over an upstream [`CertVerifier`] that
//!   lets a SECURE trust answer override an overridable certificate error
//!
//! # Example
//!
//! ```rust,ignore
//! use beacon_trust_client::{DnssecCertVerifier, ManagerConfig, Transport, TrustServiceManager};
//!
//! let manager = TrustServiceManager::spawn(launcher, &ManagerConfig::default());
//! let verifier = DnssecCertVerifier::builder(upstream, manager, Transport::new()?).build();
//! let outcome = verifier.verify(&params).await;
//! ```

mod cancel;
mod config;
mod error;
mod manager;
mod process;
mod transport;
mod verifier;

pub use cancel::{CallToken, CallWatch};
pub use config::{CallConfig, ClientConfig, ManagerConfig};
pub use error::{ManagerError, Result, TransportError};
pub use manager::{
    BoundService, CrashEvent, CrashSubscription, InProcessInstance, ManagerHandle,
    ServiceEndpoint, ServiceLauncher, ServiceRemote, TrustServiceManager,
};
pub use process::ChildProcessLauncher;
pub use transport::{PendingCall, Transport, TransportBuilder};
pub use verifier::{
    CertVerifier, DnssecCertVerifier, DnssecCertVerifierBuilder, VerifyOutcome, VerifyRequest,
    DEFAULT_TLSA_PORT,
};
