//! Handshake DNSSEC trust pipeline for TLS certificate verification.
//!
//! Names outside the conventional registries get a second opinion on their
//! certificates: a light client follows the Handshake chain, the trust
//! service anchors DANE records in it, and a verifier decorator lets a
//! SECURE answer override the upstream verdict.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use beacon::{ClientConfig, DnssecCertVerifier, Launcher, ServiceConfig, Transport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::load(&config_path)?;
//!     let manager = Launcher::from_config(&config, ServiceConfig::default(), peer_pool)?.spawn(&config);
//!     let verifier = DnssecCertVerifier::builder(upstream, manager, Transport::new()?).build();
//!
//!     let outcome = verifier.verify(&params).await;
//!     println!("verdict: {:?}", outcome.verdict);
//!     Ok(())
//! }
//! ```
//!
//! # Features
//!
//! - `default` - Includes the trust service
//! - `service` - In-process trust service, DANE verifier and TLSA lookups

#![doc(html_root_url = "https://docs.rs/beacon/0.3.0")]

// Re-export core types
pub use beacon_core::*;

// Re-export the resolver engine
pub use beacon_hns as hns;
pub use beacon_hns::{ChainParams, EngineConfig, MemoryPool, PeerPool, ResolverClient};

// Re-export the client side
pub use beacon_trust_client as client;
pub use beacon_trust_client::{
    CallConfig, CertVerifier, ChildProcessLauncher, ClientConfig, DnssecCertVerifier,
    ManagerConfig, ManagerError, ManagerHandle, Transport, TransportError, TrustServiceManager,
    VerifyOutcome, VerifyRequest,
};

// Re-export the service if enabled
#[cfg(feature = "service")]
pub use beacon_trust_service as service;
#[cfg(feature = "service")]
pub use beacon_trust_service::{InProcessLauncher, ServiceConfig, TrustService};

#[cfg(feature = "service")]
mod launcher;
#[cfg(feature = "service")]
pub use launcher::Launcher;

// Re-export runtime for convenience
pub use tokio;
pub use serde;
pub use serde_json;
