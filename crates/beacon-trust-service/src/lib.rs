//! # beacon-trust-service
//!
//! The trust service answers certificate verification requests for names
//! outside the conventional registries. A name's zone is anchored by the
//! DS records it holds on the Handshake chain; the service's TLSA records
//! are fetched from a Handshake-aware resolver, validated locally against
//! that anchor, and matched against the leaf certificate.
//!
//! ```text
//! client transport ──frame──> RpcServer ──> TrustHandler ──> HnsDaneVerifier
//!                                                │              │      │
//!                                           StatusSource   ZoneSource  TlsaSource
//!                                                └──── ResolverClient ─┘      │
//!                                                              DnsExchange (udp/tcp)
//! ```
//!
//! The service runs either in a child process driven by
//! [`run_stdin_control`], or in-process through [`InProcessLauncher`].

mod config;
mod control;
mod dane;
mod dnssec;
mod error;
mod exchange;
mod handler;
mod launcher;
mod server;
mod service;
mod tlsa;

pub use config::{Network, ServiceConfig, TlsaConfig};
pub use control::{run_control_loop, run_stdin_control, ControlCommand};
pub use dane::{DaneVerifier, HnsDaneVerifier, ZoneSource};
pub use error::{DaneError, Result, ServiceError};
pub use handler::{StatusSource, TrustHandler};
pub use launcher::InProcessLauncher;
pub use server::RpcServer;
pub use service::{TrustService, TrustServiceBuilder};
pub use dnssec::{Dnskey, DnssecError, Rrsig, WireRecord};
pub use exchange::{DnsExchange, DnsResponse, UdpExchange};
pub use tlsa::{
    tlsa_name, TlsaAnswer, TlsaRecord, TlsaSource, ValidatingTlsaSource, ZoneAnchor, USAGE_DANE_EE,
};
