//! # beacon-hns
//!
//! Handshake light client engine.
//!
//! ## Architecture
//!
//! ```text
//! caller threads                      engine thread ("hns-engine")
//!   ResolverClient::resolve  ──┐
//!   ContextHandle::resolve   ──┼─> QueryQueue ─> drain ─> PeerPool::resolve
//!                              │                              │
//!   ResolverClient waiters  <──┼──────── ResolveCallback <────┘
//!   status / accessors      <──┴──────── SharedPoolState <── timer tick
//!                                                             │
//!                                          HeaderStore <──────┘ checkpoint
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use beacon_hns::{ChainParams, EngineConfig, MemoryPool, ResolverClient};
//!
//! let pool = Arc::new(MemoryPool::new());
//! let client = ResolverClient::start(EngineConfig::default(), ChainParams::mainnet(), pool)?;
//! if let Some(zone) = client.get_zone("welcome").await? {
//!     println!("signed: {}", zone.is_signed());
//! }
//! ```

mod chain;
mod client;
mod config;
mod context;
mod error;
mod header;
mod pool;
mod queue;
mod resource;
mod state;
mod store;

pub use chain::{ChainParams, ChainState};
pub use client::{ResolverClient, ResolverStatus};
pub use config::{default_data_dir, EngineConfig, HEADERS_FILE_NAME};
pub use context::{Context, ContextHandle, EngineState, ResolveCallback, ResolveOutcome};
pub use error::{
    CodecError, Corruption, EngineError, PoolError, ResolveError, Result, StatusCode,
};
pub use header::{BlockHeader, HEADER_SIZE, RAW_HEADER_SIZE, RECORD_SIZE};
pub use pool::{MemoryPool, PeerCounts, PeerPool, PoolEvent, PoolOptions, EVENT_CHANNEL_SIZE};
pub use queue::{QueryQueue, ResolutionQuery};
pub use resource::{DsRecord, Record, Resource, ResourceError};
pub use state::{PoolState, SharedPoolState};
pub use store::HeaderStore;
