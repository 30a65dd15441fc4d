//! Peer pool seam.
//!
//! The wire protocol lives behind [`PeerPool`]; the engine only needs header
//! events, peer counts and name proofs. [`MemoryPool`] is an in-process pool
//! for local networks and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::PoolError;
use crate::header::BlockHeader;

/// Capacity of the pool event channel.
pub const EVENT_CHANNEL_SIZE: usize = 64;

/// Options the engine opens the pool with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub size: usize,
    pub user_agent: String,
}

/// Peer totals. `active` counts peers past the handshake stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeerCounts {
    pub total: usize,
    pub active: usize,
}

/// Events the pool pushes to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// New headers extending the chain, in height order
    Headers(Vec<BlockHeader>),
    /// The pool shut down on its own
    Closed,
}

/// A connection pool to the name system network.
#[async_trait]
pub trait PeerPool: Send + Sync {
    /// Open connections, syncing forward from `tip`.
    async fn open(
        &self,
        tip: &BlockHeader,
        options: &PoolOptions,
    ) -> Result<mpsc::Receiver<PoolEvent>, PoolError>;

    fn peer_counts(&self) -> PeerCounts;

    /// Fetch the resource for `name` proven against `name_root`.
    /// `Ok(None)` means the name does not exist.
    async fn resolve(&self, name: &str, name_root: [u8; 32])
        -> Result<Option<Vec<u8>>, PoolError>;

    async fn close(&self);
}

/// In-memory pool: headers and names are fed in by the owner.
#[derive(Debug, Default)]
pub struct MemoryPool {
    events: Mutex<Option<mpsc::Sender<PoolEvent>>>,
    pending: Mutex<Vec<BlockHeader>>,
    counts: Mutex<PeerCounts>,
    names: Mutex<HashMap<String, Result<Vec<u8>, PoolError>>>,
    resolves: AtomicUsize,
    last_root: Mutex<Option<[u8; 32]>>,
    opened: Mutex<Option<PoolOptions>>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue headers for delivery. Delivered immediately if the pool is open.
    pub fn push_headers(&self, headers: Vec<BlockHeader>) {
        if let Some(tx) = self.events.lock().as_ref() {
            if tx.try_send(PoolEvent::Headers(headers.clone())).is_ok() {
                return;
            }
        }
        self.pending.lock().extend(headers);
    }

    pub fn set_peers(&self, total: usize, active: usize) {
        *self.counts.lock() = PeerCounts { total, active };
    }

    /// Serve `data` for `name`.
    pub fn insert_name(&self, name: impl Into<String>, data: Vec<u8>) {
        self.names.lock().insert(name.into(), Ok(data));
    }

    /// Fail lookups of `name` with `err`.
    pub fn fail_name(&self, name: impl Into<String>, err: PoolError) {
        self.names.lock().insert(name.into(), Err(err));
    }

    /// Number of `resolve` calls served so far.
    pub fn resolve_calls(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    /// Root passed to the most recent `resolve`.
    pub fn last_root(&self) -> Option<[u8; 32]> {
        *self.last_root.lock()
    }

    /// Options from the last `open`, if it happened.
    pub fn opened_with(&self) -> Option<PoolOptions> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl PeerPool for MemoryPool {
    async fn open(
        &self,
        tip: &BlockHeader,
        options: &PoolOptions,
    ) -> Result<mpsc::Receiver<PoolEvent>, PoolError> {
        debug!(height = tip.height, size = options.size, "memory pool opened");
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_SIZE);

        let pending: Vec<_> = std::mem::take(&mut *self.pending.lock())
            .into_iter()
            .filter(|h| h.height > tip.height)
            .collect();
        if !pending.is_empty() {
            tx.try_send(PoolEvent::Headers(pending))
                .map_err(|e| PoolError::Failure(e.to_string()))?;
        }

        *self.events.lock() = Some(tx);
        *self.opened.lock() = Some(options.clone());
        Ok(rx)
    }

    fn peer_counts(&self) -> PeerCounts {
        *self.counts.lock()
    }

    async fn resolve(
        &self,
        name: &str,
        name_root: [u8; 32],
    ) -> Result<Option<Vec<u8>>, PoolError> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        *self.last_root.lock() = Some(name_root);
        match self.names.lock().get(name) {
            Some(Ok(data)) => Ok(Some(data.clone())),
            Some(Err(e)) => Err(e.clone()),
            None => Ok(None),
        }
    }

    async fn close(&self) {
        if let Some(tx) = self.events.lock().take() {
            let _ = tx.try_send(PoolEvent::Closed);
        }
    }
}
