//! Async front-end to the resolver engine.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::chain::ChainParams;
use crate::config::EngineConfig;
use crate::context::{Context, ContextHandle, ResolveOutcome};
use crate::error::{ResolveError, Result};
use crate::pool::PeerPool;
use crate::resource::Resource;

/// Health summary of the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverStatus {
    pub total_peers: usize,
    pub active_peers: usize,
    pub height: u32,
    /// Hex name root the resolver answers against
    pub urkel: String,
    pub synced: bool,
    /// Sync progress in percent
    pub progress: u32,
}

type WaiterList = Vec<(u64, oneshot::Sender<ResolveOutcome>)>;

/// Callers waiting on an answer, keyed by name.
#[derive(Debug, Default)]
struct Waiters {
    by_name: Mutex<HashMap<String, WaiterList>>,
    next_id: AtomicU64,
}

impl Waiters {
    /// Register a waiter. The flag is true for the first waiter on `name`,
    /// which is the one that has to enqueue the query.
    fn register(self: &Arc<Self>, name: &str) -> (Waiter, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let mut by_name = self.by_name.lock();
        let list = by_name.entry(name.to_owned()).or_default();
        let first = list.is_empty();
        list.push((id, tx));
        drop(by_name);

        let waiter = Waiter {
            id,
            name: name.to_owned(),
            rx,
            waiters: Arc::clone(self),
        };
        (waiter, first)
    }

    fn deliver(&self, name: &str, outcome: &ResolveOutcome) -> usize {
        let Some(list) = self.by_name.lock().remove(name) else {
            return 0;
        };
        let n = list.len();
        for (_, tx) in list {
            let _ = tx.send(outcome.clone());
        }
        n
    }

    fn fail_all(&self, err: &ResolveError) {
        let all = std::mem::take(&mut *self.by_name.lock());
        for (_, tx) in all.into_values().flatten() {
            let _ = tx.send(Err(err.clone()));
        }
    }

    fn unregister(&self, name: &str, id: u64) {
        let mut by_name = self.by_name.lock();
        if let Some(list) = by_name.get_mut(name) {
            list.retain(|(i, _)| *i != id);
            if list.is_empty() {
                by_name.remove(name);
            }
        }
    }

    fn len(&self) -> usize {
        self.by_name.lock().values().map(Vec::len).sum()
    }
}

/// One registered waiter; unregisters itself when dropped.
struct Waiter {
    id: u64,
    name: String,
    rx: oneshot::Receiver<ResolveOutcome>,
    waiters: Arc<Waiters>,
}

impl Waiter {
    async fn wait(mut self, timeout: Duration) -> ResolveOutcome {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(ResolveError::Shutdown),
            Err(_) => Err(ResolveError::Timeout),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.waiters.unregister(&self.name, self.id);
    }
}

/// Owns an engine thread and answers lookups asynchronously.
///
/// Concurrent lookups of one name share a single engine query.
pub struct ResolverClient {
    handle: ContextHandle,
    waiters: Arc<Waiters>,
    join: Mutex<Option<JoinHandle<Result<()>>>>,
    closed: AtomicBool,
    resolve_timeout: Duration,
}

impl std::fmt::Debug for ResolverClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverClient")
            .field("handle", &self.handle)
            .field("waiters", &self.waiters.len())
            .finish_non_exhaustive()
    }
}

impl ResolverClient {
    /// Create the engine and start it on its own thread.
    pub fn start(config: EngineConfig, params: ChainParams, pool: Arc<dyn PeerPool>) -> Result<Self> {
        let waiters = Arc::new(Waiters::default());
        let resolve_timeout = config.resolve_timeout();

        let callback = {
            let waiters = Arc::clone(&waiters);
            move |_: u64, name: &str, outcome: ResolveOutcome| {
                let delivered = waiters.deliver(name, &outcome);
                debug!(name, delivered, "resolution delivered");
            }
        };
        let (handle, join) = Context::new(config, params, pool, callback)?.spawn()?;
        info!("resolver started");

        Ok(Self {
            handle,
            waiters,
            join: Mutex::new(Some(join)),
            closed: AtomicBool::new(false),
            resolve_timeout,
        })
    }

    /// Resolve `name`, returning the raw resource bytes if it exists.
    pub async fn resolve(&self, name: &str) -> ResolveOutcome {
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        if name.is_empty() || name.contains('.') {
            return Err(ResolveError::BadArgs);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(ResolveError::Shutdown);
        }

        let (waiter, first) = self.waiters.register(&name);
        if first {
            self.handle.resolve(name, waiter.id);
        }
        waiter.wait(self.resolve_timeout).await
    }

    /// Resolve `name` and decode its resource.
    pub async fn get_zone(&self, name: &str) -> std::result::Result<Option<Resource>, ResolveError> {
        match self.resolve(name).await? {
            Some(data) => Resource::decode(&data)
                .map(Some)
                .map_err(|e| ResolveError::Decode(e.to_string())),
            None => Ok(None),
        }
    }

    pub fn handle(&self) -> &ContextHandle {
        &self.handle
    }

    pub fn ready(&self) -> bool {
        self.handle.chain_ready()
    }

    pub fn progress(&self) -> f32 {
        self.handle.chain_progress()
    }

    pub fn height(&self) -> u32 {
        self.handle.chain_height()
    }

    pub fn peer_count(&self) -> usize {
        self.handle.total_peers()
    }

    pub fn active_peer_count(&self) -> usize {
        self.handle.active_peers()
    }

    pub fn name_root(&self) -> [u8; 32] {
        self.handle.name_root()
    }

    /// Copy of the current snapshot as a status summary.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn status(&self) -> ResolverStatus {
        let state = self.handle.pool_state().snapshot();
        ResolverStatus {
            total_peers: state.total_peers,
            active_peers: state.active_peers,
            height: state.chain_height,
            urkel: hex::encode(state.name_root),
            synced: state.chain_ready,
            progress: (state.sync_progress.clamp(0.0, 1.0) * 100.0).round() as u32,
        }
    }

    /// Stop the engine, wait for its thread and fail every pending lookup.
    /// Idempotent.
    pub fn shutdown(&self) {
        if !self.signal_stop() {
            return;
        }
        if let Some(join) = self.join.lock().take() {
            match join.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "resolver engine failed"),
                Err(_) => warn!("resolver engine thread panicked"),
            }
        }
        info!("resolver stopped");
    }

    /// Returns false if the client was already closed.
    fn signal_stop(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.handle.shutdown();
        self.waiters.fail_all(&ResolveError::Shutdown);
        true
    }
}

/// Dropping the client stops the engine without waiting for its thread;
/// call [`ResolverClient::shutdown`] to block until it has exited.
impl Drop for ResolverClient {
    fn drop(&mut self) {
        if self.signal_stop() {
            drop(self.join.lock().take());
            debug!("resolver engine detached");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::recent_headers;
    use crate::context::EngineState;
    use crate::pool::MemoryPool;
    use crate::resource::{DsRecord, Record};

    #[tokio::test]
    async fn test_waiters_coalesce_by_name() {
        let waiters = Arc::new(Waiters::default());
        let (a, first_a) = waiters.register("welcome");
        let (b, first_b) = waiters.register("welcome");
        let (c, first_c) = waiters.register("other");
        assert!(first_a);
        assert!(!first_b);
        assert!(first_c);
        assert_eq!(waiters.len(), 3);

        assert_eq!(waiters.deliver("welcome", &Ok(Some(vec![1]))), 2);
        assert_eq!(a.wait(Duration::from_secs(1)).await, Ok(Some(vec![1])));
        assert_eq!(b.wait(Duration::from_secs(1)).await, Ok(Some(vec![1])));

        // a late answer finds no one
        assert_eq!(waiters.deliver("welcome", &Ok(None)), 0);

        waiters.fail_all(&ResolveError::Shutdown);
        assert_eq!(c.wait(Duration::from_secs(1)).await, Err(ResolveError::Shutdown));
        assert_eq!(waiters.len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_unregisters() {
        let waiters = Arc::new(Waiters::default());
        let (a, _) = waiters.register("welcome");
        let (b, _) = waiters.register("welcome");
        drop(a);
        assert_eq!(waiters.len(), 1);
        drop(b);
        assert_eq!(waiters.len(), 0);

        // the next waiter enqueues again
        let (_c, first) = waiters.register("welcome");
        assert!(first);
    }

    #[tokio::test]
    async fn test_waiter_times_out() {
        let waiters = Arc::new(Waiters::default());
        let (a, _) = waiters.register("slow");
        assert_eq!(
            a.wait(Duration::from_millis(20)).await,
            Err(ResolveError::Timeout)
        );
        assert_eq!(waiters.len(), 0);
    }

    fn config() -> EngineConfig {
        EngineConfig {
            sync_interval_ms: 20,
            resolve_timeout_ms: 2_000,
            ..EngineConfig::default()
        }
    }

    fn signed_zone() -> Resource {
        Resource {
            records: vec![
                Record::Ns("ns1.welcome.".into()),
                Record::Ds(DsRecord {
                    key_tag: 42,
                    algorithm: 13,
                    digest_type: 2,
                    digest: vec![9; 32],
                }),
            ],
        }
    }

    async fn wait_ready(client: &ResolverClient) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !(client.ready() && client.active_peer_count() > 0) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_get_zone() {
        let pool = Arc::new(MemoryPool::new());
        pool.push_headers(recent_headers(40));
        pool.set_peers(8, 8);
        pool.insert_name("welcome", signed_zone().encode().unwrap());
        pool.insert_name("garbage", vec![3, 1, 2]);

        let client = ResolverClient::start(config(), ChainParams::regtest(), pool.clone()).unwrap();
        wait_ready(&client).await;

        assert_eq!(client.get_zone("Welcome.").await, Ok(Some(signed_zone())));
        assert_eq!(client.get_zone("missing").await, Ok(None));
        assert!(matches!(
            client.get_zone("garbage").await,
            Err(ResolveError::Decode(_))
        ));
        assert_eq!(client.resolve("a.b").await, Err(ResolveError::BadArgs));

        let status = client.status();
        assert_eq!(status.height, 40);
        assert_eq!(status.total_peers, 8);
        assert!(status.synced);
        assert_eq!(status.urkel, hex::encode(recent_headers(40)[35].name_root));
        assert!(status.progress <= 100);

        client.shutdown();
        assert_eq!(client.resolve("welcome").await, Err(ResolveError::Shutdown));
    }

    #[tokio::test]
    async fn test_unsynced_resolve() {
        let pool = Arc::new(MemoryPool::new());
        pool.set_peers(1, 1);
        let client = ResolverClient::start(config(), ChainParams::regtest(), pool.clone()).unwrap();

        assert_eq!(client.resolve("example").await, Err(ResolveError::NotSynced));
        assert_eq!(pool.resolve_calls(), 0);
        assert!(!client.status().synced);
    }

    #[tokio::test]
    async fn test_drop_stops_engine_without_joining() {
        let pool = Arc::new(MemoryPool::new());
        pool.set_peers(1, 1);
        let client = ResolverClient::start(config(), ChainParams::regtest(), pool).unwrap();
        let handle = client.handle().clone();
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.state() != EngineState::Running {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        drop(client);
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.state() != EngineState::Destroyed {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
