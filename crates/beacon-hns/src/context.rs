//! Resolver engine: a single-threaded event loop around the peer pool.
//!
//! A [`Context`] owns a current-thread runtime, the chain state and the pool.
//! Once started it services, per loop iteration, the exit signal, query
//! queue wake-ups, pool events and the sync timer. Other threads talk to it
//! only through a [`ContextHandle`].

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::chain::{ChainParams, ChainState};
use crate::config::EngineConfig;
use crate::error::{EngineError, ResolveError, Result};
use crate::header::BlockHeader;
use crate::pool::{PeerPool, PoolEvent, PoolOptions};
use crate::queue::{QueryQueue, ResolutionQuery};
use crate::state::{PoolState, SharedPoolState};
use crate::store::HeaderStore;

/// Answer to one resolution query: payload bytes when the name exists.
pub type ResolveOutcome = std::result::Result<Option<Vec<u8>>, ResolveError>;

/// Receives resolution answers. Called on the engine thread, so
/// implementations must return quickly.
pub trait ResolveCallback: Send + Sync + 'static {
    fn after_resolve(&self, context_id: u64, name: &str, outcome: ResolveOutcome);
}

impl<F> ResolveCallback for F
where
    F: Fn(u64, &str, ResolveOutcome) + Send + Sync + 'static,
{
    fn after_resolve(&self, context_id: u64, name: &str, outcome: ResolveOutcome) {
        self(context_id, name, outcome);
    }
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EngineState {
    Created = 0,
    Started = 1,
    Running = 2,
    ShuttingDown = 3,
    Destroyed = 4,
}

impl EngineState {
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Started,
            2 => Self::Running,
            3 => Self::ShuttingDown,
            _ => Self::Destroyed,
        }
    }
}

struct Shared {
    queue: QueryQueue,
    exit: Notify,
    state: AtomicU8,
    stored_height: AtomicU32,
    pool_state: SharedPoolState,
}

impl Shared {
    fn state(&self) -> EngineState {
        EngineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: EngineState, to: EngineState) {
        let swapped = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire);
        assert!(
            swapped.is_ok(),
            "invalid engine transition {from:?} -> {to:?} (state is {:?})",
            self.state()
        );
    }
}

/// Thread-safe handle to a running engine.
#[derive(Clone)]
pub struct ContextHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ContextHandle {
    /// Queue a name for resolution. The answer arrives on the engine's
    /// [`ResolveCallback`] tagged with `context_id`.
    pub fn resolve(&self, name: impl Into<String>, context_id: u64) {
        self.shared
            .queue
            .enqueue(ResolutionQuery::new(name, context_id));
    }

    /// Ask the loop to stop. Safe from any thread, idempotent.
    pub fn shutdown(&self) {
        self.shared.exit.notify_one();
    }

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Height of the last successful header store write.
    pub fn stored_height(&self) -> u32 {
        self.shared.stored_height.load(Ordering::Acquire)
    }

    pub fn pool_state(&self) -> &SharedPoolState {
        &self.shared.pool_state
    }

    pub fn chain_ready(&self) -> bool {
        self.shared.pool_state.chain_ready()
    }

    pub fn chain_height(&self) -> u32 {
        self.shared.pool_state.chain_height()
    }

    pub fn chain_progress(&self) -> f32 {
        self.shared.pool_state.sync_progress()
    }

    pub fn total_peers(&self) -> usize {
        self.shared.pool_state.total_peers()
    }

    pub fn active_peers(&self) -> usize {
        self.shared.pool_state.active_peers()
    }

    pub fn name_root(&self) -> [u8; 32] {
        self.shared.pool_state.name_root()
    }
}

/// The resolver engine.
pub struct Context {
    runtime: Runtime,
    engine: Engine,
}

struct Engine {
    config: EngineConfig,
    chain: ChainState,
    store: Option<HeaderStore>,
    pool: Arc<dyn PeerPool>,
    callback: Arc<dyn ResolveCallback>,
    shared: Arc<Shared>,
}

impl Context {
    /// Allocate the runtime, queue, signals and chain state.
    pub fn new(
        config: EngineConfig,
        params: ChainParams,
        pool: Arc<dyn PeerPool>,
        callback: impl ResolveCallback,
    ) -> Result<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| EngineError::Create(e.to_string()))?;

        let store = config.headers_file.clone().map(HeaderStore::new);
        let shared = Arc::new(Shared {
            queue: QueryQueue::new(),
            exit: Notify::new(),
            state: AtomicU8::new(EngineState::Created as u8),
            stored_height: AtomicU32::new(0),
            pool_state: SharedPoolState::new(),
        });

        Ok(Self {
            runtime,
            engine: Engine {
                config,
                chain: ChainState::new(params),
                store,
                pool,
                callback: Arc::new(callback),
                shared,
            },
        })
    }

    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            shared: Arc::clone(&self.engine.shared),
        }
    }

    /// Run the loop on the current thread until shutdown.
    pub fn start(self) -> Result<()> {
        let Self { runtime, mut engine } = self;
        let shared = Arc::clone(&engine.shared);

        let result = runtime.block_on(engine.run());

        // pending callbacks are dropped with the runtime
        drop(engine);
        drop(runtime);
        match shared.state() {
            EngineState::Created | EngineState::Started => {
                shared.state.store(EngineState::Destroyed as u8, Ordering::Release);
            }
            _ => shared.transition(EngineState::ShuttingDown, EngineState::Destroyed),
        }
        result
    }

    /// Run the loop on a dedicated `hns-engine` thread.
    pub fn spawn(self) -> Result<(ContextHandle, JoinHandle<Result<()>>)> {
        let handle = self.handle();
        let join = std::thread::Builder::new()
            .name("hns-engine".into())
            .spawn(move || self.start())
            .map_err(|e| EngineError::Create(e.to_string()))?;
        Ok((handle, join))
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Engine {
    async fn run(&mut self) -> Result<()> {
        self.shared
            .transition(EngineState::Created, EngineState::Started);

        if let Some(store) = &self.store {
            if let Err(e) = store.restore(&mut self.chain) {
                warn!(path = %store.path().display(), error = %e, "failed restoring headers");
            }
            if self.chain.maybe_sync(now()) {
                info!(height = self.chain.height(), "chain is fully synced");
            }
            self.shared
                .stored_height
                .store(self.chain.height(), Ordering::Release);
        }

        let options = PoolOptions {
            size: self.config.pool_size,
            user_agent: self.config.user_agent.clone(),
        };
        let mut events = self.pool.open(self.chain.tip(), &options).await?;

        let mut timer = tokio::time::interval(self.config.sync_interval());
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.shared
            .transition(EngineState::Started, EngineState::Running);
        info!(height = self.chain.height(), "engine running");

        let shared = Arc::clone(&self.shared);
        let mut pool_open = true;
        loop {
            tokio::select! {
                biased;
                () = shared.exit.notified() => break,
                () = shared.queue.notified() => self.drain_queue(),
                event = events.recv(), if pool_open => match event {
                    Some(PoolEvent::Headers(headers)) => self.on_headers(headers),
                    Some(PoolEvent::Closed) | None => {
                        warn!("peer pool closed");
                        pool_open = false;
                    }
                },
                _ = timer.tick() => self.on_tick(),
            }
        }

        self.shared
            .transition(EngineState::Running, EngineState::ShuttingDown);
        info!("shutting down");
        self.pool.close().await;
        let dropped = shared.queue.clear();
        if dropped > 0 {
            debug!(dropped, "discarded pending queries");
        }
        Ok(())
    }

    /// Dequeue and process everything; wake-ups are coalesced.
    fn drain_queue(&self) {
        while let Some(query) = self.shared.queue.dequeue() {
            debug!(name = %query.name, "queue is processing name");
            self.resolve_name(query);
        }
    }

    fn resolve_name(&self, query: ResolutionQuery) {
        let callback = Arc::clone(&self.callback);

        let rejection = if !self.chain.synced() || !self.chain.is_ready(now()) {
            Some(ResolveError::NotSynced)
        } else if self.pool.peer_counts().active == 0 {
            Some(ResolveError::NoPeers)
        } else {
            None
        };

        if let Some(err) = rejection {
            tokio::spawn(async move {
                callback.after_resolve(query.context_id, &query.name, Err(err));
            });
            return;
        }

        let pool = Arc::clone(&self.pool);
        let root = self
            .chain
            .name_root()
            .unwrap_or_else(|| self.shared.pool_state.name_root());
        tokio::spawn(async move {
            let outcome = match pool.resolve(&query.name, root).await {
                Ok(Some(data)) if !data.is_empty() => Ok(Some(data)),
                Ok(_) => Ok(None),
                Err(e) => Err(ResolveError::from(e)),
            };
            callback.after_resolve(query.context_id, &query.name, outcome);
        });
    }

    fn on_headers(&mut self, headers: Vec<BlockHeader>) {
        for header in headers {
            if let Err(e) = self.chain.append(header) {
                warn!(height = self.chain.height(), error = %e, "ignoring header");
                break;
            }
        }
        if self.chain.maybe_sync(now()) {
            info!(height = self.chain.height(), "chain is fully synced");
        }
    }

    fn on_tick(&self) {
        self.update_pool_state();

        let Some(store) = &self.store else {
            return;
        };
        if !self.chain.synced() {
            return;
        }

        let stored = self.shared.stored_height.load(Ordering::Acquire);
        let diff = self.chain.height().saturating_sub(stored);
        if diff == 0 || (stored != 0 && diff < self.config.store_every) {
            return;
        }

        match store.write(&self.chain) {
            Ok(height) => {
                self.shared.stored_height.store(height, Ordering::Release);
                info!(height, "block headers stored successfully");
            }
            Err(e) => warn!(path = %store.path().display(), error = %e, "failed storing block headers"),
        }
    }

    fn update_pool_state(&self) {
        let now = now();
        let counts = self.pool.peer_counts();
        let name_root = self
            .chain
            .name_root()
            .unwrap_or_else(|| self.shared.pool_state.name_root());

        self.shared.pool_state.publish(PoolState {
            chain_ready: self.chain.is_ready(now),
            chain_height: self.chain.height(),
            sync_progress: self.chain.progress(now),
            total_peers: counts.total,
            active_peers: counts.active,
            name_root,
        });
    }
}
