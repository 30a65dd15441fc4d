//! Trust service process manager.
//!
//! [`TrustServiceManager`] runs as a task that exclusively owns the bound
//! service. Callers talk to it through a cloneable [`ManagerHandle`]; every
//! rebind decision, crash notification and observer change is serialized
//! through that task, so two callers can never spawn two services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::error::ManagerError;

/// Control channel to a bound service.
#[async_trait]
pub trait ServiceRemote: Send {
    /// Tell the service to start serving. Returns the endpoint to call.
    async fn launch(&mut self) -> Result<String, ManagerError>;
}

/// Starts (or connects to) a service instance.
pub trait ServiceLauncher: Send + Sync + 'static {
    fn launch(&self) -> Result<BoundService, ManagerError>;
}

/// A freshly bound service.
pub struct BoundService {
    pub remote: Box<dyn ServiceRemote>,
    /// Resolves (or closes) when the service goes away
    pub disconnected: oneshot::Receiver<()>,
    /// Set when the service lives inside this process
    pub in_process: Option<InProcessInstance>,
}

/// A service instance hosted on a runtime of this process.
pub struct InProcessInstance {
    instance: Box<dyn Any + Send>,
    task_queue: Handle,
}

impl InProcessInstance {
    /// `task_queue` is the runtime the instance lives on.
    pub fn new(instance: impl Any + Send, task_queue: Handle) -> Self {
        Self {
            instance: Box::new(instance),
            task_queue,
        }
    }

    /// Drop the instance on its own task queue instead of here.
    pub fn delete_soon(self) {
        let Self {
            instance,
            task_queue,
        } = self;
        task_queue.spawn(async move {
            drop(instance);
        });
    }
}

/// Where to send calls for the currently bound service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub addr: String,
    /// Bind counter, bumped on every rebind
    pub generation: u64,
}

/// Published to crash observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashEvent {
    pub at: DateTime<Utc>,
    pub generation: u64,
}

type Observer = Box<dyn Fn(&CrashEvent) + Send>;

enum Command {
    GetService(oneshot::Sender<Result<ServiceEndpoint, ManagerError>>),
    Subscribe(u64, Observer),
    Unsubscribe(u64),
    LastCrash(oneshot::Sender<Option<DateTime<Utc>>>),
    HostShutdown,
    Shutdown(oneshot::Sender<()>),
}

struct Bound {
    remote: Box<dyn ServiceRemote>,
    in_process: Option<InProcessInstance>,
    endpoint: ServiceEndpoint,
}

/// Owner of the trust service binding.
pub struct TrustServiceManager {
    launcher: Arc<dyn ServiceLauncher>,
    display_name: String,
    bound: Option<Bound>,
    generation: u64,
    observers: BTreeMap<u64, Observer>,
    last_crash: Option<DateTime<Utc>>,
    host_shutting_down: bool,
    disconnects: mpsc::UnboundedSender<u64>,
}

impl TrustServiceManager {
    /// Start the manager task on the current runtime.
    pub fn spawn(launcher: Arc<dyn ServiceLauncher>, config: &ManagerConfig) -> ManagerHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (disconnects_tx, disconnects) = mpsc::unbounded_channel();
        let manager = Self {
            launcher,
            display_name: config.display_name.clone(),
            bound: None,
            generation: 0,
            observers: BTreeMap::new(),
            last_crash: None,
            host_shutting_down: false,
            disconnects: disconnects_tx,
        };
        tokio::spawn(manager.run(commands, disconnects));
        ManagerHandle {
            commands: commands_tx,
            next_subscription: Arc::new(AtomicU64::new(0)),
        }
    }

    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut disconnects: mpsc::UnboundedReceiver<u64>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                Some(generation) = disconnects.recv() => self.on_disconnect(generation),
            }
        }
        self.release();
        debug!(service = %self.display_name, "manager stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::GetService(reply) => {
                let _ = reply.send(self.get_service().await);
            }
            Command::Subscribe(id, observer) => {
                self.observers.insert(id, observer);
            }
            Command::Unsubscribe(id) => {
                self.observers.remove(&id);
            }
            Command::LastCrash(reply) => {
                let _ = reply.send(self.last_crash);
            }
            Command::HostShutdown => {
                self.host_shutting_down = true;
            }
            Command::Shutdown(reply) => {
                self.release();
                let _ = reply.send(());
            }
        }
    }

    async fn get_service(&mut self) -> Result<ServiceEndpoint, ManagerError> {
        if let Some(bound) = &self.bound {
            return Ok(bound.endpoint.clone());
        }
        if self.host_shutting_down {
            debug!(service = %self.display_name, "host shutting down, not binding");
            return Err(ManagerError::HostShuttingDown);
        }

        let BoundService {
            mut remote,
            disconnected,
            in_process,
        } = self.launcher.launch()?;
        self.generation += 1;
        let generation = self.generation;

        let disconnects = self.disconnects.clone();
        tokio::spawn(async move {
            let _ = disconnected.await;
            let _ = disconnects.send(generation);
        });

        let addr = match remote.launch().await {
            Ok(addr) => addr,
            Err(e) => {
                warn!(service = %self.display_name, generation, error = %e, "launch call failed");
                drop(remote);
                if let Some(instance) = in_process {
                    instance.delete_soon();
                }
                return Err(e);
            }
        };
        info!(service = %self.display_name, generation, endpoint = %addr, "service launched");

        let endpoint = ServiceEndpoint { addr, generation };
        self.bound = Some(Bound {
            remote,
            in_process,
            endpoint: endpoint.clone(),
        });
        Ok(endpoint)
    }

    fn on_disconnect(&mut self, generation: u64) {
        let current = self.bound.as_ref().map(|b| b.endpoint.generation);
        if current != Some(generation) {
            debug!(generation, "ignoring disconnect of a released service");
            return;
        }
        self.release();

        let event = CrashEvent {
            at: Utc::now(),
            generation,
        };
        self.last_crash = Some(event.at);
        error!(service = %self.display_name, generation, "service crashed, restarting on next call");
        for observer in self.observers.values() {
            observer(&event);
        }
    }

    fn release(&mut self) {
        if let Some(Bound {
            remote, in_process, ..
        }) = self.bound.take()
        {
            drop(remote);
            if let Some(instance) = in_process {
                instance.delete_soon();
            }
        }
    }
}

/// Cloneable front of a [`TrustServiceManager`].
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
    next_subscription: Arc<AtomicU64>,
}

impl std::fmt::Debug for ManagerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerHandle")
            .field("closed", &self.commands.is_closed())
            .finish_non_exhaustive()
    }
}

impl ManagerHandle {
    /// Endpoint of the bound service, binding and launching it if needed.
    pub async fn get_service(&self) -> Result<ServiceEndpoint, ManagerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::GetService(tx))
            .map_err(|_| ManagerError::Stopped)?;
        rx.await.map_err(|_| ManagerError::Stopped)?
    }

    /// Call `observer` on the manager task after every crash.
    /// Dropping the subscription unsubscribes.
    pub fn subscribe_crashes(
        &self,
        observer: impl Fn(&CrashEvent) + Send + 'static,
    ) -> CrashSubscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let _ = self
            .commands
            .send(Command::Subscribe(id, Box::new(observer)));
        CrashSubscription {
            id,
            commands: self.commands.clone(),
        }
    }

    pub async fn last_crash(&self) -> Option<DateTime<Utc>> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(Command::LastCrash(tx)).ok()?;
        rx.await.ok().flatten()
    }

    /// No new service is bound after this.
    pub fn begin_host_shutdown(&self) {
        let _ = self.commands.send(Command::HostShutdown);
    }

    /// Release the bound service.
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

/// Live crash observer registration.
pub struct CrashSubscription {
    id: u64,
    commands: mpsc::UnboundedSender<Command>,
}

impl Drop for CrashSubscription {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unsubscribe(self.id));
    }
}
