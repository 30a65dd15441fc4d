//! Hosting the trust service inside the current process.

use async_trait::async_trait;
use beacon_hns::PeerPool;
use beacon_trust_client::{
    BoundService, InProcessInstance, ManagerError, ServiceLauncher, ServiceRemote,
};
use std::sync::Arc;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::ServiceConfig;
use crate::service::TrustService;

type Factory = dyn Fn() -> TrustService + Send + Sync;

/// Runs each bound service on its own thread and runtime. The runtime's
/// handle is the task queue the instance is deleted on.
pub struct InProcessLauncher {
    factory: Arc<Factory>,
    thread_name: String,
}

impl std::fmt::Debug for InProcessLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessLauncher")
            .field("thread_name", &self.thread_name)
            .finish_non_exhaustive()
    }
}

impl InProcessLauncher {
    /// Launch services built from `config` on `pool`.
    pub fn new(config: ServiceConfig, pool: Arc<dyn PeerPool>) -> Self {
        Self::with_factory(move || TrustService::builder(config.clone(), Arc::clone(&pool)).build())
    }

    /// Launch services produced by `factory`, one per bind.
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> TrustService + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            thread_name: String::from("trust-service"),
        }
    }

    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl ServiceLauncher for InProcessLauncher {
    fn launch(&self) -> Result<BoundService, ManagerError> {
        let launch_error = |reason: String| ManagerError::Launch {
            name: self.thread_name.clone(),
            reason,
        };
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| launch_error(e.to_string()))?;
        let task_queue = runtime.handle().clone();
        let service = Arc::new((self.factory)());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let (disconnect_tx, disconnected) = oneshot::channel::<()>();
        let hosted = Arc::clone(&service);
        std::thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                runtime.block_on(async move {
                    let _ = stop_rx.await;
                    hosted.shutdown().await;
                });
                debug!("in-process service stopped");
                drop(disconnect_tx);
            })
            .map_err(|e| launch_error(e.to_string()))?;

        Ok(BoundService {
            remote: Box::new(InProcessRemote {
                service,
                task_queue: task_queue.clone(),
            }),
            disconnected,
            in_process: Some(InProcessInstance::new(ServiceHost { _stop: stop_tx }, task_queue)),
        })
    }
}

/// Owned by the manager; dropping it stops the host thread.
struct ServiceHost {
    _stop: oneshot::Sender<()>,
}

struct InProcessRemote {
    service: Arc<TrustService>,
    task_queue: Handle,
}

#[async_trait]
impl ServiceRemote for InProcessRemote {
    async fn launch(&mut self) -> Result<String, ManagerError> {
        let service = Arc::clone(&self.service);
        let launched = self
            .task_queue
            .spawn(async move { service.launch().await })
            .await
            .map_err(|e| ManagerError::Control(e.to_string()))?;
        launched
            .map(|addr| addr.to_string())
            .map_err(|e| ManagerError::Launch {
                name: String::from("trust service"),
                reason: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dane::tests::{dane_ee_sha256, FakeTlsa};
    use beacon_hns::MemoryPool;
    use beacon_trust_client::{ManagerConfig, TrustServiceManager};
    use std::time::Duration;
    use tokio::net::TcpStream;

    fn launcher(dir: &tempfile::TempDir, listen: &str) -> InProcessLauncher {
        let config = ServiceConfig {
            listen: listen.to_owned(),
            data_dir: Some(dir.path().to_path_buf()),
            network: crate::config::Network::Regtest,
            ..ServiceConfig::default()
        };
        let pool: Arc<dyn PeerPool> = Arc::new(MemoryPool::new());
        InProcessLauncher::with_factory(move || {
            TrustService::builder(config.clone(), Arc::clone(&pool))
                .tlsa_source(Arc::new(FakeTlsa::records(vec![dane_ee_sha256()])))
                .build()
        })
    }

    #[tokio::test]
    async fn test_remote_launch_serves() {
        let dir = tempfile::tempdir().unwrap();
        let BoundService {
            mut remote,
            disconnected,
            in_process,
        } = launcher(&dir, "127.0.0.1:0").launch().unwrap();

        let addr = remote.launch().await.unwrap();
        assert_eq!(remote.launch().await.unwrap(), addr);
        TcpStream::connect(&addr).await.unwrap();

        // deleting the instance stops the host thread
        in_process.unwrap().delete_soon();
        let closed = tokio::time::timeout(Duration::from_secs(5), disconnected)
            .await
            .unwrap();
        assert!(closed.is_err());
        assert!(TcpStream::connect(&addr).await.is_err());
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut bound = launcher(&dir, "not an address").launch().unwrap();
        assert!(matches!(
            bound.remote.launch().await,
            Err(ManagerError::Launch { .. })
        ));
    }

    #[tokio::test]
    async fn test_manager_binds_in_process_service() {
        let dir = tempfile::tempdir().unwrap();
        let manager = TrustServiceManager::spawn(
            Arc::new(launcher(&dir, "127.0.0.1:0")),
            &ManagerConfig {
                in_process: true,
                ..ManagerConfig::default()
            },
        );
        let endpoint = manager.get_service().await.unwrap();
        assert_eq!(manager.get_service().await.unwrap(), endpoint);
        TcpStream::connect(&endpoint.addr).await.unwrap();
        manager.shutdown().await;
    }
}
