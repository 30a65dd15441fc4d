//! Launcher selection from the client's `[manager]` settings.

use beacon_hns::PeerPool;
use beacon_trust_client::{
    BoundService, ChildProcessLauncher, ClientConfig, ManagerError, ManagerHandle, ServiceLauncher,
    TrustServiceManager,
};
use beacon_trust_service::{InProcessLauncher, ServiceConfig};
use std::sync::Arc;
use tracing::debug;

/// The launcher a [`ClientConfig`] asks for.
#[derive(Debug)]
pub enum Launcher {
    /// Service on a thread of this process
    InProcess(InProcessLauncher),
    /// Service executable driven over its stdin
    ChildProcess(ChildProcessLauncher),
}

impl Launcher {
    /// In-process when `manager.in_process` is set, otherwise the configured
    /// executable. `service` and `pool` are only used in-process.
    pub fn from_config(
        config: &ClientConfig,
        service: ServiceConfig,
        pool: Arc<dyn PeerPool>,
    ) -> Result<Self, ManagerError> {
        if config.manager.in_process {
            debug!("hosting trust service in-process");
            Ok(Self::InProcess(
                InProcessLauncher::new(service, pool).thread_name(config.manager.display_name.clone()),
            ))
        } else {
            Ok(Self::ChildProcess(ChildProcessLauncher::from_config(config)?))
        }
    }

    /// Start a manager supervising this launcher.
    pub fn spawn(self, config: &ClientConfig) -> ManagerHandle {
        TrustServiceManager::spawn(Arc::new(self), &config.manager)
    }
}

impl ServiceLauncher for Launcher {
    fn launch(&self) -> Result<BoundService, ManagerError> {
        match self {
            Self::InProcess(launcher) => launcher.launch(),
            Self::ChildProcess(launcher) => launcher.launch(),
        }
    }
}
