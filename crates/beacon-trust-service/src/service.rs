//! The trust service: resolver engine plus RPC server.

use beacon_core::ServiceStatus;
use beacon_hns::{ChainParams, PeerPool, ResolverClient};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::ServiceConfig;
use crate::dane::{DaneVerifier, HnsDaneVerifier};
use crate::error::{Result, ServiceError};
use crate::handler::{StatusSource, TrustHandler};
use crate::server::RpcServer;
use crate::tlsa::{TlsaSource, ValidatingTlsaSource};

struct Running {
    resolver: Arc<ResolverClient>,
    server: RpcServer,
}

enum Phase {
    Idle,
    Running(Running),
    Stopped,
}

/// Trust service instance. [`launch`](Self::launch) is idempotent.
pub struct TrustService {
    config: ServiceConfig,
    params: ChainParams,
    pool: Arc<dyn PeerPool>,
    tlsa: Option<Arc<dyn TlsaSource>>,
    dane: Option<Arc<dyn DaneVerifier>>,
    phase: Mutex<Phase>,
}

impl std::fmt::Debug for TrustService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustService")
            .field("listen", &self.config.listen)
            .finish_non_exhaustive()
    }
}

impl TrustService {
    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder(config: ServiceConfig, pool: Arc<dyn PeerPool>) -> TrustServiceBuilder {
        TrustServiceBuilder {
            params: config.network.params(),
            config,
            pool,
            tlsa: None,
            dane: None,
        }
    }

    /// Start the resolver engine and the RPC server, once.
    ///
    /// Returns the address the service answers on. Later calls return the
    /// same address without starting anything.
    pub async fn launch(&self) -> Result<SocketAddr> {
        let mut phase = self.phase.lock().await;
        match &*phase {
            Phase::Running(running) => return Ok(running.server.local_addr()),
            Phase::Stopped => return Err(ServiceError::Stopped),
            Phase::Idle => {}
        }

        let engine = self.config.engine_config();
        if let Some(dir) = engine.headers_file.as_deref().and_then(std::path::Path::parent) {
            std::fs::create_dir_all(dir)?;
        }
        let resolver = Arc::new(ResolverClient::start(
            engine,
            self.params.clone(),
            Arc::clone(&self.pool),
        )?);

        let dane = match &self.dane {
            Some(dane) => Arc::clone(dane),
            None => {
                let tlsa = match &self.tlsa {
                    Some(tlsa) => Arc::clone(tlsa),
                    None => Arc::new(ValidatingTlsaSource::from_config(&self.config.tlsa)?),
                };
                Arc::new(HnsDaneVerifier::new(resolver.clone(), tlsa, &self.config.tlsa))
            }
        };
        let handler = TrustHandler::new(dane, resolver.clone());
        let server = RpcServer::bind(&self.config.listen, handler).await?;
        let addr = server.local_addr();

        *phase = Phase::Running(Running { resolver, server });
        info!(addr = %addr, "trust service launched");
        Ok(addr)
    }

    /// Address of a launched service.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        match &*self.phase.lock().await {
            Phase::Running(running) => Some(running.server.local_addr()),
            _ => None,
        }
    }

    /// Status summary of a launched service.
    pub async fn status(&self) -> Option<ServiceStatus> {
        match &*self.phase.lock().await {
            Phase::Running(running) => Some(StatusSource::status(running.resolver.as_ref())),
            _ => None,
        }
    }

    /// Stop the server and the resolver. The instance cannot be relaunched.
    pub async fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.phase.lock().await, Phase::Stopped);
        if let Phase::Running(Running { resolver, server }) = previous {
            server.shutdown().await;
            let stopping = tokio::task::spawn_blocking(move || resolver.shutdown());
            if stopping.await.is_err() {
                tracing::warn!("resolver shutdown panicked");
            }
            info!("trust service stopped");
        }
    }
}

/// Builder for configuring a [`TrustService`]
pub struct TrustServiceBuilder {
    config: ServiceConfig,
    params: ChainParams,
    pool: Arc<dyn PeerPool>,
    tlsa: Option<Arc<dyn TlsaSource>>,
    dane: Option<Arc<dyn DaneVerifier>>,
}

impl TrustServiceBuilder {
    /// Override the chain parameters picked by `network`
    #[must_use]
    pub fn chain_params(mut self, params: ChainParams) -> Self {
        self.params = params;
        self
    }

    /// Use `source` for TLSA lookups instead of the configured forwarders
    #[must_use]
    pub fn tlsa_source(mut self, source: Arc<dyn TlsaSource>) -> Self {
        self.tlsa = Some(source);
        self
    }

    /// Replace the DANE verifier entirely
    #[must_use]
    pub fn dane_verifier(mut self, verifier: Arc<dyn DaneVerifier>) -> Self {
        self.dane = Some(verifier);
        self
    }

    #[must_use]
    pub fn build(self) -> TrustService {
        TrustService {
            config: self.config,
            params: self.params,
            pool: self.pool,
            tlsa: self.tlsa,
            dane: self.dane,
            phase: Mutex::new(Phase::Idle),
        }
    }
}
