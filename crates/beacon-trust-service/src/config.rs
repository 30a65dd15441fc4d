//! Trust service configuration.

use beacon_hns::{default_data_dir, ChainParams, EngineConfig};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ServiceError};

/// Configuration for a [`TrustService`](crate::TrustService).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// RPC listen address (default: 127.0.0.1:44961).
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory for the header cache (default: `<config dir>/Beacon/ServiceCache`).
    #[serde(default = "default_data_dir")]
    pub data_dir: Option<PathBuf>,

    /// Chain the resolver follows.
    #[serde(default)]
    pub network: Network,

    /// Resolver engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// TLSA lookup settings.
    #[serde(default)]
    pub tlsa: TlsaConfig,
}

/// Handshake network selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Regtest,
}

impl Network {
    pub fn params(self) -> ChainParams {
        match self {
            Self::Mainnet => ChainParams::mainnet(),
            Self::Regtest => ChainParams::regtest(),
        }
    }
}

/// TLSA lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsaConfig {
    /// Handshake-aware recursive resolvers; empty uses the system configuration.
    #[serde(default)]
    pub nameservers: Vec<IpAddr>,

    #[serde(default = "default_nameserver_port")]
    pub nameserver_port: u16,

    /// Maximum number of cached TLSA answers.
    #[serde(default = "default_cache_size")]
    pub cache_size: usize,

    /// Lookup attempts per verification.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// TTL applied to answers without records (seconds).
    #[serde(default = "default_negative_ttl")]
    pub negative_ttl_secs: u64,

    /// Per-query timeout (milliseconds).
    #[serde(default = "default_query_timeout")]
    pub query_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            data_dir: default_data_dir(),
            network: Network::default(),
            engine: EngineConfig::default(),
            tlsa: TlsaConfig::default(),
        }
    }
}

impl Default for TlsaConfig {
    fn default() -> Self {
        Self {
            nameservers: Vec::new(),
            nameserver_port: default_nameserver_port(),
            cache_size: default_cache_size(),
            attempts: default_attempts(),
            negative_ttl_secs: default_negative_ttl(),
            query_timeout_ms: default_query_timeout(),
        }
    }
}

impl ServiceConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| ServiceError::Config(e.to_string()))
        } else {
            Ok(Self::default())
        }
    }

    /// Engine settings with the header file placed in `data_dir` unless one
    /// is set explicitly.
    pub fn engine_config(&self) -> EngineConfig {
        match (&self.engine.headers_file, &self.data_dir) {
            (None, Some(dir)) => self.engine.clone().with_data_dir(dir),
            _ => self.engine.clone(),
        }
    }
}

impl TlsaConfig {
    pub const fn negative_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_ttl_secs)
    }

    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

// Default value functions for serde.
fn default_listen() -> String {
    String::from("127.0.0.1:44961")
}

const fn default_nameserver_port() -> u16 {
    53
}

const fn default_cache_size() -> usize {
    100
}

const fn default_attempts() -> u32 {
    3
}

const fn default_negative_ttl() -> u64 {
    60
}

const fn default_query_timeout() -> u64 {
    5000
}
