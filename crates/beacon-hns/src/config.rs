//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{EngineError, Result};

/// File name of the header store inside the data directory.
pub const HEADERS_FILE_NAME: &str = "chain.bin";

/// Configuration for a Handshake engine [`Context`](crate::Context).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Header store path; `None` disables persistence.
    #[serde(default)]
    pub headers_file: Option<PathBuf>,

    /// Target number of outbound peers.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// User agent announced to peers.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timer interval for snapshot publishing and checkpoints (milliseconds).
    #[serde(default = "default_sync_interval")]
    pub sync_interval_ms: u64,

    /// New blocks required before the header store is rewritten.
    #[serde(default = "default_store_every")]
    pub store_every: u32,

    /// How long a resolver client waits for one answer (milliseconds).
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            headers_file: None,
            pool_size: default_pool_size(),
            user_agent: default_user_agent(),
            sync_interval_ms: default_sync_interval(),
            store_every: default_store_every(),
            resolve_timeout_ms: default_resolve_timeout(),
        }
    }
}

impl EngineConfig {
    /// Load config from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content).map_err(|e| EngineError::Config(e.to_string()))
        } else {
            Ok(Self::default())
        }
    }

    /// Store headers as `chain.bin` inside `dir`.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.headers_file = Some(dir.as_ref().join(HEADERS_FILE_NAME));
        self
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }

    pub const fn resolve_timeout(&self) -> Duration {
        Duration::from_millis(self.resolve_timeout_ms)
    }
}

/// Default directory for the header cache (`<config dir>/Beacon/ServiceCache`).
pub fn default_data_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Beacon").join("ServiceCache"))
}

// Default value functions for serde.
const fn default_pool_size() -> usize {
    4
}

fn default_user_agent() -> String {
    String::from("beacon")
}

const fn default_sync_interval() -> u64 {
    500
}

const fn default_store_every() -> u32 {
    12
}

const fn default_resolve_timeout() -> u64 {
    10_000
}
