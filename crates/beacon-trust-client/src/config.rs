//! Client configuration types.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ManagerError;

/// Retry and deadline policy for one remote call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Maximum number of retry attempts after the first one
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Overall deadline for the call, retries included (milliseconds)
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,

    /// Keep retrying the connection until the service is up
    #[serde(default = "default_wait_for_ready")]
    pub wait_for_ready: bool,

    /// Initial backoff between attempts (milliseconds)
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff between attempts (milliseconds)
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl CallConfig {
    /// Policy used for certificate verification calls
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_timeout(),
            wait_for_ready: default_wait_for_ready(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }

    /// Set maximum retries
    #[must_use]
    pub const fn max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// Set the overall deadline
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        // deadlines beyond u64 milliseconds are not meaningful
        #[allow(clippy::cast_possible_truncation)]
        let ms = timeout.as_millis() as u64;
        self.timeout_ms = ms;
        self
    }

    #[must_use]
    pub const fn wait_for_ready(mut self, wait: bool) -> Self {
        self.wait_for_ready = wait;
        self
    }

    /// Set initial backoff duration
    #[must_use]
    pub const fn initial_backoff(mut self, duration: Duration) -> Self {
        #[allow(clippy::cast_possible_truncation)]
        let ms = duration.as_millis() as u64;
        self.initial_backoff_ms = ms;
        self
    }

    pub const fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Calculate backoff for a given attempt
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let backoff = self
            .initial_backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(backoff.min(self.max_backoff_ms))
    }
}

/// How the trust service process is hosted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Host the service on a thread of this process instead of a child
    #[serde(default)]
    pub in_process: bool,

    /// Service executable for the child-process launcher
    #[serde(default)]
    pub program: Option<PathBuf>,

    /// Extra arguments for the service executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Name shown in logs and process listings
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            in_process: false,
            program: None,
            args: Vec::new(),
            display_name: default_display_name(),
        }
    }
}

/// Top-level client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Address the trust service listens on
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Port used for TLSA lookups
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default)]
    pub call: CallConfig,

    #[serde(default)]
    pub manager: ManagerConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            port: default_port(),
            call: CallConfig::default(),
            manager: ManagerConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file, falling back to defaults
    pub fn load(path: &Path) -> Result<Self, ManagerError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ManagerError::Config(e.to_string()))?;
            toml::from_str(&content).map_err(|e| ManagerError::Config(e.to_string()))
        } else {
            Ok(Self::default())
        }
    }
}

// Default value functions for serde.
const fn default_max_retries() -> u32 {
    5
}

const fn default_timeout() -> u64 {
    10_000
}

const fn default_wait_for_ready() -> bool {
    true
}

const fn default_initial_backoff() -> u64 {
    50
}

const fn default_max_backoff() -> u64 {
    1_000
}

fn default_display_name() -> String {
    String::from("Trust Service")
}

fn default_endpoint() -> String {
    String::from("127.0.0.1:44961")
}

fn default_port() -> String {
    String::from("443")
}
