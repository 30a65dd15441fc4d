//! Child-process hosting for the trust service.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ManagerError;
use crate::manager::{BoundService, ServiceLauncher, ServiceRemote};

/// Spawns the service executable with its stdin as the control channel.
#[derive(Debug, Clone)]
pub struct ChildProcessLauncher {
    program: PathBuf,
    args: Vec<String>,
    endpoint: String,
    display_name: String,
}

impl ChildProcessLauncher {
    pub fn new(program: impl Into<PathBuf>, endpoint: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            endpoint: endpoint.into(),
            display_name: String::from("Trust Service"),
        }
    }

    /// Build from the `[manager]` section; `program` is required.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ManagerError> {
        let program = config
            .manager
            .program
            .clone()
            .ok_or_else(|| ManagerError::Config("manager.program is not set".into()))?;
        Ok(Self::new(program, config.endpoint.clone())
            .args(config.manager.args.clone())
            .display_name(config.manager.display_name.clone()))
    }

    #[must_use]
    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

impl ServiceLauncher for ChildProcessLauncher {
    fn launch(&self) -> Result<BoundService, ManagerError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ManagerError::Launch {
                name: self.display_name.clone(),
                reason: e.to_string(),
            })?;
        let control = child.stdin.take().ok_or_else(|| ManagerError::Launch {
            name: self.display_name.clone(),
            reason: "no control pipe".into(),
        })?;
        info!(service = %self.display_name, pid = ?child.id(), "service process spawned");

        let (disconnect_tx, disconnected) = oneshot::channel();
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let name = self.display_name.clone();
        tokio::spawn(async move {
            let exited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            match exited {
                Some(Ok(status)) => {
                    warn!(service = %name, %status, "service process exited");
                    let _ = disconnect_tx.send(());
                }
                Some(Err(e)) => {
                    warn!(service = %name, error = %e, "lost service process");
                    let _ = disconnect_tx.send(());
                }
                None => {
                    if let Err(e) = child.kill().await {
                        warn!(service = %name, error = %e, "failed stopping service process");
                    }
                    debug!(service = %name, "service process stopped");
                }
            }
        });

        Ok(BoundService {
            remote: Box::new(ChildRemote {
                control,
                endpoint: self.endpoint.clone(),
                _kill: kill_tx,
            }),
            disconnected,
            in_process: None,
        })
    }
}

/// Dropping it closes the control pipe and stops the child.
struct ChildRemote {
    control: ChildStdin,
    endpoint: String,
    _kill: oneshot::Sender<()>,
}

#[async_trait]
impl ServiceRemote for ChildRemote {
    async fn launch(&mut self) -> Result<String, ManagerError> {
        self.control
            .write_all(b"launch\n")
            .await
            .map_err(|e| ManagerError::Control(e.to_string()))?;
        self.control
            .flush()
            .await
            .map_err(|e| ManagerError::Control(e.to_string()))?;
        Ok(self.endpoint.clone())
    }
}
