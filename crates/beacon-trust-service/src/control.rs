//! Child-side control loop.
//!
//! A service hosted as a child process reads newline-delimited commands
//! from its control pipe. `launch` starts the service; end of input stops
//! it.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use crate::error::Result;
use crate::service::TrustService;

/// Command understood on the control pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Launch,
    Unknown(String),
}

impl ControlCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "" => None,
            "launch" => Some(Self::Launch),
            other => Some(Self::Unknown(other.to_owned())),
        }
    }
}

/// Serve control commands from `reader` until it closes.
///
/// A failed launch ends the loop with the error; the service is shut down
/// either way.
pub async fn run_control_loop<R>(service: &TrustService, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e.into()),
        };
        match ControlCommand::parse(&line) {
            Some(ControlCommand::Launch) => match service.launch().await {
                Ok(addr) => info!(addr = %addr, "launched on request"),
                Err(e) => {
                    error!(error = %e, "launch failed");
                    break Err(e);
                }
            },
            Some(ControlCommand::Unknown(command)) => {
                warn!(command = %command, "unknown control command");
            }
            None => {}
        }
    };
    service.shutdown().await;
    info!("control pipe closed");
    result
}

/// Run the control loop on this process' stdin.
pub async fn run_stdin_control(service: &TrustService) -> Result<()> {
    run_control_loop(service, BufReader::new(tokio::io::stdin())).await
}
