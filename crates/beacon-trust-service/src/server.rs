//! Local RPC listener.
//!
//! Every connection carries one request frame and its response, matching
//! the client transport which opens a fresh connection per attempt.

use beacon_core::wire::{read_frame, write_frame, RequestFrame};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};
use crate::handler::TrustHandler;

/// Time a client gets to send its request frame.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// A bound RPC server. Dropping it stops accepting connections.
#[derive(Debug)]
pub struct RpcServer {
    addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RpcServer {
    /// Bind `addr` and serve `handler` on the current runtime.
    pub async fn bind(addr: &str, handler: TrustHandler) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServiceError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let addr = listener.local_addr()?;
        info!(addr = %addr, "trust service listening");

        let (stop, stopped) = oneshot::channel();
        let task = tokio::spawn(accept_loop(listener, handler, stopped));
        Ok(Self {
            addr,
            stop: Some(stop),
            task,
        })
    }

    pub const fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if e.is_panic() {
                warn!("accept loop panicked");
            }
        }
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, handler: TrustHandler, mut stopped: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut stopped => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, &handler).await {
                            debug!(peer = %peer, error = %e, "connection closed with error");
                        }
                    });
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            },
        }
    }
    info!("trust service stopped listening");
}

async fn serve_connection(mut stream: TcpStream, handler: &TrustHandler) -> Result<()> {
    let frame: RequestFrame = tokio::time::timeout(READ_TIMEOUT, read_frame(&mut stream))
        .await
        .map_err(|_| ServiceError::Io(std::io::ErrorKind::TimedOut.into()))?
        .map_err(|e| ServiceError::Io(std::io::Error::other(e.to_string())))?;
    let response = handler.handle(frame).await;
    write_frame(&mut stream, &response)
        .await
        .map_err(|e| ServiceError::Io(std::io::Error::other(e.to_string())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::{FixedDane, FixedStatus};
    use beacon_core::wire::{FrameResult, ResponseFrame};
    use beacon_core::{ServiceStatus, TrustVerifyRequest, TrustVerifyResponse, METHOD_VERIFY_CERT};
    use std::sync::Arc;

    async fn server() -> RpcServer {
        let handler = TrustHandler::new(
            FixedDane::new(Ok(true)),
            Arc::new(FixedStatus(ServiceStatus::default())),
        );
        RpcServer::bind("127.0.0.1:0", handler).await.unwrap()
    }

    async fn call(addr: SocketAddr, frame: &RequestFrame) -> ResponseFrame {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, frame).await.unwrap();
        read_frame(&mut stream).await.unwrap()
    }

    #[tokio::test]
    async fn test_serves_requests() {
        let server = server().await;
        let request = TrustVerifyRequest {
            host: "welcome".into(),
            port: "443".into(),
            der_certs: vec![vec![0x30]],
        };
        for id in 0..3 {
            let frame = RequestFrame {
                id,
                method: METHOD_VERIFY_CERT.into(),
                body: serde_json::to_value(&request).unwrap(),
            };
            let response = call(server.local_addr(), &frame).await;
            assert_eq!(response.id, id);
            let FrameResult::Ok(body) = response.result else {
                panic!("expected ok frame");
            };
            assert_eq!(
                serde_json::from_value::<TrustVerifyResponse>(body).unwrap(),
                TrustVerifyResponse::secure()
            );
        }
    }

    #[tokio::test]
    async fn test_bind_conflict() {
        let server = server().await;
        let err = RpcServer::bind(
            &server.local_addr().to_string(),
            TrustHandler::new(
                FixedDane::new(Ok(false)),
                Arc::new(FixedStatus(ServiceStatus::default())),
            ),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::Bind { .. }));
    }

    #[tokio::test]
    async fn test_shutdown_stops_accepting() {
        let server = server().await;
        let addr = server.local_addr();
        server.shutdown().await;
        assert!(TcpStream::connect(addr).await.is_err());
    }
}
