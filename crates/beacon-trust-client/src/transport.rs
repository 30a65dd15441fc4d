//! Remote call transport to the trust service.
//!
//! Calls are driven by a dedicated worker thread with its own runtime. Each
//! call opens one connection, sends one request frame and reads one
//! response frame, retrying transient failures with exponential backoff
//! under an overall deadline. Results travel back to the caller's task over
//! a oneshot channel, so callers never run on the worker thread.

use beacon_core::wire::{read_frame, write_frame, FrameResult, RequestFrame, ResponseFrame};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use tokio::net::TcpStream;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::cancel::CallWatch;
use crate::config::CallConfig;
use crate::error::{Result, TransportError};

/// Client side of the trust service channel
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    worker: Handle,
    stop: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport {
    /// Start a transport with default settings
    pub fn new() -> Result<Self> {
        TransportBuilder::new().build()
    }

    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    /// Issue `method` with `request` to the service at `endpoint`.
    ///
    /// The returned future resolves to the decoded response. Dropping it
    /// aborts the call on the worker.
    pub fn call<Req, Resp>(
        &self,
        endpoint: &str,
        method: &str,
        request: &Req,
        config: &CallConfig,
    ) -> PendingCall<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let (tx, rx) = oneshot::channel();
        let body = match serde_json::to_value(request) {
            Ok(body) => body,
            Err(e) => {
                let _ = tx.send(Err(TransportError::InvalidRequest(e.to_string())));
                return PendingCall::new(rx, None);
            }
        };

        let frame = RequestFrame {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            method: method.to_owned(),
            body,
        };
        let endpoint = endpoint.to_owned();
        let config = config.clone();
        let task = self.inner.worker.spawn(async move {
            let result = run_call(&endpoint, &frame, &config).await;
            let _ = tx.send(result);
        });
        PendingCall::new(rx, Some(task.abort_handle()))
    }

    /// Like [`Transport::call`], but resolves to
    /// [`TransportError::Cancelled`] once `watch` reports cancellation.
    pub fn call_watched<Req, Resp>(
        &self,
        endpoint: &str,
        method: &str,
        request: &Req,
        config: &CallConfig,
        watch: CallWatch,
    ) -> impl Future<Output = Result<Resp>> + Send + 'static
    where
        Req: Serialize,
        Resp: DeserializeOwned + Send + 'static,
    {
        let pending = self.call::<Req, Resp>(endpoint, method, request, config);
        async move {
            tokio::select! {
                result = pending => result,
                () = watch.cancelled() => Err(TransportError::Cancelled),
            }
        }
    }

    /// Issue a call and hand the result to `handler` on the caller's runtime.
    ///
    /// `handler` runs at most once and never after `watch` reports
    /// cancellation.
    pub fn call_with_handler<Req, Resp, F>(
        &self,
        endpoint: &str,
        method: &str,
        request: &Req,
        config: &CallConfig,
        watch: CallWatch,
        handler: F,
    ) -> Result<()>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Send + 'static,
        F: FnOnce(Result<Resp>) + Send + 'static,
    {
        let caller = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;
        let call = self.call_watched::<Req, Resp>(endpoint, method, request, config, watch.clone());
        caller.spawn(async move {
            match call.await {
                Err(TransportError::Cancelled) => debug!("call cancelled, response dropped"),
                _ if watch.is_cancelled() => {}
                result => handler(result),
            }
        });
        Ok(())
    }

    /// Stop the worker thread. Pending calls fail with
    /// [`TransportError::WorkerGone`].
    pub fn shutdown(&self) {
        self.inner.stop_worker();
    }
}

impl TransportInner {
    fn stop_worker(&self) {
        if let Some(stop) = self.stop.lock().take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!("transport worker panicked");
            }
        }
    }
}

impl Drop for TransportInner {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Builder for configuring a [`Transport`]
pub struct TransportBuilder {
    thread_name: String,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            thread_name: String::from("trust-transport"),
        }
    }

    /// Set the worker thread name
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Start the worker thread
    pub fn build(self) -> Result<Transport> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let worker = runtime.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(self.thread_name)
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
                debug!("transport worker stopped");
            })
            .map_err(|e| TransportError::Io(e.to_string()))?;

        Ok(Transport {
            inner: Arc::new(TransportInner {
                worker,
                stop: Mutex::new(Some(stop_tx)),
                thread: Mutex::new(Some(thread)),
                next_id: AtomicU64::new(1),
            }),
        })
    }
}

/// An in-flight call. Aborts the call when dropped.
#[must_use = "dropping a pending call cancels it"]
pub struct PendingCall<Resp> {
    rx: oneshot::Receiver<Result<Value>>,
    task: Option<AbortHandle>,
    _resp: PhantomData<fn() -> Resp>,
}

impl<Resp> PendingCall<Resp> {
    const fn new(rx: oneshot::Receiver<Result<Value>>, task: Option<AbortHandle>) -> Self {
        Self {
            rx,
            task,
            _resp: PhantomData,
        }
    }
}

impl<Resp: DeserializeOwned> Future for PendingCall<Resp> {
    type Output = Result<Resp>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(_)) => Poll::Ready(Err(TransportError::WorkerGone)),
            Poll::Ready(Ok(result)) => Poll::Ready(result.and_then(|body| {
                serde_json::from_value(body).map_err(|e| TransportError::InvalidResponse(e.to_string()))
            })),
        }
    }
}

impl<Resp> Drop for PendingCall<Resp> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_call(endpoint: &str, frame: &RequestFrame, config: &CallConfig) -> Result<Value> {
    let deadline = config.deadline();
    let attempts = async {
        let mut attempt = 0;
        loop {
            debug!(method = %frame.method, id = frame.id, attempt, "calling trust service");
            match exchange(endpoint, frame, config).await {
                Ok(body) => return Ok(body),
                Err(e) if e.is_retryable() && attempt < config.max_retries => {
                    let backoff = config.backoff_for(attempt);
                    warn!(method = %frame.method, attempt, error = %e, ?backoff, "call failed, retrying");
                    attempt += 1;
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    };
    tokio::time::timeout(deadline, attempts)
        .await
        .map_err(|_| TransportError::Timeout(deadline))?
}

async fn connect(endpoint: &str, config: &CallConfig) -> Result<TcpStream> {
    let mut attempt = 0u32;
    loop {
        match TcpStream::connect(endpoint).await {
            Ok(stream) => return Ok(stream),
            Err(e) if config.wait_for_ready => {
                debug!(endpoint, error = %e, "service not ready");
                tokio::time::sleep(config.backoff_for(attempt)).await;
                attempt = attempt.saturating_add(1);
            }
            Err(e) => return Err(TransportError::Unavailable(e.to_string())),
        }
    }
}

async fn exchange(endpoint: &str, frame: &RequestFrame, config: &CallConfig) -> Result<Value> {
    let mut stream = connect(endpoint, config).await?;
    write_frame(&mut stream, frame).await?;
    let response: ResponseFrame = read_frame(&mut stream).await?;

    if response.id != frame.id {
        return Err(TransportError::InvalidResponse(format!(
            "response id {} does not match request {}",
            response.id, frame.id
        )));
    }
    match response.result {
        FrameResult::Ok(body) => Ok(body),
        FrameResult::Error(message) => Err(TransportError::Status { message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CallToken;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[derive(Debug, Serialize)]
    struct Ping {
        n: u32,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Pong {
        n: u32,
    }

    /// Echo server answering `n + 1`; `broken` closes the first connections
    /// without answering.
    async fn echo_server(broken: usize) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < broken {
                    continue;
                }
                let req: RequestFrame = read_frame(&mut stream).await.unwrap();
                let reply = match req.method.as_str() {
                    "echo" => ResponseFrame::ok(req.id, json!({ "n": req.body["n"].as_u64().unwrap() + 1 })),
                    "slow" => {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        ResponseFrame::ok(req.id, json!({ "n": 0 }))
                    }
                    other => ResponseFrame::error(req.id, format!("unknown method {other}")),
                };
                let _ = write_frame(&mut stream, &reply).await;
            }
        });
        (addr, seen)
    }

    fn quick() -> CallConfig {
        CallConfig::new()
            .initial_backoff(Duration::from_millis(5))
            .timeout(Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_call() {
        let (addr, _) = echo_server(0).await;
        let transport = Transport::new().unwrap();
        let pong: Pong = transport
            .call(&addr, "echo", &Ping { n: 41 }, &quick())
            .await
            .unwrap();
        assert_eq!(pong, Pong { n: 42 });
    }

    #[tokio::test]
    async fn test_status_error_is_not_retried() {
        let (addr, seen) = echo_server(0).await;
        let transport = Transport::new().unwrap();
        let result: Result<Pong> = transport
            .call(&addr, "missing", &Ping { n: 1 }, &quick())
            .await;
        assert_eq!(
            result,
            Err(TransportError::Status {
                message: "unknown method missing".into()
            })
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_connections_are_retried() {
        let (addr, seen) = echo_server(2).await;
        let transport = Transport::new().unwrap();
        let pong: Pong = transport
            .call(&addr, "echo", &Ping { n: 1 }, &quick())
            .await
            .unwrap();
        assert_eq!(pong, Pong { n: 2 });
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let (addr, seen) = echo_server(usize::MAX).await;
        let transport = Transport::new().unwrap();
        let result: Result<Pong> = transport
            .call(&addr, "echo", &Ping { n: 1 }, &quick().max_retries(2))
            .await;
        assert!(matches!(result, Err(TransportError::Io(_))));
        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_deadline() {
        let (addr, _) = echo_server(0).await;
        let transport = Transport::new().unwrap();
        let config = quick().timeout(Duration::from_millis(100));
        let result: Result<Pong> = transport.call(&addr, "slow", &Ping { n: 1 }, &config).await;
        assert_eq!(result, Err(TransportError::Timeout(Duration::from_millis(100))));
    }

    #[tokio::test]
    async fn test_unavailable_without_wait_for_ready() {
        // bind then drop to get a closed port
        let addr = TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap()
            .local_addr()
            .unwrap()
            .to_string();
        let transport = Transport::new().unwrap();
        let config = quick().wait_for_ready(false).max_retries(0);
        let result: Result<Pong> = transport.call(&addr, "echo", &Ping { n: 1 }, &config).await;
        assert!(matches!(result, Err(TransportError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_wait_for_ready_until_service_starts() {
        let addr = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap()
        };
        let transport = Transport::new().unwrap();
        let pending: PendingCall<Pong> =
            transport.call(&addr.to_string(), "echo", &Ping { n: 6 }, &quick());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req: RequestFrame = read_frame(&mut stream).await.unwrap();
            write_frame(&mut stream, &ResponseFrame::ok(req.id, json!({ "n": 7 })))
                .await
                .unwrap();
        });

        assert_eq!(pending.await.unwrap(), Pong { n: 7 });
    }

    #[tokio::test]
    async fn test_handler_runs_once() {
        let (addr, _) = echo_server(0).await;
        let transport = Transport::new().unwrap();
        let token = CallToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport
            .call_with_handler(
                &addr,
                "echo",
                &Ping { n: 1 },
                &quick(),
                token.watch(),
                move |result: Result<Pong>| {
                    let _ = tx.send(result);
                },
            )
            .unwrap();

        assert_eq!(rx.recv().await, Some(Ok(Pong { n: 2 })));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_cancelled_handler_never_runs() {
        let (addr, _) = echo_server(0).await;
        let transport = Transport::new().unwrap();
        let token = CallToken::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<Pong>>();

        transport
            .call_with_handler(&addr, "slow", &Ping { n: 1 }, &quick(), token.watch(), move |r| {
                let _ = tx.send(r);
            })
            .unwrap();
        drop(token);

        // the sender is dropped with the cancelled task, never used
        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_watched_call_fails_when_cancelled() {
        let (addr, seen) = echo_server(0).await;
        let transport = Transport::new().unwrap();
        let token = CallToken::new();
        let call = transport.call_watched::<_, Pong>(&addr, "slow", &Ping { n: 1 }, &quick(), token.watch());
        let call = tokio::spawn(call);

        tokio::time::timeout(Duration::from_secs(1), async {
            while seen.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        drop(token);

        let result = tokio::time::timeout(Duration::from_secs(1), call)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Err(TransportError::Cancelled));
    }

    #[tokio::test]
    async fn test_watched_call_completes() {
        let (addr, _) = echo_server(0).await;
        let transport = Transport::new().unwrap();
        let token = CallToken::new();
        let pong = transport
            .call_watched::<_, Pong>(&addr, "echo", &Ping { n: 9 }, &quick(), token.watch())
            .await;
        assert_eq!(pong, Ok(Pong { n: 10 }));
    }

    #[test]
    fn test_handler_needs_runtime() {
        let transport = Transport::new().unwrap();
        let token = CallToken::new();
        let result = transport.call_with_handler(
            "127.0.0.1:1",
            "echo",
            &Ping { n: 1 },
            &quick(),
            token.watch(),
            |_: Result<Pong>| {},
        );
        assert_eq!(result, Err(TransportError::NoRuntime));
    }

    #[tokio::test]
    async fn test_calls_fail_after_shutdown() {
        let transport = Transport::new().unwrap();
        transport.shutdown();
        let result: Result<Pong> = transport
            .call("127.0.0.1:1", "echo", &Ping { n: 1 }, &quick())
            .await;
        assert_eq!(result, Err(TransportError::WorkerGone));
    }
}
