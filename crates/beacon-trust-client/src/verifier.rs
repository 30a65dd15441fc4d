//! DNSSEC certificate verifier.
//!
//! [`DnssecCertVerifier`] decorates an upstream [`CertVerifier`]. Hosts
//! outside the conventional registries get a second opinion from the trust
//! service once the upstream verifier has produced a result that an
//! alternate root may override.

use async_trait::async_trait;
use beacon_core::hostname::is_dnssec_eligible;
use beacon_core::{
    is_benign, map_service_error, CertStatus, CertVerifyResult, RequestParams, TrustServiceError,
    TrustState, TrustVerifyRequest, TrustVerifyResponse, VerifyError, METHOD_VERIFY_CERT,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::cancel::CallToken;
use crate::config::CallConfig;
use crate::error::TransportError;
use crate::manager::ManagerHandle;
use crate::transport::Transport;

/// Port used for TLSA lookups; the verifier does not learn the real port.
pub const DEFAULT_TLSA_PORT: &str = "443";

/// Result record plus verdict of one verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    pub result: CertVerifyResult,
    pub verdict: Result<(), VerifyError>,
}

impl VerifyOutcome {
    pub const fn new(result: CertVerifyResult, verdict: Result<(), VerifyError>) -> Self {
        Self { result, verdict }
    }
}

/// A certificate verifier.
#[async_trait]
pub trait CertVerifier: Send + Sync {
    async fn verify(&self, params: &RequestParams) -> VerifyOutcome;
}

/// Verifier that consults the trust service for DNSSEC-eligible hosts.
pub struct DnssecCertVerifier {
    upstream: Arc<dyn CertVerifier>,
    manager: ManagerHandle,
    transport: Transport,
    call_config: CallConfig,
    port: String,
}

impl std::fmt::Debug for DnssecCertVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnssecCertVerifier")
            .field("port", &self.port)
            .field("call_config", &self.call_config)
            .finish_non_exhaustive()
    }
}

impl DnssecCertVerifier {
    /// Create a builder for custom configuration
    #[must_use]
    pub fn builder(
        upstream: Arc<dyn CertVerifier>,
        manager: ManagerHandle,
        transport: Transport,
    ) -> DnssecCertVerifierBuilder {
        DnssecCertVerifierBuilder {
            upstream,
            manager,
            transport,
            call_config: CallConfig::default(),
            port: DEFAULT_TLSA_PORT.to_owned(),
        }
    }

    /// Start a verification and report it to `callback`.
    ///
    /// The callback runs at most once, on the caller's runtime. Dropping the
    /// returned request before it completes guarantees it never runs.
    pub fn verify_with_callback<F>(
        self: &Arc<Self>,
        params: RequestParams,
        callback: F,
    ) -> VerifyRequest
    where
        F: FnOnce(VerifyOutcome) + Send + 'static,
    {
        let token = CallToken::new();
        let watch = token.watch();
        let done = Arc::new(AtomicBool::new(false));
        let finished = Arc::clone(&done);
        let callback = move |outcome| {
            finished.store(true, Ordering::Release);
            callback(outcome);
        };

        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            let prepared = tokio::select! {
                prepared = this.prepare(&params) => prepared,
                () = watch.cancelled() => return,
            };
            if watch.is_cancelled() {
                return;
            }
            match prepared {
                Prepared::Done(outcome) => callback(outcome),
                Prepared::Unavailable { upstream, error } => {
                    callback(complete(&params, upstream, Err(error)));
                }
                Prepared::Call {
                    upstream,
                    addr,
                    request,
                } => {
                    let handler = move |response| callback(complete(&params, upstream, response));
                    if let Err(e) = this.transport.call_with_handler(
                        &addr,
                        METHOD_VERIFY_CERT,
                        &request,
                        &this.call_config,
                        watch,
                        handler,
                    ) {
                        warn!(error = %e, "could not start trust service call");
                    }
                }
            }
        });
        VerifyRequest {
            _token: token,
            task: task.abort_handle(),
            done,
        }
    }

    /// Run the upstream verifier and decide whether the trust service is
    /// needed.
    async fn prepare(&self, params: &RequestParams) -> Prepared {
        if !is_dnssec_eligible(&params.hostname) {
            return Prepared::Done(self.upstream.verify(params).await);
        }

        let upstream = self.upstream.verify(params).await;
        if !is_benign(&upstream.verdict) {
            debug!(host = %params.hostname, verdict = ?upstream.verdict, "fatal upstream error, skipping trust service");
            return Prepared::Done(upstream);
        }

        let service = match self.manager.get_service().await {
            Ok(service) => service,
            Err(e) => {
                return Prepared::Unavailable {
                    upstream,
                    error: TransportError::Unavailable(e.to_string()),
                }
            }
        };
        Prepared::Call {
            upstream,
            addr: service.addr,
            request: TrustVerifyRequest {
                host: params.hostname.clone(),
                port: self.port.clone(),
                der_certs: params.certificate.der_chain(),
            },
        }
    }
}

/// Where a verification stands once the upstream verifier has answered.
enum Prepared {
    Done(VerifyOutcome),
    Unavailable {
        upstream: VerifyOutcome,
        error: TransportError,
    },
    Call {
        upstream: VerifyOutcome,
        addr: String,
        request: TrustVerifyRequest,
    },
}

#[async_trait]
impl CertVerifier for DnssecCertVerifier {
    async fn verify(&self, params: &RequestParams) -> VerifyOutcome {
        match self.prepare(params).await {
            Prepared::Done(outcome) => outcome,
            Prepared::Unavailable { upstream, error } => complete(params, upstream, Err(error)),
            Prepared::Call {
                upstream,
                addr,
                request,
            } => {
                let response = self
                    .transport
                    .call(&addr, METHOD_VERIFY_CERT, &request, &self.call_config)
                    .await;
                complete(params, upstream, response)
            }
        }
    }
}

fn complete(
    params: &RequestParams,
    upstream: VerifyOutcome,
    response: Result<TrustVerifyResponse, TransportError>,
) -> VerifyOutcome {
    if let Err(e) = &response {
        warn!(host = %params.hostname, error = %e, "trust service call failed");
    }
    let outcome = finalize(params, upstream, response);
    debug!(host = %params.hostname, verdict = ?outcome.verdict, "dnssec verification finished");
    outcome
}

/// Combine the upstream outcome with the trust service answer.
fn finalize(
    params: &RequestParams,
    upstream: VerifyOutcome,
    response: Result<TrustVerifyResponse, TransportError>,
) -> VerifyOutcome {
    let invalid = |verdict: VerifyError| {
        let mut result = CertVerifyResult::default();
        result.verified_cert = Some(Arc::clone(&params.certificate));
        result.cert_status |= CertStatus::INVALID;
        VerifyOutcome::new(result, Err(verdict))
    };

    let response = match response {
        Ok(response) => response,
        Err(_) => return invalid(TrustServiceError::RequestFailed.into()),
    };

    match response.state {
        // no opinion: the conventional result stands
        TrustState::Insecure => upstream,
        TrustState::Bogus => invalid(map_service_error(response.code)),
        TrustState::Secure => match params.certificate.leaf_only() {
            Ok(mut cert) => {
                cert.is_dnssec_cert = true;
                cert.is_hns_hostname = true;
                let result = CertVerifyResult {
                    verified_cert: Some(Arc::new(cert)),
                    cert_status: CertStatus::NONE,
                };
                VerifyOutcome::new(result, Ok(()))
            }
            Err(_) => invalid(VerifyError::Unexpected),
        },
    }
}

/// Builder for configuring a [`DnssecCertVerifier`]
pub struct DnssecCertVerifierBuilder {
    upstream: Arc<dyn CertVerifier>,
    manager: ManagerHandle,
    transport: Transport,
    call_config: CallConfig,
    port: String,
}

impl DnssecCertVerifierBuilder {
    /// Set the call policy for trust service requests
    #[must_use]
    pub fn call_config(mut self, config: CallConfig) -> Self {
        self.call_config = config;
        self
    }

    /// Set the port sent for TLSA lookups
    #[must_use]
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = port.into();
        self
    }

    #[must_use]
    pub fn build(self) -> DnssecCertVerifier {
        DnssecCertVerifier {
            upstream: self.upstream,
            manager: self.manager,
            transport: self.transport,
            call_config: self.call_config,
            port: self.port,
        }
    }
}

/// An in-flight verification started by
/// [`DnssecCertVerifier::verify_with_callback`]. Dropping it cancels.
#[must_use = "dropping the request cancels it"]
pub struct VerifyRequest {
    _token: CallToken,
    task: AbortHandle,
    done: Arc<AtomicBool>,
}

impl VerifyRequest {
    /// Returns true once the callback has run.
    pub fn is_finished(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for VerifyRequest {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::manager::tests::FakeLauncher;
    use crate::manager::TrustServiceManager;
    use beacon_core::wire::{read_frame, write_frame, RequestFrame, ResponseFrame};
    use beacon_core::{CertError, Certificate, HnsError, ServiceErrorCode};
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    const LEAF: &[u8] = include_bytes!("../../beacon-core/testdata/leaf.der");
    const INTERMEDIATE: &[u8] = include_bytes!("../../beacon-core/testdata/intermediate.der");

    #[derive(Clone)]
    enum Reply {
        Answer(TrustVerifyResponse),
        Fail,
        Hang,
    }

    struct TrustServer {
        addr: String,
        requests: Arc<Mutex<Vec<TrustVerifyRequest>>>,
    }

    async fn trust_server(reply: Reply) -> TrustServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let (mut stream, _) = listener.accept().await.unwrap();
                let frame: RequestFrame = read_frame(&mut stream).await.unwrap();
                assert_eq!(frame.method, METHOD_VERIFY_CERT);
                seen.lock()
                    .push(serde_json::from_value(frame.body.clone()).unwrap());
                let response = match &reply {
                    Reply::Answer(r) => ResponseFrame::ok(frame.id, serde_json::to_value(r).unwrap()),
                    Reply::Fail => ResponseFrame::error(frame.id, "internal"),
                    Reply::Hang => {
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        continue;
                    }
                };
                write_frame(&mut stream, &response).await.unwrap();
            }
        });
        TrustServer { addr, requests }
    }

    /// Upstream verifier returning a fixed verdict.
    struct Upstream {
        verdict: Result<(), VerifyError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CertVerifier for Upstream {
        async fn verify(&self, params: &RequestParams) -> VerifyOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut result = CertVerifyResult {
                verified_cert: Some(Arc::clone(&params.certificate)),
                cert_status: CertStatus::NONE,
            };
            if let Err(VerifyError::Cert(CertError::AuthorityInvalid)) = self.verdict {
                result.cert_status |= CertStatus::AUTHORITY_INVALID;
            }
            VerifyOutcome::new(result, self.verdict)
        }
    }

    struct Fixture {
        verifier: Arc<DnssecCertVerifier>,
        upstream: Arc<Upstream>,
        launcher: Arc<FakeLauncher>,
        server: TrustServer,
    }

    async fn fixture(upstream: Result<(), VerifyError>, reply: Reply) -> Fixture {
        let server = trust_server(reply).await;
        let launcher = FakeLauncher::new(&server.addr);
        let manager = TrustServiceManager::spawn(launcher.clone(), &ManagerConfig::default());
        let upstream = Arc::new(Upstream {
            verdict: upstream,
            calls: AtomicUsize::new(0),
        });
        let verifier = DnssecCertVerifier::builder(
            upstream.clone(),
            manager,
            Transport::new().unwrap(),
        )
        .call_config(
            CallConfig::new()
                .max_retries(1)
                .timeout(Duration::from_secs(2)),
        )
        .build();
        Fixture {
            verifier: Arc::new(verifier),
            upstream,
            launcher,
            server,
        }
    }

    fn params(host: &str) -> RequestParams {
        let cert = Certificate::from_der_chain([LEAF.to_vec(), INTERMEDIATE.to_vec()]).unwrap();
        RequestParams::new(host, Arc::new(cert))
    }

    #[tokio::test]
    async fn test_ineligible_hosts_go_straight_upstream() {
        let f = fixture(Ok(()), Reply::Answer(TrustVerifyResponse::bogus(ServiceErrorCode::DnssecBogus))).await;
        for host in ["example.com", "www.example.co.uk", "10.0.0.1", "::1"] {
            let outcome = f.verifier.verify(&params(host)).await;
            assert_eq!(outcome.verdict, Ok(()), "{host}");
        }
        assert_eq!(f.upstream.calls.load(Ordering::SeqCst), 4);
        assert_eq!(f.launcher.launches.load(Ordering::SeqCst), 0);
        assert!(f.server.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_fatal_upstream_error_is_forwarded() {
        let revoked = Err(VerifyError::Cert(CertError::Revoked));
        let f = fixture(revoked, Reply::Answer(TrustVerifyResponse::secure())).await;
        let outcome = f.verifier.verify(&params("welcome")).await;
        assert_eq!(outcome.verdict, revoked);
        assert!(f.server.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_secure_overrides_authority_invalid() {
        let f = fixture(
            Err(CertError::AuthorityInvalid.into()),
            Reply::Answer(TrustVerifyResponse::secure()),
        )
        .await;
        let outcome = f.verifier.verify(&params("welcome")).await;

        assert_eq!(outcome.verdict, Ok(()));
        assert!(outcome.result.cert_status.is_empty());
        let cert = outcome.result.verified_cert.unwrap();
        assert!(cert.is_dnssec_cert);
        assert!(cert.is_hns_hostname);
        assert!(cert.intermediates().is_empty());
        assert_eq!(cert.der(), LEAF);

        let requests = f.server.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].host, "welcome");
        assert_eq!(requests[0].port, "443");
        assert_eq!(requests[0].der_certs, vec![LEAF.to_vec(), INTERMEDIATE.to_vec()]);
    }

    #[tokio::test]
    async fn test_insecure_never_downgrades() {
        let f = fixture(
            Err(CertError::AuthorityInvalid.into()),
            Reply::Answer(TrustVerifyResponse::insecure()),
        )
        .await;
        let outcome = f.verifier.verify(&params("welcome")).await;
        assert_eq!(
            outcome.verdict,
            Err(VerifyError::Cert(CertError::AuthorityInvalid))
        );
        assert!(outcome.result.cert_status.contains(CertStatus::AUTHORITY_INVALID));

        let f = fixture(Ok(()), Reply::Answer(TrustVerifyResponse::insecure())).await;
        let outcome = f.verifier.verify(&params("welcome")).await;
        assert_eq!(outcome.verdict, Ok(()));
    }

    #[tokio::test]
    async fn test_bogus_maps_service_code() {
        let f = fixture(
            Ok(()),
            Reply::Answer(TrustVerifyResponse::bogus(ServiceErrorCode::HnsIsSyncing)),
        )
        .await;
        let p = params("welcome");
        let outcome = f.verifier.verify(&p).await;
        assert_eq!(outcome.verdict, Err(VerifyError::Hns(HnsError::IsSyncing)));
        assert!(outcome.result.cert_status.contains(CertStatus::INVALID));
        assert_eq!(outcome.result.verified_cert, Some(p.certificate));
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let f = fixture(Ok(()), Reply::Fail).await;
        let outcome = f.verifier.verify(&params("welcome")).await;
        assert_eq!(
            outcome.verdict,
            Err(VerifyError::TrustService(TrustServiceError::RequestFailed))
        );
        assert!(outcome.result.cert_status.contains(CertStatus::INVALID));
    }

    #[tokio::test]
    async fn test_callback_runs_once() {
        let f = fixture(Ok(()), Reply::Answer(TrustVerifyResponse::secure())).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _request = f.verifier.verify_with_callback(params("welcome"), move |outcome| {
            let _ = tx.send(outcome.verdict);
        });
        assert_eq!(rx.recv().await, Some(Ok(())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_request_finishes_with_callback() {
        let f = fixture(
            Err(CertError::AuthorityInvalid.into()),
            Reply::Answer(TrustVerifyResponse::secure()),
        )
        .await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = f.verifier.verify_with_callback(params("welcome"), move |outcome| {
            let _ = tx.send(outcome.verdict);
        });
        assert!(!request.is_finished());
        assert_eq!(rx.recv().await, Some(Ok(())));
        assert!(request.is_finished());
        assert_eq!(f.server.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_callback_for_ineligible_host_skips_service() {
        let f = fixture(Ok(()), Reply::Answer(TrustVerifyResponse::secure())).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _request = f.verifier.verify_with_callback(params("example.com"), move |outcome| {
            let _ = tx.send(outcome.verdict);
        });
        assert_eq!(rx.recv().await, Some(Ok(())));
        assert!(f.server.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_request_never_calls_back() {
        let f = fixture(Ok(()), Reply::Hang).await;
        let (tx, mut rx) = mpsc::unbounded_channel::<Result<(), VerifyError>>();
        let request = f.verifier.verify_with_callback(params("welcome"), move |outcome| {
            let _ = tx.send(outcome.verdict);
        });

        // wait until the call reached the service, then cancel
        tokio::time::timeout(Duration::from_secs(2), async {
            while f.server.requests.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        drop(request);

        assert_eq!(
            tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_finalize_never_succeeds_on_failure() {
        let p = params("welcome");
        let upstream = VerifyOutcome::new(CertVerifyResult::default(), Ok(()));
        let outcome = finalize(&p, upstream.clone(), Err(TransportError::Timeout(Duration::from_secs(10))));
        assert_eq!(
            outcome.verdict,
            Err(VerifyError::TrustService(TrustServiceError::RequestFailed))
        );

        // an Ok code in a BOGUS answer is still a failure
        let outcome = finalize(
            &p,
            upstream,
            Ok(TrustVerifyResponse::bogus(ServiceErrorCode::Ok)),
        );
        assert_eq!(outcome.verdict, Err(VerifyError::Unexpected));
    }
}
