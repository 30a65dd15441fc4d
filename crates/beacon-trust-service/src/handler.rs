//! Method handlers for the trust service.

use beacon_core::tld::{is_icann_tld, tld_of};
use beacon_core::wire::{RequestFrame, ResponseFrame};
use beacon_core::{
    ServiceErrorCode, ServiceStatus, TrustVerifyRequest, TrustVerifyResponse, METHOD_STATUS,
    METHOD_VERIFY_CERT,
};
use beacon_hns::ResolverClient;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::dane::DaneVerifier;

/// Provides the status page summary.
pub trait StatusSource: Send + Sync {
    fn status(&self) -> ServiceStatus;
}

impl StatusSource for ResolverClient {
    fn status(&self) -> ServiceStatus {
        let status = Self::status(self);
        ServiceStatus {
            total_peers: status.total_peers,
            active_peers: status.active_peers,
            height: status.height,
            urkel: status.urkel,
            synced: status.synced,
            progress: status.progress,
        }
    }
}

/// Dispatches request frames to the VerifyCert and Status methods.
#[derive(Clone)]
pub struct TrustHandler {
    dane: Arc<dyn DaneVerifier>,
    status: Arc<dyn StatusSource>,
}

impl std::fmt::Debug for TrustHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustHandler").finish_non_exhaustive()
    }
}

impl TrustHandler {
    pub fn new(dane: Arc<dyn DaneVerifier>, status: Arc<dyn StatusSource>) -> Self {
        Self { dane, status }
    }

    /// Answer one request frame.
    pub async fn handle(&self, frame: RequestFrame) -> ResponseFrame {
        debug!(id = frame.id, method = %frame.method, "request");
        match frame.method.as_str() {
            METHOD_VERIFY_CERT => match serde_json::from_value::<TrustVerifyRequest>(frame.body) {
                Ok(request) => respond(frame.id, &self.verify_cert(&request).await),
                Err(e) => ResponseFrame::error(frame.id, format!("invalid request: {e}")),
            },
            METHOD_STATUS => respond(frame.id, &self.status.status()),
            other => ResponseFrame::error(frame.id, format!("unknown method: {other}")),
        }
    }

    /// Verdict for one certificate chain.
    pub async fn verify_cert(&self, request: &TrustVerifyRequest) -> TrustVerifyResponse {
        if request.der_certs.is_empty() {
            return TrustVerifyResponse::bogus(ServiceErrorCode::TrustServiceRequestInvalid);
        }

        if tld_of(&request.host).is_some_and(is_icann_tld) {
            return TrustVerifyResponse::insecure();
        }

        let leaf = &request.der_certs[..1];
        match self.dane.verify(&request.host, &request.port, leaf).await {
            Ok(true) => TrustVerifyResponse::secure(),
            Ok(false) => TrustVerifyResponse::insecure(),
            Err(e) => {
                debug!(host = %request.host, error = %e, "verification failed");
                TrustVerifyResponse::bogus(e.code())
            }
        }
    }
}

fn respond<T: Serialize>(id: u64, body: &T) -> ResponseFrame {
    match serde_json::to_value(body) {
        Ok(value) => ResponseFrame::ok(id, value),
        Err(e) => ResponseFrame::error(id, format!("encoding response: {e}")),
    }
}
