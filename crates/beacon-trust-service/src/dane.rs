//! DANE-EE verification anchored in the Handshake name chain.
//!
//! A host is only eligible for a SECURE verdict when its top-level name
//! carries DS records on chain. Those records anchor validation of the TLSA
//! answer for the service, which is then matched against the leaf
//! certificate; only usage 3 (DANE-EE) records count.

use async_trait::async_trait;
use beacon_core::tld::tld_of;
use beacon_core::Certificate;
use beacon_hns::{ResolveError, ResolverClient, Resource};
use moka::future::Cache;
use moka::Expiry;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::TlsaConfig;
use crate::error::DaneError;
use crate::tlsa::{tlsa_name, TlsaAnswer, TlsaSource, ZoneAnchor, USAGE_DANE_EE};

type DaneResult<T> = std::result::Result<T, DaneError>;

/// Source of on-chain zones for top-level names.
#[async_trait]
pub trait ZoneSource: Send + Sync {
    async fn get_zone(&self, tld: &str) -> std::result::Result<Option<Resource>, ResolveError>;
}

#[async_trait]
impl ZoneSource for ResolverClient {
    async fn get_zone(&self, tld: &str) -> std::result::Result<Option<Resource>, ResolveError> {
        Self::get_zone(self, tld).await
    }
}

/// Certificate check against DANE records.
///
/// `Ok(true)` is secure, `Ok(false)` means no opinion.
#[async_trait]
pub trait DaneVerifier: Send + Sync {
    async fn verify(&self, host: &str, port: &str, der_certs: &[Vec<u8>]) -> DaneResult<bool>;
}

/// Cached answers live for their own TTL.
struct AnswerExpiry;

impl Expiry<String, TlsaAnswer> for AnswerExpiry {
    fn expire_after_create(&self, _qname: &String, answer: &TlsaAnswer, _created_at: Instant) -> Option<Duration> {
        Some(answer.ttl)
    }
}

/// DANE verifier using on-chain DS records as the zone anchor.
pub struct HnsDaneVerifier {
    zones: Arc<dyn ZoneSource>,
    tlsa: Arc<dyn TlsaSource>,
    cache: Cache<String, TlsaAnswer>,
    attempts: u32,
}

impl std::fmt::Debug for HnsDaneVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnsDaneVerifier")
            .field("attempts", &self.attempts)
            .field("cached", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

impl HnsDaneVerifier {
    pub fn new(zones: Arc<dyn ZoneSource>, tlsa: Arc<dyn TlsaSource>, config: &TlsaConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.cache_size as u64)
            .expire_after(AnswerExpiry)
            .build();
        Self {
            zones,
            tlsa,
            cache,
            attempts: config.attempts.max(1),
        }
    }

    /// On-chain anchor of the zone holding `host`, if it is signed.
    async fn zone_anchor(&self, host: &str) -> DaneResult<Option<ZoneAnchor>> {
        let Some(tld) = tld_of(host) else {
            return Ok(None);
        };
        let Some(zone) = self.zones.get_zone(tld).await? else {
            debug!(tld, "name not found on chain");
            return Ok(None);
        };
        let ds: Vec<_> = zone.ds_records().cloned().collect();
        if ds.is_empty() {
            return Ok(None);
        }
        Ok(Some(ZoneAnchor {
            zone: tld.to_owned(),
            ds,
        }))
    }

    async fn fetch_tlsa(&self, qname: &str, anchor: &ZoneAnchor) -> DaneResult<TlsaAnswer> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.tlsa.lookup(qname, anchor).await {
                Ok(answer) => return Ok(answer),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!(name = qname, attempt, error = %e, "tlsa lookup failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn lookup_tlsa(&self, qname: &str, anchor: &ZoneAnchor) -> DaneResult<TlsaAnswer> {
        if let Some(answer) = self.cache.get(qname).await {
            debug!(name = qname, "tlsa cache hit");
            return Ok(answer);
        }
        self.cache
            .try_get_with(qname.to_owned(), self.fetch_tlsa(qname, anchor))
            .await
            .map_err(|e| (*e).clone())
    }
}

#[async_trait]
impl DaneVerifier for HnsDaneVerifier {
    async fn verify(&self, host: &str, port: &str, der_certs: &[Vec<u8>]) -> DaneResult<bool> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() || port.is_empty() {
            return Err(DaneError::CertVerifyFailed("missing host or port".into()));
        }
        let leaf = der_certs
            .first()
            .ok_or_else(|| DaneError::CertVerifyFailed("no leaf certificate".into()))?;
        let cert = Certificate::from_der(leaf.clone())
            .map_err(|e| DaneError::CertVerifyFailed(e.to_string()))?;
        let names_host = cert
            .matches_host(&host)
            .map_err(|e| DaneError::CertVerifyFailed(e.to_string()))?;
        if !names_host {
            return Err(DaneError::CertVerifyFailed(format!(
                "certificate is not valid for {host}"
            )));
        }

        let Some(anchor) = self.zone_anchor(&host).await? else {
            debug!(host = %host, "zone is unsigned");
            return Ok(false);
        };

        let answer = self.lookup_tlsa(&tlsa_name(&host, port), &anchor).await?;
        if !answer.authenticated {
            debug!(host = %host, "tlsa answer is not authenticated");
            return Ok(false);
        }
        let mut supported = false;
        for record in answer.records.iter().filter(|r| r.usage == USAGE_DANE_EE) {
            supported = true;
            if record.matches(&cert) {
                debug!(host = %host, "tlsa match");
                return Ok(true);
            }
        }

        if supported {
            Err(DaneError::DnsAuthFailed)
        } else {
            Ok(false)
        }
    }
}
