//! TLSA record lookups.
//!
//! Answers are authenticated against the zone's on-chain DS records: the
//! zone's DNSKEY set must hold a key committed to by a DS record, every
//! delegation between the zone and the TLSA signer is followed through
//! signed DS records, and the TLSA RRset itself must carry a valid
//! signature. An answer that cannot be authenticated is still returned, but
//! marked as such; a signature that fails to verify is an error.

use async_trait::async_trait;
use beacon_core::Certificate;
use beacon_hns::DsRecord;
use hickory_proto::rr::{Name, RecordType};
use ring::digest;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::TlsaConfig;
use crate::dnssec::{self, Dnskey, DnssecError, WireRecord};
use crate::error::{DaneError, Result};
use crate::exchange::{DnsExchange, DnsResponse, UdpExchange, RCODE_NOERROR, RCODE_NXDOMAIN};

/// Certificate usage DANE-EE.
pub const USAGE_DANE_EE: u8 = 3;

/// One TLSA resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsaRecord {
    pub usage: u8,
    pub selector: u8,
    pub matching: u8,
    pub data: Vec<u8>,
}

impl TlsaRecord {
    pub fn parse(rdata: &[u8]) -> Option<Self> {
        match rdata {
            [usage, selector, matching, data @ ..] => Some(Self {
                usage: *usage,
                selector: *selector,
                matching: *matching,
                data: data.to_vec(),
            }),
            _ => None,
        }
    }

    /// Check the record's association data against `cert`.
    ///
    /// Unknown selectors or matching types never match.
    pub fn matches(&self, cert: &Certificate) -> bool {
        let selected = match self.selector {
            0 => cert.der().to_vec(),
            1 => match cert.spki() {
                Ok(spki) => spki,
                Err(_) => return false,
            },
            _ => return false,
        };
        match self.matching {
            0 => selected == self.data,
            1 => digest::digest(&digest::SHA256, &selected).as_ref() == self.data.as_slice(),
            2 => digest::digest(&digest::SHA512, &selected).as_ref() == self.data.as_slice(),
            _ => false,
        }
    }
}

/// TLSA answer with its remaining lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsaAnswer {
    pub records: Vec<TlsaRecord>,
    pub ttl: Duration,
    /// Whether the records were proven by a signature chain from the anchor
    pub authenticated: bool,
}

/// Trust anchor of a top-level zone: its name and on-chain DS records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneAnchor {
    pub zone: String,
    pub ds: Vec<DsRecord>,
}

/// Source of TLSA answers for fully qualified query names.
#[async_trait]
pub trait TlsaSource: Send + Sync {
    async fn lookup(&self, qname: &str, anchor: &ZoneAnchor) -> std::result::Result<TlsaAnswer, DaneError>;
}

fn bogus(name: &Name, what: &str, err: &DnssecError) -> DaneError {
    DaneError::Bogus(format!("{what} for {name}: {err}"))
}

/// TLSA lookups validated locally from the on-chain anchor.
pub struct ValidatingTlsaSource {
    exchange: Arc<dyn DnsExchange>,
    negative_ttl: Duration,
}

impl std::fmt::Debug for ValidatingTlsaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatingTlsaSource")
            .field("negative_ttl", &self.negative_ttl)
            .finish_non_exhaustive()
    }
}

impl ValidatingTlsaSource {
    pub fn new(exchange: Arc<dyn DnsExchange>, negative_ttl: Duration) -> Self {
        Self {
            exchange,
            negative_ttl,
        }
    }

    /// Query the configured resolvers, or the system ones when none are set.
    pub fn from_config(config: &TlsaConfig) -> Result<Self> {
        Ok(Self::new(
            Arc::new(UdpExchange::from_config(config)?),
            config.negative_ttl(),
        ))
    }

    async fn query(&self, name: &Name, rtype: RecordType) -> std::result::Result<DnsResponse, DaneError> {
        let response = self.exchange.query(name, rtype).await?;
        match response.rcode {
            RCODE_NOERROR | RCODE_NXDOMAIN => Ok(response),
            rcode => Err(DaneError::Lookup(format!("{rtype} query for {name} failed with rcode {rcode}"))),
        }
    }

    /// Authenticated DNSKEY set of `zone`, or `None` when no DS record uses
    /// a supported algorithm and digest.
    async fn zone_keys(
        &self,
        zone: &Name,
        ds: &[DsRecord],
        now: u32,
    ) -> std::result::Result<Option<Vec<Dnskey>>, DaneError> {
        let supported: Vec<&DsRecord> = ds
            .iter()
            .filter(|d| dnssec::is_supported_algorithm(d.algorithm) && dnssec::is_supported_digest(d.digest_type))
            .collect();
        if supported.is_empty() {
            debug!(zone = %zone, "no supported DS records");
            return Ok(None);
        }

        let response = self.query(zone, RecordType::DNSKEY).await?;
        let (rrset, sigs) = dnssec::split_rrset(&response.answers, zone, RecordType::DNSKEY);
        let keys: Vec<Dnskey> = rrset.iter().filter_map(|rr| Dnskey::parse(&rr.rdata).ok()).collect();
        let anchors: Vec<Dnskey> = keys
            .iter()
            .filter(|k| supported.iter().any(|ds| k.matches_ds(zone, ds)))
            .cloned()
            .collect();
        if anchors.is_empty() {
            return Err(DaneError::Bogus(format!("no DNSKEY for {zone} matches its DS records")));
        }

        dnssec::verify_rrset(&rrset, &sigs, &anchors, zone, now)
            .map_err(|e| bogus(zone, "DNSKEY", &e))?;
        Ok(Some(keys))
    }

    /// Walk from the anchored zone down to `signer`, following signed
    /// delegations. `None` means the chain cannot be authenticated.
    async fn signer_keys(
        &self,
        anchor: &Name,
        ds: &[DsRecord],
        signer: &Name,
        now: u32,
    ) -> std::result::Result<Option<Vec<Dnskey>>, DaneError> {
        let Some(mut keys) = self.zone_keys(anchor, ds, now).await? else {
            return Ok(None);
        };
        let mut zone = anchor.clone();

        let mut below = Vec::new();
        let mut name = signer.clone();
        while name.num_labels() > anchor.num_labels() {
            below.push(name.clone());
            name = name.base_name();
        }

        for child in below.into_iter().rev() {
            let response = self.query(&child, RecordType::DS).await?;
            let (rrset, sigs) = dnssec::split_rrset(&response.answers, &child, RecordType::DS);
            if rrset.is_empty() {
                if child == *signer {
                    debug!(zone = %child, "no DS for signing zone");
                    return Ok(None);
                }
                // not a delegation point
                continue;
            }
            if sigs.is_empty() {
                debug!(zone = %child, "unsigned DS records");
                return Ok(None);
            }
            dnssec::verify_rrset(&rrset, &sigs, &keys, &zone, now).map_err(|e| bogus(&child, "DS", &e))?;

            let child_ds: Vec<DsRecord> = rrset.iter().filter_map(|rr| dnssec::parse_ds(&rr.rdata).ok()).collect();
            match self.zone_keys(&child, &child_ds, now).await? {
                Some(child_keys) => keys = child_keys,
                None => return Ok(None),
            }
            zone = child;
        }
        Ok(Some(keys))
    }
}

fn record_ttl(rrset: &[WireRecord]) -> u32 {
    rrset.iter().map(|rr| rr.ttl).min().unwrap_or(0)
}

#[async_trait]
impl TlsaSource for ValidatingTlsaSource {
    async fn lookup(&self, qname: &str, anchor: &ZoneAnchor) -> std::result::Result<TlsaAnswer, DaneError> {
        let name = Name::from_ascii(qname).map_err(|e| DaneError::Bogus(format!("bad query name {qname}: {e}")))?;
        let zone = Name::from_ascii(format!("{}.", anchor.zone.trim_end_matches('.')))
            .map_err(|e| DaneError::Bogus(format!("bad zone name {}: {e}", anchor.zone)))?;

        debug!(name = qname, "querying TLSA");
        let response = self.query(&name, RecordType::TLSA).await?;
        let (rrset, sigs) = dnssec::split_rrset(&response.answers, &name, RecordType::TLSA);
        let records: Vec<TlsaRecord> = rrset.iter().filter_map(|rr| TlsaRecord::parse(&rr.rdata)).collect();
        if records.is_empty() {
            return Ok(TlsaAnswer {
                records,
                ttl: self.negative_ttl,
                authenticated: false,
            });
        }

        let mut answer = TlsaAnswer {
            records,
            ttl: Duration::from_secs(u64::from(record_ttl(&rrset))),
            authenticated: false,
        };
        let Some(signer) = sigs
            .iter()
            .map(|sig| &sig.signer)
            .find(|signer| zone.zone_of(signer) && signer.zone_of(&name))
            .cloned()
        else {
            debug!(name = qname, "tlsa answer is unsigned");
            return Ok(answer);
        };

        let now = dnssec::unix_now();
        let Some(keys) = self.signer_keys(&zone, &anchor.ds, &signer, now).await? else {
            return Ok(answer);
        };

        match dnssec::verify_rrset(&rrset, &sigs, &keys, &signer, now) {
            Ok(sig) => {
                let ttl = record_ttl(&rrset)
                    .min(sig.original_ttl)
                    .min(sig.expiration.wrapping_sub(now));
                answer.ttl = Duration::from_secs(u64::from(ttl));
                answer.authenticated = true;
                Ok(answer)
            }
            Err(DnssecError::UnsupportedAlgorithm(alg)) => {
                debug!(name = qname, alg, "tlsa signed with an unsupported algorithm");
                Ok(answer)
            }
            Err(e) => {
                warn!(name = qname, error = %e, "tlsa signature rejected");
                Err(bogus(&name, "TLSA", &e))
            }
        }
    }
}

/// Query name for a service's TLSA records (`_<port>._tcp.<host>.`).
pub fn tlsa_name(host: &str, port: &str) -> String {
    format!("_{port}._tcp.{}.", host.trim_end_matches('.').to_ascii_lowercase())
}
