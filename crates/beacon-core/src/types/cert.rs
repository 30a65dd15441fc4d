//! Certificate model and verification result types.

use ring::digest::{digest, SHA256};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};
use std::sync::Arc;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::X509Certificate;

use crate::error::{CoreError, Result};

/// A leaf certificate together with the intermediates it was served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    intermediates: Vec<Vec<u8>>,
    subject: String,
    fingerprint: String,
    /// Verified against the DNSSEC (alternate root) chain
    pub is_dnssec_cert: bool,
    /// Certificate belongs to a Handshake hostname
    pub is_hns_hostname: bool,
}

impl Certificate {
    /// Parse a leaf certificate from DER.
    pub fn from_der(der: impl Into<Vec<u8>>) -> Result<Self> {
        let der = der.into();
        let cert = parse(&der)?;
        let subject = cert.subject().to_string();
        let fingerprint = sha256_hex(&der);
        Ok(Self {
            der,
            intermediates: Vec::new(),
            subject,
            fingerprint,
            is_dnssec_cert: false,
            is_hns_hostname: false,
        })
    }

    /// Parse an ordered chain (leaf first).
    pub fn from_der_chain<I, B>(chain: I) -> Result<Self>
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        let mut iter = chain.into_iter();
        let leaf = iter.next().ok_or(CoreError::EmptyChain)?;
        let mut cert = Self::from_der(leaf)?;
        cert.intermediates = iter.map(Into::into).collect();
        Ok(cert)
    }

    /// Attach intermediates, replacing any existing ones.
    #[must_use]
    pub fn with_intermediates(mut self, intermediates: Vec<Vec<u8>>) -> Self {
        self.intermediates = intermediates;
        self
    }

    /// A copy of the leaf with no intermediates and no flags set.
    pub fn leaf_only(&self) -> Result<Self> {
        Self::from_der(self.der.clone())
    }

    /// Leaf DER bytes
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Intermediate DER blobs in served order
    pub fn intermediates(&self) -> &[Vec<u8>] {
        &self.intermediates
    }

    /// Leaf followed by intermediates, as sent to the trust service.
    pub fn der_chain(&self) -> Vec<Vec<u8>> {
        std::iter::once(self.der.clone())
            .chain(self.intermediates.iter().cloned())
            .collect()
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Lowercase hex SHA-256 of the leaf DER
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// DER `SubjectPublicKeyInfo` of the leaf.
    pub fn spki(&self) -> Result<Vec<u8>> {
        let cert = parse(&self.der)?;
        Ok(cert.public_key().raw.to_vec())
    }

    /// DNS names the leaf is issued for (SAN dNSName entries, lowercased).
    pub fn dns_names(&self) -> Result<Vec<String>> {
        let cert = parse(&self.der)?;
        let mut names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in &san.value.general_names {
                if let GeneralName::DNSName(dns) = name {
                    names.push(dns.trim_end_matches('.').to_ascii_lowercase());
                }
            }
        }
        Ok(names)
    }

    /// Check whether the leaf is valid for `host`. Wildcards cover exactly
    /// one leftmost label.
    pub fn matches_host(&self, host: &str) -> Result<bool> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        Ok(self
            .dns_names()?
            .iter()
            .any(|pattern| host_matches(pattern, &host)))
    }
}

fn parse(der: &[u8]) -> Result<X509Certificate<'_>> {
    x509_parser::parse_x509_certificate(der)
        .map(|(_, cert)| cert)
        .map_err(|e| CoreError::CertParse(e.to_string()))
}

fn host_matches(pattern: &str, host: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        return match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        };
    }
    pattern == host
}

/// SHA-256 of raw bytes, lowercase hex.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(digest(&SHA256, data).as_ref())
}

/// Certificate status bit flags attached to a verification result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CertStatus(u32);

impl CertStatus {
    pub const NONE: Self = Self(0);
    pub const COMMON_NAME_INVALID: Self = Self(1 << 0);
    pub const DATE_INVALID: Self = Self(1 << 1);
    pub const AUTHORITY_INVALID: Self = Self(1 << 2);
    pub const REVOKED: Self = Self(1 << 6);
    pub const INVALID: Self = Self(1 << 7);
    pub const IS_DNSSEC: Self = Self(1 << 16);

    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for CertStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CertStatus {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for CertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Output record of a certificate verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertVerifyResult {
    /// The certificate that was verified, possibly rebuilt by the verifier
    pub verified_cert: Option<Arc<Certificate>>,
    pub cert_status: CertStatus,
}

impl CertVerifyResult {
    /// Clear everything back to the empty result.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Input to a certificate verification.
#[derive(Debug, Clone)]
pub struct RequestParams {
    pub hostname: String,
    pub certificate: Arc<Certificate>,
}

impl RequestParams {
    pub fn new(hostname: impl Into<String>, certificate: Arc<Certificate>) -> Self {
        Self {
            hostname: hostname.into(),
            certificate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEAF: &[u8] = include_bytes!("../../testdata/leaf.der");
    const INTERMEDIATE: &[u8] = include_bytes!("../../testdata/intermediate.der");

    #[test]
    fn test_from_der() {
        let cert = Certificate::from_der(LEAF).unwrap();
        assert_eq!(cert.subject(), "CN=welcome");
        assert_eq!(
            cert.fingerprint(),
            "aca8567375d9beec98b7c2e0065afc9bde25207cb7d762b876fdcd42da0d2dce"
        );
        assert!(!cert.is_dnssec_cert);
        assert!(cert.intermediates().is_empty());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            Certificate::from_der(vec![0u8; 16]),
            Err(CoreError::CertParse(_))
        ));
        assert!(matches!(
            Certificate::from_der_chain(Vec::<Vec<u8>>::new()),
            Err(CoreError::EmptyChain)
        ));
    }

    #[test]
    fn test_chain_order() {
        let cert = Certificate::from_der_chain([LEAF.to_vec(), INTERMEDIATE.to_vec()]).unwrap();
        let chain = cert.der_chain();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0], LEAF);
        assert_eq!(chain[1], INTERMEDIATE);

        let leaf = cert.leaf_only().unwrap();
        assert!(leaf.intermediates().is_empty());
        assert_eq!(leaf.der(), LEAF);
    }

    #[test]
    fn test_spki_hash() {
        let cert = Certificate::from_der(LEAF).unwrap();
        let spki = cert.spki().unwrap();
        assert_eq!(
            sha256_hex(&spki),
            "8e3d06e72332e5a1625f717a9352ec2b6172520f6f89f828698965d9b92a437d"
        );
    }

    #[test]
    fn test_host_matching() {
        let cert = Certificate::from_der(LEAF).unwrap();
        assert_eq!(cert.dns_names().unwrap(), vec!["welcome", "*.welcome"]);
        assert!(cert.matches_host("welcome").unwrap());
        assert!(cert.matches_host("WWW.welcome.").unwrap());
        assert!(!cert.matches_host("a.b.welcome").unwrap());
        assert!(!cert.matches_host("other").unwrap());
    }

    #[test]
    fn test_status_flags() {
        let mut status = CertStatus::NONE;
        assert!(status.is_empty());
        status |= CertStatus::INVALID;
        assert!(status.contains(CertStatus::INVALID));
        assert!(!status.contains(CertStatus::REVOKED));
        assert_eq!((status | CertStatus::REVOKED).bits(), (1 << 7) | (1 << 6));
    }

    #[test]
    fn test_result_reset() {
        let cert = Arc::new(Certificate::from_der(LEAF).unwrap());
        let mut result = CertVerifyResult {
            verified_cert: Some(cert),
            cert_status: CertStatus::AUTHORITY_INVALID,
        };
        result.reset();
        assert!(result.verified_cert.is_none());
        assert!(result.cert_status.is_empty());
    }
}
