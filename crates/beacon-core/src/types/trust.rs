//! Trust service request/response payloads.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

use crate::error::ServiceErrorCode;

/// Method name for certificate verification calls
pub const METHOD_VERIFY_CERT: &str = "trust.VerifyCert";
/// Method name for the status page
pub const METHOD_STATUS: &str = "trust.Status";

/// Verdict of the alternate trust root for one certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrustState {
    /// The alternate root confirms the certificate
    Secure,
    /// The alternate root has no opinion
    Insecure,
    /// The alternate root contradicts the certificate
    Bogus,
}

impl fmt::Display for TrustState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Secure => write!(f, "SECURE"),
            Self::Insecure => write!(f, "INSECURE"),
            Self::Bogus => write!(f, "BOGUS"),
        }
    }
}

/// Certificate verification request sent to the trust service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustVerifyRequest {
    pub host: String,
    pub port: String,
    /// DER blobs, leaf first then intermediates
    #[serde(with = "der_list")]
    pub der_certs: Vec<Vec<u8>>,
}

/// Trust service answer to a [`TrustVerifyRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustVerifyResponse {
    pub state: TrustState,
    pub code: ServiceErrorCode,
}

impl TrustVerifyResponse {
    #[must_use]
    pub const fn secure() -> Self {
        Self {
            state: TrustState::Secure,
            code: ServiceErrorCode::Ok,
        }
    }

    #[must_use]
    pub const fn insecure() -> Self {
        Self {
            state: TrustState::Insecure,
            code: ServiceErrorCode::Ok,
        }
    }

    #[must_use]
    pub const fn bogus(code: ServiceErrorCode) -> Self {
        Self {
            state: TrustState::Bogus,
            code,
        }
    }
}

/// Snapshot of the light client as shown on the status page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub total_peers: usize,
    pub active_peers: usize,
    pub height: u32,
    /// Hex-encoded name root the client resolves against
    pub urkel: String,
    pub synced: bool,
    /// Sync progress in percent
    pub progress: u32,
}

mod der_list {
    use super::{Deserialize, Deserializer, Engine, Serializer, STANDARD};
    use serde::ser::SerializeSeq;

    pub fn serialize<S: Serializer>(certs: &[Vec<u8>], s: S) -> Result<S::Ok, S::Error> {
        let mut seq = s.serialize_seq(Some(certs.len()))?;
        for der in certs {
            seq.serialize_element(&STANDARD.encode(der))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_json_shape() {
        let req = TrustVerifyRequest {
            host: "welcome".into(),
            port: "443".into(),
            der_certs: vec![vec![1, 2, 3], vec![0xff]],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["der_certs"][0], "AQID");
        assert_eq!(json["der_certs"][1], "/w==");

        let back: TrustVerifyRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_bad_base64_rejected() {
        let json = r#"{"host":"a","port":"443","der_certs":["***"]}"#;
        assert!(serde_json::from_str::<TrustVerifyRequest>(json).is_err());
    }

    #[test]
    fn test_response_json_shape() {
        let resp = TrustVerifyResponse::bogus(ServiceErrorCode::HnsIsSyncing);
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"state":"BOGUS","code":-3600}"#);
        assert_eq!(TrustState::Insecure.to_string(), "INSECURE");
    }
}
