//! DNSSEC record validation.
//!
//! Keys are authenticated against DS digests, RRsets against RRSIG
//! signatures made by authenticated keys. Supported signing algorithms are
//! RSA/SHA-256 (8), RSA/SHA-512 (10), ECDSA P-256 (13), ECDSA P-384 (14)
//! and Ed25519 (15); supported DS digests are SHA-256 (2) and SHA-384 (4).

use beacon_hns::DsRecord;
use hickory_proto::rr::{Name, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncodable};
use ring::{digest, signature};
use thiserror::Error;

/// DNSKEY flag marking a zone key.
pub const DNSKEY_FLAG_ZONE: u16 = 0x0100;

const DNSKEY_PROTOCOL: u8 = 3;

/// RRSIG rdata before the signer name.
const RRSIG_FIXED_LEN: usize = 18;

/// Validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DnssecError {
    #[error("malformed {0} record")]
    Malformed(&'static str),

    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(u8),

    #[error("unsupported digest type {0}")]
    UnsupportedDigest(u8),

    #[error("signature outside its validity period")]
    SignatureExpired,

    #[error("signature does not verify")]
    BadSignature,

    #[error("no key matches the signature")]
    NoMatchingKey,
}

/// One answer record with its rdata in wire form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRecord {
    pub name: Name,
    pub rtype: RecordType,
    pub class: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

pub const fn is_supported_algorithm(algorithm: u8) -> bool {
    matches!(algorithm, 8 | 10 | 13 | 14 | 15)
}

pub const fn is_supported_digest(digest_type: u8) -> bool {
    matches!(digest_type, 2 | 4)
}

/// Lowercased, uncompressed wire form of `name`.
pub fn canonical_name(name: &Name) -> Result<Vec<u8>, DnssecError> {
    name.to_lowercase()
        .to_bytes()
        .map_err(|_| DnssecError::Malformed("owner name"))
}

/// A parsed DNSKEY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dnskey {
    pub flags: u16,
    pub protocol: u8,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
    rdata: Vec<u8>,
}

impl Dnskey {
    pub fn parse(rdata: &[u8]) -> Result<Self, DnssecError> {
        match rdata {
            [f0, f1, protocol, algorithm, key @ ..] if !key.is_empty() => Ok(Self {
                flags: u16::from_be_bytes([*f0, *f1]),
                protocol: *protocol,
                algorithm: *algorithm,
                public_key: key.to_vec(),
                rdata: rdata.to_vec(),
            }),
            _ => Err(DnssecError::Malformed("DNSKEY")),
        }
    }

    pub fn rdata(&self) -> &[u8] {
        &self.rdata
    }

    pub const fn is_zone_key(&self) -> bool {
        self.flags & DNSKEY_FLAG_ZONE != 0 && self.protocol == DNSKEY_PROTOCOL
    }

    /// Key tag over the rdata (RFC 4034, appendix B).
    #[allow(clippy::cast_possible_truncation)]
    pub fn key_tag(&self) -> u16 {
        let mut acc: u64 = 0;
        for (i, b) in self.rdata.iter().enumerate() {
            acc += if i % 2 == 0 {
                u64::from(*b) << 8
            } else {
                u64::from(*b)
            };
        }
        acc += (acc >> 16) & 0xffff;
        (acc & 0xffff) as u16
    }

    /// DS digest of this key owned by `owner`.
    pub fn digest(&self, owner: &Name, digest_type: u8) -> Result<Vec<u8>, DnssecError> {
        let algorithm = match digest_type {
            2 => &digest::SHA256,
            4 => &digest::SHA384,
            other => return Err(DnssecError::UnsupportedDigest(other)),
        };
        let mut ctx = digest::Context::new(algorithm);
        ctx.update(&canonical_name(owner)?);
        ctx.update(&self.rdata);
        Ok(ctx.finish().as_ref().to_vec())
    }

    /// Returns true if `ds` commits to this key.
    pub fn matches_ds(&self, owner: &Name, ds: &DsRecord) -> bool {
        self.is_zone_key()
            && self.algorithm == ds.algorithm
            && self.key_tag() == ds.key_tag
            && self
                .digest(owner, ds.digest_type)
                .is_ok_and(|d| d == ds.digest)
    }
}

/// Parse DS rdata.
pub fn parse_ds(rdata: &[u8]) -> Result<DsRecord, DnssecError> {
    match rdata {
        [t0, t1, algorithm, digest_type, digest @ ..] if !digest.is_empty() => Ok(DsRecord {
            key_tag: u16::from_be_bytes([*t0, *t1]),
            algorithm: *algorithm,
            digest_type: *digest_type,
            digest: digest.to_vec(),
        }),
        _ => Err(DnssecError::Malformed("DS")),
    }
}

/// A parsed RRSIG.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rrsig {
    pub type_covered: RecordType,
    pub algorithm: u8,
    pub labels: u8,
    pub original_ttl: u32,
    pub expiration: u32,
    pub inception: u32,
    pub key_tag: u16,
    pub signer: Name,
    pub signature: Vec<u8>,
    fixed: [u8; RRSIG_FIXED_LEN],
}

impl Rrsig {
    pub fn parse(rdata: &[u8]) -> Result<Self, DnssecError> {
        let malformed = || DnssecError::Malformed("RRSIG");
        let fixed: [u8; RRSIG_FIXED_LEN] = rdata
            .get(..RRSIG_FIXED_LEN)
            .and_then(|f| f.try_into().ok())
            .ok_or_else(malformed)?;
        let rest = &rdata[RRSIG_FIXED_LEN..];
        let mut decoder = BinDecoder::new(rest);
        let signer = Name::read(&mut decoder).map_err(|_| malformed())?;
        let signature = rest[decoder.index()..].to_vec();

        let u32_at = |i: usize| u32::from_be_bytes([fixed[i], fixed[i + 1], fixed[i + 2], fixed[i + 3]]);
        Ok(Self {
            type_covered: RecordType::from(u16::from_be_bytes([fixed[0], fixed[1]])),
            algorithm: fixed[2],
            labels: fixed[3],
            original_ttl: u32_at(4),
            expiration: u32_at(8),
            inception: u32_at(12),
            key_tag: u16::from_be_bytes([fixed[16], fixed[17]]),
            signer,
            signature,
            fixed,
        })
    }

    /// Validity window check in serial number arithmetic.
    #[allow(clippy::cast_possible_wrap)]
    pub const fn is_current(&self, now: u32) -> bool {
        now.wrapping_sub(self.inception) as i32 >= 0 && self.expiration.wrapping_sub(now) as i32 >= 0
    }

    /// The data covered by this signature over `rrset` (RFC 4035, 5.3.2).
    pub fn signed_data(&self, rrset: &[WireRecord]) -> Result<Vec<u8>, DnssecError> {
        let mut buf = Vec::with_capacity(512);
        buf.extend_from_slice(&self.fixed);
        buf.extend_from_slice(&canonical_name(&self.signer)?);

        let mut records: Vec<&WireRecord> = rrset.iter().collect();
        records.sort_by(|a, b| a.rdata.cmp(&b.rdata));
        records.dedup_by(|a, b| a.rdata == b.rdata);

        for rr in records {
            if self.labels < rr.name.num_labels() {
                // expanded wildcard
                buf.extend_from_slice(b"\x01*");
                buf.extend_from_slice(&canonical_name(&rr.name.trim_to(usize::from(self.labels)))?);
            } else {
                buf.extend_from_slice(&canonical_name(&rr.name)?);
            }
            let len = u16::try_from(rr.rdata.len()).map_err(|_| DnssecError::Malformed("rdata"))?;
            buf.extend_from_slice(&u16::from(rr.rtype).to_be_bytes());
            buf.extend_from_slice(&rr.class.to_be_bytes());
            buf.extend_from_slice(&self.original_ttl.to_be_bytes());
            buf.extend_from_slice(&len.to_be_bytes());
            buf.extend_from_slice(&rr.rdata);
        }
        Ok(buf)
    }

    /// Check the signature over `rrset` with `key`.
    pub fn verify(&self, key: &Dnskey, rrset: &[WireRecord]) -> Result<(), DnssecError> {
        let data = self.signed_data(rrset)?;
        let sig = self.signature.as_slice();

        match self.algorithm {
            8 | 10 => {
                let algorithm = if self.algorithm == 8 {
                    &signature::RSA_PKCS1_1024_8192_SHA256_FOR_LEGACY_USE_ONLY
                } else {
                    &signature::RSA_PKCS1_1024_8192_SHA512_FOR_LEGACY_USE_ONLY
                };
                if sig.len() < 1024 / 8 {
                    return Err(DnssecError::UnsupportedAlgorithm(self.algorithm));
                }
                let (e, n) = rsa_exponent_modulus(&key.public_key)?;
                signature::RsaPublicKeyComponents { n, e }
                    .verify(algorithm, &data, sig)
                    .map_err(|_| DnssecError::BadSignature)
            }
            13 | 14 => {
                let algorithm = if self.algorithm == 13 {
                    &signature::ECDSA_P256_SHA256_FIXED
                } else {
                    &signature::ECDSA_P384_SHA384_FIXED
                };
                // ring expects an uncompressed point
                let mut point = Vec::with_capacity(key.public_key.len() + 1);
                point.push(0x04);
                point.extend_from_slice(&key.public_key);
                signature::UnparsedPublicKey::new(algorithm, &point)
                    .verify(&data, sig)
                    .map_err(|_| DnssecError::BadSignature)
            }
            15 => signature::UnparsedPublicKey::new(&signature::ED25519, &key.public_key)
                .verify(&data, sig)
                .map_err(|_| DnssecError::BadSignature),
            other => Err(DnssecError::UnsupportedAlgorithm(other)),
        }
    }
}

/// Exponent and modulus of an RSA DNSKEY (RFC 3110).
fn rsa_exponent_modulus(key: &[u8]) -> Result<(&[u8], &[u8]), DnssecError> {
    let (pos, exp_len) = match key {
        [0, hi, lo, ..] => (3, usize::from(*hi) << 8 | usize::from(*lo)),
        [len, ..] => (1, usize::from(*len)),
        [] => return Err(DnssecError::Malformed("RSA key")),
    };
    if key.len() <= pos + exp_len {
        return Err(DnssecError::Malformed("RSA key"));
    }
    Ok(key[pos..].split_at(exp_len))
}

/// Records of `rtype` owned by `owner` and the parsable signatures over them.
pub fn split_rrset(answers: &[WireRecord], owner: &Name, rtype: RecordType) -> (Vec<WireRecord>, Vec<Rrsig>) {
    let rrset = answers
        .iter()
        .filter(|rr| rr.rtype == rtype && rr.name == *owner)
        .cloned()
        .collect();
    let sigs = answers
        .iter()
        .filter(|rr| rr.rtype == RecordType::RRSIG && rr.name == *owner)
        .filter_map(|rr| Rrsig::parse(&rr.rdata).ok())
        .filter(|sig| sig.type_covered == rtype)
        .collect();
    (rrset, sigs)
}

/// Verify `rrset` with a signature by `zone` made with one of `keys`.
///
/// Returns the first signature that verifies, or the last failure.
pub fn verify_rrset<'a>(
    rrset: &[WireRecord],
    sigs: &'a [Rrsig],
    keys: &[Dnskey],
    zone: &Name,
    now: u32,
) -> Result<&'a Rrsig, DnssecError> {
    let mut last = DnssecError::NoMatchingKey;
    for sig in sigs.iter().filter(|s| s.signer == *zone) {
        if !sig.is_current(now) {
            last = DnssecError::SignatureExpired;
            continue;
        }
        let candidates = keys
            .iter()
            .filter(|k| k.is_zone_key() && k.algorithm == sig.algorithm && k.key_tag() == sig.key_tag);
        for key in candidates {
            match sig.verify(key, rrset) {
                Ok(()) => return Ok(sig),
                Err(e) => last = e,
            }
        }
    }
    Err(last)
}

/// Current time as an RRSIG serial.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn unix_now() -> u32 {
    chrono::Utc::now().timestamp() as u32
}
