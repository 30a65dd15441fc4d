//! Handshake name resources.
//!
//! A resource is a version byte (`0`) followed by `type:u8 body` records
//! until the end of the buffer. Names use DNS wire encoding; compression
//! pointers are offsets from the start of the resource.

use hickory_proto::rr::Name;
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, Restrict};
use std::net::{Ipv4Addr, Ipv6Addr};
use thiserror::Error;

/// Resource decoding failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("unexpected end of resource")]
    UnexpectedEof,
    #[error("invalid serialization version {0}")]
    InvalidVersion(u8),
    #[error("unknown record type {0}")]
    UnknownRecordType(u8),
    #[error("invalid name: {0}")]
    BadName(String),
    #[error("record too large to encode: {0}")]
    TooLarge(&'static str),
}

/// Delegation signer record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

/// One resource record. Names are fully qualified (trailing dot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    Ds(DsRecord),
    Ns(String),
    Glue4 { ns: String, address: Ipv4Addr },
    Glue6 { ns: String, address: Ipv6Addr },
    Synth4(Ipv4Addr),
    Synth6(Ipv6Addr),
    Txt(Vec<String>),
}

impl Record {
    const fn type_byte(&self) -> u8 {
        match self {
            Self::Ds(_) => 0,
            Self::Ns(_) => 1,
            Self::Glue4 { .. } => 2,
            Self::Glue6 { .. } => 3,
            Self::Synth4(_) => 4,
            Self::Synth6(_) => 5,
            Self::Txt(_) => 6,
        }
    }
}

/// A decoded name resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resource {
    pub records: Vec<Record>,
}

impl Resource {
    pub fn decode(buf: &[u8]) -> Result<Self, ResourceError> {
        let mut decoder = BinDecoder::new(buf);
        let version = read_u8(&mut decoder)?;
        if version != 0 {
            return Err(ResourceError::InvalidVersion(version));
        }

        let mut records = Vec::new();
        while !decoder.is_empty() {
            let d = &mut decoder;
            let record = match read_u8(d)? {
                0 => {
                    let key_tag = u16::from_be_bytes(read_array(d)?);
                    let algorithm = read_u8(d)?;
                    let digest_type = read_u8(d)?;
                    let len = read_u8(d)?;
                    Record::Ds(DsRecord {
                        key_tag,
                        algorithm,
                        digest_type,
                        digest: read_bytes(d, usize::from(len))?.to_vec(),
                    })
                }
                1 => Record::Ns(read_name(d)?),
                2 => Record::Glue4 {
                    ns: read_name(d)?,
                    address: Ipv4Addr::from(read_array::<4>(d)?),
                },
                3 => Record::Glue6 {
                    ns: read_name(d)?,
                    address: Ipv6Addr::from(read_array::<16>(d)?),
                },
                4 => Record::Synth4(Ipv4Addr::from(read_array::<4>(d)?)),
                5 => Record::Synth6(Ipv6Addr::from(read_array::<16>(d)?)),
                6 => {
                    let count = read_u8(d)?;
                    let mut entries = Vec::with_capacity(usize::from(count));
                    for _ in 0..count {
                        let len = read_u8(d)?;
                        let entry = read_bytes(d, usize::from(len))?;
                        entries.push(String::from_utf8_lossy(entry).into_owned());
                    }
                    Record::Txt(entries)
                }
                other => return Err(ResourceError::UnknownRecordType(other)),
            };
            records.push(record);
        }
        Ok(Self { records })
    }

    /// Encode without name compression.
    pub fn encode(&self) -> Result<Vec<u8>, ResourceError> {
        let mut out = vec![0u8];
        for record in &self.records {
            out.push(record.type_byte());
            match record {
                Record::Ds(ds) => {
                    let len = u8::try_from(ds.digest.len())
                        .map_err(|_| ResourceError::TooLarge("digest"))?;
                    out.extend_from_slice(&ds.key_tag.to_be_bytes());
                    out.extend_from_slice(&[ds.algorithm, ds.digest_type, len]);
                    out.extend_from_slice(&ds.digest);
                }
                Record::Ns(ns) => write_name(&mut out, ns)?,
                Record::Glue4 { ns, address } => {
                    write_name(&mut out, ns)?;
                    out.extend_from_slice(&address.octets());
                }
                Record::Glue6 { ns, address } => {
                    write_name(&mut out, ns)?;
                    out.extend_from_slice(&address.octets());
                }
                Record::Synth4(address) => out.extend_from_slice(&address.octets()),
                Record::Synth6(address) => out.extend_from_slice(&address.octets()),
                Record::Txt(entries) => {
                    let count = u8::try_from(entries.len())
                        .map_err(|_| ResourceError::TooLarge("txt entries"))?;
                    out.push(count);
                    for entry in entries {
                        let len = u8::try_from(entry.len())
                            .map_err(|_| ResourceError::TooLarge("txt entry"))?;
                        out.push(len);
                        out.extend_from_slice(entry.as_bytes());
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn ds_records(&self) -> impl Iterator<Item = &DsRecord> {
        self.records.iter().filter_map(|r| match r {
            Record::Ds(ds) => Some(ds),
            _ => None,
        })
    }

    /// Returns true if the zone is signed (has at least one DS record).
    pub fn is_signed(&self) -> bool {
        self.ds_records().next().is_some()
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) -> Result<(), ResourceError> {
    let name = Name::from_ascii(name)
        .map_err(|e| ResourceError::BadName(e.to_string()))?
        .to_lowercase();
    let bytes = name
        .to_bytes()
        .map_err(|e| ResourceError::BadName(e.to_string()))?;
    out.extend_from_slice(&bytes);
    Ok(())
}

fn read_u8(decoder: &mut BinDecoder<'_>) -> Result<u8, ResourceError> {
    decoder
        .read_u8()
        .map(Restrict::unverified)
        .map_err(|_| ResourceError::UnexpectedEof)
}

fn read_bytes<'a>(decoder: &mut BinDecoder<'a>, len: usize) -> Result<&'a [u8], ResourceError> {
    decoder
        .read_slice(len)
        .map(Restrict::unverified)
        .map_err(|_| ResourceError::UnexpectedEof)
}

fn read_array<const N: usize>(decoder: &mut BinDecoder<'_>) -> Result<[u8; N], ResourceError> {
    let mut out = [0u8; N];
    out.copy_from_slice(read_bytes(decoder, N)?);
    Ok(out)
}

/// Wire-format name, compression pointers resolved against the whole resource.
fn read_name(decoder: &mut BinDecoder<'_>) -> Result<String, ResourceError> {
    Name::read(decoder)
        .map(|name| name.to_ascii())
        .map_err(|e| ResourceError::BadName(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_all_record_types() {
        let mut buf = vec![0u8];
        // DS
        buf.extend_from_slice(&[0, 0xe5, 0x6a, 8, 2, 3, 0xaa, 0xbb, 0xcc]);
        // NS ns1.welcome. at offset 10
        buf.extend_from_slice(&[1, 3, b'n', b's', b'1', 7]);
        buf.extend_from_slice(b"welcome");
        buf.push(0);
        // GLUE4 with a pointer to ns1.welcome.
        buf.extend_from_slice(&[2, 0xc0, 11, 10, 0, 0, 1]);
        // GLUE6 www + pointer to welcome.
        buf.extend_from_slice(&[3, 3, b'w', b'w', b'w', 0xc0, 15]);
        buf.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        // SYNTH4, SYNTH6
        buf.extend_from_slice(&[4, 127, 0, 0, 1]);
        buf.push(5);
        buf.extend_from_slice(&Ipv6Addr::UNSPECIFIED.octets());
        // TXT
        buf.extend_from_slice(&[6, 2, 2, b'h', b'i', 0]);

        let resource = Resource::decode(&buf).unwrap();
        assert_eq!(
            resource.records,
            vec![
                Record::Ds(DsRecord {
                    key_tag: 0xe56a,
                    algorithm: 8,
                    digest_type: 2,
                    digest: vec![0xaa, 0xbb, 0xcc],
                }),
                Record::Ns("ns1.welcome.".into()),
                Record::Glue4 {
                    ns: "ns1.welcome.".into(),
                    address: Ipv4Addr::new(10, 0, 0, 1),
                },
                Record::Glue6 {
                    ns: "www.welcome.".into(),
                    address: Ipv6Addr::LOCALHOST,
                },
                Record::Synth4(Ipv4Addr::LOCALHOST),
                Record::Synth6(Ipv6Addr::UNSPECIFIED),
                Record::Txt(vec!["hi".into(), String::new()]),
            ]
        );
        assert!(resource.is_signed());
        assert_eq!(resource.ds_records().count(), 1);
    }

    #[test]
    fn test_empty_resource() {
        let resource = Resource::decode(&[0]).unwrap();
        assert!(resource.records.is_empty());
        assert!(!resource.is_signed());
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Resource::decode(&[]), Err(ResourceError::UnexpectedEof));
        assert_eq!(Resource::decode(&[1]), Err(ResourceError::InvalidVersion(1)));
        assert_eq!(Resource::decode(&[0, 9]), Err(ResourceError::UnknownRecordType(9)));
        assert_eq!(
            Resource::decode(&[0, 0, 1, 2, 8, 2, 5, 1]),
            Err(ResourceError::UnexpectedEof)
        );
        // pointer loop
        assert!(matches!(
            Resource::decode(&[0, 1, 0xc0, 2]),
            Err(ResourceError::BadName(_))
        ));
    }

    #[test]
    fn test_forward_pointer_and_long_label_rejected() {
        // pointer past the current name
        assert!(matches!(
            Resource::decode(&[0, 1, 0xc0, 8, 0, 0, 0, 0, 1, b'a', 0]),
            Err(ResourceError::BadName(_))
        ));
        let label = "a".repeat(64);
        let resource = Resource {
            records: vec![Record::Ns(format!("{label}.welcome."))],
        };
        assert!(matches!(resource.encode(), Err(ResourceError::BadName(_))));
    }

    #[test]
    fn test_encode_decodes_back() {
        let resource = Resource {
            records: vec![
                Record::Ds(DsRecord {
                    key_tag: 1,
                    algorithm: 13,
                    digest_type: 2,
                    digest: vec![7; 32],
                }),
                Record::Ns("ns1.welcome.".into()),
                Record::Txt(vec!["v=1".into()]),
            ],
        };
        let bytes = resource.encode().unwrap();
        assert_eq!(Resource::decode(&bytes).unwrap(), resource);
    }
}
