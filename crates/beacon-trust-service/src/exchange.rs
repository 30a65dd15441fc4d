//! DNS queries for DNSSEC validation.
//!
//! Queries go to recursive resolvers that can see Handshake zones. They set
//! the DNSSEC OK bit and checking disabled, so signatures come back even for
//! zones the resolver itself cannot validate; validation happens locally.

use async_trait::async_trait;
use hickory_proto::rr::{Name, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinDecoder, BinEncodable, BinEncoder};
use hickory_proto::ProtoError;
use ring::rand::{SecureRandom, SystemRandom};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::debug;

use crate::config::TlsaConfig;
use crate::dnssec::WireRecord;
use crate::error::{DaneError, Result, ServiceError};

const FLAG_QR: u16 = 0x8000;
const FLAG_TC: u16 = 0x0200;
const FLAG_RD: u16 = 0x0100;
const FLAG_CD: u16 = 0x0010;

/// EDNS DNSSEC OK bit in the OPT record's TTL field.
const EDNS_DO: u32 = 0x0000_8000;

/// Advertised UDP payload size.
const EDNS_UDP_SIZE: u16 = 1232;

const CLASS_IN: u16 = 1;

pub const RCODE_NOERROR: u8 = 0;
pub const RCODE_SERVFAIL: u8 = 2;
pub const RCODE_NXDOMAIN: u8 = 3;

/// Answer section of a response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsResponse {
    pub rcode: u8,
    pub answers: Vec<WireRecord>,
}

/// Sends one question and returns the answer section.
#[async_trait]
pub trait DnsExchange: Send + Sync {
    async fn query(&self, qname: &Name, rtype: RecordType) -> std::result::Result<DnsResponse, DaneError>;
}

/// Encode a query with one question and an OPT record.
pub fn encode_query(id: u16, qname: &Name, rtype: RecordType) -> std::result::Result<Vec<u8>, ProtoError> {
    let mut buf = Vec::with_capacity(64);
    let mut encoder = BinEncoder::new(&mut buf);
    encoder.emit_u16(id)?;
    encoder.emit_u16(FLAG_RD | FLAG_CD)?;
    for count in [1, 0, 0, 1] {
        encoder.emit_u16(count)?;
    }
    qname.emit(&mut encoder)?;
    encoder.emit_u16(rtype.into())?;
    encoder.emit_u16(CLASS_IN)?;

    // OPT: root owner, payload size in the class field
    encoder.emit(0)?;
    encoder.emit_u16(RecordType::OPT.into())?;
    encoder.emit_u16(EDNS_UDP_SIZE)?;
    encoder.emit_u32(EDNS_DO)?;
    encoder.emit_u16(0)?;
    Ok(buf)
}

/// A decoded response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub id: u16,
    pub truncated: bool,
    pub question: Option<(Name, RecordType)>,
    pub body: DnsResponse,
}

impl Response {
    /// Returns true if this answers query `id` for `qname`/`rtype`.
    pub fn is_answer(&self, id: u16, qname: &Name, rtype: RecordType) -> bool {
        self.id == id
            && self
                .question
                .as_ref()
                .is_some_and(|(name, t)| name == qname && *t == rtype)
    }
}

/// Decode the header, question and answer section of a response.
pub fn decode_response(buf: &[u8]) -> std::result::Result<Response, ProtoError> {
    let mut decoder = BinDecoder::new(buf);
    let id = decoder.read_u16()?.unverified();
    let flags = decoder.read_u16()?.unverified();
    if flags & FLAG_QR == 0 {
        return Err(ProtoError::from("not a response"));
    }
    let qd_count = decoder.read_u16()?.unverified();
    let an_count = decoder.read_u16()?.unverified();
    decoder.read_u16()?;
    decoder.read_u16()?;

    let mut question = None;
    for _ in 0..qd_count {
        let name = Name::read(&mut decoder)?;
        let rtype = RecordType::from(decoder.read_u16()?.unverified());
        decoder.read_u16()?;
        question.get_or_insert((name, rtype));
    }

    let mut answers = Vec::with_capacity(usize::from(an_count));
    for _ in 0..an_count {
        let name = Name::read(&mut decoder)?;
        let rtype = RecordType::from(decoder.read_u16()?.unverified());
        let class = decoder.read_u16()?.unverified();
        let ttl = decoder.read_u32()?.unverified();
        let len = decoder.read_u16()?.unverified();
        let rdata = decoder.read_slice(usize::from(len))?.unverified().to_vec();
        answers.push(WireRecord {
            name,
            rtype,
            class,
            ttl,
            rdata,
        });
    }

    #[allow(clippy::cast_possible_truncation)]
    let rcode = (flags & 0x000f) as u8;
    Ok(Response {
        id,
        truncated: flags & FLAG_TC != 0,
        question,
        body: DnsResponse { rcode, answers },
    })
}

/// Plain DNS over UDP, retried over TCP when truncated.
#[derive(Debug)]
pub struct UdpExchange {
    servers: Vec<SocketAddr>,
    timeout: Duration,
    rng: SystemRandom,
}

impl UdpExchange {
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self {
            servers,
            timeout,
            rng: SystemRandom::new(),
        }
    }

    /// Use the configured resolvers, or the system configuration when none
    /// are set.
    pub fn from_config(config: &TlsaConfig) -> Result<Self> {
        let servers: Vec<SocketAddr> = if config.nameservers.is_empty() {
            let (system, _) = hickory_resolver::system_conf::read_system_conf()
                .map_err(|e| ServiceError::Resolver(format!("failed reading system dns config: {e}")))?;
            let mut servers: Vec<SocketAddr> = system.name_servers().iter().map(|ns| ns.socket_addr).collect();
            servers.dedup();
            servers
        } else {
            config
                .nameservers
                .iter()
                .map(|ip| SocketAddr::new(*ip, config.nameserver_port))
                .collect()
        };
        if servers.is_empty() {
            return Err(ServiceError::Resolver("no nameservers configured".into()));
        }
        Ok(Self::new(servers, config.query_timeout()))
    }

    fn query_id(&self) -> u16 {
        let mut id = [0u8; 2];
        // an all-zero id still works; it is just predictable
        let _ = self.rng.fill(&mut id);
        u16::from_be_bytes(id)
    }

    async fn query_server(
        &self,
        server: SocketAddr,
        qname: &Name,
        rtype: RecordType,
    ) -> std::result::Result<DnsResponse, DaneError> {
        let id = self.query_id();
        let request = encode_query(id, qname, rtype).map_err(|e| DaneError::Lookup(e.to_string()))?;

        let response = tokio::time::timeout(self.timeout, udp_query(&request, server, id, qname, rtype))
            .await
            .map_err(|_| DaneError::Timeout)?
            .map_err(|e| DaneError::Lookup(e.to_string()))?;
        if !response.truncated {
            return Ok(response.body);
        }

        debug!(%server, name = %qname, "truncated answer, retrying over tcp");
        let response = tokio::time::timeout(self.timeout, tcp_query(&request, server, id, qname, rtype))
            .await
            .map_err(|_| DaneError::Timeout)?
            .map_err(|e| DaneError::Lookup(e.to_string()))?;
        Ok(response.body)
    }
}

#[async_trait]
impl DnsExchange for UdpExchange {
    async fn query(&self, qname: &Name, rtype: RecordType) -> std::result::Result<DnsResponse, DaneError> {
        let mut last = DaneError::Lookup("no nameservers".into());
        for server in &self.servers {
            match self.query_server(*server, qname, rtype).await {
                Ok(response) if response.rcode == RCODE_SERVFAIL => {
                    debug!(%server, name = %qname, "server failure, trying next server");
                    last = DaneError::Lookup("server failure".into());
                }
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!(%server, name = %qname, error = %e, "query failed");
                    last = e;
                }
            }
        }
        Err(last)
    }
}

async fn udp_query(
    request: &[u8],
    server: SocketAddr,
    id: u16,
    qname: &Name,
    rtype: RecordType,
) -> std::io::Result<Response> {
    let local: SocketAddr = if server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(server).await?;
    socket.send(request).await?;

    // garbage and unrelated answers are skipped; the caller times out
    loop {
        let mut buf = vec![0u8; 4096];
        let len = socket.recv(&mut buf).await?;
        buf.truncate(len);
        match decode_response(&buf) {
            Ok(response) if response.is_answer(id, qname, rtype) => return Ok(response),
            _ => continue,
        }
    }
}

async fn tcp_query(
    request: &[u8],
    server: SocketAddr,
    id: u16,
    qname: &Name,
    rtype: RecordType,
) -> std::io::Result<Response> {
    let mut stream = TcpStream::connect(server).await?;
    let len = u16::try_from(request.len()).map_err(|_| std::io::Error::other("query too large"))?;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(request).await?;

    loop {
        let len = stream.read_u16().await?;
        let mut buf = vec![0u8; usize::from(len)];
        stream.read_exact(&mut buf).await?;
        match decode_response(&buf) {
            Ok(response) if response.is_answer(id, qname, rtype) => return Ok(response),
            Ok(_) => continue,
            Err(e) => return Err(std::io::Error::other(e.to_string())),
        }
    }
}
