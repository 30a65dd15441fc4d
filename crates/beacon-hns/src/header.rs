//! Fixed-layout block header records.
//!
//! A stored record is the consensus header fields, then height and
//! cumulative work, then a `u16` size field that must equal
//! [`RAW_HEADER_SIZE`]. Integers are little-endian.

use ring::digest::{digest, SHA256};

use crate::error::{CodecError, Corruption};

/// Bytes of the consensus header (everything hashed for the header id).
pub const HEADER_SIZE: usize = 236;

/// Header plus height and work, the value of the trailing size field.
pub const RAW_HEADER_SIZE: usize = HEADER_SIZE + 4 + 32;

/// Full stored record including the size field.
pub const RECORD_SIZE: usize = RAW_HEADER_SIZE + 2;

/// A block header with its chain position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockHeader {
    pub nonce: u32,
    /// Block timestamp (unix seconds)
    pub time: u64,
    pub prev_block: [u8; 32],
    pub name_root: [u8; 32],
    pub extra_nonce: [u8; 24],
    pub reserved_root: [u8; 32],
    pub witness_root: [u8; 32],
    pub merkle_root: [u8; 32],
    pub version: u32,
    pub bits: u32,
    pub mask: [u8; 32],
    pub height: u32,
    /// Cumulative chain work, big-endian
    pub work: [u8; 32],
}

impl BlockHeader {
    /// Encode into a fixed-size record.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        let mut w = Writer { buf: &mut out, pos: 0 };

        // preheader
        w.put(&self.nonce.to_le_bytes());
        w.put(&self.time.to_le_bytes());
        w.put(&self.prev_block);
        w.put(&self.name_root);

        // subheader
        w.put(&self.extra_nonce);
        w.put(&self.reserved_root);
        w.put(&self.witness_root);
        w.put(&self.merkle_root);
        w.put(&self.version.to_le_bytes());
        w.put(&self.bits.to_le_bytes());

        w.put(&self.mask);

        w.put(&self.height.to_le_bytes());
        w.put(&self.work);

        #[allow(clippy::cast_possible_truncation)]
        w.put(&(RAW_HEADER_SIZE as u16).to_le_bytes());
        debug_assert_eq!(w.pos, RECORD_SIZE);
        out
    }

    /// Decode one record from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        if buf.len() < RECORD_SIZE {
            return Err(CodecError::CorruptRecord(Corruption::Short {
                len: buf.len(),
                need: RECORD_SIZE,
            }));
        }
        let mut r = Reader { buf, pos: 0 };

        let hdr = Self {
            nonce: u32::from_le_bytes(r.take()),
            time: u64::from_le_bytes(r.take()),
            prev_block: r.take(),
            name_root: r.take(),
            extra_nonce: r.take(),
            reserved_root: r.take(),
            witness_root: r.take(),
            merkle_root: r.take(),
            version: u32::from_le_bytes(r.take()),
            bits: u32::from_le_bytes(r.take()),
            mask: r.take(),
            height: u32::from_le_bytes(r.take()),
            work: r.take(),
        };

        let size = u16::from_le_bytes(r.take());
        if usize::from(size) != RAW_HEADER_SIZE {
            return Err(CodecError::CorruptRecord(Corruption::SizeMismatch {
                found: size,
            }));
        }
        Ok(hdr)
    }

    /// Header id: SHA-256 of the consensus fields.
    pub fn hash(&self) -> [u8; 32] {
        let record = self.encode();
        let mut id = [0u8; 32];
        id.copy_from_slice(digest(&SHA256, &record[..HEADER_SIZE]).as_ref());
        id
    }

    /// Block time as signed unix seconds.
    pub fn timestamp(&self) -> i64 {
        i64::try_from(self.time).unwrap_or(i64::MAX)
    }
}

struct Writer<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl Writer<'_> {
    fn put(&mut self, bytes: &[u8]) {
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }
}

// Callers check the length up front, so `take` never runs past the end.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Reader<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        out.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        out
    }
}

#[cfg(test)]
pub(crate) fn sample_header(height: u32) -> BlockHeader {
    let seed = height.to_le_bytes()[0];
    let mut work = [0u8; 32];
    work[28..].copy_from_slice(&height.to_be_bytes());
    BlockHeader {
        nonce: height.wrapping_mul(2_654_435_761),
        time: 1_580_745_078 + u64::from(height) * 600,
        prev_block: [seed; 32],
        name_root: [seed.wrapping_add(1); 32],
        extra_nonce: [seed.wrapping_add(2); 24],
        reserved_root: [seed.wrapping_add(3); 32],
        witness_root: [seed.wrapping_add(4); 32],
        merkle_root: [seed.wrapping_add(5); 32],
        version: 0,
        bits: 0x1c00_ffff,
        mask: [seed.wrapping_add(6); 32],
        height,
        work,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(RAW_HEADER_SIZE, 272);
        assert_eq!(RECORD_SIZE, 274);
    }

    #[test]
    fn test_round_trip() {
        for height in [0, 1, 2, 35, 36, 255, 256, 100_000, u32::MAX] {
            let hdr = sample_header(height);
            let encoded = hdr.encode();
            assert_eq!(BlockHeader::decode(&encoded).unwrap(), hdr);
        }
    }

    #[test]
    fn test_field_layout() {
        let hdr = sample_header(7);
        let rec = hdr.encode();
        assert_eq!(&rec[0..4], &hdr.nonce.to_le_bytes());
        assert_eq!(&rec[4..12], &hdr.time.to_le_bytes());
        assert_eq!(&rec[44..76], &hdr.name_root);
        assert_eq!(&rec[HEADER_SIZE..HEADER_SIZE + 4], &7u32.to_le_bytes());
        assert_eq!(&rec[RAW_HEADER_SIZE..], &272u16.to_le_bytes());
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut rec = sample_header(3).encode();
        rec[RECORD_SIZE - 2] ^= 0xff;
        assert!(matches!(
            BlockHeader::decode(&rec),
            Err(CodecError::CorruptRecord(Corruption::SizeMismatch { .. }))
        ));
    }

    #[test]
    fn test_short_buffer_rejected() {
        let rec = sample_header(3).encode();
        assert_eq!(
            BlockHeader::decode(&rec[..RECORD_SIZE - 1]),
            Err(CodecError::CorruptRecord(Corruption::Short {
                len: RECORD_SIZE - 1,
                need: RECORD_SIZE
            }))
        );
    }

    #[test]
    fn test_hash_ignores_height_and_work() {
        let a = sample_header(9);
        let mut b = a.clone();
        b.height = 10;
        b.work = [0xff; 32];
        assert_eq!(a.hash(), b.hash());

        b.nonce ^= 1;
        assert_ne!(a.hash(), b.hash());
    }
}
