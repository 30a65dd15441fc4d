//! Header chain state owned by the engine thread.

use std::collections::HashMap;

use crate::error::{CodecError, Corruption};
use crate::header::BlockHeader;

/// Network constants the chain logic depends on.
#[derive(Debug, Clone)]
pub struct ChainParams {
    pub genesis: BlockHeader,
    /// Oldest tip (seconds) that still counts as synced
    pub max_tip_age: i64,
    /// Oldest tip (seconds) the engine will answer queries against
    pub ready_window: i64,
    /// Subtracted from the elapsed time when computing progress
    pub maturity_window: i64,
    /// Minimum cumulative work (big-endian) before the chain is synced
    pub min_chain_work: [u8; 32],
    /// Blocks between name tree commitments
    pub tree_interval: u32,
    /// Blocks of work required on top of a commitment before it is used
    pub tree_maturity: u32,
}

impl ChainParams {
    /// Handshake mainnet.
    pub fn mainnet() -> Self {
        let mut min_chain_work = [0u8; 32];
        min_chain_work[24..].copy_from_slice(&0x75b5_a2b7_bf52_2d45_u64.to_be_bytes());
        Self {
            genesis: BlockHeader {
                time: 1_580_745_078,
                bits: 0x1c00_ffff,
                ..BlockHeader::default()
            },
            min_chain_work,
            ..Self::regtest()
        }
    }

    /// Local test network: no minimum work requirement.
    pub fn regtest() -> Self {
        Self {
            genesis: BlockHeader {
                time: 1_580_745_080,
                bits: 0x207f_ffff,
                ..BlockHeader::default()
            },
            max_tip_age: 24 * 60 * 60,
            ready_window: 6 * 60 * 60,
            maturity_window: 40 * 60,
            min_chain_work: [0u8; 32],
            tree_interval: 36,
            tree_maturity: 12,
        }
    }
}

/// In-memory header chain: a height index plus a hash index.
#[derive(Debug)]
pub struct ChainState {
    params: ChainParams,
    headers: Vec<BlockHeader>,
    hashes: HashMap<[u8; 32], u32>,
    synced: bool,
}

impl ChainState {
    pub fn new(params: ChainParams) -> Self {
        let genesis = params.genesis.clone();
        let mut hashes = HashMap::new();
        hashes.insert(genesis.hash(), 0);
        Self {
            params,
            headers: vec![genesis],
            hashes,
            synced: false,
        }
    }

    pub const fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Height of the tip.
    pub fn height(&self) -> u32 {
        self.tip().height
    }

    pub fn tip(&self) -> &BlockHeader {
        // genesis is always present
        &self.headers[self.headers.len() - 1]
    }

    pub fn genesis(&self) -> &BlockHeader {
        &self.headers[0]
    }

    pub fn get_by_height(&self, height: u32) -> Option<&BlockHeader> {
        self.headers.get(height as usize)
    }

    pub fn get_by_hash(&self, hash: &[u8; 32]) -> Option<&BlockHeader> {
        self.hashes
            .get(hash)
            .and_then(|h| self.get_by_height(*h))
    }

    pub const fn synced(&self) -> bool {
        self.synced
    }

    /// Append the next header. Heights must be contiguous.
    pub fn append(&mut self, hdr: BlockHeader) -> Result<(), CodecError> {
        let expected = self.height() + 1;
        if hdr.height != expected {
            return Err(CodecError::CorruptRecord(Corruption::HeightGap {
                expected,
                found: hdr.height,
            }));
        }
        self.hashes.insert(hdr.hash(), hdr.height);
        self.headers.push(hdr);
        Ok(())
    }

    /// Returns true if the tip carries at least the minimum chain work.
    pub fn has_work(&self) -> bool {
        self.tip().work >= self.params.min_chain_work
    }

    /// Mark the chain synced once the tip is recent and has enough work.
    /// Returns true on the transition.
    pub fn maybe_sync(&mut self, now: i64) -> bool {
        if self.synced {
            return false;
        }
        if self.tip().timestamp() < now - self.params.max_tip_age {
            return false;
        }
        if !self.has_work() {
            return false;
        }
        self.synced = true;
        true
    }

    /// Returns true if the tip is recent enough to answer queries.
    pub fn is_ready(&self, now: i64) -> bool {
        self.tip().timestamp() >= now - self.params.ready_window
    }

    /// Fraction of elapsed chain time covered by the tip, in `[0, 1]`.
    pub fn progress(&self, now: i64) -> f32 {
        let start = self.genesis().timestamp() as f64;
        let current = self.tip().timestamp() as f64 - start;
        let end = now as f64 - start - self.params.maturity_window as f64;
        if end <= 0.0 {
            return 1.0;
        }
        #[allow(clippy::cast_possible_truncation)]
        let progress = (current / end).clamp(0.0, 1.0) as f32;
        progress
    }

    /// Height of the newest name root with enough work on top of it.
    pub fn name_root_height(&self) -> u32 {
        let height = self.height();
        let mut rem = height % self.params.tree_interval;
        if rem >= self.params.tree_maturity {
            rem = 0;
        }
        height - rem
    }

    /// Name root the engine resolves against.
    pub fn name_root(&self) -> Option<[u8; 32]> {
        self.get_by_height(self.name_root_height())
            .map(|h| h.name_root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::sample_header;

    fn chain_with(n: u32) -> ChainState {
        let mut chain = ChainState::new(ChainParams::regtest());
        for h in 1..=n {
            chain.append(sample_header(h)).unwrap();
        }
        chain
    }

    #[test]
    fn test_append_and_index() {
        let chain = chain_with(5);
        assert_eq!(chain.height(), 5);
        assert_eq!(chain.tip(), &sample_header(5));
        let hash = sample_header(3).hash();
        assert_eq!(chain.get_by_hash(&hash).map(|h| h.height), Some(3));
        assert!(chain.get_by_height(6).is_none());
    }

    #[test]
    fn test_append_rejects_gap() {
        let mut chain = chain_with(2);
        let err = chain.append(sample_header(4)).unwrap_err();
        assert_eq!(
            err,
            CodecError::CorruptRecord(Corruption::HeightGap {
                expected: 3,
                found: 4
            })
        );
        assert_eq!(chain.height(), 2);
    }

    #[test]
    fn test_sync_requires_recent_tip() {
        let mut chain = chain_with(3);
        let tip_time = chain.tip().timestamp();

        assert!(!chain.maybe_sync(tip_time + 24 * 60 * 60 + 1));
        assert!(!chain.synced());

        assert!(chain.maybe_sync(tip_time + 60));
        assert!(chain.synced());
        // only reported once
        assert!(!chain.maybe_sync(tip_time + 60));
    }

    #[test]
    fn test_sync_requires_work() {
        let mut params = ChainParams::regtest();
        params.min_chain_work = [0xff; 32];
        let mut chain = ChainState::new(params);
        chain.append(sample_header(1)).unwrap();
        assert!(!chain.maybe_sync(chain.tip().timestamp()));
    }

    #[test]
    fn test_ready_window() {
        let chain = chain_with(1);
        let tip_time = chain.tip().timestamp();
        assert!(chain.is_ready(tip_time + 21_600));
        assert!(!chain.is_ready(tip_time + 21_601));
    }

    #[test]
    fn test_progress() {
        let chain = chain_with(0);
        let genesis = chain.genesis().timestamp();
        assert!(chain.progress(genesis + 40 * 60 + 1000) < f32::EPSILON);

        let chain = chain_with(10);
        let tip = chain.tip().timestamp();
        let p = chain.progress(tip + 40 * 60);
        assert!((p - 1.0).abs() < 1e-6);

        let half = chain.progress(genesis + 2 * (tip - genesis) + 40 * 60);
        assert!((half - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_name_root_height() {
        for (height, root) in [(0, 0), (11, 0), (12, 12), (35, 35), (36, 36), (47, 36), (48, 48)] {
            let chain = chain_with(height);
            assert_eq!(chain.name_root_height(), root, "height {height}");
        }
        let chain = chain_with(40);
        assert_eq!(chain.name_root(), Some(sample_header(36).name_root));
    }
}
