//! Header store: persists the chain as a flat file of fixed-size records.
//!
//! Records start at height 1 (genesis is implied by the chain params). The
//! file is replaced atomically on every write and read back sequentially;
//! the first bad record ends the restore and everything before it is kept.

use std::fs::{self, File};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::chain::ChainState;
use crate::error::Result;
use crate::header::{BlockHeader, RECORD_SIZE};

/// Flat-file header store.
#[derive(Debug, Clone)]
pub struct HeaderStore {
    path: PathBuf,
}

impl HeaderStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write headers `1..=tip` and atomically replace the store file.
    /// Returns the stored height.
    pub fn write(&self, chain: &ChainState) -> Result<u32> {
        let height = chain.height();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.tmp_path();
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for h in 1..=height {
                if let Some(hdr) = chain.get_by_height(h) {
                    out.write_all(&hdr.encode())?;
                }
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), height, "header store written");
        Ok(height)
    }

    /// Restore records from disk onto `chain`. A missing file restores
    /// nothing. Returns the chain height afterwards.
    pub fn restore(&self, chain: &mut ChainState) -> Result<u32> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no header store, starting from genesis");
                return Ok(chain.height());
            }
            Err(e) => return Err(e.into()),
        };

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        for record in buf.chunks(RECORD_SIZE) {
            let appended = BlockHeader::decode(record).and_then(|hdr| chain.append(hdr));
            if let Err(e) = appended {
                warn!(
                    path = %self.path.display(),
                    height = chain.height(),
                    error = %e,
                    "failed reading remaining block headers, file likely corrupted"
                );
                break;
            }
        }

        info!(height = chain.height(), "restored header chain");
        Ok(chain.height())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainParams;
    use crate::header::{sample_header, RAW_HEADER_SIZE};

    fn chain_with(n: u32) -> ChainState {
        let mut chain = ChainState::new(ChainParams::regtest());
        for h in 1..=n {
            chain.append(sample_header(h)).unwrap();
        }
        chain
    }

    #[test]
    fn test_write_then_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::new(dir.path().join("cache").join("chain.bin"));

        assert_eq!(store.write(&chain_with(5)).unwrap(), 5);
        let len = fs::metadata(store.path()).unwrap().len();
        assert_eq!(len as usize, 5 * RECORD_SIZE);

        let mut restored = ChainState::new(ChainParams::regtest());
        assert_eq!(store.restore(&mut restored).unwrap(), 5);
        assert_eq!(restored.tip(), &sample_header(5));
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_missing_file_restores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::new(dir.path().join("chain.bin"));
        let mut chain = ChainState::new(ChainParams::regtest());
        assert_eq!(store.restore(&mut chain).unwrap(), 0);
    }

    #[test]
    fn test_corrupt_checksum_truncates_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::new(dir.path().join("chain.bin"));
        store.write(&chain_with(5)).unwrap();

        // height 3 is the third record
        let mut bytes = fs::read(store.path()).unwrap();
        let checksum = 2 * RECORD_SIZE + RAW_HEADER_SIZE;
        bytes[checksum] ^= 0x01;
        fs::write(store.path(), &bytes).unwrap();

        let mut chain = ChainState::new(ChainParams::regtest());
        assert_eq!(store.restore(&mut chain).unwrap(), 2);
        assert_eq!(chain.tip(), &sample_header(2));
    }

    #[test]
    fn test_height_gap_truncates_restore() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.bin");
        let mut bytes = Vec::new();
        for h in [1, 2, 3, 5, 6] {
            bytes.extend_from_slice(&sample_header(h).encode());
        }
        fs::write(&path, bytes).unwrap();

        let mut chain = ChainState::new(ChainParams::regtest());
        assert_eq!(HeaderStore::new(path).restore(&mut chain).unwrap(), 3);
    }

    #[test]
    fn test_trailing_partial_record_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.bin");
        let mut bytes = Vec::new();
        for h in 1..=2 {
            bytes.extend_from_slice(&sample_header(h).encode());
        }
        bytes.extend_from_slice(&[0u8; 10]);
        fs::write(&path, bytes).unwrap();

        let mut chain = ChainState::new(ChainParams::regtest());
        assert_eq!(HeaderStore::new(path).restore(&mut chain).unwrap(), 2);
    }

    #[test]
    fn test_rewrite_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = HeaderStore::new(dir.path().join("chain.bin"));
        store.write(&chain_with(5)).unwrap();
        store.write(&chain_with(2)).unwrap();
        let len = fs::metadata(store.path()).unwrap().len();
        assert_eq!(len as usize, 2 * RECORD_SIZE);
    }
}
