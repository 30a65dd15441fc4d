//! Pool state snapshot published by the engine for other threads.

use parking_lot::RwLock;
use std::sync::Arc;

/// Health of the light client at one timer tick.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolState {
    pub chain_ready: bool,
    pub chain_height: u32,
    pub sync_progress: f32,
    pub total_peers: usize,
    pub active_peers: usize,
    pub name_root: [u8; 32],
}

/// Shared, lock-protected [`PoolState`].
///
/// The engine replaces the whole struct under the write lock; readers copy
/// values out under the read lock.
#[derive(Debug, Clone, Default)]
pub struct SharedPoolState {
    inner: Arc<RwLock<PoolState>>,
}

impl SharedPoolState {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn publish(&self, state: PoolState) {
        *self.inner.write() = state;
    }

    /// Copy of the whole snapshot.
    pub fn snapshot(&self) -> PoolState {
        *self.inner.read()
    }

    pub fn chain_ready(&self) -> bool {
        self.inner.read().chain_ready
    }

    pub fn chain_height(&self) -> u32 {
        self.inner.read().chain_height
    }

    pub fn sync_progress(&self) -> f32 {
        self.inner.read().sync_progress
    }

    pub fn total_peers(&self) -> usize {
        self.inner.read().total_peers
    }

    pub fn active_peers(&self) -> usize {
        self.inner.read().active_peers
    }

    pub fn name_root(&self) -> [u8; 32] {
        self.inner.read().name_root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let state = SharedPoolState::new();
        assert!(!state.chain_ready());
        assert_eq!(state.chain_height(), 0);
        assert_eq!(state.name_root(), [0u8; 32]);
    }

    #[test]
    fn test_snapshots_are_never_torn() {
        let state = SharedPoolState::new();
        let writer = {
            let state = state.clone();
            std::thread::spawn(move || {
                for i in 1..=20_000u32 {
                    let b = i.to_le_bytes()[0];
                    state.publish(PoolState {
                        chain_ready: i % 2 == 0,
                        chain_height: i,
                        sync_progress: i as f32,
                        total_peers: i as usize,
                        active_peers: i as usize,
                        name_root: [b; 32],
                    });
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..20_000 {
                        let s = state.snapshot();
                        if s.chain_height == 0 {
                            continue;
                        }
                        let i = s.chain_height;
                        assert_eq!(s.chain_ready, i % 2 == 0);
                        assert_eq!(s.total_peers, i as usize);
                        assert_eq!(s.active_peers, i as usize);
                        assert!((s.sync_progress - i as f32).abs() < f32::EPSILON);
                        assert_eq!(s.name_root, [i.to_le_bytes()[0]; 32]);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
    }
}
