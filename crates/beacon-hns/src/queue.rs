//! Query queue shared between caller threads and the engine thread.
//!
//! Producers push under a mutex and then ring a [`Notify`]. The engine drains
//! the queue until empty on every wake, so several rings between two drains
//! collapse into one wake without losing work.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// A pending name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionQuery {
    pub name: String,
    /// Opaque caller context, passed back untouched with the answer
    pub context_id: u64,
}

impl ResolutionQuery {
    pub fn new(name: impl Into<String>, context_id: u64) -> Self {
        Self {
            name: name.into(),
            context_id,
        }
    }
}

/// Multi-producer, single-consumer FIFO of [`ResolutionQuery`].
#[derive(Debug, Default)]
pub struct QueryQueue {
    items: Mutex<VecDeque<ResolutionQuery>>,
    signal: Notify,
}

impl QueryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append at the tail and wake the consumer.
    pub fn enqueue(&self, query: ResolutionQuery) {
        self.items.lock().push_back(query);
        self.signal.notify_one();
    }

    /// Remove from the head without blocking.
    pub fn dequeue(&self) -> Option<ResolutionQuery> {
        self.items.lock().pop_front()
    }

    /// Wait until at least one `enqueue` happened since the last wake.
    pub async fn notified(&self) {
        self.signal.notified().await;
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Drop every pending query, returning how many were discarded.
    pub fn clear(&self) -> usize {
        let mut items = self.items.lock();
        let n = items.len();
        items.clear();
        n
    }
}
