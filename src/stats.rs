//! Per-peer use accounting.
//!
//! [`UseStats`] maps peer keys to the number of times callers dispatched
//! work to them. Membership churns under overlay events while enumeration
//! reads counts concurrently, so a single reader-writer lock guards both
//! the counts and the set of parked initialization waiters. The lock is
//! never held across an await or while running caller code.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::trace;

use crate::peer::{Keyed, PeerKey};

/// Thread-safe use counts over a churning peer set.
#[derive(Debug, Default)]
pub(crate) struct UseStats {
    inner: RwLock<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    uses: HashMap<PeerKey, u64>,
    /// Keys awaited but not yet initialized. Disjoint from `uses`: a key
    /// moves out of here the moment it is initialized.
    waiting: HashMap<PeerKey, Vec<oneshot::Sender<()>>>,
}

impl UseStats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current use count for a key, 0 if the key is unknown.
    pub(crate) fn key_uses(&self, key: &str) -> u64 {
        self.inner.read().uses.get(key).copied().unwrap_or_default()
    }

    /// Current use count for a keyed resource.
    pub(crate) fn uses<R: Keyed>(&self, resource: &R) -> u64 {
        self.key_uses(&resource.key())
    }

    /// Record one use and return the new count. An unknown key is created
    /// at 1: the use was observed and must not be dropped.
    pub(crate) fn add_use(&self, key: &str) -> u64 {
        let mut inner = self.inner.write();
        let count = inner.uses.entry(key.to_owned()).or_default();
        *count += 1;
        let count = *count;
        drop(inner);

        trace!(key = %short(key), count, "recorded use");
        count
    }

    /// Set a key's count and release every waiter parked on it.
    ///
    /// A second init for the same key overwrites the count: a peer that was
    /// removed and readmitted adopts a fresh seed.
    pub(crate) fn init_key(&self, key: &str, count: u64) {
        let waiters = {
            let mut inner = self.inner.write();
            inner.uses.insert(key.to_owned(), count);
            inner.waiting.remove(key)
        };

        for tx in waiters.into_iter().flatten() {
            let _ = tx.send(());
        }
    }

    /// Drop a key from the table. Unknown keys are a no-op; a later
    /// [`add_use`](Self::add_use) re-creates the key at 1.
    pub(crate) fn remove_key(&self, key: &str) {
        self.inner.write().uses.remove(key);
    }

    /// Wait until [`init_key`](Self::init_key) has been observed for `key`.
    ///
    /// Returns immediately for an already initialized key. Unbounded;
    /// callers bound it externally.
    pub(crate) async fn wait_init(&self, key: &str) {
        let rx = {
            let mut inner = self.inner.write();
            if inner.uses.contains_key(key) {
                return;
            }
            let (tx, rx) = oneshot::channel();
            inner.waiting.entry(key.to_owned()).or_default().push(tx);
            rx
        };

        // An init that races ahead is buffered by the channel, so the wake
        // cannot be missed.
        let _ = rx.await;
    }

    /// Pair every item with its count, sorted ascending by count. The sort
    /// is stable: ties keep the input order.
    pub(crate) fn sorted_by_uses<R: Keyed>(&self, items: Vec<R>) -> Vec<(R, u64)> {
        let mut counted: Vec<(R, u64)> = items
            .into_iter()
            .map(|item| {
                let count = self.uses(&item);
                (item, count)
            })
            .collect();
        counted.sort_by_key(|&(_, count)| count);
        counted
    }

    /// Snapshot of every tracked key and its count.
    pub(crate) fn all_uses(&self) -> HashMap<PeerKey, u64> {
        self.inner.read().uses.clone()
    }
}

/// Leading key bytes, enough to identify a peer in logs.
fn short(key: &str) -> &str {
    &key[..key.len().min(8)]
}
