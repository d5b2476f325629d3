//! Load-balanced views of overlay bins.

use std::sync::Arc;

use crate::peer::{Keyed, Peer};
use crate::stats::UseStats;

/// A peer entry in a load-balanced bin.
///
/// Callers signal dispatch through [`record_use`](Self::record_use) so
/// later enumerations rank the peer accordingly. The handle owns its peer
/// identity and stays valid after the peer leaves the overlay; a count
/// recorded for a departed peer is dropped with that peer's next removal
/// event.
#[derive(Debug, Clone)]
pub struct LbPeer {
    peer: Peer,
    use_stats: Arc<UseStats>,
}

impl LbPeer {
    pub(crate) fn new(peer: Peer, use_stats: Arc<UseStats>) -> Self {
        Self { peer, use_stats }
    }

    /// The peer this entry represents.
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Record one dispatch to this peer and return its new use count.
    /// Safe to call from any thread; every call counts one use.
    pub fn record_use(&self) -> u64 {
        self.use_stats.add_use(&self.peer.key())
    }
}

/// A bin of peers in ascending use-count order.
///
/// A snapshot taken at enumeration time; not kept in step with later
/// overlay changes, so it should not be retained across calls.
#[derive(Debug, Clone)]
pub struct LbBin {
    /// Proximity order of the bin.
    pub proximity_order: u8,
    /// The bin's peers, least used first.
    pub peers: Vec<LbPeer>,
}
