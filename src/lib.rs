//! Least-used-first load balancing over a Kademlia overlay.
//!
//! [`KademliaLoadBalancer`] sits on top of an overlay routing table (any
//! [`KademliaBackend`]) and serves, per call, the overlay's bins of
//! connected peers with each bin sorted by least recent use. It makes no
//! routing decision itself: callers receive whole bins in descending
//! proximity order and pick a peer, signalling the dispatch through
//! [`LbPeer::record_use`] so the ranking stays current.
//!
//! # Architecture
//!
//! Two background listener tasks consume the overlay's added-peer and
//! removed-peer streams and keep a use-count table in step with the
//! connected peer set. A newly admitted peer has no history, so its count
//! is seeded by an [`InitStrategy`] to blend with the incumbents of its
//! bin. Counts live in memory only and start over with the process.
//!
//! # Usage
//!
//! ```ignore
//! let klb = KademliaLoadBalancer::new(kademlia, InitStrategy::default());
//!
//! klb.each_bin_node_address(|bin| {
//!     if let Some(entry) = bin.peers.first() {
//!         dispatch(entry.peer());
//!         entry.record_use();
//!         return false;
//!     }
//!     true
//! });
//!
//! klb.stop();
//! ```

mod backend;
mod bin;
mod error;
mod events;
#[cfg(test)]
mod mock;
mod peer;
mod stats;
mod strategy;

pub use backend::{KademliaBackend, PeerBin, PeerBinConsumer, PeerConsumer};
pub use bin::{LbBin, LbPeer};
pub use error::BalancerError;
pub use events::{NewPeerSignal, PeerChangeEmitter, PeerChangeSubscriptions};
pub use peer::{Keyed, OverlayAddress, Peer, PeerKey, EXTENDED_PO};
pub use strategy::InitStrategy;

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

use crate::stats::UseStats;

/// Balances request load across the peers of a Kademlia overlay.
///
/// Construction subscribes to the overlay's peer changes and spawns the two
/// listener tasks, so it must happen inside a tokio runtime. The listeners
/// run until [`stop`](Self::stop) is called, the balancer is dropped, or
/// the overlay closes its event streams.
pub struct KademliaLoadBalancer<B: KademliaBackend> {
    inner: Arc<Inner<B>>,
    quit_tx: watch::Sender<()>,
}

struct Inner<B> {
    kademlia: B,
    use_stats: Arc<UseStats>,
    strategy: InitStrategy,
}

impl<B: KademliaBackend> KademliaLoadBalancer<B> {
    /// Create a balancer over `kademlia`, seeding newly admitted peers per
    /// `strategy`.
    pub fn new(kademlia: B, strategy: InitStrategy) -> Self {
        let subs = kademlia.subscribe_to_peer_changes();
        let inner = Arc::new(Inner {
            kademlia,
            use_stats: Arc::new(UseStats::new()),
            strategy,
        });
        let (quit_tx, quit_rx) = watch::channel(());

        tokio::spawn(listen_new_peers(inner.clone(), subs.added, quit_rx.clone()));
        tokio::spawn(listen_off_peers(inner.clone(), subs.removed, quit_rx));

        Self { inner, quit_tx }
    }

    /// Stop the listener tasks; their exit releases the peer-change
    /// subscriptions.
    ///
    /// Safe to call more than once. Counts recorded through live [`LbPeer`]
    /// handles keep accumulating, but the table no longer follows overlay
    /// membership.
    pub fn stop(&self) {
        let _ = self.quit_tx.send(());
    }

    /// Enumerate bins in descending proximity order from `base`, each bin's
    /// peers sorted least used first. The consumer returns `false` to halt.
    ///
    /// Synchronous; the consumer runs on the caller's thread and must not
    /// re-enter enumeration on the same balancer.
    pub fn each_bin<F>(&self, base: &OverlayAddress, mut consumer: F)
    where
        F: FnMut(LbBin) -> bool,
    {
        self.inner
            .kademlia
            .each_bin_desc(base, 0, &mut |bin| consumer(self.inner.lb_bin(bin)));
    }

    /// As [`each_bin`](Self::each_bin), restricted to peers advertising the
    /// capability `cap_key`. A refused filter yields no bins.
    pub fn each_bin_filtered<F>(
        &self,
        base: &OverlayAddress,
        cap_key: &str,
        mut consumer: F,
    ) -> Result<(), BalancerError>
    where
        F: FnMut(LbBin) -> bool,
    {
        self.inner
            .kademlia
            .each_bin_desc_filtered(base, cap_key, 0, &mut |bin| {
                consumer(self.inner.lb_bin(bin))
            })
    }

    /// [`each_bin`](Self::each_bin) from the local node's base address.
    pub fn each_bin_node_address<F>(&self, consumer: F)
    where
        F: FnMut(LbBin) -> bool,
    {
        self.each_bin(&self.inner.kademlia.base_addr(), consumer);
    }
}

impl<B: KademliaBackend> Inner<B> {
    /// Project a bin into least-used-first order.
    fn lb_bin(&self, bin: &PeerBin) -> LbBin {
        let peers = self
            .use_stats
            .sorted_by_uses(bin.peers.clone())
            .into_iter()
            .map(|(peer, _)| LbPeer::new(peer, self.use_stats.clone()))
            .collect();
        LbBin {
            proximity_order: bin.proximity_order,
            peers,
        }
    }

    fn added_peer(&self, peer: &Peer, po: u8) {
        let init_count = match self.strategy {
            InitStrategy::LeastUsedInBin => self.least_used_count_in_bin(peer, po),
            InitStrategy::MostSimilarPeer => self.most_similar_peer_count(peer),
        };
        debug!(%peer, po, init_count, "peer admitted, seeding use count");
        self.use_stats.init_key(&peer.key(), init_count);
    }

    fn removed_peer(&self, peer: &Peer) {
        trace!(%peer, "peer removed, dropping use count");
        self.use_stats.remove_key(&peer.key());
    }

    /// Use count of the least-used incumbent in the bin at `po`, excluding
    /// `exclude`. 0 when the newcomer has the bin to itself.
    fn least_used_count_in_bin(&self, exclude: &Peer, po: u8) -> u64 {
        let base = self.kademlia.base_addr();
        let exclude_key = exclude.key();
        let mut count = 0;
        for entry in self.peers_at_po(&base, po) {
            if entry.peer().key() != exclude_key {
                count = self.use_stats.uses(entry.peer());
                trace!(peer = %entry.peer(), count, "least used incumbent");
                break;
            }
        }
        count
    }

    /// Use count of the connection closest to `new_peer`'s own address.
    fn most_similar_peer_count(&self, new_peer: &Peer) -> u64 {
        let mut count = 0;
        self.kademlia
            .each_conn(&new_peer.address(), EXTENDED_PO, &mut |peer, _po| {
                if peer != new_peer {
                    count = self.use_stats.uses(peer);
                    trace!(%peer, count, "most similar connection");
                    return false;
                }
                true
            });
        count
    }

    /// Connected peers in the bin at exactly `po`, least used first.
    fn peers_at_po(&self, base: &OverlayAddress, po: u8) -> Vec<LbPeer> {
        let mut peers = Vec::new();
        self.kademlia.each_bin_desc(base, po, &mut |bin| {
            if bin.proximity_order == po {
                peers.extend(self.lb_bin(bin).peers);
                return false;
            }
            true
        });
        peers
    }
}

async fn listen_new_peers<B: KademliaBackend>(
    inner: Arc<Inner<B>>,
    mut added: broadcast::Receiver<NewPeerSignal>,
    mut quit_rx: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = quit_rx.changed() => {
                debug!("new-peer listener stopping");
                break;
            }
            msg = added.recv() => match msg {
                Ok(signal) => inner.added_peer(&signal.peer, signal.proximity_order),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "new-peer stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("new-peer stream closed");
                    break;
                }
            }
        }
    }
}

async fn listen_off_peers<B: KademliaBackend>(
    inner: Arc<Inner<B>>,
    mut removed: broadcast::Receiver<Peer>,
    mut quit_rx: watch::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = quit_rx.changed() => {
                debug!("off-peer listener stopping");
                break;
            }
            msg = removed.recv() => match msg {
                Ok(peer) => inner.removed_peer(&peer),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "off-peer stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("off-peer stream closed");
                    break;
                }
            }
        }
    }
}
