//! Interface the load balancer requires of the overlay routing table.

use crate::error::BalancerError;
use crate::events::PeerChangeSubscriptions;
use crate::peer::{OverlayAddress, Peer};

/// Consumer of bins during a descending enumeration. Return `false` to halt.
pub type PeerBinConsumer<'a> = &'a mut dyn FnMut(&PeerBin) -> bool;

/// Consumer of connected peers with their proximity order. Return `false`
/// to halt.
pub type PeerConsumer<'a> = &'a mut dyn FnMut(&Peer, u8) -> bool;

/// A bin of connected peers at one proximity order, in the overlay's own
/// enumeration order.
#[derive(Debug, Clone)]
pub struct PeerBin {
    /// Proximity order shared by every peer in the bin.
    pub proximity_order: u8,
    /// The bin's connected peers.
    pub peers: Vec<Peer>,
}

impl PeerBin {
    /// Create a bin from the overlay's member list.
    pub fn new(proximity_order: u8, peers: Vec<Peer>) -> Self {
        Self { proximity_order, peers }
    }

    /// Number of peers in the bin.
    pub fn size(&self) -> usize {
        self.peers.len()
    }

    /// Whether the bin has no peers.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Iterate the bin's peers in enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }
}

/// The overlay routing table as consumed by the balancer.
///
/// The balancer never computes proximity itself; bin membership, ordering
/// and capability filtering are the overlay's concern.
#[auto_impl::auto_impl(&, Arc)]
pub trait KademliaBackend: Send + Sync + 'static {
    /// The local node's overlay address.
    fn base_addr(&self) -> OverlayAddress;

    /// Invoke `consumer` for each non-empty bin with proximity order
    /// >= `min_po` relative to `base`, in descending proximity order.
    fn each_bin_desc(&self, base: &OverlayAddress, min_po: u8, consumer: PeerBinConsumer<'_>);

    /// As [`each_bin_desc`](Self::each_bin_desc), restricted to peers
    /// advertising the capability `cap_key`.
    fn each_bin_desc_filtered(
        &self,
        base: &OverlayAddress,
        cap_key: &str,
        min_po: u8,
        consumer: PeerBinConsumer<'_>,
    ) -> Result<(), BalancerError>;

    /// Iterate every connected peer in descending proximity order from
    /// `base`, capped at `max_po`.
    fn each_conn(&self, base: &OverlayAddress, max_po: u8, consumer: PeerConsumer<'_>);

    /// Subscribe to the overlay's added-peer and removed-peer streams.
    fn subscribe_to_peer_changes(&self) -> PeerChangeSubscriptions;
}
