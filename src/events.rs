//! Peer change signals and their broadcast emitter.
//!
//! The overlay publishes peer admissions and removals on two independent
//! streams. Sends never block: slow subscribers lag on their own receiver
//! without affecting the publisher or each other.

use tokio::sync::broadcast;

use crate::peer::Peer;

/// Payload of the added-peer stream.
#[derive(Debug, Clone)]
pub struct NewPeerSignal {
    /// The peer that was admitted.
    pub peer: Peer,
    /// Proximity order of the bin that admitted it.
    pub proximity_order: u8,
}

/// Receiver halves of one subscription to the overlay's peer changes.
///
/// Dropping a receiver unsubscribes it; both streams report
/// [`broadcast::error::RecvError::Closed`] once the emitter is gone.
#[derive(Debug)]
pub struct PeerChangeSubscriptions {
    /// Admissions, with the admitting bin's proximity order.
    pub added: broadcast::Receiver<NewPeerSignal>,
    /// Removals.
    pub removed: broadcast::Receiver<Peer>,
}

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Non-blocking publisher of peer changes.
#[derive(Debug, Clone)]
pub struct PeerChangeEmitter {
    added_tx: broadcast::Sender<NewPeerSignal>,
    removed_tx: broadcast::Sender<Peer>,
}

impl Default for PeerChangeEmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl PeerChangeEmitter {
    /// Create an emitter whose streams buffer `capacity` events per
    /// subscriber before lagging.
    pub fn new(capacity: usize) -> Self {
        let (added_tx, _) = broadcast::channel(capacity);
        let (removed_tx, _) = broadcast::channel(capacity);
        Self { added_tx, removed_tx }
    }

    /// Announce an admitted peer.
    pub fn peer_added(&self, peer: Peer, proximity_order: u8) {
        let _ = self.added_tx.send(NewPeerSignal { peer, proximity_order });
    }

    /// Announce a removed peer.
    pub fn peer_removed(&self, peer: Peer) {
        let _ = self.removed_tx.send(peer);
    }

    /// Open a fresh subscription to both streams.
    pub fn subscribe(&self) -> PeerChangeSubscriptions {
        PeerChangeSubscriptions {
            added: self.added_tx.subscribe(),
            removed: self.removed_tx.subscribe(),
        }
    }

    /// Number of live added-stream subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.added_tx.receiver_count()
    }
}
