//! In-memory overlay backend used by the balancer tests.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;

use crate::backend::{KademliaBackend, PeerBin, PeerBinConsumer, PeerConsumer};
use crate::error::BalancerError;
use crate::events::{PeerChangeEmitter, PeerChangeSubscriptions};
use crate::peer::{Keyed, OverlayAddress, Peer, PeerKey, EXTENDED_PO};

/// Proximity order of two addresses: the number of leading bits their XOR
/// shares with zero. 0 is farthest, [`EXTENDED_PO`] is self.
pub(crate) fn proximity(one: &OverlayAddress, other: &OverlayAddress) -> u8 {
    for (i, (a, b)) in one.iter().zip(other.iter()).enumerate() {
        let xor = a ^ b;
        if xor != 0 {
            return (i as u32 * 8 + xor.leading_zeros()) as u8;
        }
    }
    EXTENDED_PO
}

#[derive(Default)]
struct MockInner {
    /// Connection order is preserved; bin enumeration follows it.
    conns: Vec<Peer>,
    capabilities: HashMap<PeerKey, HashSet<String>>,
    known_caps: HashSet<String>,
}

/// A minimal routing table over explicit connections. Bins are computed
/// from addresses on every call, like the real table does for an arbitrary
/// base.
pub(crate) struct MockKademlia {
    base: OverlayAddress,
    inner: RwLock<MockInner>,
    emitter: PeerChangeEmitter,
}

impl MockKademlia {
    pub(crate) fn new(base: OverlayAddress) -> Self {
        Self {
            base,
            inner: RwLock::new(MockInner::default()),
            emitter: PeerChangeEmitter::default(),
        }
    }

    /// Admit a peer and announce it on the added stream.
    pub(crate) fn add_peer(&self, peer: Peer) {
        let po = proximity(&self.base, &peer.address());
        self.inner.write().conns.push(peer.clone());
        self.emitter.peer_added(peer, po);
    }

    /// Admit a peer advertising the given capability keys.
    pub(crate) fn add_peer_with_caps(&self, peer: Peer, caps: &[&str]) {
        {
            let mut inner = self.inner.write();
            inner
                .capabilities
                .insert(peer.key(), caps.iter().map(|c| c.to_string()).collect());
            inner.known_caps.extend(caps.iter().map(|c| c.to_string()));
        }
        self.add_peer(peer);
    }

    /// Drop a peer and announce it on the removed stream.
    pub(crate) fn remove_peer(&self, peer: &Peer) {
        self.inner.write().conns.retain(|p| p != peer);
        self.emitter.peer_removed(peer.clone());
    }

    pub(crate) fn emitter(&self) -> &PeerChangeEmitter {
        &self.emitter
    }

    fn bins(&self, base: &OverlayAddress, min_po: u8, filter: Option<&str>) -> Vec<PeerBin> {
        let inner = self.inner.read();
        let mut by_po: BTreeMap<u8, Vec<Peer>> = BTreeMap::new();
        for peer in &inner.conns {
            if let Some(cap) = filter {
                let capable = inner
                    .capabilities
                    .get(&peer.key())
                    .is_some_and(|caps| caps.contains(cap));
                if !capable {
                    continue;
                }
            }
            let po = proximity(base, &peer.address());
            if po >= min_po {
                by_po.entry(po).or_default().push(peer.clone());
            }
        }
        by_po
            .into_iter()
            .rev()
            .map(|(po, peers)| PeerBin::new(po, peers))
            .collect()
    }
}

impl KademliaBackend for MockKademlia {
    fn base_addr(&self) -> OverlayAddress {
        self.base
    }

    fn each_bin_desc(&self, base: &OverlayAddress, min_po: u8, consumer: PeerBinConsumer<'_>) {
        for bin in self.bins(base, min_po, None) {
            if !consumer(&bin) {
                break;
            }
        }
    }

    fn each_bin_desc_filtered(
        &self,
        base: &OverlayAddress,
        cap_key: &str,
        min_po: u8,
        consumer: PeerBinConsumer<'_>,
    ) -> Result<(), BalancerError> {
        if !self.inner.read().known_caps.contains(cap_key) {
            return Err(BalancerError::UnknownCapabilityKey(cap_key.to_owned()));
        }
        for bin in self.bins(base, min_po, Some(cap_key)) {
            if !consumer(&bin) {
                break;
            }
        }
        Ok(())
    }

    fn each_conn(&self, base: &OverlayAddress, max_po: u8, consumer: PeerConsumer<'_>) {
        let mut conns: Vec<(u8, Peer)> = self
            .inner
            .read()
            .conns
            .iter()
            .map(|peer| (proximity(base, &peer.address()), peer.clone()))
            .collect();
        // Stable: ties keep connection order.
        conns.sort_by_key(|&(po, _)| std::cmp::Reverse(po));

        for (po, peer) in conns {
            if po > max_po {
                continue;
            }
            if !consumer(&peer, po) {
                break;
            }
        }
    }

    fn subscribe_to_peer_changes(&self) -> PeerChangeSubscriptions {
        self.emitter.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proximity_counts_shared_leading_bits() {
        let base = OverlayAddress::ZERO;
        let cases = [
            (0b1000_0000u8, 0, 0u8),
            (0b0100_0000, 0, 1),
            (0b0000_0001, 0, 7),
            (0, 0b1000_0000, 8),
            (0, 0b0000_0001, 15),
        ];
        for (first, second, expected) in cases {
            let mut bytes = [0u8; 32];
            bytes[0] = first;
            bytes[1] = second;
            let other = OverlayAddress::from(bytes);
            assert_eq!(proximity(&base, &other), expected);
            assert_eq!(proximity(&other, &base), expected);
        }
        assert_eq!(proximity(&base, &base), EXTENDED_PO);
    }
}
