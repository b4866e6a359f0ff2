// Sequence points (C2): the snapshot of which remote transactions a reader
// considers visible. Grounded on peer/sequence_point_impl.{h,cc} with the
// min-version-map's ordering swapped for TransactionId's own derived Ord.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use drift_wire::TransactionId;

use crate::registry::CanonicalPeer;
use crate::version_vector::{MaxVersionMap, PeerExclusionMap};

#[derive(Clone, Debug, Default)]
pub struct SequencePoint {
    version_map: MaxVersionMap,
    peer_exclusion_map: PeerExclusionMap,
    rejected_peers: BTreeMap<Arc<CanonicalPeer>, BTreeSet<TransactionId>>,
}

impl SequencePoint {
    pub fn new() -> Self {
        SequencePoint::default()
    }

    pub fn version_map(&self) -> &MaxVersionMap {
        &self.version_map
    }

    pub fn peer_exclusion_map(&self) -> &PeerExclusionMap {
        &self.peer_exclusion_map
    }

    /// Is a transaction from `peer` at `tid` visible at this sequence point?
    pub fn has(&self, peer: &Arc<CanonicalPeer>, tid: TransactionId) -> bool {
        if !self.version_map.has_peer_transaction_id(peer, tid)
            || self.peer_exclusion_map.is_transaction_excluded(peer, tid)
        {
            return false;
        }

        match self.rejected_peers.get(peer) {
            None => true,
            Some(rejected) => {
                let first_rejected = rejected.iter().next().expect("empty rejected set");
                tid < *first_rejected
            }
        }
    }

    pub fn add_peer_transaction_id(&mut self, peer: Arc<CanonicalPeer>, tid: TransactionId) {
        self.version_map.add_peer_transaction_id(peer, tid);
    }

    /// Marks `[start, end)` as excluded for `origin_peer`, and drops any
    /// rejected-start entries for that peer that now fall inside the range
    /// (they've been superseded by the broader invalidation).
    pub fn add_invalidated_range(
        &mut self,
        origin_peer: Arc<CanonicalPeer>,
        start: TransactionId,
        end: TransactionId,
    ) {
        self.peer_exclusion_map
            .add_excluded_range(origin_peer.clone(), start, end);

        if let Some(rejected) = self.rejected_peers.get_mut(&origin_peer) {
            rejected.retain(|tid| *tid < start || *tid >= end);
            if rejected.is_empty() {
                self.rejected_peers.remove(&origin_peer);
            }
        }
    }

    /// Notes that transactions from `origin_peer` at or after `start` are
    /// tentatively rejected, pending a follow-up invalidated range.
    pub fn add_rejected_peer(&mut self, origin_peer: Arc<CanonicalPeer>, start: TransactionId) {
        self.rejected_peers.entry(origin_peer).or_default().insert(start);
    }

    pub fn merge_from(&mut self, other: &SequencePoint) {
        self.version_map.merge_from(&other.version_map);
        self.peer_exclusion_map.merge_from(&other.peer_exclusion_map);
        for (peer, tids) in &other.rejected_peers {
            self.rejected_peers.entry(peer.clone()).or_default().extend(tids.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused_imports)]
    use test_log::test;

    fn peer(port: u16) -> Arc<CanonicalPeer> {
        Arc::new(CanonicalPeer { peer_id: drift_wire::PeerId::new("peer", port) })
    }

    fn tid(t: u64) -> TransactionId {
        TransactionId { time: t, peer_hi: 0, peer_lo: 0 }
    }

    #[test]
    fn visibility_requires_version_and_no_exclusion() {
        let p = peer(1);
        let mut sp = SequencePoint::new();
        assert!(!sp.has(&p, tid(1)));
        sp.add_peer_transaction_id(p.clone(), tid(5));
        assert!(sp.has(&p, tid(3)));
        assert!(sp.has(&p, tid(5)));
        assert!(!sp.has(&p, tid(6)));
    }

    #[test]
    fn excluded_range_hides_transactions() {
        let p = peer(1);
        let mut sp = SequencePoint::new();
        sp.add_peer_transaction_id(p.clone(), tid(10));
        sp.add_invalidated_range(p.clone(), tid(3), tid(6));
        assert!(sp.has(&p, tid(2)));
        assert!(!sp.has(&p, tid(4)));
        assert!(sp.has(&p, tid(7)));
    }

    #[test]
    fn rejected_peer_hides_everything_at_or_after_first_rejection() {
        let p = peer(1);
        let mut sp = SequencePoint::new();
        sp.add_peer_transaction_id(p.clone(), tid(10));
        sp.add_rejected_peer(p.clone(), tid(5));
        assert!(sp.has(&p, tid(4)));
        assert!(!sp.has(&p, tid(5)));
        assert!(!sp.has(&p, tid(8)));
    }

    #[test]
    fn invalidated_range_clears_superseded_rejections() {
        let p = peer(1);
        let mut sp = SequencePoint::new();
        sp.add_peer_transaction_id(p.clone(), tid(10));
        sp.add_rejected_peer(p.clone(), tid(5));
        sp.add_invalidated_range(p.clone(), tid(5), tid(8));
        // The rejection at 5 was inside [5, 8) and is cleared; transactions
        // from 8 onward are visible again (assuming no other rejection).
        assert!(sp.has(&p, tid(8)));
    }

    #[test]
    fn monotone_sequence_point_property() {
        // §8 property 1: version map entries never decrease, and once a
        // transaction ID is excluded, `has` never again returns true for it.
        let p = peer(1);
        let mut sp = SequencePoint::new();
        sp.add_peer_transaction_id(p.clone(), tid(5));
        let before = sp.version_map().get(&p);
        sp.add_peer_transaction_id(p.clone(), tid(3));
        assert!(sp.version_map().get(&p) >= before);

        sp.add_peer_transaction_id(p.clone(), tid(20));
        sp.add_invalidated_range(p.clone(), tid(9), tid(11));
        assert!(!sp.has(&p, tid(10)));
        sp.add_peer_transaction_id(p.clone(), tid(25));
        assert!(!sp.has(&p, tid(10)));
    }
}
