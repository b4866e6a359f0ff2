// MaxVersionMap and PeerExclusionMap (§3.2). Both are keyed by canonical
// peer and are pure data: merges are pointwise maximum (version map) or
// range union (exclusion map), with no locking of their own — callers
// (SequencePoint, SharedObjectLog) hold whatever lock guards their use.

use std::collections::BTreeMap;
use std::sync::Arc;

use drift_wire::TransactionId;

use crate::registry::CanonicalPeer;

/// Finite mapping: canonical peer -> highest transaction ID observed from
/// that peer. Entries only increase (§3.2 "Monotone").
#[derive(Clone, Debug, Default)]
pub struct MaxVersionMap {
    entries: BTreeMap<Arc<CanonicalPeer>, TransactionId>,
}

impl MaxVersionMap {
    pub fn new() -> Self {
        MaxVersionMap::default()
    }

    pub fn get(&self, peer: &Arc<CanonicalPeer>) -> TransactionId {
        self.entries.get(peer).copied().unwrap_or(TransactionId::MIN)
    }

    pub fn has_peer_transaction_id(&self, peer: &Arc<CanonicalPeer>, tid: TransactionId) -> bool {
        self.get(peer) >= tid
    }

    /// Advances the maximum for `peer`, ignoring `tid` if it's not newer
    /// than what's already recorded (monotone).
    pub fn add_peer_transaction_id(&mut self, peer: Arc<CanonicalPeer>, tid: TransactionId) {
        let entry = self.entries.entry(peer).or_insert(TransactionId::MIN);
        if tid > *entry {
            *entry = tid;
        }
    }

    /// Pointwise maximum merge with `other`.
    pub fn merge_from(&mut self, other: &MaxVersionMap) {
        for (peer, tid) in &other.entries {
            self.add_peer_transaction_id(peer.clone(), *tid);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Arc<CanonicalPeer>, &TransactionId)> {
        self.entries.iter()
    }
}

/// A half-open transaction-ID range `[start, end)` that has been locally
/// invalidated for some origin peer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct ExcludedRange {
    start: TransactionId,
    end: TransactionId,
}

/// Per-peer set of excluded transaction-ID ranges (§3.2).
#[derive(Clone, Debug, Default)]
pub struct PeerExclusionMap {
    ranges: BTreeMap<Arc<CanonicalPeer>, Vec<ExcludedRange>>,
}

impl PeerExclusionMap {
    pub fn new() -> Self {
        PeerExclusionMap::default()
    }

    pub fn is_transaction_excluded(&self, peer: &Arc<CanonicalPeer>, tid: TransactionId) -> bool {
        self.ranges
            .get(peer)
            .map(|ranges| ranges.iter().any(|r| tid >= r.start && tid < r.end))
            .unwrap_or(false)
    }

    pub fn add_excluded_range(
        &mut self,
        peer: Arc<CanonicalPeer>,
        start: TransactionId,
        end: TransactionId,
    ) {
        if start >= end {
            return;
        }
        self.ranges.entry(peer).or_default().push(ExcludedRange { start, end });
    }

    pub fn merge_from(&mut self, other: &PeerExclusionMap) {
        for (peer, ranges) in &other.ranges {
            let entry = self.ranges.entry(peer.clone()).or_default();
            for r in ranges {
                if !entry.contains(r) {
                    entry.push(*r);
                }
            }
        }
    }
}
