// A transaction ID is (time, peer-hi, peer-lo). Ordering is lexicographic,
// so peers that salt their IDs with distinct peer-hi/lo values can never
// collide even under clock skew, and MIN/MAX sort below/above every valid
// ID produced by a generator.

use serde::{Deserialize, Serialize};

use crate::ObjectId;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    pub time: u64,
    pub peer_hi: u64,
    pub peer_lo: u64,
}

impl TransactionId {
    pub const MIN: TransactionId = TransactionId { time: 0, peer_hi: 0, peer_lo: 0 };
    pub const MAX: TransactionId = TransactionId {
        time: u64::MAX,
        peer_hi: u64::MAX,
        peer_lo: u64::MAX,
    };

    /// The zeroed transaction ID doubles as the "invalid" / absent sentinel.
    pub fn is_invalid(&self) -> bool {
        *self == Self::MIN
    }

    pub fn from_peer_salt(peer_id: ObjectId) -> PeerSalt {
        PeerSalt {
            peer_hi: peer_id.hi,
            peer_lo: peer_id.lo,
        }
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        TransactionId::MIN
    }
}

/// The (peer_hi, peer_lo) salt fixed at generator construction time.
#[derive(Clone, Copy, Debug)]
pub struct PeerSalt {
    pub peer_hi: u64,
    pub peer_lo: u64,
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}.{:016x}.{:016x}", self.time, self.peer_hi, self.peer_lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused_imports)]
    use test_log::test;

    #[test]
    fn min_and_max_bracket_every_id() {
        let mid = TransactionId { time: 5, peer_hi: 1, peer_lo: 1 };
        assert!(TransactionId::MIN < mid);
        assert!(mid < TransactionId::MAX);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = TransactionId { time: 1, peer_hi: 5, peer_lo: 0 };
        let b = TransactionId { time: 1, peer_hi: 5, peer_lo: 1 };
        let c = TransactionId { time: 2, peer_hi: 0, peer_lo: 0 };
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn zero_is_invalid() {
        assert!(TransactionId::default().is_invalid());
        assert!(!TransactionId { time: 1, peer_hi: 0, peer_lo: 0 }.is_invalid());
    }
}
