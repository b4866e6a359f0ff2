// The peer wire protocol (§6.1). Every frame is a PeerMessage; frames are
// MessagePack-encoded (rmp-serde) and sent length-prefixed over a byte
// stream by drift-wire::transport.

use serde::{Deserialize, Serialize};

use crate::{CommittedEvent, ObjectId, PeerId, TransactionId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectTransaction {
    pub object_id: ObjectId,
    pub events: Vec<CommittedEvent>,
}

/// A single logged transaction as served back by GET_OBJECT/STORE_OBJECT:
/// unlike APPLY_TRANSACTION (where the origin is implicit, the sender of
/// the message), a transaction replayed from another object's log needs
/// its origin peer carried explicitly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredTransaction {
    pub transaction_id: TransactionId,
    pub origin_peer: PeerId,
    pub events: Vec<CommittedEvent>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub peer_id: PeerId,
    pub transaction_id: TransactionId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub rejected_peer_id: PeerId,
    pub rejected_transaction_id: TransactionId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PeerMessage {
    Hello {
        peer_id: PeerId,
        interpreter_type: String,
    },
    Goodbye,
    ApplyTransaction {
        transaction_id: TransactionId,
        object_transactions: Vec<ObjectTransaction>,
    },
    GetObject {
        object_id: ObjectId,
    },
    StoreObject {
        object_id: ObjectId,
        transactions: Vec<StoredTransaction>,
        peer_versions: Vec<VersionEntry>,
        interested_peers: Vec<PeerId>,
    },
    RejectTransaction {
        new_transaction_id: TransactionId,
        rejected: Vec<RejectedEntry>,
    },
    InvalidateTransactions {
        start_transaction_id: TransactionId,
        end_transaction_id: TransactionId,
    },
    /// Test-only: a bare text payload, used by the "concurrent simple
    /// peers" end-to-end scenario to observe message delivery directly.
    Test {
        text: String,
    },
}

impl PeerMessage {
    /// The transaction ID a message carries, if any. Used by the
    /// transaction sequencer to decide whether a message must be held
    /// back until its transaction is released (§4.6).
    pub fn transaction_id(&self) -> Option<TransactionId> {
        match self {
            PeerMessage::ApplyTransaction { transaction_id, .. } => Some(*transaction_id),
            PeerMessage::RejectTransaction { new_transaction_id, .. } => Some(*new_transaction_id),
            PeerMessage::InvalidateTransactions { end_transaction_id, .. } => {
                Some(*end_transaction_id)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused_imports)]
    use test_log::test;

    #[test]
    fn hello_carries_no_transaction_id() {
        let msg = PeerMessage::Hello {
            peer_id: PeerId::new("1.2.3.4", 9000),
            interpreter_type: "toy".to_string(),
        };
        assert_eq!(msg.transaction_id(), None);
    }

    #[test]
    fn apply_transaction_carries_its_id() {
        let tid = TransactionId { time: 1, peer_hi: 2, peer_lo: 3 };
        let msg = PeerMessage::ApplyTransaction {
            transaction_id: tid,
            object_transactions: vec![],
        };
        assert_eq!(msg.transaction_id(), Some(tid));
    }
}
