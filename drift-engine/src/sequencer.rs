// The transaction sequencer (§4.6, second half of C3). Holds back every
// outgoing message that references a transaction ID until that transaction
// is released, then flushes messages for that transaction and every
// earlier, already-released transaction in transaction-ID order. This is
// what gives §8 property 6 ("transaction sequencer ordering").
//
// Grounded on engine/transaction_sequencer.cc's ReserveTransaction /
// ReleaseTransaction / QueueOutgoingMessage / FlushMessages_Locked.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use drift_base::invariant;
use drift_wire::{PeerMessage, TransactionId};

use crate::ids::TransactionIdGenerator;
use crate::registry::CanonicalPeer;

/// Delivers a message that has cleared the sequencer, either to one peer or
/// to every peer interested in the touched objects. Implemented by the
/// peer connection layer (C4).
pub trait PeerMessageSender: Send + Sync {
    fn send_to_peer(&self, peer: &Arc<CanonicalPeer>, message: &PeerMessage);
    fn broadcast(&self, message: &PeerMessage);
}

enum Destination {
    Unicast(Arc<CanonicalPeer>),
    Broadcast,
}

struct QueuedMessage {
    destination: Destination,
    message: PeerMessage,
}

#[derive(Default)]
struct PendingTransaction {
    outgoing: Vec<QueuedMessage>,
    done: bool,
}

pub struct TransactionSequencer {
    id_generator: Arc<TransactionIdGenerator>,
    sender: Arc<dyn PeerMessageSender>,
    transactions: Mutex<BTreeMap<TransactionId, PendingTransaction>>,
}

impl TransactionSequencer {
    pub fn new(id_generator: Arc<TransactionIdGenerator>, sender: Arc<dyn PeerMessageSender>) -> Self {
        TransactionSequencer {
            id_generator,
            sender,
            transactions: Mutex::new(BTreeMap::new()),
        }
    }

    /// Reserves a fresh transaction ID and opens a hold for its outgoing
    /// messages. The ID is strictly greater than every previously reserved
    /// ID (the generator already guarantees this; we double-check here).
    pub fn reserve_transaction(&self) -> TransactionId {
        let tid = self.id_generator.generate();
        let mut transactions = self.transactions.lock().unwrap();

        if let Some((last, _)) = transactions.iter().next_back() {
            invariant!(*last < tid, "transaction IDs reserved out of order: {last} then {tid}");
        }

        transactions.insert(tid, PendingTransaction::default());
        tid
    }

    /// Releases `tid`'s hold, flushing its queued messages (and any earlier
    /// already-released transactions') in order.
    pub fn release_transaction(&self, tid: TransactionId) {
        let mut transactions = self.transactions.lock().unwrap();
        {
            let pending = transactions
                .get_mut(&tid)
                .unwrap_or_else(|| invariant_missing(tid));
            invariant!(!pending.done, "transaction {tid} released twice");
            pending.done = true;
        }
        self.flush_locked(&mut transactions);
    }

    pub fn send_to_peer(&self, peer: Arc<CanonicalPeer>, message: PeerMessage) {
        self.queue(Destination::Unicast(peer), message);
    }

    pub fn broadcast(&self, message: PeerMessage) {
        self.queue(Destination::Broadcast, message);
    }

    fn queue(&self, destination: Destination, message: PeerMessage) {
        match message.transaction_id() {
            None => self.send_now(&destination, &message),
            Some(tid) => {
                let mut transactions = self.transactions.lock().unwrap();
                let pending = transactions
                    .get_mut(&tid)
                    .unwrap_or_else(|| invariant_missing(tid));
                pending.outgoing.push(QueuedMessage { destination, message });
                self.flush_locked(&mut transactions);
            }
        }
    }

    fn flush_locked(&self, transactions: &mut BTreeMap<TransactionId, PendingTransaction>) {
        loop {
            let Some((&tid, _)) = transactions.iter().next() else {
                return;
            };
            {
                let pending = transactions.get(&tid).unwrap();
                for queued in &pending.outgoing {
                    self.send_now(&queued.destination, &queued.message);
                }
            }
            if !transactions.get(&tid).unwrap().done {
                return;
            }
            transactions.remove(&tid);
        }
    }

    fn send_now(&self, destination: &Destination, message: &PeerMessage) {
        match destination {
            Destination::Unicast(peer) => self.sender.send_to_peer(peer, message),
            Destination::Broadcast => self.sender.broadcast(message),
        }
    }
}

fn invariant_missing(tid: TransactionId) -> ! {
    drift_base::invariant::fail(format!("no reserved transaction for ID {tid}"))
}
