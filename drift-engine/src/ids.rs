// Transaction ID generation (C1). A single process-wide watermark ensures
// `time` never moves backward even if the wall clock does (or returns the
// same value twice), matching transaction_id_generator.cc's CHECK_ERR
// clock_gettime + last_time_value_ discipline.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use drift_wire::{ObjectId, PeerSalt, TransactionId};

pub struct TransactionIdGenerator {
    peer_salt: PeerSalt,
    last_time_value: Mutex<u64>,
}

impl TransactionIdGenerator {
    pub fn new(local_peer_id: ObjectId) -> Self {
        TransactionIdGenerator {
            peer_salt: TransactionId::from_peer_salt(local_peer_id),
            last_time_value: Mutex::new(0),
        }
    }

    /// Returns a fresh ID strictly greater than every ID this generator has
    /// previously returned.
    pub fn generate(&self) -> TransactionId {
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let mut last = self.last_time_value.lock().unwrap();
        let time = if now_nanos <= *last { *last + 1 } else { now_nanos };
        *last = time;
        drop(last);

        TransactionId {
            time,
            peer_hi: self.peer_salt.peer_hi,
            peer_lo: self.peer_salt.peer_lo,
        }
    }
}
