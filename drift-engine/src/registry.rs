// Canonical peer registry (C3): interns PeerId strings so that every part
// of the engine shares one Arc<CanonicalPeer> per remote peer, making
// registry-issued handles cheap to clone and stable for the life of the
// process. Grounded on engine/canonical_peer_map.cc's GetCanonicalPeer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use drift_wire::PeerId;

#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CanonicalPeer {
    pub(crate) peer_id: PeerId,
}

impl CanonicalPeer {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }
}

#[derive(Default)]
pub struct CanonicalPeerRegistry {
    map: Mutex<HashMap<PeerId, Arc<CanonicalPeer>>>,
}

impl CanonicalPeerRegistry {
    pub fn new() -> Self {
        CanonicalPeerRegistry::default()
    }

    /// Returns the canonical handle for `peer_id`, constructing it on first
    /// use. Subsequent calls with an equal `peer_id` return a clone of the
    /// same `Arc`.
    pub fn get(&self, peer_id: PeerId) -> Arc<CanonicalPeer> {
        let mut map = self.map.lock().unwrap();
        map.entry(peer_id.clone())
            .or_insert_with(|| Arc::new(CanonicalPeer { peer_id }))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.map.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
