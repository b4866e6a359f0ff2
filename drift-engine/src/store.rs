// The transaction store (C6): the single owner of every shared object
// known to this peer, the current sequence point, and the version counter
// that wakes waiters on any visible change. Grounded on the contract
// described across peer/shared_object.h, engine/transaction_sequencer.cc,
// and §4.6 of the port's own spec.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};

use tracing::info;

use drift_embed::{Interpreter, LocalObject, VersionedLocalObject};
use drift_wire::{
    named_object_id, CommittedEvent, ObjectId, ObjectIdGenerator, PeerMessage, TransactionId,
};

use crate::ids::TransactionIdGenerator;
use crate::log::ObjectLog;
use crate::registry::{CanonicalPeer, CanonicalPeerRegistry};
use crate::sequence_point::SequencePoint;
use crate::sequencer::TransactionSequencer;
use crate::transport::PeerMessageHandler;

enum ObjectState {
    Versioned(ObjectLog),
    Unversioned(Box<dyn LocalObject>),
}

pub struct SharedObject {
    object_id: ObjectId,
    state: Mutex<ObjectState>,
    interested_peers: Mutex<HashSet<Arc<CanonicalPeer>>>,
}

impl SharedObject {
    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }
}

/// A batch of events this commit contributes to one object, keyed the same
/// way a recording thread accumulates them (§4.7).
pub struct PendingObjectEvents {
    pub object_id: ObjectId,
    pub events: Vec<CommittedEvent>,
}

/// Per-program-run rewind signal (§4.7 "Rewind"). A `RecordingThread`
/// registers one of these with its store for the life of its run, so a
/// conflict detected anywhere — including on a transport thread handling
/// someone else's `REJECT_TRANSACTION` — can tell this run to abort its
/// current attempt and retry from the top.
pub struct RewindState {
    last_committed: Mutex<TransactionId>,
    pending: Mutex<bool>,
    changed: Condvar,
}

impl RewindState {
    fn new() -> Self {
        RewindState {
            last_committed: Mutex::new(TransactionId::MIN),
            pending: Mutex::new(false),
            changed: Condvar::new(),
        }
    }

    /// Records the transaction ID a commit just landed at, so a later
    /// rejection naming an earlier start knows this run is affected.
    pub fn record_commit(&self, tid: TransactionId) {
        *self.last_committed.lock().unwrap() = tid;
    }

    pub fn is_pending(&self) -> bool {
        *self.pending.lock().unwrap()
    }

    pub fn clear(&self) {
        *self.pending.lock().unwrap() = false;
    }

    pub fn signal(&self) {
        *self.pending.lock().unwrap() = true;
        self.changed.notify_all();
    }

    fn signal_if_committed_since(&self, start: TransactionId) {
        if *self.last_committed.lock().unwrap() >= start {
            self.signal();
        }
    }

    /// Blocks until a rewind is signaled, then clears and returns. Used by
    /// a lingering recording thread (§4.7 "Linger mode") between runs.
    pub fn wait_for_signal(&self) {
        let mut pending = self.pending.lock().unwrap();
        while !*pending {
            pending = self.changed.wait(pending).unwrap();
        }
        *pending = false;
    }
}

pub struct TransactionStore {
    registry: Arc<CanonicalPeerRegistry>,
    local_peer: Arc<CanonicalPeer>,
    interpreter: Arc<dyn Interpreter>,
    id_generator: Arc<TransactionIdGenerator>,
    sequencer: Arc<TransactionSequencer>,
    objects: Mutex<HashMap<ObjectId, Arc<SharedObject>>>,
    named_objects: Mutex<HashMap<String, ObjectId>>,
    sequence_point: Mutex<SequencePoint>,
    version_counter: AtomicU64,
    version_changed: Condvar,
    version_mutex: Mutex<()>,
    object_id_generator: ObjectIdGenerator,
    rewind_registry: Mutex<Vec<Weak<RewindState>>>,
}

impl TransactionStore {
    pub fn new(
        registry: Arc<CanonicalPeerRegistry>,
        local_peer: Arc<CanonicalPeer>,
        interpreter: Arc<dyn Interpreter>,
        id_generator: Arc<TransactionIdGenerator>,
        sequencer: Arc<TransactionSequencer>,
        object_id_salt: u64,
    ) -> Self {
        TransactionStore {
            registry,
            local_peer,
            interpreter,
            id_generator,
            sequencer,
            objects: Mutex::new(HashMap::new()),
            named_objects: Mutex::new(HashMap::new()),
            sequence_point: Mutex::new(SequencePoint::new()),
            version_counter: AtomicU64::new(0),
            version_changed: Condvar::new(),
            version_mutex: Mutex::new(()),
            object_id_generator: ObjectIdGenerator::new(object_id_salt),
            rewind_registry: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new recording thread's rewind signal for the life of its
    /// program run. The store only keeps a weak reference, so a finished
    /// run (its `RecordingThread`, and the `Arc<RewindState>` it owns,
    /// dropped) is pruned the next time a rejection is applied.
    pub fn register_recording_thread(&self) -> Arc<RewindState> {
        let state = Arc::new(RewindState::new());
        self.rewind_registry.lock().unwrap().push(Arc::downgrade(&state));
        state
    }

    fn signal_rewind(&self, start: TransactionId) {
        let mut registry = self.rewind_registry.lock().unwrap();
        registry.retain(|weak| {
            let Some(state) = weak.upgrade() else { return false };
            state.signal_if_committed_since(start);
            true
        });
    }

    pub fn local_peer(&self) -> &Arc<CanonicalPeer> {
        &self.local_peer
    }

    pub fn registry(&self) -> &Arc<CanonicalPeerRegistry> {
        &self.registry
    }

    pub fn interpreter(&self) -> &Arc<dyn Interpreter> {
        &self.interpreter
    }

    pub fn id_generator(&self) -> &Arc<TransactionIdGenerator> {
        &self.id_generator
    }

    pub fn sequencer(&self) -> &Arc<TransactionSequencer> {
        &self.sequencer
    }

    pub fn current_sequence_point(&self) -> SequencePoint {
        self.sequence_point.lock().unwrap().clone()
    }

    pub fn mint_object_id(&self) -> ObjectId {
        self.object_id_generator.generate()
    }

    fn bump_version(&self) {
        let _guard = self.version_mutex.lock().unwrap();
        self.version_counter.fetch_add(1, Ordering::SeqCst);
        self.version_changed.notify_all();
    }

    pub fn current_version(&self) -> u64 {
        self.version_counter.load(Ordering::SeqCst)
    }

    /// Blocks the calling thread (a recording or playback thread waiting on
    /// a `GET_OBJECT` round trip, §4.8) until the store's version counter
    /// advances past `last_seen`, or `timeout` elapses. Returns the version
    /// observed when it woke.
    pub fn wait_for_version_change(&self, last_seen: u64, timeout: std::time::Duration) -> u64 {
        let guard = self.version_mutex.lock().unwrap();
        let (_guard, _) = self
            .version_changed
            .wait_timeout_while(guard, timeout, |_| self.version_counter.load(Ordering::SeqCst) == last_seen)
            .unwrap();
        self.version_counter.load(Ordering::SeqCst)
    }

    /// Creates a fresh versioned shared object seeded with `initial`'s
    /// serialized state, recording an `OBJECT_CREATION` event at `tid`.
    pub fn create_versioned_object(
        &self,
        object_id: ObjectId,
        initial: &dyn VersionedLocalObject,
        origin: Arc<CanonicalPeer>,
        tid: TransactionId,
    ) -> Arc<SharedObject> {
        let mut log = ObjectLog::new(object_id);
        log.insert_transaction(
            origin,
            tid,
            vec![CommittedEvent::ObjectCreation {
                new_shared_objects: Default::default(),
                initial_state: initial.serialize(),
            }],
        );
        let shared = Arc::new(SharedObject {
            object_id,
            state: Mutex::new(ObjectState::Versioned(log)),
            interested_peers: Mutex::new(HashSet::new()),
        });
        self.objects.lock().unwrap().insert(object_id, shared.clone());
        self.bump_version();
        shared
    }

    pub fn create_unversioned_object(&self, object_id: ObjectId, initial: Box<dyn LocalObject>) -> Arc<SharedObject> {
        let shared = Arc::new(SharedObject {
            object_id,
            state: Mutex::new(ObjectState::Unversioned(initial)),
            interested_peers: Mutex::new(HashSet::new()),
        });
        self.objects.lock().unwrap().insert(object_id, shared.clone());
        self.bump_version();
        shared
    }

    pub fn get_object(&self, object_id: ObjectId) -> Option<Arc<SharedObject>> {
        self.objects.lock().unwrap().get(&object_id).cloned()
    }

    /// Resolves a named object by its namespace-derived Object ID,
    /// registering it in the named set if this is the first local mention.
    pub fn get_or_create_named_object(
        &self,
        name: &str,
        seed: impl FnOnce() -> Box<dyn VersionedLocalObject>,
        origin: Arc<CanonicalPeer>,
        tid: TransactionId,
    ) -> Arc<SharedObject> {
        let object_id = named_object_id(name);
        if let Some(existing) = self.get_object(object_id) {
            self.named_objects.lock().unwrap().insert(name.to_string(), object_id);
            return existing;
        }
        let shared = self.create_versioned_object(object_id, &*seed(), origin, tid);
        self.named_objects.lock().unwrap().insert(name.to_string(), object_id);
        shared
    }

    pub fn objects_identical(&self, a: &Arc<SharedObject>, b: &Arc<SharedObject>) -> bool {
        Arc::ptr_eq(a, b)
    }

    /// Runs the get-working-version algorithm (§4.5) against a versioned
    /// object's log. Returns `None` if no `OBJECT_CREATION` is visible yet
    /// (caller must `GET_OBJECT` and wait).
    pub fn get_working_version(
        &self,
        shared: &Arc<SharedObject>,
        sp: &SequencePoint,
        replay: impl FnMut(
            &mut dyn VersionedLocalObject,
            &crate::log::LoggedTransaction,
        ) -> Result<Vec<(ObjectId, ObjectId)>, ()>,
    ) -> Option<crate::log::WorkingVersion> {
        let mut state = shared.state.lock().unwrap();
        match &mut *state {
            ObjectState::Versioned(log) => {
                let interpreter = self.interpreter.clone();
                log.get_working_version(sp, move |bytes| interpreter.deserialize_object(bytes), replay)
            }
            ObjectState::Unversioned(_) => None,
        }
    }

    /// Resolves `object_id` to its live value at the current sequence point
    /// (§4.6). If it isn't visible locally yet — the object is unknown, or
    /// known but no `OBJECT_CREATION` has arrived — broadcasts `GET_OBJECT`
    /// and, if `wait`, blocks on the store's version counter until a
    /// `STORE_OBJECT` reply (or any other store mutation) might have
    /// changed the answer, then checks again.
    pub fn get_live_object(
        &self,
        object_id: ObjectId,
        wait: bool,
        mut replay: impl FnMut(
            &mut dyn VersionedLocalObject,
            &crate::log::LoggedTransaction,
        ) -> Result<Vec<(ObjectId, ObjectId)>, ()>,
    ) -> Option<crate::log::WorkingVersion> {
        loop {
            let last_seen = self.current_version();
            let sp = self.current_sequence_point();
            let found = self
                .get_object(object_id)
                .and_then(|shared| self.get_working_version(&shared, &sp, &mut replay));
            if found.is_some() {
                return found;
            }

            self.sequencer.broadcast(PeerMessage::GetObject { object_id });
            if !wait {
                return None;
            }
            self.wait_for_version_change(last_seen, std::time::Duration::from_secs(5));
        }
    }

    /// Mints a fresh Object ID with no materialized `SharedObject` attached
    /// yet (§3.3's lazy-binding-on-first-use rule): a caller can hold a
    /// handle to it before anything has actually been created or
    /// committed. `versioned` is accepted for interface parity with §4.6;
    /// this store has nothing to mark versioned or not until the ID is
    /// actually used, which is decided by whichever of
    /// `create_versioned_object`/`create_unversioned_object` is eventually
    /// called against it.
    pub fn create_unbound_handle(&self, versioned: bool) -> ObjectId {
        let _ = versioned;
        self.mint_object_id()
    }

    /// Commits a transaction assembled by a recording thread: writes each
    /// object's event subsequence into its log, reserves/releases the
    /// transaction with the sequencer, and broadcasts it (§4.6 `commit`).
    pub fn commit(&self, pending: Vec<PendingObjectEvents>) -> TransactionId {
        let tid = self.sequencer.reserve_transaction();

        let mut object_transactions = Vec::with_capacity(pending.len());
        for p in &pending {
            let shared = self.get_object(p.object_id).unwrap_or_else(|| {
                // First mention of this object: it was created within this
                // same transaction, so its log starts here (§4.7, OBJECT_CREATION
                // always travels as a transaction event, never a bare store call).
                let shared = Arc::new(SharedObject {
                    object_id: p.object_id,
                    state: Mutex::new(ObjectState::Versioned(ObjectLog::new(p.object_id))),
                    interested_peers: Mutex::new(HashSet::new()),
                });
                self.objects.lock().unwrap().insert(p.object_id, shared.clone());
                shared
            });
            let mut state = shared.state.lock().unwrap();
            if let ObjectState::Versioned(log) = &mut *state {
                log.insert_transaction(self.local_peer.clone(), tid, p.events.clone());
            }
            object_transactions.push(drift_wire::ObjectTransaction {
                object_id: p.object_id,
                events: p.events.clone(),
            });
        }

        self.sequence_point.lock().unwrap().add_peer_transaction_id(self.local_peer.clone(), tid);
        self.bump_version();

        self.sequencer.broadcast(PeerMessage::ApplyTransaction {
            transaction_id: tid,
            object_transactions,
        });
        self.sequencer.release_transaction(tid);

        tid
    }

    // -- Peer-message handlers (invoked by the transport layer, C4) --

    pub fn handle_apply_transaction(
        &self,
        origin: Arc<CanonicalPeer>,
        tid: TransactionId,
        object_transactions: Vec<drift_wire::ObjectTransaction>,
    ) {
        for ot in object_transactions {
            if let Some(shared) = self.get_object(ot.object_id) {
                let mut state = shared.state.lock().unwrap();
                if let ObjectState::Versioned(log) = &mut *state {
                    log.insert_transaction(origin.clone(), tid, ot.events);
                }
            }
        }
        self.sequence_point.lock().unwrap().add_peer_transaction_id(origin, tid);
        self.bump_version();
    }

    pub fn handle_get_object(&self, requester: Arc<CanonicalPeer>, object_id: ObjectId) -> PeerMessage {
        let Some(shared) = self.get_object(object_id) else {
            return PeerMessage::StoreObject {
                object_id,
                transactions: vec![],
                peer_versions: vec![],
                interested_peers: vec![],
            };
        };

        shared.interested_peers.lock().unwrap().insert(requester);

        let mut state = shared.state.lock().unwrap();
        let ObjectState::Versioned(log) = &mut *state else {
            return PeerMessage::StoreObject {
                object_id,
                transactions: vec![],
                peer_versions: vec![],
                interested_peers: vec![],
            };
        };

        let (missing, effective) = log.get_transactions(&Default::default(), &self.local_peer);
        let transactions = missing
            .into_iter()
            .map(|(tid, txn)| drift_wire::StoredTransaction {
                transaction_id: tid,
                origin_peer: txn.origin_peer.peer_id().clone(),
                events: txn.events,
            })
            .collect();
        let peer_versions = effective
            .iter()
            .map(|(peer, tid)| drift_wire::VersionEntry { peer_id: peer.peer_id().clone(), transaction_id: *tid })
            .collect();
        let interested_peers = shared
            .interested_peers
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.peer_id().clone())
            .collect();

        info!(target: "drift", "serving GET_OBJECT for {object_id}");
        PeerMessage::StoreObject { object_id, transactions, peer_versions, interested_peers }
    }

    pub fn handle_store_object(
        &self,
        object_id: ObjectId,
        transactions: Vec<drift_wire::StoredTransaction>,
        peer_versions: Vec<drift_wire::VersionEntry>,
        interested_peers: Vec<drift_wire::PeerId>,
    ) {
        let shared = {
            let mut objects = self.objects.lock().unwrap();
            objects
                .entry(object_id)
                .or_insert_with(|| {
                    Arc::new(SharedObject {
                        object_id,
                        state: Mutex::new(ObjectState::Versioned(ObjectLog::new(object_id))),
                        interested_peers: Mutex::new(HashSet::new()),
                    })
                })
                .clone()
        };

        let mut version_map = crate::version_vector::MaxVersionMap::new();
        for entry in peer_versions {
            version_map.add_peer_transaction_id(self.registry.get(entry.peer_id), entry.transaction_id);
        }

        let mut state = shared.state.lock().unwrap();
        if let ObjectState::Versioned(log) = &mut *state {
            let batch = transactions
                .into_iter()
                .map(|t| (t.transaction_id, self.registry.get(t.origin_peer), t.events))
                .collect();
            log.store_transactions(batch, &version_map);
        }
        drop(state);

        let mut interested = shared.interested_peers.lock().unwrap();
        for peer_id in interested_peers {
            interested.insert(self.registry.get(peer_id));
        }
        drop(interested);

        self.bump_version();
    }

    pub fn handle_reject_transaction(
        &self,
        new_tid: TransactionId,
        rejected: Vec<drift_wire::RejectedEntry>,
    ) {
        let entries: Vec<(Arc<CanonicalPeer>, TransactionId)> = rejected
            .into_iter()
            .map(|e| (self.registry.get(e.rejected_peer_id), e.rejected_transaction_id))
            .collect();
        self.apply_rejections(new_tid, &entries);
    }

    /// Runs the §4.6 "conflict rejection protocol" for a non-empty `reject`
    /// list surfaced by `get_working_version`: reserves a fresh transaction
    /// ID, broadcasts `REJECT_TRANSACTION` naming every rejected entry, and
    /// applies the same local effects an inbound `REJECT_TRANSACTION` would
    /// (see `apply_rejections`).
    pub fn reject_transactions(&self, reject: Vec<(Arc<CanonicalPeer>, TransactionId)>) {
        if reject.is_empty() {
            return;
        }
        let new_tid = self.sequencer.reserve_transaction();
        let rejected = reject
            .iter()
            .map(|(peer, tid)| drift_wire::RejectedEntry {
                rejected_peer_id: peer.peer_id().clone(),
                rejected_transaction_id: *tid,
            })
            .collect();
        self.sequencer.broadcast(PeerMessage::RejectTransaction { new_transaction_id: new_tid, rejected });
        self.apply_rejections(new_tid, &reject);
        self.sequencer.release_transaction(new_tid);
    }

    /// Applies the local side effects of a batch of rejection entries: folds
    /// each into the sequence point (an exclusion range if the rejected
    /// peer is local, a rejected-peer marker otherwise), and for any
    /// local-origin entry also broadcasts `INVALIDATE_TRANSACTIONS` for that
    /// range and rewinds every registered recording thread that has
    /// committed at or past the rejected start. Shared between the outbound
    /// path (this store just detected the conflict itself) and the inbound
    /// `REJECT_TRANSACTION` handler above.
    fn apply_rejections(&self, new_tid: TransactionId, entries: &[(Arc<CanonicalPeer>, TransactionId)]) {
        let mut sp = self.sequence_point.lock().unwrap();
        let mut oldest_local: Option<TransactionId> = None;
        for (peer, tid) in entries {
            if Arc::ptr_eq(peer, &self.local_peer) {
                sp.add_invalidated_range(peer.clone(), *tid, new_tid);
                oldest_local = Some(oldest_local.map_or(*tid, |o| o.min(*tid)));
            } else {
                sp.add_rejected_peer(peer.clone(), *tid);
            }
        }
        drop(sp);

        if let Some(start) = oldest_local {
            self.sequencer.broadcast(PeerMessage::InvalidateTransactions {
                start_transaction_id: start,
                end_transaction_id: new_tid,
            });
            self.signal_rewind(start);
        }
        self.bump_version();
    }

    pub fn handle_invalidate_transactions(
        &self,
        origin: Arc<CanonicalPeer>,
        start: TransactionId,
        end: TransactionId,
    ) {
        self.sequence_point.lock().unwrap().add_invalidated_range(origin, start, end);
        self.bump_version();
    }

    /// Called by the transport layer once a new connection has been
    /// promoted: broadcasts a `GET_OBJECT` for every locally named object
    /// so the new peer's named namespace converges (§4.6 "New connection").
    pub fn announce_named_objects_to(&self, peer: &Arc<CanonicalPeer>) {
        let named: Vec<ObjectId> = self.named_objects.lock().unwrap().values().copied().collect();
        for object_id in named {
            self.sequencer.send_to_peer(peer.clone(), PeerMessage::GetObject { object_id });
        }
    }
}

impl PeerMessageHandler for TransactionStore {
    /// Routes one decoded peer message into the store's handlers. HELLO and
    /// GOODBYE never reach here; the connection table intercepts those
    /// itself (§4.4).
    fn handle_message(&self, origin: &Arc<CanonicalPeer>, message: PeerMessage) {
        match message {
            PeerMessage::ApplyTransaction { transaction_id, object_transactions } => {
                self.handle_apply_transaction(origin.clone(), transaction_id, object_transactions);
            }
            PeerMessage::GetObject { object_id } => {
                let reply = self.handle_get_object(origin.clone(), object_id);
                self.sequencer.send_to_peer(origin.clone(), reply);
            }
            PeerMessage::StoreObject { object_id, transactions, peer_versions, interested_peers } => {
                self.handle_store_object(object_id, transactions, peer_versions, interested_peers);
            }
            PeerMessage::RejectTransaction { new_transaction_id, rejected } => {
                self.handle_reject_transaction(new_transaction_id, rejected);
            }
            PeerMessage::InvalidateTransactions { start_transaction_id, end_transaction_id } => {
                self.handle_invalidate_transactions(origin.clone(), start_transaction_id, end_transaction_id);
            }
            PeerMessage::Hello { .. } | PeerMessage::Goodbye => {
                // Handled by the connection table before dispatch reaches here.
            }
            PeerMessage::Test { text } => {
                info!(target: "drift", "test message from {}: {text}", origin.peer_id());
            }
        }
    }

    fn connection_promoted(&self, peer: &Arc<CanonicalPeer>) {
        self.announce_named_objects_to(peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    #[allow(unused_imports)]
    use test_log::test;

    use crate::sequencer::PeerMessageSender;

    #[derive(Clone)]
    struct Counter(u8);

    impl LocalObject for Counter {
        fn invoke_method(
            &mut self,
            _thread: &mut dyn drift_embed::Thread,
            _self_handle: drift_embed::ObjectHandle,
            method_name: &str,
            _parameters: &[drift_wire::CommittedValue],
        ) -> drift_wire::CommittedValue {
            if method_name == "increment" {
                self.0 += 1;
            }
            drift_wire::CommittedValue::Empty
        }
        fn serialize(&self) -> Vec<u8> {
            vec![self.0]
        }
    }
    impl VersionedLocalObject for Counter {
        fn clone_versioned(&self) -> Box<dyn VersionedLocalObject> {
            Box::new(self.clone())
        }
    }

    struct CounterInterpreter;
    impl Interpreter for CounterInterpreter {
        fn deserialize_object(&self, bytes: &[u8]) -> Box<dyn VersionedLocalObject> {
            Box::new(Counter(bytes[0]))
        }
    }

    #[derive(Default)]
    struct NullSender {
        sent: StdMutex<usize>,
    }
    impl PeerMessageSender for NullSender {
        fn send_to_peer(&self, _peer: &Arc<CanonicalPeer>, _message: &PeerMessage) {
            *self.sent.lock().unwrap() += 1;
        }
        fn broadcast(&self, _message: &PeerMessage) {
            *self.sent.lock().unwrap() += 1;
        }
    }

    fn new_store() -> TransactionStore {
        let registry = Arc::new(CanonicalPeerRegistry::new());
        let local_peer = registry.get(drift_wire::PeerId::new("127.0.0.1", 9000));
        let id_generator = Arc::new(TransactionIdGenerator::new(ObjectId::new(1, 1)));
        let sender = Arc::new(NullSender::default());
        let sequencer = Arc::new(TransactionSequencer::new(id_generator.clone(), sender));
        TransactionStore::new(registry, local_peer, Arc::new(CounterInterpreter), id_generator, sequencer, 7)
    }

    #[test]
    fn create_and_replay_round_trips_through_get_working_version() {
        let store = new_store();
        let object_id = store.mint_object_id();
        let tid = store.sequencer().reserve_transaction();
        let shared = store.create_versioned_object(object_id, &Counter(0), store.local_peer().clone(), tid);
        store.sequencer().release_transaction(tid);

        let sp = store.current_sequence_point();
        let result = store
            .get_working_version(&shared, &sp, |_object, _txn| Ok(Vec::new()))
            .expect("object creation should be visible");
        assert_eq!(result.live_object.serialize(), vec![0]);
        assert!(result.reject.is_empty());
    }

    #[test]
    fn commit_advances_sequence_point_and_broadcasts() {
        let store = new_store();
        let object_id = store.mint_object_id();
        let create_tid = store.sequencer().reserve_transaction();
        store.create_versioned_object(object_id, &Counter(0), store.local_peer().clone(), create_tid);
        store.sequencer().release_transaction(create_tid);

        let before = store.current_sequence_point();
        let tid = store.commit(vec![PendingObjectEvents {
            object_id,
            events: vec![CommittedEvent::MethodCall {
                new_shared_objects: Default::default(),
                caller: None,
                method_name: "increment".to_string(),
                parameters: vec![],
            }],
        }]);
        let after = store.current_sequence_point();
        assert!(after.has(store.local_peer(), tid));
        assert!(!before.has(store.local_peer(), tid));
    }

    #[test]
    fn handle_get_object_on_unknown_object_returns_empty_store_object() {
        let store = new_store();
        let reply = store.handle_get_object(store.local_peer().clone(), ObjectId::new(9, 9));
        match reply {
            PeerMessage::StoreObject { transactions, .. } => assert!(transactions.is_empty()),
            other => panic!("expected StoreObject, got {other:?}"),
        }
    }

    #[test]
    fn handle_store_object_is_idempotent_when_replayed_twice() {
        let store = new_store();
        let origin = store.registry().get(drift_wire::PeerId::new("1.2.3.4", 1));
        let tid = TransactionId { time: 1, peer_hi: 0, peer_lo: 0 };
        let transactions = vec![drift_wire::StoredTransaction {
            transaction_id: tid,
            origin_peer: origin.peer_id().clone(),
            events: vec![CommittedEvent::ObjectCreation {
                new_shared_objects: Default::default(),
                initial_state: vec![0],
            }],
        }];
        let peer_versions = vec![drift_wire::VersionEntry { peer_id: origin.peer_id().clone(), transaction_id: tid }];

        let object_id = ObjectId::new(2, 2);
        store.handle_store_object(object_id, transactions.clone(), peer_versions.clone(), vec![]);
        store.handle_store_object(object_id, transactions, peer_versions, vec![]);

        let shared = store.get_object(object_id).expect("object should now exist");
        let sp = store.current_sequence_point();
        let mut sp_with_origin = sp.clone();
        sp_with_origin.add_peer_transaction_id(origin, tid);
        let result = store
            .get_working_version(&shared, &sp_with_origin, |_object, _txn| Ok(Vec::new()))
            .expect("seeded object should replay");
        assert!(result.reject.is_empty());
    }
}

