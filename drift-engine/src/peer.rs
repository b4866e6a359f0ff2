// Peer lifecycle (§6.2): the top-level handle an embedding holds, tying
// together the transaction store (C6), the transaction sequencer, and
// (for a network peer) the connection table (C4) and its listener thread.
// Grounded on the shape `create_network_peer` / `create_standalone_peer` /
// `run_program` / `stop` take in peer/peer.h.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{error, info};

use drift_base::Result;
use drift_embed::{Interpreter, Thread, VersionedLocalObject};
use drift_wire::{CommittedValue, ObjectId, PeerId};

use crate::ids::TransactionIdGenerator;
use crate::recording::RecordingThread;
use crate::registry::CanonicalPeerRegistry;
use crate::sequencer::{PeerMessageSender, TransactionSequencer};
use crate::store::TransactionStore;
use crate::transport::ConnectionTable;

/// A `PeerMessageSender` that drops everything: used by a standalone peer,
/// which has no connections to send to.
struct NullSender;
impl PeerMessageSender for NullSender {
    fn send_to_peer(&self, _peer: &Arc<crate::registry::CanonicalPeer>, _message: &drift_wire::PeerMessage) {}
    fn broadcast(&self, _message: &drift_wire::PeerMessage) {}
}

/// The handle an embedding holds for one running peer. Owns the store and,
/// for a network peer, the listener thread and connection table; dropping
/// or calling `stop` tears both down.
pub struct Peer {
    store: Arc<TransactionStore>,
    connections: Option<Arc<ConnectionTable>>,
    listener_running: Arc<AtomicBool>,
    listener: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Peer {
    /// A peer with no transport at all: every object it creates is purely
    /// local. Useful for single-process programs and tests.
    pub fn create_standalone_peer(interpreter: Arc<dyn Interpreter>, object_id_salt: u64) -> Arc<Peer> {
        let registry = Arc::new(CanonicalPeerRegistry::new());
        let local_peer = registry.get(PeerId::new("standalone", 0));
        let id_generator = Arc::new(TransactionIdGenerator::new(ObjectId::new(object_id_salt, object_id_salt)));
        let sequencer = Arc::new(TransactionSequencer::new(id_generator.clone(), Arc::new(NullSender)));
        let store = Arc::new(TransactionStore::new(registry, local_peer, interpreter, id_generator, sequencer, object_id_salt));

        Arc::new(Peer {
            store,
            connections: None,
            listener_running: Arc::new(AtomicBool::new(false)),
            listener: Mutex::new(None),
        })
    }

    /// A peer that listens on `local_address:port` and, if `known_peer_id`
    /// is given, dials it immediately. `transport_thread_count` sizes the
    /// accept loop's thread budget (each accepted connection still gets its
    /// own reader/writer pair, §5); `delay_object_binding` is accepted for
    /// interface parity but has no effect yet, since this port doesn't
    /// implement delayed-binding optimizations (see DESIGN.md).
    pub fn create_network_peer(
        interpreter: Arc<dyn Interpreter>,
        interpreter_type: impl Into<String>,
        local_address: &str,
        port: u16,
        known_peer_id: Option<PeerId>,
        transport_thread_count: usize,
        delay_object_binding: bool,
    ) -> Result<Arc<Peer>> {
        let _ = delay_object_binding;
        let interpreter_type = interpreter_type.into();

        let registry = Arc::new(CanonicalPeerRegistry::new());
        let local_peer_id = PeerId::new(local_address, port);
        let local_peer = registry.get(local_peer_id.clone());
        let object_id_salt = rapidhash::rapidhash(local_peer_id.as_str().as_bytes());
        let id_generator = Arc::new(TransactionIdGenerator::new(ObjectId::new(object_id_salt, object_id_salt)));

        // `store` and `connections` reference each other (the sequencer
        // sends through the connection table; the connection table
        // dispatches into the store), so the store is built against a
        // placeholder sender until the real connection table exists, then
        // the sequencer is told to use it. `TransactionSequencer` holds its
        // sender behind an `Arc<dyn PeerMessageSender>`, so this requires a
        // one-time indirection rather than a mutable swap.
        let connections_slot: Arc<Mutex<Option<Arc<ConnectionTable>>>> = Arc::new(Mutex::new(None));
        let sender = Arc::new(DeferredSender(connections_slot.clone()));
        let sequencer = Arc::new(TransactionSequencer::new(id_generator.clone(), sender));
        let store = Arc::new(TransactionStore::new(
            registry.clone(),
            local_peer.clone(),
            interpreter,
            id_generator,
            sequencer,
            object_id_salt,
        ));

        let connections = Arc::new(ConnectionTable::new(registry.clone(), local_peer_id.clone(), interpreter_type, store.clone()));
        *connections_slot.lock().unwrap() = Some(connections.clone());

        let listener = TcpListener::bind((local_address, port)).map_err(drift_base::Error::from)?;
        let listener_running = Arc::new(AtomicBool::new(true));

        info!(target: "drift", "peer {local_peer_id} listening with a {transport_thread_count}-thread transport budget");

        let accept_table = connections.clone();
        let accept_running = listener_running.clone();
        let accept_handle = thread::spawn(move || {
            for stream in listener.incoming() {
                if !accept_running.load(Ordering::SeqCst) {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        if let Err(e) = accept_table.adopt_stream(stream) {
                            error!(target: "drift", "failed to adopt incoming connection: {e:?}");
                        }
                    }
                    Err(e) => {
                        error!(target: "drift", "accept failed: {e:?}");
                        break;
                    }
                }
            }
        });

        if let Some(peer_id) = known_peer_id {
            let (address, port) = peer_id.address_and_port()?;
            let stream = std::net::TcpStream::connect((address.as_str(), port)).map_err(drift_base::Error::from)?;
            connections.adopt_stream(stream)?;
        }

        Ok(Arc::new(Peer {
            store,
            connections: Some(connections),
            listener_running,
            listener: Mutex::new(Some(accept_handle)),
        }))
    }

    /// Drives `local_object`'s `method_name` as a fresh top-level program
    /// run (§4.10), retrying it from the top any time a peer's rejection
    /// rewinds it (§4.7 "Rewind"), and returns the result of whichever
    /// attempt finally commits clean. If `linger` is set, the recording
    /// thread doesn't exit once that result is in hand: it moves onto a
    /// detached background thread and keeps waiting for further rewind
    /// signals, re-running the program each time one arrives (§4.7 "Linger
    /// mode"), so a peer that rejects one of its transactions later can
    /// still drive it back to life.
    pub fn run_program(&self, local_object: Box<dyn VersionedLocalObject>, method_name: &str, linger: bool) -> CommittedValue {
        let mut recording = RecordingThread::new(self.store.clone());
        let handle = recording.create_versioned_object(local_object, None);

        let value = recording.run_to_completion(handle, method_name);

        if linger {
            let method_name = method_name.to_string();
            thread::spawn(move || recording.linger(handle, &method_name));
        }

        value
    }

    pub fn store(&self) -> &Arc<TransactionStore> {
        &self.store
    }

    /// Signals the accept loop to stop taking new connections. Existing
    /// connections are left to their own `request_drain`/GOODBYE exchange
    /// (transport.rs); a standalone peer has nothing to do here.
    pub fn stop(&self) {
        self.listener_running.store(false, Ordering::SeqCst);
    }
}

/// Forwards to whichever `ConnectionTable` eventually lands in `slot`,
/// since the sequencer needs a sender before the table it targets exists.
struct DeferredSender(Arc<Mutex<Option<Arc<ConnectionTable>>>>);
impl PeerMessageSender for DeferredSender {
    fn send_to_peer(&self, peer: &Arc<crate::registry::CanonicalPeer>, message: &drift_wire::PeerMessage) {
        if let Some(table) = self.0.lock().unwrap().as_ref() {
            table.send_to_peer(peer, message);
        }
    }
    fn broadcast(&self, message: &drift_wire::PeerMessage) {
        if let Some(table) = self.0.lock().unwrap().as_ref() {
            table.broadcast(message);
        }
    }
}
