// Peer connection & transport (C4). One connection per remote peer,
// framed with drift-wire's length-prefixed rmp-serde codec over a
// std::net::TcpStream, each direction owned by its own blocking thread. A
// small connection table tracks the HELLO/GOODBYE handshake, tie-breaks
// duplicate concurrent connections, and exposes `PeerMessageSender` to the
// transaction sequencer.

use std::collections::{HashMap, VecDeque};
use std::io::BufReader;
use std::net::TcpStream;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{error, info, warn};

use drift_base::{invariant, Result};
use drift_wire::{read_frame, write_frame, PeerId, PeerMessage};

use crate::registry::{CanonicalPeer, CanonicalPeerRegistry};
use crate::sequencer::PeerMessageSender;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConnectionState {
    Open,
    Closed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ReceiveState {
    None,
    HelloReceived,
    GoodbyeReceived,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SendState {
    None,
    HelloSent,
    GoodbyeSent,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum DrainFlag {
    NoDrain,
    DrainRequested,
}

/// Dispatches peer messages received over a connection into the store
/// (C6). Implemented by `drift-engine::store::TransactionStore`.
pub trait PeerMessageHandler: Send + Sync {
    fn handle_message(&self, origin: &Arc<CanonicalPeer>, message: PeerMessage);
    fn connection_promoted(&self, peer: &Arc<CanonicalPeer>);
}

/// Outgoing messages are queued under one of two service classes: an
/// unbounded non-blocking class, and a blocking class that holds at most
/// one message at a time, with producers blocking until it drains.
struct OutgoingQueue {
    non_blocking: VecDeque<PeerMessage>,
    blocking_slot: Option<PeerMessage>,
}

struct ConnectionShared {
    queue: Mutex<OutgoingQueue>,
    not_empty: Condvar,
    state: Mutex<ConnectionInternalState>,
}

struct ConnectionInternalState {
    connection: ConnectionState,
    receive: ReceiveState,
    send: SendState,
    drain: DrainFlag,
}

pub enum SendMode {
    NonBlocking,
    Blocking,
}

/// One logical connection to a remote (or not-yet-identified) peer.
pub struct PeerConnection {
    shared: Arc<ConnectionShared>,
    writer_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl PeerConnection {
    fn new() -> Self {
        PeerConnection {
            shared: Arc::new(ConnectionShared {
                queue: Mutex::new(OutgoingQueue { non_blocking: VecDeque::new(), blocking_slot: None }),
                not_empty: Condvar::new(),
                state: Mutex::new(ConnectionInternalState {
                    connection: ConnectionState::Open,
                    receive: ReceiveState::None,
                    send: SendState::None,
                    drain: DrainFlag::NoDrain,
                }),
            }),
            writer_handle: Mutex::new(None),
        }
    }

    /// Enqueues `message` for delivery. Fails (so the caller / router can
    /// retry on a fresh connection) if this connection is draining.
    pub fn enqueue(&self, message: PeerMessage, mode: SendMode) -> Result<()> {
        let state = self.shared.state.lock().unwrap();
        if state.drain == DrainFlag::DrainRequested || state.connection == ConnectionState::Closed {
            return Err(drift_base::err("connection is draining or closed"));
        }
        drop(state);

        let mut queue = self.shared.queue.lock().unwrap();
        match mode {
            SendMode::NonBlocking => queue.non_blocking.push_back(message),
            SendMode::Blocking => {
                while queue.blocking_slot.is_some() {
                    queue = self.shared.not_empty.wait(queue).unwrap();
                }
                queue.blocking_slot = Some(message);
            }
        }
        drop(queue);
        self.shared.not_empty.notify_all();
        Ok(())
    }

    pub fn request_drain(&self) {
        let mut state = self.shared.state.lock().unwrap();
        state.drain = DrainFlag::DrainRequested;
        self.shared.not_empty.notify_all();
    }

    fn mark_hello_sent(&self) {
        self.shared.state.lock().unwrap().send = SendState::HelloSent;
    }

    fn mark_goodbye_sent(&self) {
        self.shared.state.lock().unwrap().send = SendState::GoodbyeSent;
    }

    fn mark_hello_received(&self) {
        self.shared.state.lock().unwrap().receive = ReceiveState::HelloReceived;
    }

    fn mark_goodbye_received(&self) {
        self.shared.state.lock().unwrap().receive = ReceiveState::GoodbyeReceived;
    }

    fn both_goodbyes_exchanged(&self) -> bool {
        let state = self.shared.state.lock().unwrap();
        state.send == SendState::GoodbyeSent && state.receive == ReceiveState::GoodbyeReceived
    }

    fn close(&self) {
        self.shared.state.lock().unwrap().connection = ConnectionState::Closed;
        self.shared.not_empty.notify_all();
    }
}

/// Spawns the reader and writer threads for one accepted or dialed TCP
/// stream, and drives the HELLO/GOODBYE handshake and duplicate-connection
/// tie-break described in §4.4.
pub struct ConnectionTable {
    registry: Arc<CanonicalPeerRegistry>,
    local_peer_id: PeerId,
    interpreter_type: String,
    handler: Arc<dyn PeerMessageHandler>,
    unnamed: Mutex<HashMap<u64, Arc<PeerConnection>>>,
    named: Mutex<HashMap<Arc<CanonicalPeer>, Arc<PeerConnection>>>,
    next_unnamed_id: Mutex<u64>,
}

impl ConnectionTable {
    pub fn new(
        registry: Arc<CanonicalPeerRegistry>,
        local_peer_id: PeerId,
        interpreter_type: String,
        handler: Arc<dyn PeerMessageHandler>,
    ) -> Self {
        ConnectionTable {
            registry,
            local_peer_id,
            interpreter_type,
            handler,
            unnamed: Mutex::new(HashMap::new()),
            named: Mutex::new(HashMap::new()),
            next_unnamed_id: Mutex::new(0),
        }
    }

    /// Takes ownership of a freshly connected (accepted or dialed) TCP
    /// stream: sends HELLO immediately, spawns reader/writer threads, and
    /// registers the connection in the unnamed table pending promotion.
    pub fn adopt_stream(self: &Arc<Self>, stream: TcpStream) -> Result<()> {
        let connection = Arc::new(PeerConnection::new());

        let mut next_id = self.next_unnamed_id.lock().unwrap();
        let unnamed_id = *next_id;
        *next_id += 1;
        drop(next_id);
        self.unnamed.lock().unwrap().insert(unnamed_id, connection.clone());

        let reader_stream = stream.try_clone().map_err(drift_base::Error::from)?;
        let writer_stream = stream;

        let table = self.clone();
        let conn_for_writer = connection.clone();
        let writer = thread::spawn(move || {
            table.run_writer(unnamed_id, conn_for_writer, writer_stream);
        });
        *connection.writer_handle.lock().unwrap() = Some(writer);

        connection.enqueue(
            PeerMessage::Hello {
                peer_id: self.local_peer_id.clone(),
                interpreter_type: self.interpreter_type.clone(),
            },
            SendMode::NonBlocking,
        )?;
        connection.mark_hello_sent();

        let table = self.clone();
        let conn_for_reader = connection;
        thread::spawn(move || {
            table.run_reader(unnamed_id, conn_for_reader, reader_stream);
        });

        Ok(())
    }

    fn run_writer(&self, unnamed_id: u64, connection: Arc<PeerConnection>, stream: TcpStream) {
        let mut stream = stream;
        loop {
            let message = {
                let mut queue = connection.shared.queue.lock().unwrap();
                loop {
                    if let Some(m) = queue.non_blocking.pop_front() {
                        break Some(m);
                    }
                    if let Some(m) = queue.blocking_slot.take() {
                        connection.shared.not_empty.notify_all();
                        break Some(m);
                    }
                    if connection.both_goodbyes_exchanged() || connection.shared.state.lock().unwrap().connection == ConnectionState::Closed {
                        break None;
                    }
                    queue = connection.shared.not_empty.wait(queue).unwrap();
                }
            };
            let Some(message) = message else { break };
            let is_goodbye = matches!(message, PeerMessage::Goodbye);
            if let Err(e) = write_frame(&mut stream, &message) {
                error!(target: "drift", "write to connection {unnamed_id} failed: {e:?}");
                break;
            }
            if is_goodbye {
                connection.mark_goodbye_sent();
                if connection.both_goodbyes_exchanged() {
                    break;
                }
            }
        }
        connection.close();
        self.forget(unnamed_id, &connection);
    }

    fn run_reader(self: &Arc<Self>, unnamed_id: u64, connection: Arc<PeerConnection>, stream: TcpStream) {
        let mut reader = BufReader::new(stream);
        let mut promoted_peer: Option<Arc<CanonicalPeer>> = None;

        loop {
            let frame = match read_frame(&mut reader) {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(e) => {
                    error!(target: "drift", "malformed frame from connection {unnamed_id}: {e:?}");
                    break;
                }
            };

            match frame {
                PeerMessage::Hello { peer_id, interpreter_type } => {
                    invariant!(
                        interpreter_type == self.interpreter_type,
                        "interpreter type mismatch: local={}, remote={interpreter_type}",
                        self.interpreter_type
                    );
                    let canonical = self.registry.get(peer_id);
                    match self.promote(unnamed_id, &connection, canonical.clone()) {
                        Some(survivor) => {
                            if !Arc::ptr_eq(&survivor, &connection) {
                                info!(target: "drift", "duplicate connection to {} lost tie-break", canonical.peer_id());
                                connection.request_drain();
                                break;
                            }
                            promoted_peer = Some(canonical.clone());
                            self.handler.connection_promoted(&canonical);
                        }
                        None => {
                            promoted_peer = Some(canonical.clone());
                            self.handler.connection_promoted(&canonical);
                        }
                    }
                    connection.mark_hello_received();
                }
                PeerMessage::Goodbye => {
                    connection.mark_goodbye_received();
                    connection.request_drain();
                    let _ = connection.enqueue(PeerMessage::Goodbye, SendMode::NonBlocking);
                    if connection.both_goodbyes_exchanged() {
                        break;
                    }
                }
                other => {
                    let Some(peer) = promoted_peer.clone() else {
                        warn!(target: "drift", "message before HELLO on connection {unnamed_id}, dropping");
                        continue;
                    };
                    self.handler.handle_message(&peer, other);
                }
            }
        }

        connection.close();
        self.forget(unnamed_id, &connection);
    }

    /// Implements the duplicate-connection tie-break of §4.4. Returns the
    /// surviving connection for `canonical`, which may not be `candidate`.
    fn promote(
        &self,
        unnamed_id: u64,
        candidate: &Arc<PeerConnection>,
        canonical: Arc<CanonicalPeer>,
    ) -> Option<Arc<PeerConnection>> {
        self.unnamed.lock().unwrap().remove(&unnamed_id);

        let mut named = self.named.lock().unwrap();
        match named.get(&canonical) {
            None => {
                named.insert(canonical, candidate.clone());
                None
            }
            Some(existing) => {
                // The surviving connection is the one whose remote peer ID
                // sorts lower; ties cannot occur because the two endpoints
                // of a socket pair are distinct peers.
                let existing = existing.clone();
                if canonical.peer_id().as_str() < self.local_peer_id.as_str() {
                    named.insert(canonical, candidate.clone());
                    Some(candidate.clone())
                } else {
                    Some(existing)
                }
            }
        }
    }

    fn forget(&self, unnamed_id: u64, connection: &Arc<PeerConnection>) {
        self.unnamed.lock().unwrap().remove(&unnamed_id);
        self.named.lock().unwrap().retain(|_, v| !Arc::ptr_eq(v, connection));
    }

    fn send_to_named(&self, peer: &Arc<CanonicalPeer>, message: PeerMessage) {
        let connection = self.named.lock().unwrap().get(peer).cloned();
        if let Some(connection) = connection {
            if connection.enqueue(message, SendMode::NonBlocking).is_err() {
                warn!(target: "drift", "dropped message to draining connection for {}", peer.peer_id());
            }
        } else {
            warn!(target: "drift", "no connection for {}, dropping message", peer.peer_id());
        }
    }
}

impl PeerMessageSender for ConnectionTable {
    fn send_to_peer(&self, peer: &Arc<CanonicalPeer>, message: &PeerMessage) {
        self.send_to_named(peer, message.clone());
    }

    fn broadcast(&self, message: &PeerMessage) {
        let peers: Vec<Arc<CanonicalPeer>> = self.named.lock().unwrap().keys().cloned().collect();
        for peer in peers {
            self.send_to_named(&peer, message.clone());
        }
    }
}
