#![allow(dead_code)]

// The engine (C3-C8): canonical peer registry, transaction ID generation
// and sequencing, the peer wire transport, the per-object shared log, the
// transaction store that ties them together, and the recording/playback
// threads that drive local execution against it.

mod ids;
mod log;
mod recording;
mod registry;
mod sequence_point;
mod sequencer;
mod store;
mod transport;
mod version_vector;
mod playback;
mod peer;

pub use ids::TransactionIdGenerator;
pub use log::{LoggedTransaction, ObjectLog, WorkingVersion};
pub use peer::Peer;
pub use playback::{replay_transaction, PlaybackState};
pub use recording::RecordingThread;
pub use registry::{CanonicalPeer, CanonicalPeerRegistry};
pub use sequence_point::SequencePoint;
pub use sequencer::{PeerMessageSender, TransactionSequencer};
pub use store::{PendingObjectEvents, SharedObject, TransactionStore};
pub use transport::{ConnectionTable, PeerMessageHandler};
pub use version_vector::{MaxVersionMap, PeerExclusionMap};
