mod codec;
mod event;
mod message;
mod object_id;
mod peer_id;
mod transaction_id;
mod value;

pub use codec::{read_frame, write_frame};
pub use event::{CommittedEvent, EventKind};
pub use message::{ObjectTransaction, PeerMessage, RejectedEntry, StoredTransaction, VersionEntry};
pub use object_id::{named_object_id, ObjectId, ObjectIdGenerator, NAMED_OBJECT_NAMESPACE};
pub use peer_id::PeerId;
pub use transaction_id::{PeerSalt, TransactionId};
pub use value::CommittedValue;
