// A committed value is the tagged union that flows inside committed events:
// primitives plus a shared-object reference. Floats are wrapped in
// OrderedFloat so CommittedValue can derive Eq/Ord/Hash, matching how the
// rest of this workspace handles floating point inside otherwise
// totally-ordered value types.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

use crate::ObjectId;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CommittedValue {
    Empty,
    F64(OrderedFloat<f64>),
    F32(OrderedFloat<f32>),
    I64(i64),
    U64(u64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    SharedObject(ObjectId),
}

impl CommittedValue {
    /// True iff the value references a shared object, i.e. it might
    /// introduce a new local-handle binding during replay.
    pub fn object_id(&self) -> Option<ObjectId> {
        match self {
            CommittedValue::SharedObject(id) => Some(*id),
            _ => None,
        }
    }
}
