// The ten committed-event kinds (§3.4). This is a closed tagged sum: adding
// an eleventh kind is a source change to this enum and to every exhaustive
// match over it (there is no catch-all arm in the core replay logic).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{CommittedValue, ObjectId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ObjectCreation,
    SubObjectCreation,
    BeginTransaction,
    EndTransaction,
    MethodCall,
    MethodReturn,
    SubMethodCall,
    SubMethodReturn,
    SelfMethodCall,
    SelfMethodReturn,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CommittedEvent {
    /// Carries the opaque serialized initial state of a local object.
    ObjectCreation {
        new_shared_objects: BTreeSet<ObjectId>,
        initial_state: Vec<u8>,
    },
    /// References a new shared object created mid-method.
    SubObjectCreation {
        new_shared_objects: BTreeSet<ObjectId>,
        object_id: ObjectId,
    },
    BeginTransaction {
        new_shared_objects: BTreeSet<ObjectId>,
    },
    EndTransaction {
        new_shared_objects: BTreeSet<ObjectId>,
    },
    /// An external caller invoked a method on this object.
    MethodCall {
        new_shared_objects: BTreeSet<ObjectId>,
        caller: Option<ObjectId>,
        method_name: String,
        parameters: Vec<CommittedValue>,
    },
    MethodReturn {
        new_shared_objects: BTreeSet<ObjectId>,
        caller: Option<ObjectId>,
        return_value: CommittedValue,
    },
    /// This object's method invoked a method on another object.
    SubMethodCall {
        new_shared_objects: BTreeSet<ObjectId>,
        callee: ObjectId,
        method_name: String,
        parameters: Vec<CommittedValue>,
    },
    SubMethodReturn {
        new_shared_objects: BTreeSet<ObjectId>,
        callee: ObjectId,
        return_value: CommittedValue,
    },
    /// This object's method reentered itself.
    SelfMethodCall {
        new_shared_objects: BTreeSet<ObjectId>,
        method_name: String,
        parameters: Vec<CommittedValue>,
    },
    SelfMethodReturn {
        new_shared_objects: BTreeSet<ObjectId>,
        return_value: CommittedValue,
    },
}

impl CommittedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            CommittedEvent::ObjectCreation { .. } => EventKind::ObjectCreation,
            CommittedEvent::SubObjectCreation { .. } => EventKind::SubObjectCreation,
            CommittedEvent::BeginTransaction { .. } => EventKind::BeginTransaction,
            CommittedEvent::EndTransaction { .. } => EventKind::EndTransaction,
            CommittedEvent::MethodCall { .. } => EventKind::MethodCall,
            CommittedEvent::MethodReturn { .. } => EventKind::MethodReturn,
            CommittedEvent::SubMethodCall { .. } => EventKind::SubMethodCall,
            CommittedEvent::SubMethodReturn { .. } => EventKind::SubMethodReturn,
            CommittedEvent::SelfMethodCall { .. } => EventKind::SelfMethodCall,
            CommittedEvent::SelfMethodReturn { .. } => EventKind::SelfMethodReturn,
        }
    }

    pub fn new_shared_objects(&self) -> &BTreeSet<ObjectId> {
        match self {
            CommittedEvent::ObjectCreation { new_shared_objects, .. }
            | CommittedEvent::SubObjectCreation { new_shared_objects, .. }
            | CommittedEvent::BeginTransaction { new_shared_objects }
            | CommittedEvent::EndTransaction { new_shared_objects }
            | CommittedEvent::MethodCall { new_shared_objects, .. }
            | CommittedEvent::MethodReturn { new_shared_objects, .. }
            | CommittedEvent::SubMethodCall { new_shared_objects, .. }
            | CommittedEvent::SubMethodReturn { new_shared_objects, .. }
            | CommittedEvent::SelfMethodCall { new_shared_objects, .. }
            | CommittedEvent::SelfMethodReturn { new_shared_objects, .. } => new_shared_objects,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused_imports)]
    use test_log::test;

    #[test]
    fn kind_matches_variant() {
        let e = CommittedEvent::MethodCall {
            new_shared_objects: BTreeSet::new(),
            caller: None,
            method_name: "print".to_string(),
            parameters: vec![],
        };
        assert_eq!(e.kind(), EventKind::MethodCall);
    }

    #[test]
    fn new_shared_objects_accessor_works_for_every_variant() {
        let obj = ObjectId::new(1, 1);
        let mut set = BTreeSet::new();
        set.insert(obj);

        let e = CommittedEvent::SubObjectCreation {
            new_shared_objects: set.clone(),
            object_id: obj,
        };
        assert_eq!(e.new_shared_objects(), &set);
    }
}
