// The embedding surface: the trait boundary between an interpreter (a toy
// Lisp-like language, Lua, Python, ...) and the engine that replicates its
// side effects. An embedding depends only on this crate and on
// `drift-wire`'s value types, never on the engine's internals.

use drift_wire::CommittedValue;

/// An opaque per-process reference to a shared object, as seen by the
/// embedding. Two handles are "the same object" iff `Thread::objects_identical`
/// says so; the handle itself carries no visible structure to the embedding.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ObjectHandle(pub u64);

impl ObjectHandle {
    pub const fn new(id: u64) -> Self {
        ObjectHandle(id)
    }
}

/// Deserializes the opaque byte representation an `OBJECT_CREATION` event
/// carries back into a live object the engine can replay further events
/// against. Only versioned objects are ever logged this way (§3.3), so the
/// result is always a `VersionedLocalObject`.
pub trait Interpreter: Send + Sync {
    fn deserialize_object(&self, bytes: &[u8]) -> Box<dyn VersionedLocalObject>;
}

/// One version of a particular object in the local interpreter. Multiple
/// `LocalObject` instances may represent the same underlying interpreter
/// object at different points in its history; implementations must be
/// `Send` so a recording thread can hand working copies across threads.
pub trait LocalObject: Send {
    /// Runs `method_name` against `self`, calling back into `thread` for any
    /// transaction/object operation the method performs. Returns the
    /// method's return value on success; on rewind (`thread` returned
    /// `false` from a callback) the return value is unspecified and must be
    /// ignored by the caller.
    fn invoke_method(
        &mut self,
        thread: &mut dyn Thread,
        self_handle: ObjectHandle,
        method_name: &str,
        parameters: &[CommittedValue],
    ) -> CommittedValue;

    /// Serializes the object's current state, e.g. for an `OBJECT_CREATION`
    /// event or for seeding a playback thread's working copy.
    fn serialize(&self) -> Vec<u8>;

    fn dump(&self) -> String {
        String::from("<local object>")
    }
}

/// A `LocalObject` whose state is reconstructed by replaying its log, and
/// which therefore must support cloning a working copy before replay
/// mutates it. Unversioned objects hold local-only state and don't need
/// this; see §3.3.
pub trait VersionedLocalObject: LocalObject {
    fn clone_versioned(&self) -> Box<dyn VersionedLocalObject>;
}

/// The callback interface a recording or playback thread supplies to the
/// interpreter while a method is running (§4.7). Every mutating callback
/// returns `bool`: `false` means a rewind is underway and the interpreter
/// must unwind the current method without relying on the callback's other
/// results.
pub trait Thread {
    fn begin_transaction(&mut self) -> bool;
    fn end_transaction(&mut self) -> bool;

    fn create_versioned_object(
        &mut self,
        initial: Box<dyn VersionedLocalObject>,
        name: Option<&str>,
    ) -> ObjectHandle;

    fn create_unversioned_object(
        &mut self,
        initial: Box<dyn LocalObject>,
        name: Option<&str>,
    ) -> ObjectHandle;

    fn call_method(
        &mut self,
        handle: ObjectHandle,
        method_name: &str,
        parameters: &[CommittedValue],
    ) -> (bool, CommittedValue);

    fn objects_identical(&self, a: ObjectHandle, b: ObjectHandle) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;
    impl Thread for Fixed {
        fn begin_transaction(&mut self) -> bool {
            true
        }
        fn end_transaction(&mut self) -> bool {
            true
        }
        fn create_versioned_object(
            &mut self,
            _initial: Box<dyn VersionedLocalObject>,
            _name: Option<&str>,
        ) -> ObjectHandle {
            ObjectHandle::new(1)
        }
        fn create_unversioned_object(
            &mut self,
            _initial: Box<dyn LocalObject>,
            _name: Option<&str>,
        ) -> ObjectHandle {
            ObjectHandle::new(2)
        }
        fn call_method(
            &mut self,
            _handle: ObjectHandle,
            _method_name: &str,
            _parameters: &[CommittedValue],
        ) -> (bool, CommittedValue) {
            (true, CommittedValue::Empty)
        }
        fn objects_identical(&self, a: ObjectHandle, b: ObjectHandle) -> bool {
            a == b
        }
    }

    #[test]
    fn handles_compare_by_value() {
        let a = ObjectHandle::new(7);
        let b = ObjectHandle::new(7);
        let c = ObjectHandle::new(8);
        let t = Fixed;
        assert!(t.objects_identical(a, b));
        assert!(!t.objects_identical(a, c));
    }
}
