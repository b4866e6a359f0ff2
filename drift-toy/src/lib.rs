// A minimal embedding used to exercise `drift-engine` end to end: an I/O
// sink with a `print` method, and a mutable named string with `append` and
// `get` methods. Grounded on the original's `fake_interpreter` /
// `mock_local_object` test doubles (peer/*_test.cc) — this plays the same
// role here that those mocks play in the original test suite, and backs
// the `drift` binary's `--program toy-hello` / `--program toy-counter`
// demo modes.

use tracing::info;

use drift_embed::{Interpreter, LocalObject, ObjectHandle, Thread, VersionedLocalObject};
use drift_wire::CommittedValue;

/// Tag byte prefixed to a toy object's serialized state so `ToyInterpreter`
/// can tell which concrete type an `OBJECT_CREATION` event is seeding.
#[derive(Clone, Copy)]
#[repr(u8)]
enum Tag {
    Sink = 0,
    MutableString = 1,
}

/// An object whose only method, `print`, appends its single string
/// parameter to an in-memory transcript (and logs it, standing in for a
/// real I/O sink). Carries no state worth replaying faithfully beyond "the
/// sequence of printed lines", which is exactly what its committed events
/// already capture, so `serialize` is trivially empty.
#[derive(Clone, Default)]
pub struct Sink {
    transcript: Vec<String>,
}

impl Sink {
    pub fn new() -> Self {
        Sink::default()
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }
}

impl LocalObject for Sink {
    fn invoke_method(
        &mut self,
        _thread: &mut dyn Thread,
        _self_handle: ObjectHandle,
        method_name: &str,
        parameters: &[CommittedValue],
    ) -> CommittedValue {
        match method_name {
            "print" => {
                let text = match parameters.first() {
                    Some(CommittedValue::String(s)) => s.clone(),
                    _ => String::new(),
                };
                info!(target: "drift-toy", "{text}");
                self.transcript.push(text);
                CommittedValue::Empty
            }
            other => {
                drift_base::invariant::fail(format!("Sink has no method named {other}"))
            }
        }
    }

    fn serialize(&self) -> Vec<u8> {
        vec![Tag::Sink as u8]
    }

    fn dump(&self) -> String {
        format!("<sink, {} lines printed>", self.transcript.len())
    }
}

impl VersionedLocalObject for Sink {
    fn clone_versioned(&self) -> Box<dyn VersionedLocalObject> {
        Box::new(self.clone())
    }
}

/// A named, mutable string: `append(text)` concatenates, `get()` returns
/// the current value. Stands in for the "counter" demo in the toy binary
/// (a string is appended to repeatedly rather than an integer incremented,
/// since the wire protocol has no integer-increment primitive of its own —
/// every mutation is just a method call and its recorded effect).
#[derive(Clone, Default)]
pub struct MutableString {
    value: String,
}

impl MutableString {
    pub fn new(value: impl Into<String>) -> Self {
        MutableString { value: value.into() }
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

impl LocalObject for MutableString {
    fn invoke_method(
        &mut self,
        _thread: &mut dyn Thread,
        _self_handle: ObjectHandle,
        method_name: &str,
        parameters: &[CommittedValue],
    ) -> CommittedValue {
        match method_name {
            "append" => {
                if let Some(CommittedValue::String(s)) = parameters.first() {
                    self.value.push_str(s);
                }
                CommittedValue::Empty
            }
            "get" => CommittedValue::String(self.value.clone()),
            other => {
                drift_base::invariant::fail(format!("MutableString has no method named {other}"))
            }
        }
    }

    fn serialize(&self) -> Vec<u8> {
        let mut bytes = vec![Tag::MutableString as u8];
        bytes.extend_from_slice(self.value.as_bytes());
        bytes
    }

    fn dump(&self) -> String {
        format!("<mutable string: {:?}>", self.value)
    }
}

impl VersionedLocalObject for MutableString {
    fn clone_versioned(&self) -> Box<dyn VersionedLocalObject> {
        Box::new(self.clone())
    }
}

/// Reconstructs whichever toy type an `OBJECT_CREATION` event's tag byte
/// names. Stateless: every toy program in this crate shares one instance.
pub struct ToyInterpreter;

impl Interpreter for ToyInterpreter {
    fn deserialize_object(&self, bytes: &[u8]) -> Box<dyn VersionedLocalObject> {
        match bytes.first() {
            Some(&tag) if tag == Tag::Sink as u8 => Box::new(Sink::new()),
            Some(&tag) if tag == Tag::MutableString as u8 => {
                let value = String::from_utf8_lossy(&bytes[1..]).into_owned();
                Box::new(MutableString::new(value))
            }
            _ => drift_base::invariant::fail("unrecognized toy object tag".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused_imports)]
    use test_log::test;

    struct NoCallbacks;
    impl Thread for NoCallbacks {
        fn begin_transaction(&mut self) -> bool {
            true
        }
        fn end_transaction(&mut self) -> bool {
            true
        }
        fn create_versioned_object(&mut self, _initial: Box<dyn VersionedLocalObject>, _name: Option<&str>) -> ObjectHandle {
            ObjectHandle::new(0)
        }
        fn create_unversioned_object(&mut self, _initial: Box<dyn LocalObject>, _name: Option<&str>) -> ObjectHandle {
            ObjectHandle::new(0)
        }
        fn call_method(&mut self, _handle: ObjectHandle, _method_name: &str, _parameters: &[CommittedValue]) -> (bool, CommittedValue) {
            (true, CommittedValue::Empty)
        }
        fn objects_identical(&self, a: ObjectHandle, b: ObjectHandle) -> bool {
            a == b
        }
    }

    #[test]
    fn sink_print_appends_to_transcript() {
        let mut sink = Sink::new();
        sink.invoke_method(&mut NoCallbacks, ObjectHandle::new(1), "print", &[CommittedValue::String("hi".to_string())]);
        assert_eq!(sink.transcript(), &["hi".to_string()]);
    }

    #[test]
    fn mutable_string_append_and_get_round_trip() {
        let mut s = MutableString::new("a");
        s.invoke_method(&mut NoCallbacks, ObjectHandle::new(1), "append", &[CommittedValue::String("bc".to_string())]);
        let got = s.invoke_method(&mut NoCallbacks, ObjectHandle::new(1), "get", &[]);
        assert_eq!(got, CommittedValue::String("abc".to_string()));
    }

    #[test]
    fn interpreter_round_trips_serialized_state() {
        let interp = ToyInterpreter;
        let s = MutableString::new("hello");
        let bytes = s.serialize();
        let restored = interp.deserialize_object(&bytes);
        assert_eq!(restored.serialize(), bytes);
    }

    #[test]
    #[should_panic(expected = "no method named")]
    fn unknown_method_fails_loudly() {
        let mut sink = Sink::new();
        sink.invoke_method(&mut NoCallbacks, ObjectHandle::new(1), "nonexistent", &[]);
    }
}
