// Object IDs are 128-bit values, represented as two u64 halves so they need
// no extra bignum dependency. Two generators exist: a process-unique
// "random" generator for anonymous objects, and a stable hash of a
// namespace + name for objects that must converge across peers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rapidhash::rapidhash;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct ObjectId {
    pub hi: u64,
    pub lo: u64,
}

impl ObjectId {
    pub const fn new(hi: u64, lo: u64) -> Self {
        ObjectId { hi, lo }
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

// The namespace UUID for named objects, from §6.4:
// ab2d0b40-fe62-11e2-bf8b-000c2949fc67
pub const NAMED_OBJECT_NAMESPACE: [u8; 16] = [
    0xab, 0x2d, 0x0b, 0x40, 0xfe, 0x62, 0x11, 0xe2, 0xbf, 0x8b, 0x00, 0x0c, 0x29, 0x49, 0xfc, 0x67,
];

/// Derives the Object ID for a named object: any peer naming the same
/// string under the same namespace produces the same ID.
pub fn named_object_id(name: &str) -> ObjectId {
    let mut buf = Vec::with_capacity(16 + name.len());
    buf.extend_from_slice(&NAMED_OBJECT_NAMESPACE);
    buf.extend_from_slice(name.as_bytes());
    let hi = rapidhash(&buf);
    buf.push(0); // perturb the input so the second half isn't a trivial function of the first
    let lo = rapidhash(&buf);
    ObjectId::new(hi, lo)
}

/// Generates Object IDs for anonymous objects. The workspace has no CSPRNG
/// dependency, so uniqueness comes from a monotonic per-process counter
/// mixed with wall-clock time and a per-generator salt, rather than from
/// cryptographic randomness; that's sufficient since the only requirement
/// is "two peers never mint the same anonymous Object ID".
pub struct ObjectIdGenerator {
    salt: u64,
    counter: AtomicU64,
}

impl ObjectIdGenerator {
    pub fn new(salt: u64) -> Self {
        ObjectIdGenerator {
            salt,
            counter: AtomicU64::new(0),
        }
    }

    pub fn generate(&self) -> ObjectId {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        let now_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);

        let mut hi_buf = Vec::with_capacity(24);
        hi_buf.extend_from_slice(&self.salt.to_le_bytes());
        hi_buf.extend_from_slice(&now_nanos.to_le_bytes());
        hi_buf.extend_from_slice(&count.to_le_bytes());
        let hi = rapidhash(&hi_buf);

        let mut lo_buf = hi_buf;
        lo_buf.push(0xff);
        let lo = rapidhash(&lo_buf);

        ObjectId::new(hi, lo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[allow(unused_imports)]
    use test_log::test;

    #[test]
    fn named_ids_converge() {
        assert_eq!(named_object_id("athos"), named_object_id("athos"));
        assert_ne!(named_object_id("athos"), named_object_id("porthos"));
    }

    #[test]
    fn random_ids_differ_across_calls() {
        let gen = ObjectIdGenerator::new(42);
        let a = gen.generate();
        let b = gen.generate();
        assert_ne!(a, b);
    }

    #[test]
    fn random_ids_differ_across_generators_with_different_salt() {
        let a = ObjectIdGenerator::new(1).generate();
        let b = ObjectIdGenerator::new(2).generate();
        assert_ne!(a, b);
    }
}
