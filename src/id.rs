//! Identifiers
//!
//! Buckets, organizations, shard groups and shards are all named by an
//! [`Id`]: a non-zero `u64` whose canonical form is 16 lowercase hex
//! characters. The fixed width keeps encoded keys ordered the same way the
//! numbers are, which the shard-group index relies on for prefix scans.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};

/// Length of an encoded identifier in bytes
pub const ID_LENGTH: usize = 16;

/// Identifiers `1..RESERVED_IDS` are kept for system objects
pub const RESERVED_IDS: u64 = 1000;

/// Attempts made by [`next_id`] before giving up
pub const MAX_ID_GENERATION_ATTEMPTS: usize = 100;

/// A catalog identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Id(u64);

impl Id {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Zero is never a valid identifier
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Encode as 16 hex bytes
    pub fn encode(self) -> Result<[u8; ID_LENGTH]> {
        if !self.is_valid() {
            return Err(Error::Invalid("id must not be zero".to_string()));
        }

        let mut out = [0u8; ID_LENGTH];
        out.copy_from_slice(format!("{:016x}", self.0).as_bytes());
        Ok(out)
    }

    /// Decode from 16 hex bytes
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ID_LENGTH {
            return Err(Error::Invalid(format!(
                "id must be {} bytes, got {}",
                ID_LENGTH,
                bytes.len()
            )));
        }

        let text = std::str::from_utf8(bytes)
            .map_err(|_| Error::Invalid("id is not valid utf-8".to_string()))?;
        let value = u64::from_str_radix(text, 16)
            .map_err(|e| Error::Invalid(format!("id {:?}: {}", text, e)))?;

        let id = Id(value);
        if !id.is_valid() {
            return Err(Error::Invalid("id must not be zero".to_string()));
        }
        Ok(id)
    }
}

impl std::fmt::Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl std::str::FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Id::decode(s.as_bytes())
    }
}

impl From<u64> for Id {
    fn from(value: u64) -> Self {
        Id(value)
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Source of fresh identifiers
///
/// Implementations must never hand out the same value twice within the
/// lifetime of the process.
pub trait IdGenerator: Send + Sync {
    fn id(&self) -> Id;
}

/// Time-ordered generator: milliseconds in the high bits, a node id and a
/// sequence in the low 22 bits.
#[derive(Debug)]
pub struct SnowflakeGenerator {
    node: u64,
    last: AtomicU64,
}

const NODE_BITS: u32 = 10;
const SEQUENCE_BITS: u32 = 12;

impl SnowflakeGenerator {
    pub fn new(node: u16) -> Self {
        Self {
            node: u64::from(node) & ((1 << NODE_BITS) - 1),
            last: AtomicU64::new(0),
        }
    }

    fn candidate(&self) -> u64 {
        let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
        (millis << (NODE_BITS + SEQUENCE_BITS)) | (self.node << SEQUENCE_BITS)
    }
}

impl Default for SnowflakeGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl IdGenerator for SnowflakeGenerator {
    fn id(&self) -> Id {
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = self.candidate().max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return Id(next),
                Err(actual) => last = actual,
            }
        }
    }
}

/// Draw an id from `generator`, skipping zero and the reserved range
pub fn next_id(generator: &dyn IdGenerator) -> Result<Id> {
    for _ in 0..MAX_ID_GENERATION_ATTEMPTS {
        let id = generator.id();
        if id.get() >= RESERVED_IDS {
            return Ok(id);
        }
    }
    Err(Error::Internal("unable to generate valid id".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    struct Sequence(AtomicU64);

    impl IdGenerator for Sequence {
        fn id(&self) -> Id {
            Id(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[test]
    fn test_encode_decode() {
        let id = Id::new(0xdead_beef);
        let encoded = id.encode().unwrap();
        assert_eq!(&encoded, b"00000000deadbeef");
        assert_eq!(Id::decode(&encoded).unwrap(), id);
    }

    #[test]
    fn test_encoding_preserves_order() {
        let a = Id::new(0xff).encode().unwrap();
        let b = Id::new(0x100).encode().unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_invalid_ids() {
        assert!(Id::new(0).encode().is_err());
        assert!(Id::decode(b"0000000000000000").is_err());
        assert!(Id::decode(b"abc").is_err());
        assert!(Id::decode(b"zzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_serde_as_hex_string() {
        let json = serde_json::to_string(&Id::new(42)).unwrap();
        assert_eq!(json, "\"000000000000002a\"");
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Id::new(42));
    }

    #[test]
    fn test_snowflake_unique_across_threads() {
        let generator = Arc::new(SnowflakeGenerator::new(3));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                std::thread::spawn(move || (0..1000).map(|_| generator.id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(id.get() >= RESERVED_IDS);
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }
        assert_eq!(seen.len(), 4000);
    }

    #[test]
    fn test_next_id_skips_reserved_range() {
        let generator = Sequence(AtomicU64::new(950));
        let id = next_id(&generator).unwrap();
        assert_eq!(id.get(), RESERVED_IDS);
    }

    #[test]
    fn test_next_id_gives_up() {
        let generator = Sequence(AtomicU64::new(0));
        let err = next_id(&generator).unwrap_err();
        assert_eq!(err.code(), crate::error::ErrorCode::Internal);
    }
}
