use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a value type or resource type.
///
/// Tags are usually derived from the type's name so that independently
/// registered schemas agree on them without coordination.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(u64);

impl TypeTag {
    /// Create from an explicit numeric tag.
    pub const fn new(tag: u64) -> Self {
        Self(tag)
    }

    /// Derive a tag from a type name (domain-separated BLAKE3, first 8 bytes).
    pub fn of_name(name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"strata-type-v1:");
        hasher.update(name.as_bytes());
        let hash = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        Self(u64::from_le_bytes(head))
    }

    /// The raw numeric tag.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({:016x})", self.0)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
