//! Entity type tags.
//!
//! Every pooled node carries an [`EntityType`] tag naming the pool category
//! it belongs to. The tag is a 32-bit value derived from the type name, so a
//! node can be routed back to its category without a string lookup on the
//! free path.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tag set by gameplay code on a pooled node that is currently a sub-part of
/// a live composite object. Selective restores skip such nodes.
pub const USED_AS_PART: &str = "UsedAsPart";

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// Stable identifier of an entity type, derived from its name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityType(u32);

impl EntityType {
    /// Derive the tag for a type name.
    ///
    /// The first four bytes of the BLAKE3 digest of `name`, little endian.
    pub fn from_name(name: &str) -> Self {
        let digest = blake3::hash(name.as_bytes());
        let bytes = digest.as_bytes();
        Self(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Wrap a raw tag value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw tag value.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityType({:#010x})", self.0)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_tag() {
        assert_eq!(EntityType::from_name("gem.red"), EntityType::from_name("gem.red"));
    }

    #[test]
    fn different_names_different_tags() {
        assert_ne!(EntityType::from_name("gem.red"), EntityType::from_name("gem.blue"));
    }

    #[test]
    fn raw_roundtrip() {
        let t = EntityType::from_name("bomb");
        assert_eq!(EntityType::from_raw(t.raw()), t);
    }

    #[test]
    fn serialization_roundtrip() {
        let t = EntityType::from_name("spark");
        let json = serde_json::to_string(&t).unwrap();
        let back: EntityType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
