//! Node handles.
//!
//! A [`NodeHandle`] is how the host and the pool hold on to a scene node. It
//! is unrelated to the node's wire identifier: the pool re-keys a pooled
//! instance between the local and replicated namespaces many times over its
//! life, and the handle stays the same throughout.
//!
//! The handle names a storage slot of the owning scene plus the slot's
//! generation at the time the node was created. Removing a node bumps the
//! generation, so a handle kept past removal no longer resolves, even after
//! the slot has been reused for another node.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable reference to a scene node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeHandle {
    slot: u32,
    generation: u32,
}

impl NodeHandle {
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Storage slot inside the owning scene.
    pub const fn slot(self) -> u32 {
        self.slot
    }

    pub const fn generation(self) -> u32 {
        self.generation
    }

    /// The handle the next node stored in the same slot will get.
    pub(crate) const fn successor(self) -> Self {
        Self {
            slot: self.slot,
            generation: self.generation.wrapping_add(1),
        }
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHandle({self})")
    }
}

impl fmt::Display for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.slot, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successor_keeps_slot_and_bumps_generation() {
        let h = NodeHandle::new(9, 3);
        let next = h.successor();
        assert_eq!(next.slot(), 9);
        assert_eq!(next.generation(), 4);
        assert_ne!(h, next);
        assert_eq!(NodeHandle::new(0, u32::MAX).successor().generation(), 0);
    }

    #[test]
    fn display_names_slot_and_generation() {
        let h = NodeHandle::new(9, 3);
        assert_eq!(format!("{h}"), "#9.3");
        assert_eq!(format!("{h:?}"), "NodeHandle(#9.3)");
    }
}
