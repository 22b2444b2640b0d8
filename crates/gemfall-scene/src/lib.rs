//! Gemfall Scene -- the scene-graph boundary consumed by the object pool.
//!
//! This crate defines what the pool needs from a scene graph: the
//! [`SceneGraph`](scene::SceneGraph) trait, the [`ReKey`](scene::ReKey)
//! capability for moving a live subtree to a new identifier block, and the
//! [`CleanableOnRecycle`](component::CleanableOnRecycle) capability that
//! components opt into. It also ships [`MemoryScene`](scene::MemoryScene), an
//! in-memory scene graph that implements the whole boundary.
//!
//! # Quick Start
//!
//! ```
//! use gemfall_scene::prelude::*;
//!
//! let mut scene = MemoryScene::new();
//! let template = scene.create_node("gem", None).unwrap();
//! scene.prepare_template(template, EntityType::from_name("gem"), false).unwrap();
//!
//! let holder = scene.create_scratch_parent("gems", None, None).unwrap();
//! let gem = scene.clone_template(template, holder, 1000, 5000).unwrap();
//! assert_eq!(scene.node_id(gem), Some(1000));
//!
//! scene.rekey(gem, 40, 80).unwrap();
//! assert_eq!(scene.find_by_id(40), Some(gem));
//! ```

#![deny(unsafe_code)]

pub mod component;
pub mod entity_type;
pub mod node;
pub mod scene;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by scene-graph operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SceneError {
    /// The node does not exist (stale handle or never created).
    #[error("node {node:?} does not exist (stale or never created)")]
    StaleNode {
        node: node::NodeHandle,
    },

    /// A node identifier is already worn by another node.
    #[error("node id {id} is already in use")]
    NodeIdInUse {
        id: u32,
    },

    /// A component identifier is already worn by another component.
    #[error("component id {id} is already in use")]
    ComponentIdInUse {
        id: u32,
    },

    /// Reparenting would make a node its own ancestor.
    #[error("cannot move {node:?} under its own descendant {parent:?}")]
    CyclicParent {
        node: node::NodeHandle,
        parent: node::NodeHandle,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::component::{CleanableOnRecycle, ComponentSlot, ReplicationState, SceneComponent};
    pub use crate::entity_type::{EntityType, USED_AS_PART};
    pub use crate::node::NodeHandle;
    pub use crate::scene::{MemoryScene, ReKey, SceneGraph, TemplateShape};
    pub use crate::SceneError;
}
