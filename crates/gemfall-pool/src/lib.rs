//! Gemfall Pool -- pre-built entity pools with a dual identifier namespace.
//!
//! The pool reserves disjoint blocks of node and component identifiers for
//! every pooled entity type, clones each type's template ahead of time (spread
//! over several frames), and hands instances out and back without touching
//! the scene graph's allocator. Instances normally wear *local* identifiers;
//! on request an instance is re-keyed into the *replicated* namespace so the
//! same id means the same object on every peer, and re-keyed back when freed.
//!
//! # Quick Start
//!
//! ```
//! use gemfall_pool::prelude::*;
//! use gemfall_scene::prelude::*;
//!
//! let mut scene = MemoryScene::new();
//! let template = scene.create_node("gem.red", None).unwrap();
//!
//! let mut registry = TypeRegistry::new();
//! registry
//!     .register(TypeDescriptor::new("gem.red", 4).with_template(template))
//!     .unwrap();
//!
//! let mut pool = Pool::new(IdBases::default());
//! pool.reserve_ranges(&mut scene, &registry).unwrap();
//! pool.create_categories(&mut scene, &registry).unwrap();
//! while pool.advance(&mut scene, &mut FrameBudget::unlimited()).unwrap() != Advance::Done {}
//!
//! let ty = EntityType::from_name("gem.red");
//! let gem = pool.allocate(&mut scene, ty, IdRequest::Local, None).unwrap();
//! assert!(scene.is_enabled(gem.node));
//! pool.free(&mut scene, gem.node).unwrap();
//! ```

#![deny(unsafe_code)]

pub mod budget;
pub mod category;
pub mod config;
pub mod descriptor;
pub mod dump;
pub mod pool;
pub mod range;

use gemfall_scene::entity_type::EntityType;
use gemfall_scene::node::NodeHandle;
use gemfall_scene::SceneError;

use crate::pool::PoolStage;
use crate::range::IdentifierRange;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by pool setup, allocation and remapping.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// No category exists for the requested type.
    #[error("no pool category for entity type {entity_type}")]
    UnknownType { entity_type: EntityType },

    /// Every instance of the category is in use.
    #[error("pool '{name}' is exhausted ({total} instances, all in use)")]
    PoolExhausted { name: String, total: u32 },

    /// A replicated id was requested for a type without a replicated range.
    #[error("pool '{name}' has no replicated identifier range")]
    ReplicationUnsupported { name: String },

    /// An explicit replicated id is outside the range or not slot-aligned.
    #[error("id {id} is not a slot of pool '{name}' replicated range {range}")]
    IdOutOfRange {
        name: String,
        id: u32,
        range: IdentifierRange,
    },

    /// An explicit replicated id is already worn by another instance.
    #[error("replicated id {id} of pool '{name}' is already in use")]
    ReplicatedIdInUse { name: String, id: u32 },

    /// Every replicated slot of the category is taken.
    #[error("pool '{name}' has no free replicated slot")]
    ReplicatedRangeFull { name: String },

    /// The node is not an instance of any pool category.
    #[error("node {node} is not a pooled instance")]
    UnknownNode { node: NodeHandle },

    /// The instance is free; only in-use instances can be remapped.
    #[error("instance {node} is not in use")]
    NotInUse { node: NodeHandle },

    /// A resize asked for more instances than were reserved.
    #[error("pool '{name}' cannot grow to {requested}, capacity is {capacity}")]
    CapacityExceeded {
        name: String,
        requested: u32,
        capacity: u32,
    },

    /// The reservation pass ran past the end of the u32 identifier space.
    #[error("identifier space exhausted while reserving for '{name}'")]
    IdSpaceExhausted { name: String },

    /// The local and replicated spans of one kind overlap.
    #[error("{kind} namespaces collide: local {local} overlaps replicated {replicated}")]
    NamespaceCollision {
        kind: &'static str,
        local: IdentifierRange,
        replicated: IdentifierRange,
    },

    /// A host node or component already wears an id inside a span the pool
    /// is about to reserve.
    #[error("{kind} id {id} inside reserved span {span} is already worn by the host")]
    ReservedIdInUse {
        kind: &'static str,
        id: u32,
        span: IdentifierRange,
    },

    /// A replicated id was requested while the pool hands out local ids
    /// only. The instance was served with its local id.
    #[error("pool '{name}' is in local create mode, replicated id not assigned")]
    LocalCreateMode { name: String },

    /// The operation is not valid at the pool's current stage.
    #[error("{operation} is not valid while the pool is {stage:?}")]
    InvalidStage {
        operation: &'static str,
        stage: PoolStage,
    },

    /// Two descriptors share a name (or a type tag).
    #[error("entity type '{name}' collides with already registered '{existing}'")]
    DuplicateType { name: String, existing: String },

    /// The descriptor document could not be parsed.
    #[error("invalid type descriptors: {details}")]
    InvalidDescriptors { details: String },

    /// The scene graph refused an operation.
    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Errors produced by [`Pool::free`](pool::Pool::free).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FreeError {
    /// The node carries no type tag, or no category matches it. The node is
    /// left in the scene.
    #[error("node {node} has no pooled entity type")]
    UnknownType { node: NodeHandle },

    /// The node has a pooled type but is not one of the category's instances.
    #[error("node {node} is not an instance of pool '{name}'")]
    ForeignInstance { node: NodeHandle, name: String },

    /// The instance is already on the free list.
    #[error("instance {node} of pool '{name}' is already free")]
    DoubleFree { node: NodeHandle, name: String },

    /// The instance wears a replicated id with no recorded local ids. The
    /// node has been removed from the scene.
    #[error("instance {node} of pool '{name}' wears replicated id {id} with no local mapping")]
    OrphanedReplicatedId {
        node: NodeHandle,
        id: u32,
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::budget::{Budget, FrameBudget, WorkBudget};
    pub use crate::category::{
        Advance, Allocation, CategoryRanges, IdRequest, PoolCategory, Population, RestoreReport,
        SlotState,
    };
    pub use crate::config::IdBases;
    pub use crate::descriptor::{TypeDescriptor, TypeRegistry};
    pub use crate::dump::{CategoryDump, PoolDump};
    pub use crate::pool::{CreateMode, Pool, PoolStage, ReservedIds};
    pub use crate::range::{IdentifierRange, LocalIds};
    pub use crate::{FreeError, PoolError};
}
