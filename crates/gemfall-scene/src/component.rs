//! Scene components and the recycle capability.
//!
//! Components hang off scene nodes as boxed trait objects. A component that
//! keeps per-use state (animation triggers, timers, hit counters) opts into
//! [`CleanableOnRecycle`] so the pool can reset it before handing the node to
//! its next owner. The pool calls the hook on every component of a freed
//! node without inspecting concrete types.

use std::any::Any;
use std::fmt;

// ---------------------------------------------------------------------------
// CleanableOnRecycle
// ---------------------------------------------------------------------------

/// Capability for components that hold state which must not survive a trip
/// through the pool.
///
/// The default implementation does nothing, so stateless components only
/// need an empty `impl`.
pub trait CleanableOnRecycle {
    /// Drop any state picked up while the owning node was in use.
    fn clean_on_recycle(&mut self) {}
}

// ---------------------------------------------------------------------------
// SceneComponent
// ---------------------------------------------------------------------------

/// A component attached to a scene node.
pub trait SceneComponent: CleanableOnRecycle + fmt::Debug + Send + Sync + 'static {
    /// Short type name, used in logs and dumps.
    fn kind(&self) -> &'static str;

    /// Clone into a new box. Template cloning goes through this.
    fn box_clone(&self) -> Box<dyn SceneComponent>;

    /// Downcast support for tests and gameplay code.
    fn as_any(&self) -> &dyn Any;

    /// Mutable downcast support.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn SceneComponent> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// A component together with the identifier it currently wears.
#[derive(Debug, Clone)]
pub struct ComponentSlot {
    /// Wire identifier of the component.
    pub id: u32,
    /// The component itself.
    pub component: Box<dyn SceneComponent>,
}

// ---------------------------------------------------------------------------
// ReplicationState
// ---------------------------------------------------------------------------

/// Bookkeeping component attached to templates of replicated-capable types.
///
/// It is created local and with change tracking off. It only counts
/// replication traffic while its node wears a replicated identifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplicationState {
    /// Whether attribute changes are forwarded to peers.
    pub change_mode_enabled: bool,
    /// Number of state updates sent since the node was last recycled.
    pub updates_sent: u64,
}

impl ReplicationState {
    /// Kind string reported by [`SceneComponent::kind`].
    pub const KIND: &'static str = "ReplicationState";
}

impl CleanableOnRecycle for ReplicationState {
    fn clean_on_recycle(&mut self) {
        self.updates_sent = 0;
    }
}

impl SceneComponent for ReplicationState {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn box_clone(&self) -> Box<dyn SceneComponent> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
