//! The object pool: identifier reservation, category setup, warm-up and the
//! allocate/free entry points.
//!
//! A [`Pool`] goes through three setup stages before it is fully usable:
//!
//! 1. [`reserve_ranges`](Pool::reserve_ranges) walks the registry and packs
//!    identifier blocks for every pooled type from the four [`IdBases`].
//! 2. [`create_categories`](Pool::create_categories) builds one
//!    [`PoolCategory`] per reservation and queues it for population.
//! 3. [`advance`](Pool::advance) is called once per frame with a [`Budget`]
//!    until it reports [`Advance::Done`].
//!
//! Allocation works as soon as categories exist; it only ever hands out
//! instances that population has already produced.

use std::collections::{HashMap, VecDeque};

use gemfall_scene::entity_type::EntityType;
use gemfall_scene::node::NodeHandle;
use gemfall_scene::scene::{SceneGraph, TemplateShape};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::budget::Budget;
use crate::category::{Advance, Allocation, CategoryRanges, IdRequest, PoolCategory, RestoreReport};
use crate::config::IdBases;
use crate::descriptor::TypeRegistry;
use crate::dump::PoolDump;
use crate::range::{IdAccumulator, IdentifierRange};
use crate::{FreeError, PoolError};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Setup stage of a [`Pool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolStage {
    Empty,
    Reserved,
    /// Categories exist; some may still be populating.
    Created,
    /// Every category is populated.
    Ready,
}

/// Whether replicated requests are honoured.
///
/// A peer that does not own the match runs in `Local` mode: it receives
/// replicated objects from the owner and builds everything else locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CreateMode {
    #[default]
    Local,
    Replicated,
}

/// Pool-wide identifier spans, handed to the host allocator so it never
/// issues an id the pool owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservedIds {
    pub local_nodes: IdentifierRange,
    pub local_components: IdentifierRange,
    pub replicated_nodes: IdentifierRange,
    pub replicated_components: IdentifierRange,
}

#[derive(Debug, Clone)]
struct Reservation {
    entity_type: EntityType,
    name: String,
    quantity: u32,
    template: NodeHandle,
    shape: TemplateShape,
    ranges: CategoryRanges,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Pre-built instances for every pooled entity type.
#[derive(Debug)]
pub struct Pool {
    bases: IdBases,
    stage: PoolStage,
    create_mode: CreateMode,
    root: Option<NodeHandle>,
    reserved: Option<ReservedIds>,
    reservations: Vec<Reservation>,
    categories: HashMap<EntityType, PoolCategory>,
    /// Category types in registration order.
    order: Vec<EntityType>,
    /// Categories still populating; the front one is advanced.
    pending: VecDeque<EntityType>,
}

impl Pool {
    pub fn new(bases: IdBases) -> Self {
        Self {
            bases,
            stage: PoolStage::Empty,
            create_mode: CreateMode::default(),
            root: None,
            reserved: None,
            reservations: Vec::new(),
            categories: HashMap::new(),
            order: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn bases(&self) -> IdBases {
        self.bases
    }

    /// Replace the identifier bases. Only valid before
    /// [`reserve_ranges`](Self::reserve_ranges).
    pub fn set_bases(&mut self, bases: IdBases) -> Result<(), PoolError> {
        self.expect_stage("set_bases", PoolStage::Empty)?;
        if bases != self.bases {
            info!(
                replicated_node = bases.replicated_node,
                replicated_component = bases.replicated_component,
                local_node = bases.local_node,
                local_component = bases.local_component,
                "object pool identifier bases changed"
            );
        }
        self.bases = bases;
        Ok(())
    }

    pub fn stage(&self) -> PoolStage {
        self.stage
    }

    /// Whether every category has finished populating.
    pub fn is_ready(&self) -> bool {
        self.stage == PoolStage::Ready
    }

    /// Spans claimed by the last reservation pass.
    pub fn reserved(&self) -> Option<ReservedIds> {
        self.reserved
    }

    /// The scratch node every category parent hangs under.
    pub fn root(&self) -> Option<NodeHandle> {
        self.root
    }

    pub fn create_mode(&self) -> CreateMode {
        self.create_mode
    }

    pub fn set_create_mode(&mut self, mode: CreateMode) {
        if mode != self.create_mode {
            info!(mode = ?mode, "object pool create mode changed");
        }
        self.create_mode = mode;
    }

    /// Number of categories still waiting for population.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn category(&self, entity_type: EntityType) -> Option<&PoolCategory> {
        self.categories.get(&entity_type)
    }

    pub fn category_by_name(&self, name: &str) -> Option<&PoolCategory> {
        self.category(EntityType::from_name(name))
    }

    /// Categories in registration order.
    pub fn categories(&self) -> impl Iterator<Item = &PoolCategory> + '_ {
        self.order.iter().filter_map(|ty| self.categories.get(ty))
    }

    // -- setup --------------------------------------------------------------

    /// Pack identifier blocks for every pooled type and tell the host which
    /// spans the pool owns.
    ///
    /// Types with no quantity, no template or a template that does not exist
    /// are skipped. Nothing is committed when the pass fails.
    pub fn reserve_ranges<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        registry: &TypeRegistry,
    ) -> Result<ReservedIds, PoolError> {
        self.expect_stage("reserve_ranges", PoolStage::Empty)?;

        let mut local_nodes = IdAccumulator::new(self.bases.local_node);
        let mut local_components = IdAccumulator::new(self.bases.local_component);
        let mut replicated_nodes = IdAccumulator::new(self.bases.replicated_node);
        let mut replicated_components = IdAccumulator::new(self.bases.replicated_component);
        let mut reservations = Vec::new();

        for descriptor in registry.iter() {
            if descriptor.pool_quantity == 0 {
                continue;
            }
            let Some(template) = descriptor.template else {
                info!(entity_type = %descriptor.name, "no template, type not pooled");
                continue;
            };
            let Some(shape) = scene.template_shape(template) else {
                warn!(entity_type = %descriptor.name, template = %template, "template does not exist, type not pooled");
                continue;
            };

            let quantity = descriptor.pool_quantity as u64;
            let nodes = quantity * shape.nodes_per_instance() as u64;
            let components =
                quantity * shape.components_per_instance(descriptor.replicated_mode) as u64;
            let exhausted = || PoolError::IdSpaceExhausted {
                name: descriptor.name.clone(),
            };

            // The first id of the local node block belongs to the scratch parent.
            let block = local_nodes.reserve(nodes + 1).ok_or_else(exhausted)?;
            let ranges = CategoryRanges {
                scratch_node_id: block.first(),
                local_nodes: IdentifierRange::new(block.first() + 1, block.count() - 1),
                local_components: local_components.reserve(components).ok_or_else(exhausted)?,
                replicated_nodes: replicated_nodes
                    .reserve(if descriptor.replicated_mode { nodes } else { 0 })
                    .ok_or_else(exhausted)?,
                replicated_components: replicated_components
                    .reserve(if descriptor.replicated_mode { components } else { 0 })
                    .ok_or_else(exhausted)?,
            };
            debug!(
                entity_type = %descriptor.name,
                local_nodes = %ranges.local_nodes,
                replicated_nodes = %ranges.replicated_nodes,
                "identifier ranges reserved"
            );
            reservations.push(Reservation {
                entity_type: descriptor.type_id(),
                name: descriptor.name.clone(),
                quantity: descriptor.pool_quantity,
                template,
                shape,
                ranges,
            });
        }

        let reserved = ReservedIds {
            local_nodes: local_nodes.span(),
            local_components: local_components.span(),
            replicated_nodes: replicated_nodes.span(),
            replicated_components: replicated_components.span(),
        };
        if reserved.local_nodes.overlaps(reserved.replicated_nodes) {
            return Err(PoolError::NamespaceCollision {
                kind: "node",
                local: reserved.local_nodes,
                replicated: reserved.replicated_nodes,
            });
        }
        if reserved.local_components.overlaps(reserved.replicated_components) {
            return Err(PoolError::NamespaceCollision {
                kind: "component",
                local: reserved.local_components,
                replicated: reserved.replicated_components,
            });
        }

        for span in [reserved.local_nodes, reserved.replicated_nodes] {
            if let Some(id) = span.last().and_then(|last| scene.taken_node_id(span.first(), last)) {
                error!(node_id = id, span = %span, "host node inside pool span");
                return Err(PoolError::ReservedIdInUse { kind: "node", id, span });
            }
        }
        for span in [reserved.local_components, reserved.replicated_components] {
            if let Some(id) =
                span.last().and_then(|last| scene.taken_component_id(span.first(), last))
            {
                error!(component_id = id, span = %span, "host component inside pool span");
                return Err(PoolError::ReservedIdInUse { kind: "component", id, span });
            }
        }

        for span in [reserved.local_nodes, reserved.replicated_nodes] {
            if let Some(last) = span.last() {
                scene.reserve_node_ids(span.first(), last);
            }
        }
        for span in [reserved.local_components, reserved.replicated_components] {
            if let Some(last) = span.last() {
                scene.reserve_component_ids(span.first(), last);
            }
        }

        info!(
            types = reservations.len(),
            local_nodes = %reserved.local_nodes,
            local_components = %reserved.local_components,
            replicated_nodes = %reserved.replicated_nodes,
            replicated_components = %reserved.replicated_components,
            "object pool identifiers reserved"
        );
        self.reservations = reservations;
        self.reserved = Some(reserved);
        self.stage = PoolStage::Reserved;
        Ok(reserved)
    }

    /// Build a category for every reservation and queue it for population.
    /// Returns the number of categories created.
    ///
    /// A category that cannot be built is logged and left out; the others
    /// are unaffected.
    pub fn create_categories<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        registry: &TypeRegistry,
    ) -> Result<usize, PoolError> {
        self.expect_stage("create_categories", PoolStage::Reserved)?;
        let root = scene.create_scratch_parent("ObjectPool", None, None)?;
        self.root = Some(root);

        for r in std::mem::take(&mut self.reservations) {
            let Some(descriptor) = registry.get(r.entity_type) else {
                warn!(entity_type = %r.name, "type left the registry after reservation");
                continue;
            };
            let mut category =
                match PoolCategory::create(scene, descriptor, r.template, r.shape, r.ranges, root) {
                    Ok(category) => category,
                    Err(e) => {
                        error!(entity_type = %r.name, error = %e, "pool category creation failed");
                        continue;
                    }
                };
            if let Err(e) = category.resize(r.quantity) {
                error!(entity_type = %r.name, error = %e, "pool category resize failed");
            }
            self.order.push(r.entity_type);
            self.pending.push_back(r.entity_type);
            self.categories.insert(r.entity_type, category);
        }

        self.stage = PoolStage::Created;
        info!(categories = self.order.len(), "object pool categories created");
        Ok(self.order.len())
    }

    /// Populate queued categories until done or out of budget.
    pub fn advance<S, B>(&mut self, scene: &mut S, budget: &mut B) -> Result<Advance, PoolError>
    where
        S: SceneGraph + ?Sized,
        B: Budget + ?Sized,
    {
        match self.stage {
            PoolStage::Ready => return Ok(Advance::Done),
            PoolStage::Created => {}
            stage => {
                return Err(PoolError::InvalidStage {
                    operation: "advance",
                    stage,
                })
            }
        }
        while let Some(&ty) = self.pending.front() {
            if let Some(category) = self.categories.get_mut(&ty) {
                if category.advance(scene, budget) == Advance::MoreWorkRemaining {
                    return Ok(Advance::MoreWorkRemaining);
                }
            }
            self.pending.pop_front();
            if !self.pending.is_empty() && budget.exhausted() {
                return Ok(Advance::MoreWorkRemaining);
            }
        }
        self.stage = PoolStage::Ready;
        info!(categories = self.order.len(), "object pool ready");
        Ok(Advance::Done)
    }

    /// Grow a category up to its reserved capacity and queue the new
    /// instances for population.
    pub fn resize_category(&mut self, entity_type: EntityType, size: u32) -> Result<(), PoolError> {
        let category = self
            .categories
            .get_mut(&entity_type)
            .ok_or(PoolError::UnknownType { entity_type })?;
        category.resize(size)?;
        if !category.is_populated() {
            if !self.pending.contains(&entity_type) {
                self.pending.push_back(entity_type);
            }
            if self.stage == PoolStage::Ready {
                self.stage = PoolStage::Created;
            }
        }
        Ok(())
    }

    // -- allocation ---------------------------------------------------------

    /// Hand out a free instance of `entity_type`, optionally attached under
    /// `parent`. In [`CreateMode::Local`] every request is served locally.
    pub fn allocate<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        entity_type: EntityType,
        request: IdRequest,
        parent: Option<NodeHandle>,
    ) -> Result<Allocation, PoolError> {
        let Some(category) = self.categories.get_mut(&entity_type) else {
            warn!(entity_type = %entity_type, "allocation for a type without a pool");
            return Err(PoolError::UnknownType { entity_type });
        };
        if self.create_mode == CreateMode::Local && request != IdRequest::Local {
            warn!(entity_type = %category.name(), "local create mode, replicated request served locally");
            let mut allocation = category.allocate(scene, IdRequest::Local, parent)?;
            allocation.refusal = Some(PoolError::LocalCreateMode {
                name: category.name().to_owned(),
            });
            return Ok(allocation);
        }
        category.allocate(scene, request, parent)
    }

    /// Return an instance to its category.
    ///
    /// A node without a pooled type is left alone and reported as
    /// [`FreeError::UnknownType`]; the caller decides whether to destroy it.
    pub fn free<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        node: NodeHandle,
    ) -> Result<(), FreeError> {
        let category = scene
            .entity_type(node)
            .and_then(|ty| self.categories.get_mut(&ty));
        let Some(category) = category else {
            warn!(node = %node, "freed node has no pooled entity type");
            return Err(FreeError::UnknownType { node });
        };
        category.free(scene, node)
    }

    /// Move an in-use instance to a replicated id.
    pub fn change_to_replicated_id<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        node: NodeHandle,
        request: IdRequest,
    ) -> Result<u32, PoolError> {
        let category = scene
            .entity_type(node)
            .and_then(|ty| self.categories.get_mut(&ty))
            .ok_or(PoolError::UnknownNode { node })?;
        category.change_to_replicated_id(scene, node, request)
    }

    /// Free every in-use instance of every category and go back to
    /// [`CreateMode::Local`]. With `selective`, instances tagged as parts of
    /// a composite stay in use.
    pub fn restore_all<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        selective: bool,
    ) -> RestoreReport {
        let mut report = RestoreReport::default();
        for ty in &self.order {
            if let Some(category) = self.categories.get_mut(ty) {
                report += category.restore(scene, selective);
            }
        }
        self.create_mode = CreateMode::Local;
        info!(
            restored = report.restored,
            skipped = report.skipped,
            failed = report.failed,
            selective,
            "object pool restored"
        );
        report
    }

    /// Destroy every instance and scratch node and return to
    /// [`PoolStage::Empty`]. Templates belong to the host and are kept.
    pub fn stop<S: SceneGraph + ?Sized>(&mut self, scene: &mut S) {
        if let Some(root) = self.root.take() {
            scene.remove(root);
        }
        self.categories.clear();
        self.order.clear();
        self.pending.clear();
        self.reservations.clear();
        self.reserved = None;
        self.stage = PoolStage::Empty;
        self.create_mode = CreateMode::Local;
        info!("object pool stopped");
    }

    // -- introspection ------------------------------------------------------

    pub fn dump<S: SceneGraph + ?Sized>(&self, scene: &S) -> PoolDump {
        PoolDump {
            stage: self.stage,
            create_mode: self.create_mode,
            reserved: self.reserved,
            pending: self.pending.len(),
            categories: self.categories().map(|c| c.dump(scene)).collect(),
        }
    }

    /// One line per pool: `name(free/total)` for every category.
    pub fn debug_summary(&self) -> String {
        self.categories()
            .map(|c| format!("{}({}/{})", c.name(), c.free_len(), c.instances().len()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn expect_stage(&self, operation: &'static str, expected: PoolStage) -> Result<(), PoolError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(PoolError::InvalidStage {
                operation,
                stage: self.stage,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
