//! One pooled entity type: its instances, free list and replicated id map.
//!
//! A [`PoolCategory`] owns the identifier ranges reserved for its type and
//! the instances cloned into them. Instance `n` (its *slot*) always wears the
//! local block starting at `local_nodes.first + n * nodes_per_instance` while
//! it is free. When handed out with a replicated id it is re-keyed to the
//! block of some replicated slot, and the local block it came from is kept in
//! the reverse map until the instance is freed.
//!
//! # Free-list discipline
//!
//! The free list is a stack of slots. Population appends fresh instances to
//! the bottom, so a freshly populated category hands instances out in
//! ascending id order. Freed instances go on top and are reused first.

use std::collections::{HashMap, VecDeque};

use gemfall_scene::entity_type::{EntityType, USED_AS_PART};
use gemfall_scene::node::NodeHandle;
use gemfall_scene::scene::{SceneGraph, TemplateShape};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::budget::Budget;
use crate::descriptor::TypeDescriptor;
use crate::dump::CategoryDump;
use crate::range::{IdentifierRange, LocalIds, SlotCursor};
use crate::{FreeError, PoolError};

// ---------------------------------------------------------------------------
// Supporting types
// ---------------------------------------------------------------------------

/// Population progress of a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Population {
    /// Nothing requested yet.
    NotStarted,
    /// Cloning; the payload is the number of instances that exist.
    Cloning(u32),
    /// Applying deferred attributes; the payload is the next instance index.
    ApplyingAttributes(u32),
    /// Every requested instance exists (or cloning failed for good).
    Done,
}

/// Outcome of one time-sliced population step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Done,
    MoreWorkRemaining,
}

/// Which namespace an allocated instance should wear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdRequest {
    /// Keep the instance's local identifiers.
    #[default]
    Local,
    /// Move to the next free replicated slot (round-robin).
    Replicated,
    /// Move to the replicated slot starting at this node id.
    ReplicatedAs(u32),
}

/// Lifecycle state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotState {
    Free,
    InUse,
    /// The instance was destroyed to recover from an inconsistent state.
    Lost,
}

/// An instance handed out by [`PoolCategory::allocate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub node: NodeHandle,
    /// Node id the instance wears now.
    pub node_id: u32,
    /// Whether `node_id` is a replicated id.
    pub replicated: bool,
    /// Why the request was not served exactly as asked. A refused replicated
    /// request leaves the instance local; an invalid explicit id falls back
    /// to round-robin and still ends up replicated.
    pub refusal: Option<PoolError>,
}

/// Counts returned by a bulk restore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl std::ops::AddAssign for RestoreReport {
    fn add_assign(&mut self, rhs: Self) {
        self.restored += rhs.restored;
        self.skipped += rhs.skipped;
        self.failed += rhs.failed;
    }
}

/// Identifier ranges owned by one category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRanges {
    /// Id worn by the category's scratch parent.
    pub scratch_node_id: u32,
    pub local_nodes: IdentifierRange,
    pub local_components: IdentifierRange,
    pub replicated_nodes: IdentifierRange,
    pub replicated_components: IdentifierRange,
}

// ---------------------------------------------------------------------------
// PoolCategory
// ---------------------------------------------------------------------------

/// Instances of one pooled type.
#[derive(Debug)]
pub struct PoolCategory {
    entity_type: EntityType,
    name: String,
    template: NodeHandle,
    scratch_parent: NodeHandle,
    replicated: bool,
    requested: u32,
    nodes_per_instance: u32,
    components_per_instance: u32,
    ranges: CategoryRanges,
    instances: Vec<NodeHandle>,
    states: Vec<SlotState>,
    slot_by_node: HashMap<NodeHandle, u32>,
    /// Front is the top of the stack.
    free_list: VecDeque<u32>,
    /// Replicated node id -> local ids the instance wore before.
    reverse_map: HashMap<u32, LocalIds>,
    round_robin: SlotCursor,
    population: Population,
    population_failed: bool,
    /// First slot the current population round applies attributes to.
    apply_from: u32,
}

impl PoolCategory {
    /// Materialize a category: create its scratch parent under `pool_root`
    /// and prepare the template. No instance is cloned yet; call
    /// [`resize`](Self::resize) and then [`advance`](Self::advance).
    pub fn create<S: SceneGraph + ?Sized>(
        scene: &mut S,
        descriptor: &TypeDescriptor,
        template: NodeHandle,
        shape: TemplateShape,
        ranges: CategoryRanges,
        pool_root: NodeHandle,
    ) -> Result<Self, PoolError> {
        let entity_type = descriptor.type_id();
        let replicated = descriptor.replicated_mode;
        let scratch_parent = scene.create_scratch_parent(
            &descriptor.name,
            Some(pool_root),
            Some(ranges.scratch_node_id),
        )?;
        if let Err(e) = scene.prepare_template(template, entity_type, replicated) {
            scene.remove(scratch_parent);
            return Err(e.into());
        }

        let nodes_per_instance = shape.nodes_per_instance();
        let components_per_instance = shape.components_per_instance(replicated);
        let replicated_slots = if replicated {
            ranges.replicated_nodes.slots(nodes_per_instance)
        } else {
            0
        };

        info!(
            entity_type = %descriptor.name,
            local_nodes = %ranges.local_nodes,
            local_components = %ranges.local_components,
            replicated_nodes = %ranges.replicated_nodes,
            replicated_components = %ranges.replicated_components,
            "pool category created"
        );

        Ok(Self {
            entity_type,
            name: descriptor.name.clone(),
            template,
            scratch_parent,
            replicated,
            requested: 0,
            nodes_per_instance,
            components_per_instance,
            ranges,
            instances: Vec::new(),
            states: Vec::new(),
            slot_by_node: HashMap::new(),
            free_list: VecDeque::new(),
            reverse_map: HashMap::new(),
            round_robin: SlotCursor::new(replicated_slots),
            population: Population::NotStarted,
            population_failed: false,
            apply_from: 0,
        })
    }

    // -- accessors ----------------------------------------------------------

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> NodeHandle {
        self.template
    }

    pub fn scratch_parent(&self) -> NodeHandle {
        self.scratch_parent
    }

    pub fn is_replicated(&self) -> bool {
        self.replicated
    }

    pub fn ranges(&self) -> CategoryRanges {
        self.ranges
    }

    pub fn nodes_per_instance(&self) -> u32 {
        self.nodes_per_instance
    }

    pub fn components_per_instance(&self) -> u32 {
        self.components_per_instance
    }

    /// Instances requested so far.
    pub fn requested(&self) -> u32 {
        self.requested
    }

    /// Most instances the reserved local range can hold.
    pub fn capacity(&self) -> u32 {
        self.ranges.local_nodes.slots(self.nodes_per_instance)
    }

    /// Instances created, indexed by slot. Lost slots keep their stale handle.
    pub fn instances(&self) -> &[NodeHandle] {
        &self.instances
    }

    pub fn population(&self) -> Population {
        self.population
    }

    pub fn is_populated(&self) -> bool {
        self.population == Population::Done
    }

    /// Whether cloning failed and the category stays short.
    pub fn population_failed(&self) -> bool {
        self.population_failed
    }

    pub fn free_len(&self) -> u32 {
        self.free_list.len() as u32
    }

    pub fn in_use_len(&self) -> u32 {
        self.count_state(SlotState::InUse)
    }

    pub fn lost_len(&self) -> u32 {
        self.count_state(SlotState::Lost)
    }

    /// Whether `node` is one of this category's live instances.
    pub fn contains(&self, node: NodeHandle) -> bool {
        self.slot_by_node.contains_key(&node)
    }

    /// Slot state of `node`, if it is an instance.
    pub fn state_of(&self, node: NodeHandle) -> Option<SlotState> {
        self.slot_by_node
            .get(&node)
            .map(|&slot| self.states[slot as usize])
    }

    /// Free instances, top of the stack first.
    pub fn free_nodes(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.free_list
            .iter()
            .map(move |&slot| self.instances[slot as usize])
    }

    /// In-use instances in slot order.
    pub fn in_use_nodes(&self) -> impl Iterator<Item = NodeHandle> + '_ {
        self.states
            .iter()
            .zip(&self.instances)
            .filter(|(state, _)| **state == SlotState::InUse)
            .map(|(_, &node)| node)
    }

    /// Local ids recorded for the instance wearing `replicated_id`.
    pub fn local_ids_for(&self, replicated_id: u32) -> Option<LocalIds> {
        self.reverse_map.get(&replicated_id).copied()
    }

    /// Number of instances currently wearing a replicated id.
    pub fn replicated_in_use(&self) -> usize {
        self.reverse_map.len()
    }

    /// Node id the next round-robin assignment starts looking at.
    pub fn next_replicated_id(&self) -> Option<u32> {
        let slot = self.round_robin.peek()?;
        self.ranges
            .replicated_nodes
            .slot_start(slot, self.nodes_per_instance)
    }

    /// Point the round-robin cursor at the slot starting at `id`, so peers
    /// that hand out ids in lockstep agree on the next one.
    pub fn synchronize_replicated_cursor(&mut self, id: u32) -> Result<(), PoolError> {
        let slot = self.replicated_slot_of(id)?;
        self.round_robin.seek(slot);
        debug!(entity_type = %self.name, next_id = id, "replicated cursor synchronized");
        Ok(())
    }

    // -- population ---------------------------------------------------------

    /// Grow the requested instance count to `size`.
    ///
    /// Shrinking is a no-op. Growing past the reserved capacity fails. A
    /// populated category that is still short of its requested count (its
    /// cloning failed) starts cloning again, even when `size` does not grow
    /// it. Call [`advance`](Self::advance) afterwards.
    pub fn resize(&mut self, size: u32) -> Result<(), PoolError> {
        let capacity = self.capacity();
        if size > capacity {
            return Err(PoolError::CapacityExceeded {
                name: self.name.clone(),
                requested: size,
                capacity,
            });
        }
        let created = self.instances.len() as u32;
        let target = size.max(self.requested);
        let retry = self.population == Population::Done && created < target;
        if target == self.requested && !retry {
            debug!(entity_type = %self.name, size, requested = self.requested, "resize ignored");
            return Ok(());
        }
        if retry && target == self.requested {
            info!(entity_type = %self.name, created, requested = target, "retrying short population");
        }

        self.requested = target;
        self.population_failed = false;
        match self.population {
            // The running clone loop picks the new target up.
            Population::Cloning(_) => {}
            Population::ApplyingAttributes(next) => {
                self.apply_from = next;
                self.population = Population::Cloning(created);
            }
            Population::NotStarted | Population::Done => {
                self.apply_from = created;
                self.population = Population::Cloning(created);
            }
        }
        Ok(())
    }

    /// Run population until it completes or `budget` runs out.
    ///
    /// The budget is consulted after each clone and after each attribute
    /// application, never before the first unit of a call.
    pub fn advance<S, B>(&mut self, scene: &mut S, budget: &mut B) -> Advance
    where
        S: SceneGraph + ?Sized,
        B: Budget + ?Sized,
    {
        loop {
            match self.population {
                Population::NotStarted => {
                    if self.requested == 0 {
                        return Advance::Done;
                    }
                    self.population = Population::Cloning(self.instances.len() as u32);
                }
                Population::Cloning(_) => {
                    if self.clone_instances(scene, budget) == Advance::MoreWorkRemaining {
                        return Advance::MoreWorkRemaining;
                    }
                    self.population = Population::ApplyingAttributes(self.apply_from);
                }
                Population::ApplyingAttributes(next) => {
                    let mut next = next as usize;
                    while next < self.instances.len() {
                        if self.states[next] != SlotState::Lost {
                            scene.apply_attributes(self.instances[next]);
                        }
                        next += 1;
                        if next < self.instances.len() && budget.exhausted() {
                            self.population = Population::ApplyingAttributes(next as u32);
                            debug!(entity_type = %self.name, applied = next, "population yielded");
                            return Advance::MoreWorkRemaining;
                        }
                    }
                    self.population = Population::Done;
                    info!(
                        entity_type = %self.name,
                        instances = self.instances.len(),
                        requested = self.requested,
                        failed = self.population_failed,
                        "pool category populated"
                    );
                }
                Population::Done => return Advance::Done,
            }
        }
    }

    fn clone_instances<S, B>(&mut self, scene: &mut S, budget: &mut B) -> Advance
    where
        S: SceneGraph + ?Sized,
        B: Budget + ?Sized,
    {
        while (self.instances.len() as u32) < self.requested {
            let slot = self.instances.len() as u32;
            let ids = self.local_ids(slot);
            let Some(node) =
                scene.clone_template(self.template, self.scratch_parent, ids.node_id, ids.component_base)
            else {
                error!(
                    entity_type = %self.name,
                    node_id = ids.node_id,
                    created = slot,
                    requested = self.requested,
                    "template clone failed, category stays short"
                );
                self.population_failed = true;
                return Advance::Done;
            };
            scene.set_enabled(node, false);
            self.instances.push(node);
            self.states.push(SlotState::Free);
            self.slot_by_node.insert(node, slot);
            self.free_list.push_back(slot);

            let created = slot + 1;
            self.population = Population::Cloning(created);
            if created < self.requested && budget.exhausted() {
                debug!(entity_type = %self.name, created, "population yielded");
                return Advance::MoreWorkRemaining;
            }
        }
        Advance::Done
    }

    // -- allocation ---------------------------------------------------------

    /// Hand out the instance on top of the free list.
    ///
    /// A replicated request that cannot be served leaves the instance local
    /// and records the reason in [`Allocation::refusal`].
    pub fn allocate<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        request: IdRequest,
        parent: Option<NodeHandle>,
    ) -> Result<Allocation, PoolError> {
        let Some(slot) = self.free_list.pop_front() else {
            warn!(entity_type = %self.name, total = self.instances.len(), "pool exhausted");
            return Err(PoolError::PoolExhausted {
                name: self.name.clone(),
                total: self.instances.len() as u32,
            });
        };
        self.states[slot as usize] = SlotState::InUse;
        let node = self.instances[slot as usize];
        let local = self.local_ids(slot);

        let mut allocation = Allocation {
            node,
            node_id: local.node_id,
            replicated: false,
            refusal: None,
        };
        if request != IdRequest::Local {
            match self.move_to_replicated(scene, node, request, local) {
                Ok((id, fallback)) => {
                    allocation.node_id = id;
                    allocation.replicated = true;
                    allocation.refusal = fallback;
                }
                Err(e) => allocation.refusal = Some(e),
            }
        }

        if let Some(parent) = parent {
            if let Err(e) = scene.reparent(node, parent) {
                warn!(entity_type = %self.name, node = %node, error = %e, "could not attach instance");
            }
        }
        scene.set_enabled(node, true);
        debug!(entity_type = %self.name, node_id = allocation.node_id, "instance allocated");
        Ok(allocation)
    }

    /// Move an in-use instance to a replicated id. An instance that already
    /// wears one gives it up first.
    pub fn change_to_replicated_id<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        node: NodeHandle,
        request: IdRequest,
    ) -> Result<u32, PoolError> {
        let slot = *self
            .slot_by_node
            .get(&node)
            .ok_or(PoolError::UnknownNode { node })?;
        if self.states[slot as usize] != SlotState::InUse {
            return Err(PoolError::NotInUse { node });
        }
        let current = scene.node_id(node);
        if let (Some(current), IdRequest::ReplicatedAs(id)) = (current, request) {
            if current == id {
                warn!(entity_type = %self.name, node_id = id, "instance already wears this id");
                return Ok(id);
            }
        }

        let previous = current
            .filter(|&id| self.ranges.replicated_nodes.contains(id))
            .and_then(|id| self.reverse_map.remove(&id).map(|local| (id, local)));
        let local = previous.map_or_else(|| self.local_ids(slot), |(_, local)| local);

        let request = match request {
            IdRequest::Local => IdRequest::Replicated,
            other => other,
        };
        match self.move_to_replicated(scene, node, request, local) {
            Ok((id, fallback)) => {
                if let Some(reason) = fallback {
                    warn!(entity_type = %self.name, node_id = id, reason = %reason, "explicit id replaced");
                }
                Ok(id)
            }
            Err(e) => {
                if let Some((id, local)) = previous {
                    self.reverse_map.insert(id, local);
                }
                Err(e)
            }
        }
    }

    /// Pick a replicated slot, record the mapping and re-key the instance.
    /// Returns the new id and, when an explicit id was replaced, the reason.
    fn move_to_replicated<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        node: NodeHandle,
        request: IdRequest,
        local: LocalIds,
    ) -> Result<(u32, Option<PoolError>), PoolError> {
        if !self.replicated || self.round_robin.slots() == 0 {
            error!(entity_type = %self.name, "replicated id requested for a local-only type");
            return Err(PoolError::ReplicationUnsupported {
                name: self.name.clone(),
            });
        }

        let mut fallback = None;
        let explicit = match request {
            IdRequest::ReplicatedAs(id) => match self.explicit_slot(id) {
                Ok(slot) => Some(slot),
                Err(e) => {
                    warn!(entity_type = %self.name, node_id = id, error = %e, "falling back to round-robin");
                    fallback = Some(e);
                    None
                }
            },
            _ => None,
        };
        let slot = match explicit {
            Some(slot) => {
                self.round_robin.continue_after(slot);
                slot
            }
            None => self.next_free_replicated_slot()?,
        };

        let node_id = self.ranges.replicated_nodes.first() + slot * self.nodes_per_instance;
        let component_base =
            self.ranges.replicated_components.first() + slot * self.components_per_instance;

        self.reverse_map.insert(node_id, local);
        if let Err(e) = scene.rekey(node, node_id, component_base) {
            self.reverse_map.remove(&node_id);
            error!(entity_type = %self.name, node_id, error = %e, "re-key to replicated id failed");
            return Err(e.into());
        }
        Ok((node_id, fallback))
    }

    fn explicit_slot(&self, id: u32) -> Result<u32, PoolError> {
        let slot = self.replicated_slot_of(id)?;
        if self.reverse_map.contains_key(&id) {
            return Err(PoolError::ReplicatedIdInUse {
                name: self.name.clone(),
                id,
            });
        }
        Ok(slot)
    }

    fn replicated_slot_of(&self, id: u32) -> Result<u32, PoolError> {
        let slot = if self.replicated {
            self.ranges
                .replicated_nodes
                .slot_of(id, self.nodes_per_instance)
                .filter(|&slot| slot < self.round_robin.slots())
        } else {
            None
        };
        slot.ok_or_else(|| PoolError::IdOutOfRange {
            name: self.name.clone(),
            id,
            range: self.ranges.replicated_nodes,
        })
    }

    fn next_free_replicated_slot(&mut self) -> Result<u32, PoolError> {
        for _ in 0..self.round_robin.slots() {
            let Some(slot) = self.round_robin.take() else {
                break;
            };
            let id = self.ranges.replicated_nodes.first() + slot * self.nodes_per_instance;
            if !self.reverse_map.contains_key(&id) {
                return Ok(slot);
            }
        }
        Err(PoolError::ReplicatedRangeFull {
            name: self.name.clone(),
        })
    }

    // -- deallocation -------------------------------------------------------

    /// Return an in-use instance to the free list.
    pub fn free<S: SceneGraph + ?Sized>(
        &mut self,
        scene: &mut S,
        node: NodeHandle,
    ) -> Result<(), FreeError> {
        let Some(&slot) = self.slot_by_node.get(&node) else {
            error!(entity_type = %self.name, node = %node, "freed node is not an instance of this pool");
            if node != self.template {
                scene.remove(node);
            }
            return Err(FreeError::ForeignInstance {
                node,
                name: self.name.clone(),
            });
        };
        if self.states[slot as usize] == SlotState::Free {
            warn!(entity_type = %self.name, node = %node, "double free ignored");
            return Err(FreeError::DoubleFree {
                node,
                name: self.name.clone(),
            });
        }

        let expected = self.local_ids(slot);
        let Some(current) = scene.node_id(node) else {
            error!(entity_type = %self.name, node = %node, "instance vanished from the scene");
            self.lose(scene, slot);
            return Err(FreeError::ForeignInstance {
                node,
                name: self.name.clone(),
            });
        };
        if self.ranges.replicated_nodes.contains(current) {
            let restored = match self.reverse_map.remove(&current) {
                Some(local) => scene
                    .rekey(node, local.node_id, local.component_base)
                    .map_err(|e| e.to_string()),
                None => Err("no local ids recorded".to_owned()),
            };
            if let Err(reason) = restored {
                error!(
                    entity_type = %self.name,
                    node_id = current,
                    reason = %reason,
                    "orphaned replicated id, instance destroyed"
                );
                self.lose(scene, slot);
                return Err(FreeError::OrphanedReplicatedId {
                    node,
                    id: current,
                    name: self.name.clone(),
                });
            }
        } else if current != expected.node_id {
            error!(
                entity_type = %self.name,
                node_id = current,
                expected = expected.node_id,
                "instance wears a foreign id, instance destroyed"
            );
            self.lose(scene, slot);
            return Err(FreeError::ForeignInstance {
                node,
                name: self.name.clone(),
            });
        }

        scene.clean_dependences(node);
        scene.copy_default_attributes(self.template, node);
        scene.clear_tags(node);
        if let Err(e) = scene.reparent(node, self.scratch_parent) {
            warn!(entity_type = %self.name, node = %node, error = %e, "could not park instance");
        }
        scene.set_enabled(node, false);
        scene.apply_attributes(node);

        self.states[slot as usize] = SlotState::Free;
        self.free_list.push_front(slot);
        debug!(entity_type = %self.name, node_id = expected.node_id, "instance freed");
        Ok(())
    }

    /// Free every in-use instance in slot order, then rewind the
    /// round-robin cursor. With `selective`, instances tagged
    /// [`USED_AS_PART`] stay in use.
    pub fn restore<S: SceneGraph + ?Sized>(&mut self, scene: &mut S, selective: bool) -> RestoreReport {
        let mut report = RestoreReport::default();
        let in_use: Vec<NodeHandle> = self.in_use_nodes().collect();
        for node in in_use {
            if selective && scene.has_tag(node, USED_AS_PART) {
                report.skipped += 1;
                continue;
            }
            match self.free(scene, node) {
                Ok(()) => report.restored += 1,
                Err(_) => report.failed += 1,
            }
        }
        self.round_robin.reset();
        if report != RestoreReport::default() {
            info!(
                entity_type = %self.name,
                restored = report.restored,
                skipped = report.skipped,
                failed = report.failed,
                "pool category restored"
            );
        }
        report
    }

    // -- introspection ------------------------------------------------------

    /// Read-only snapshot of the category.
    pub fn dump<S: SceneGraph + ?Sized>(&self, scene: &S) -> CategoryDump {
        let mut free_ids = Vec::with_capacity(self.free_list.len());
        let mut anomalies = Vec::new();
        for &slot in &self.free_list {
            let node = self.instances[slot as usize];
            let expected = self.local_ids(slot).node_id;
            match scene.node_id(node) {
                Some(id) => {
                    if id != expected {
                        anomalies.push(format!("free slot {slot} wears id {id}, expected {expected}"));
                    }
                    if scene.is_enabled(node) {
                        anomalies.push(format!("free slot {slot} (id {id}) is enabled"));
                    }
                    free_ids.push(id);
                }
                None => anomalies.push(format!("free slot {slot} has no live node")),
            }
        }

        let mut replicated_to_local: Vec<(u32, u32)> = self
            .reverse_map
            .iter()
            .map(|(&replicated, local)| (replicated, local.node_id))
            .collect();
        replicated_to_local.sort_unstable();

        CategoryDump {
            name: self.name.clone(),
            entity_type: self.entity_type,
            replicated: self.replicated,
            population: self.population,
            population_failed: self.population_failed,
            requested: self.requested,
            total: self.instances.len() as u32,
            free: self.free_len(),
            in_use: self.in_use_len(),
            lost: self.lost_len(),
            nodes_per_instance: self.nodes_per_instance,
            components_per_instance: self.components_per_instance,
            ranges: self.ranges,
            next_replicated_id: self.next_replicated_id(),
            free_ids,
            replicated_to_local,
            anomalies,
        }
    }

    // -- internals ----------------------------------------------------------

    fn local_ids(&self, slot: u32) -> LocalIds {
        LocalIds {
            node_id: self.ranges.local_nodes.first() + slot * self.nodes_per_instance,
            component_base: self.ranges.local_components.first()
                + slot * self.components_per_instance,
        }
    }

    fn count_state(&self, state: SlotState) -> u32 {
        self.states.iter().filter(|&&s| s == state).count() as u32
    }

    fn lose<S: SceneGraph + ?Sized>(&mut self, scene: &mut S, slot: u32) {
        let node = self.instances[slot as usize];
        let local = self.local_ids(slot).node_id;
        self.states[slot as usize] = SlotState::Lost;
        self.slot_by_node.remove(&node);
        self.reverse_map.retain(|_, ids| ids.node_id != local);
        scene.remove(node);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{FrameBudget, WorkBudget};
    use gemfall_scene::prelude::*;

    /// Three instances of a two-node replicated template. Each instance uses
    /// two node ids and one component id (the replication state).
    fn fixture() -> (MemoryScene, PoolCategory) {
        let mut scene = MemoryScene::new();
        let template = scene.create_node("gem", None).unwrap();
        scene.create_node("shine", Some(template)).unwrap();
        let shape = scene.template_shape(template).unwrap();
        let root = scene.create_scratch_parent("ObjectPool", None, None).unwrap();

        let ranges = CategoryRanges {
            scratch_node_id: 99,
            local_nodes: IdentifierRange::new(100, 6),
            local_components: IdentifierRange::new(500, 3),
            replicated_nodes: IdentifierRange::new(10, 6),
            replicated_components: IdentifierRange::new(40, 3),
        };
        let descriptor = TypeDescriptor::new("gem", 3).replicated();
        let mut cat =
            PoolCategory::create(&mut scene, &descriptor, template, shape, ranges, root).unwrap();
        cat.resize(3).unwrap();
        (scene, cat)
    }

    fn populated() -> (MemoryScene, PoolCategory) {
        let (mut scene, mut cat) = fixture();
        assert_eq!(cat.advance(&mut scene, &mut FrameBudget::unlimited()), Advance::Done);
        (scene, cat)
    }

    #[test]
    fn create_prepares_template_and_scratch_parent() {
        let (scene, cat) = fixture();
        assert_eq!(cat.nodes_per_instance(), 2);
        assert_eq!(cat.components_per_instance(), 1);
        assert_eq!(cat.capacity(), 3);
        assert_eq!(scene.node_id(cat.scratch_parent()), Some(99));
        assert!(!scene.is_enabled(cat.scratch_parent()));
        assert!(!scene.is_enabled(cat.template()));
        assert_eq!(scene.entity_type(cat.template()), Some(EntityType::from_name("gem")));
        assert_eq!(cat.population(), Population::Cloning(0));
    }

    #[test]
    fn population_with_zero_budget_makes_steady_progress() {
        let (mut scene, mut cat) = fixture();
        let mut calls = 0;
        while cat.advance(&mut scene, &mut WorkBudget::new(0)) == Advance::MoreWorkRemaining {
            calls += 1;
            assert!(calls < 10, "population never finished");
        }
        // Clones 1 and 2 yield, clone 3 flows into the first application,
        // then applications 1 and 2 yield.
        assert_eq!(calls, 4);
        assert!(cat.is_populated());
        for &node in cat.instances() {
            assert_eq!(scene.apply_count(node), 1);
        }
    }

    #[test]
    fn fresh_instances_wear_ascending_local_blocks() {
        let (scene, cat) = populated();
        let ids: Vec<u32> = cat.instances().iter().map(|&n| scene.node_id(n).unwrap()).collect();
        assert_eq!(ids, vec![100, 102, 104]);
        assert_eq!(scene.subtree_node_ids(cat.instances()[1]), vec![102, 103]);
        assert_eq!(scene.subtree_component_ids(cat.instances()[2]), vec![502]);
        for &node in cat.instances() {
            assert_eq!(scene.parent(node), Some(cat.scratch_parent()));
            assert!(!scene.is_enabled(node));
        }
    }

    #[test]
    fn allocation_is_ascending_then_lifo() {
        let (mut scene, mut cat) = populated();
        let a = cat.allocate(&mut scene, IdRequest::Local, None).unwrap();
        let b = cat.allocate(&mut scene, IdRequest::Local, None).unwrap();
        assert_eq!((a.node_id, b.node_id), (100, 102));
        assert!(scene.is_enabled(a.node));

        cat.free(&mut scene, a.node).unwrap();
        cat.free(&mut scene, b.node).unwrap();
        let c = cat.allocate(&mut scene, IdRequest::Local, None).unwrap();
        assert_eq!(c.node, b.node, "most recently freed comes back first");
    }

    #[test]
    fn exhausted_pool_refuses_without_growing() {
        let (mut scene, mut cat) = populated();
        for _ in 0..3 {
            cat.allocate(&mut scene, IdRequest::Local, None).unwrap();
        }
        let err = cat.allocate(&mut scene, IdRequest::Local, None).unwrap_err();
        assert!(matches!(err, PoolError::PoolExhausted { total: 3, .. }));
        assert_eq!(cat.instances().len(), 3);
    }

    #[test]
    fn explicit_replicated_id_records_local_block() {
        let (mut scene, mut cat) = populated();
        let a = cat
            .allocate(&mut scene, IdRequest::ReplicatedAs(12), None)
            .unwrap();
        assert_eq!(a.node_id, 12);
        assert!(a.replicated);
        assert_eq!(a.refusal, None);
        assert_eq!(scene.subtree_node_ids(a.node), vec![12, 13]);
        assert_eq!(scene.subtree_component_ids(a.node), vec![41]);
        assert_eq!(
            cat.local_ids_for(12),
            Some(LocalIds {
                node_id: 100,
                component_base: 500
            })
        );
        assert_eq!(cat.next_replicated_id(), Some(14));

        cat.free(&mut scene, a.node).unwrap();
        assert_eq!(scene.node_id(a.node), Some(100));
        assert_eq!(scene.subtree_component_ids(a.node), vec![500]);
        assert_eq!(cat.replicated_in_use(), 0);
    }

    #[test]
    fn invalid_explicit_id_falls_back_to_round_robin() {
        let (mut scene, mut cat) = populated();
        let a = cat
            .allocate(&mut scene, IdRequest::ReplicatedAs(11), None)
            .unwrap();
        assert!(matches!(a.refusal, Some(PoolError::IdOutOfRange { id: 11, .. })));
        assert_eq!(a.node_id, 10);

        let b = cat
            .allocate(&mut scene, IdRequest::ReplicatedAs(10), None)
            .unwrap();
        assert!(matches!(b.refusal, Some(PoolError::ReplicatedIdInUse { id: 10, .. })));
        assert_eq!(b.node_id, 12);
    }

    #[test]
    fn round_robin_wraps_and_skips_taken_slots() {
        let (mut scene, mut cat) = populated();
        let a = cat.allocate(&mut scene, IdRequest::Replicated, None).unwrap();
        let b = cat.allocate(&mut scene, IdRequest::Replicated, None).unwrap();
        let c = cat.allocate(&mut scene, IdRequest::Replicated, None).unwrap();
        assert_eq!((a.node_id, b.node_id, c.node_id), (10, 12, 14));

        cat.free(&mut scene, b.node).unwrap();
        let d = cat.allocate(&mut scene, IdRequest::Replicated, None).unwrap();
        assert_eq!(d.node_id, 12, "wrapped past 10, which is still taken");
    }

    #[test]
    fn local_only_type_refuses_replication() {
        let mut scene = MemoryScene::new();
        let template = scene.create_node("bomb", None).unwrap();
        let shape = scene.template_shape(template).unwrap();
        let root = scene.create_scratch_parent("ObjectPool", None, None).unwrap();
        let ranges = CategoryRanges {
            scratch_node_id: 199,
            local_nodes: IdentifierRange::new(200, 2),
            local_components: IdentifierRange::empty(600),
            replicated_nodes: IdentifierRange::empty(10),
            replicated_components: IdentifierRange::empty(40),
        };
        let descriptor = TypeDescriptor::new("bomb", 2);
        let mut cat =
            PoolCategory::create(&mut scene, &descriptor, template, shape, ranges, root).unwrap();
        cat.resize(2).unwrap();
        cat.advance(&mut scene, &mut FrameBudget::unlimited());

        let a = cat.allocate(&mut scene, IdRequest::Replicated, None).unwrap();
        assert_eq!(a.node_id, 200);
        assert!(!a.replicated);
        assert!(matches!(a.refusal, Some(PoolError::ReplicationUnsupported { .. })));
        assert_eq!(cat.next_replicated_id(), None);
    }

    #[test]
    fn free_resets_instance_state() {
        let (mut scene, mut cat) = populated();
        let holder = scene.create_node("board", None).unwrap();
        let a = cat.allocate(&mut scene, IdRequest::Local, Some(holder)).unwrap();
        assert_eq!(scene.parent(a.node), Some(holder));
        scene.add_tag(a.node, "matched").unwrap();
        scene
            .set_attribute(a.node, "color", serde_json::json!("blue"))
            .unwrap();

        cat.free(&mut scene, a.node).unwrap();
        assert_eq!(scene.parent(a.node), Some(cat.scratch_parent()));
        assert!(!scene.is_enabled(a.node));
        assert!(!scene.has_tag(a.node, "matched"));
        assert_eq!(scene.attribute(a.node, "color"), None);
        assert_eq!(cat.state_of(a.node), Some(SlotState::Free));
    }

    #[test]
    fn double_free_changes_nothing() {
        let (mut scene, mut cat) = populated();
        let a = cat.allocate(&mut scene, IdRequest::Local, None).unwrap();
        cat.free(&mut scene, a.node).unwrap();
        let err = cat.free(&mut scene, a.node).unwrap_err();
        assert!(matches!(err, FreeError::DoubleFree { .. }));
        assert_eq!(cat.free_len(), 3);
        let tops: Vec<NodeHandle> = cat.free_nodes().take(2).collect();
        assert_ne!(tops[0], tops[1]);
    }

    #[test]
    fn orphaned_replicated_id_destroys_instance() {
        let (mut scene, mut cat) = populated();
        let a = cat.allocate(&mut scene, IdRequest::Local, None).unwrap();
        scene.rekey(a.node, 14, 42).unwrap();

        let err = cat.free(&mut scene, a.node).unwrap_err();
        assert!(matches!(err, FreeError::OrphanedReplicatedId { id: 14, .. }));
        assert!(!scene.contains(a.node));
        assert_eq!(cat.lost_len(), 1);
        assert_eq!(cat.free_len(), 2);
        assert!(!cat.contains(a.node));
    }

    #[test]
    fn freeing_the_template_never_removes_it() {
        let (mut scene, mut cat) = populated();
        let template = cat.template();
        let err = cat.free(&mut scene, template).unwrap_err();
        assert!(matches!(err, FreeError::ForeignInstance { .. }));
        assert!(scene.contains(template));
    }

    #[test]
    fn clone_failure_leaves_category_short() {
        let (mut scene, mut cat) = fixture();
        scene.create_node_with_id("squatter", None, 102).unwrap();
        assert_eq!(cat.advance(&mut scene, &mut FrameBudget::unlimited()), Advance::Done);
        assert!(cat.population_failed());
        assert_eq!(cat.instances().len(), 1);
        assert_eq!(scene.apply_count(cat.instances()[0]), 1);
    }

    #[test]
    fn resize_retries_a_short_population() {
        let (mut scene, mut cat) = fixture();
        let squatter = scene.create_node_with_id("squatter", None, 102).unwrap();
        cat.advance(&mut scene, &mut FrameBudget::unlimited());
        assert!(cat.population_failed());

        scene.remove(squatter);
        cat.resize(3).unwrap();
        assert_eq!(cat.population(), Population::Cloning(1));
        assert!(!cat.population_failed());
        assert_eq!(cat.advance(&mut scene, &mut FrameBudget::unlimited()), Advance::Done);

        let ids: Vec<u32> = cat.instances().iter().map(|&n| scene.node_id(n).unwrap()).collect();
        assert_eq!(ids, vec![100, 102, 104]);
        assert_eq!(cat.free_len(), 3);
        for &node in cat.instances() {
            assert_eq!(scene.apply_count(node), 1, "attributes applied exactly once");
        }
    }

    #[test]
    fn growing_mid_application_applies_each_instance_once() {
        let mut scene = MemoryScene::new();
        let template = scene.create_node("gem", None).unwrap();
        let shape = scene.template_shape(template).unwrap();
        let root = scene.create_scratch_parent("ObjectPool", None, None).unwrap();
        let ranges = CategoryRanges {
            scratch_node_id: 99,
            local_nodes: IdentifierRange::new(100, 4),
            local_components: IdentifierRange::empty(500),
            replicated_nodes: IdentifierRange::empty(10),
            replicated_components: IdentifierRange::empty(40),
        };
        let mut cat = PoolCategory::create(
            &mut scene,
            &TypeDescriptor::new("gem", 2),
            template,
            shape,
            ranges,
            root,
        )
        .unwrap();
        cat.resize(2).unwrap();
        cat.advance(&mut scene, &mut WorkBudget::new(0));
        cat.advance(&mut scene, &mut WorkBudget::new(0));
        assert_eq!(cat.population(), Population::ApplyingAttributes(1));

        cat.resize(4).unwrap();
        assert_eq!(cat.advance(&mut scene, &mut FrameBudget::unlimited()), Advance::Done);
        assert_eq!(cat.instances().len(), 4);
        for &node in cat.instances() {
            assert_eq!(scene.apply_count(node), 1);
        }
    }

    #[test]
    fn failed_rekey_to_replicated_keeps_instance_local() {
        let (mut scene, mut cat) = populated();
        let squatter = scene.create_node_with_id("squatter", None, 12).unwrap();

        let a = cat.allocate(&mut scene, IdRequest::ReplicatedAs(12), None).unwrap();
        assert_eq!(a.refusal, Some(PoolError::Scene(SceneError::NodeIdInUse { id: 12 })));
        assert!(!a.replicated);
        assert_eq!(a.node_id, 100);
        assert_eq!(scene.node_id(a.node), Some(100));
        assert_eq!(scene.find_by_id(12), Some(squatter));
        assert_eq!(cat.replicated_in_use(), 0);
        assert_eq!(cat.local_ids_for(12), None);
        assert_eq!(cat.state_of(a.node), Some(SlotState::InUse));

        cat.free(&mut scene, a.node).unwrap();
        assert_eq!(cat.free_len(), 3);
    }

    #[test]
    fn failed_rekey_back_to_local_loses_instance() {
        let (mut scene, mut cat) = populated();
        let a = cat.allocate(&mut scene, IdRequest::ReplicatedAs(12), None).unwrap();
        assert!(a.replicated);
        assert_eq!(a.node_id, 12);
        let squatter = scene.create_node_with_id("squatter", None, 100).unwrap();

        let err = cat.free(&mut scene, a.node).unwrap_err();
        assert_eq!(
            err,
            FreeError::OrphanedReplicatedId {
                node: a.node,
                id: 12,
                name: "gem".into(),
            }
        );
        assert!(!scene.contains(a.node));
        assert!(scene.contains(squatter));
        assert_eq!(cat.state_of(a.node), None);
        assert_eq!(cat.lost_len(), 1);
        assert_eq!(cat.free_len(), 2);
        assert_eq!(cat.replicated_in_use(), 0);
        assert_eq!(cat.local_ids_for(12), None);
    }

    #[test]
    fn selective_restore_keeps_parts() {
        let (mut scene, mut cat) = populated();
        let a = cat.allocate(&mut scene, IdRequest::Replicated, None).unwrap();
        let b = cat.allocate(&mut scene, IdRequest::Replicated, None).unwrap();
        scene.add_tag(b.node, USED_AS_PART).unwrap();

        let report = cat.restore(&mut scene, true);
        assert_eq!(
            report,
            RestoreReport {
                restored: 1,
                skipped: 1,
                failed: 0
            }
        );
        assert_eq!(cat.state_of(a.node), Some(SlotState::Free));
        assert_eq!(cat.state_of(b.node), Some(SlotState::InUse));
        assert_eq!(cat.next_replicated_id(), Some(10));

        let c = cat.allocate(&mut scene, IdRequest::Replicated, None).unwrap();
        assert_eq!(c.node_id, 10);
    }

    #[test]
    fn resize_grows_within_capacity_only() {
        let mut scene = MemoryScene::new();
        let template = scene.create_node("gem", None).unwrap();
        let shape = scene.template_shape(template).unwrap();
        let root = scene.create_scratch_parent("ObjectPool", None, None).unwrap();
        let ranges = CategoryRanges {
            scratch_node_id: 99,
            local_nodes: IdentifierRange::new(100, 4),
            local_components: IdentifierRange::empty(500),
            replicated_nodes: IdentifierRange::empty(10),
            replicated_components: IdentifierRange::empty(40),
        };
        let mut cat = PoolCategory::create(
            &mut scene,
            &TypeDescriptor::new("gem", 2),
            template,
            shape,
            ranges,
            root,
        )
        .unwrap();
        cat.resize(2).unwrap();
        cat.advance(&mut scene, &mut FrameBudget::unlimited());
        assert_eq!(cat.instances().len(), 2);

        cat.resize(1).unwrap();
        assert!(cat.is_populated());

        cat.resize(4).unwrap();
        assert_eq!(cat.population(), Population::Cloning(2));
        cat.advance(&mut scene, &mut FrameBudget::unlimited());
        assert_eq!(cat.instances().len(), 4);

        let err = cat.resize(5).unwrap_err();
        assert!(matches!(err, PoolError::CapacityExceeded { capacity: 4, .. }));
    }

    #[test]
    fn remapping_requires_an_in_use_instance() {
        let (mut scene, mut cat) = populated();
        let free_node = cat.instances()[0];
        let err = cat
            .change_to_replicated_id(&mut scene, free_node, IdRequest::Replicated)
            .unwrap_err();
        assert_eq!(err, PoolError::NotInUse { node: free_node });

        let a = cat.allocate(&mut scene, IdRequest::Local, None).unwrap();
        let id = cat
            .change_to_replicated_id(&mut scene, a.node, IdRequest::ReplicatedAs(14))
            .unwrap();
        assert_eq!(id, 14);
        let id = cat
            .change_to_replicated_id(&mut scene, a.node, IdRequest::ReplicatedAs(10))
            .unwrap();
        assert_eq!(id, 10);
        assert_eq!(cat.replicated_in_use(), 1);
        assert_eq!(cat.local_ids_for(10).map(|l| l.node_id), Some(100));
    }

    #[test]
    fn dump_lists_free_ids_and_mappings() {
        let (mut scene, mut cat) = populated();
        cat.allocate(&mut scene, IdRequest::ReplicatedAs(12), None)
            .unwrap();
        let dump = cat.dump(&scene);
        assert_eq!(dump.free_ids, vec![102, 104]);
        assert_eq!(dump.replicated_to_local, vec![(12, 100)]);
        assert_eq!(dump.in_use, 1);
        assert!(dump.anomalies.is_empty());
    }
}
