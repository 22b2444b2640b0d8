//! The scene-graph boundary and an in-memory scene graph.
//!
//! The pool never touches scene internals. Everything it needs (cloning a
//! template, re-keying a live subtree, reparenting, enabling, resetting
//! attributes) goes through the [`SceneGraph`] trait and its [`ReKey`]
//! capability. [`MemoryScene`] is a complete implementation backed by plain
//! vectors and maps. Tests, benches and the demo run the pool against it.
//!
//! # Identifier layout
//!
//! A node subtree wears consecutive node identifiers in preorder: the root
//! gets `node_id`, its first descendant `node_id + 1`, and so on. Components
//! are numbered the same way from `component_base`, walking the subtree in
//! preorder and each node's components in attachment order.

use std::collections::{BTreeSet, HashMap};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::component::{ComponentSlot, ReplicationState, SceneComponent};
use crate::entity_type::EntityType;
use crate::node::NodeHandle;
use crate::SceneError;

// ---------------------------------------------------------------------------
// TemplateShape
// ---------------------------------------------------------------------------

/// Identifier footprint of one instance cloned from a template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TemplateShape {
    /// Number of nodes below the template root (all depths).
    pub descendant_nodes: u32,
    /// Number of components on the root and all descendants.
    pub components: u32,
    /// Whether the root already carries a [`ReplicationState`].
    pub has_replication_state: bool,
}

impl TemplateShape {
    /// Node identifiers consumed by one instance.
    pub fn nodes_per_instance(&self) -> u32 {
        1 + self.descendant_nodes
    }

    /// Component identifiers consumed by one instance once the template is
    /// prepared for the given mode.
    pub fn components_per_instance(&self, replicated: bool) -> u32 {
        if replicated && !self.has_replication_state {
            self.components + 1
        } else {
            self.components
        }
    }
}

// ---------------------------------------------------------------------------
// Capability traits
// ---------------------------------------------------------------------------

/// Re-keys a live subtree to a new block of identifiers.
pub trait ReKey {
    /// Move `node`'s subtree to node ids starting at `node_id` and component
    /// ids starting at `component_base`.
    ///
    /// Fails without changing anything if a target id is held by a node or
    /// component outside the subtree.
    fn rekey(
        &mut self,
        node: NodeHandle,
        node_id: u32,
        component_base: u32,
    ) -> Result<(), SceneError>;
}

/// Everything the pool asks of the host scene graph.
pub trait SceneGraph: ReKey {
    /// Identifier footprint of `template`, or `None` if it does not exist.
    fn template_shape(&self, template: NodeHandle) -> Option<TemplateShape>;

    /// Tell the host allocator that node ids `first..=last` belong to the pool.
    fn reserve_node_ids(&mut self, _first: u32, _last: u32) {}

    /// Tell the host allocator that component ids `first..=last` belong to the pool.
    fn reserve_component_ids(&mut self, _first: u32, _last: u32) {}

    /// Lowest node id in `first..=last` already worn by a node. Hosts that
    /// cannot answer return `None`.
    fn taken_node_id(&self, _first: u32, _last: u32) -> Option<u32> {
        None
    }

    /// Lowest component id in `first..=last` already worn by a component.
    fn taken_component_id(&self, _first: u32, _last: u32) -> Option<u32> {
        None
    }

    /// Node id the host will hand to its next automatically identified node.
    /// Every id it handed out before is lower.
    fn next_auto_node_id(&self) -> Option<u32> {
        None
    }

    /// Component id the host will hand to its next automatically identified
    /// component.
    fn next_auto_component_id(&self) -> Option<u32> {
        None
    }

    /// Create an empty, disabled holder node. `node_id: None` lets the host pick.
    fn create_scratch_parent(
        &mut self,
        name: &str,
        parent: Option<NodeHandle>,
        node_id: Option<u32>,
    ) -> Result<NodeHandle, SceneError>;

    /// Tag `template` with its type, disable it, and attach the replication
    /// bookkeeping component when `replicated` is set.
    fn prepare_template(
        &mut self,
        template: NodeHandle,
        entity_type: EntityType,
        replicated: bool,
    ) -> Result<(), SceneError>;

    /// Clone `template` under `parent` with the given identifier block.
    ///
    /// Returns `None` when the host cannot produce the clone.
    fn clone_template(
        &mut self,
        template: NodeHandle,
        parent: NodeHandle,
        node_id: u32,
        component_base: u32,
    ) -> Option<NodeHandle>;

    /// Identifier currently worn by `node`.
    fn node_id(&self, node: NodeHandle) -> Option<u32>;

    /// Type tag attached to `node`.
    fn entity_type(&self, node: NodeHandle) -> Option<EntityType>;

    /// Run the host's deferred attribute application for `node`.
    fn apply_attributes(&mut self, node: NodeHandle);

    /// Overwrite `node`'s attributes with the template defaults.
    fn copy_default_attributes(&mut self, template: NodeHandle, node: NodeHandle);

    /// Remove transient tags from `node`.
    fn clear_tags(&mut self, node: NodeHandle);

    /// Whether `node` carries `tag`.
    fn has_tag(&self, node: NodeHandle, tag: &str) -> bool;

    /// Move `node` under `parent`.
    fn reparent(&mut self, node: NodeHandle, parent: NodeHandle) -> Result<(), SceneError>;

    /// Enable or disable `node`.
    fn set_enabled(&mut self, node: NodeHandle, enabled: bool);

    /// Whether `node` is enabled.
    fn is_enabled(&self, node: NodeHandle) -> bool;

    /// Invoke [`CleanableOnRecycle`](crate::component::CleanableOnRecycle) on
    /// every component of `node`'s subtree.
    fn clean_dependences(&mut self, node: NodeHandle);

    /// Destroy `node` and its subtree.
    fn remove(&mut self, node: NodeHandle);
}

// ---------------------------------------------------------------------------
// MemoryScene
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct NodeData {
    id: u32,
    name: String,
    parent: Option<NodeHandle>,
    children: Vec<NodeHandle>,
    components: Vec<ComponentSlot>,
    attributes: Map<String, Value>,
    tags: BTreeSet<String>,
    enabled: bool,
    entity_type: Option<EntityType>,
    apply_count: u32,
}

impl NodeData {
    fn new(id: u32, name: &str, parent: Option<NodeHandle>) -> Self {
        Self {
            id,
            name: name.to_owned(),
            parent,
            children: Vec::new(),
            components: Vec::new(),
            attributes: Map::new(),
            tags: BTreeSet::new(),
            enabled: true,
            entity_type: None,
            apply_count: 0,
        }
    }
}

/// Storage slot. `handle` is the handle of the node stored now, or of the
/// next node to be stored when the slot is vacant.
#[derive(Debug)]
struct NodeSlot {
    handle: NodeHandle,
    data: Option<NodeData>,
}

/// An in-memory scene graph.
///
/// Node and component identifiers are unique across the scene. Identifiers
/// picked automatically (for host-created nodes) skip every block reserved
/// through [`SceneGraph::reserve_node_ids`] and
/// [`SceneGraph::reserve_component_ids`].
#[derive(Debug)]
pub struct MemoryScene {
    nodes: Vec<NodeSlot>,
    /// Vacant slots, most recently vacated last.
    vacant: Vec<u32>,
    live: usize,
    by_id: HashMap<u32, NodeHandle>,
    component_owner: HashMap<u32, NodeHandle>,
    reserved_nodes: Vec<(u32, u32)>,
    reserved_components: Vec<(u32, u32)>,
    next_node_id: u32,
    next_component_id: u32,
    root: NodeHandle,
}

impl MemoryScene {
    /// Create a scene with a single root node. Automatic ids start at 1.
    pub fn new() -> Self {
        Self::with_first_auto_ids(1, 1)
    }

    /// Create a scene whose automatic node and component ids start at the
    /// given values.
    pub fn with_first_auto_ids(first_node_id: u32, first_component_id: u32) -> Self {
        let mut scene = Self {
            nodes: Vec::new(),
            vacant: Vec::new(),
            live: 0,
            by_id: HashMap::new(),
            component_owner: HashMap::new(),
            reserved_nodes: Vec::new(),
            reserved_components: Vec::new(),
            next_node_id: first_node_id.max(1),
            next_component_id: first_component_id.max(1),
            root: NodeHandle::new(0, 0),
        };
        let id = scene.auto_node_id();
        scene.root = scene.insert_node(NodeData::new(id, "Scene", None));
        scene
    }

    /// The scene root.
    pub fn root(&self) -> NodeHandle {
        self.root
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.live
    }

    /// Whether `node` is a live node of this scene.
    pub fn contains(&self, node: NodeHandle) -> bool {
        self.get(node).is_some()
    }

    // -- construction -------------------------------------------------------

    /// Create a node with an automatically chosen id under `parent` (the root
    /// if `None`).
    pub fn create_node(
        &mut self,
        name: &str,
        parent: Option<NodeHandle>,
    ) -> Result<NodeHandle, SceneError> {
        let id = self.auto_node_id();
        self.create_node_with_id(name, parent, id)
    }

    /// Create a node wearing `id` under `parent` (the root if `None`).
    pub fn create_node_with_id(
        &mut self,
        name: &str,
        parent: Option<NodeHandle>,
        id: u32,
    ) -> Result<NodeHandle, SceneError> {
        let parent = parent.unwrap_or(self.root);
        if !self.contains(parent) {
            return Err(SceneError::StaleNode { node: parent });
        }
        if self.by_id.contains_key(&id) {
            return Err(SceneError::NodeIdInUse { id });
        }
        let handle = self.insert_node(NodeData::new(id, name, Some(parent)));
        if let Some(p) = self.get_mut(parent) {
            p.children.push(handle);
        }
        Ok(handle)
    }

    /// Attach `component` to `node` with an automatically chosen id.
    pub fn add_component<C: SceneComponent>(
        &mut self,
        node: NodeHandle,
        component: C,
    ) -> Result<u32, SceneError> {
        if !self.contains(node) {
            return Err(SceneError::StaleNode { node });
        }
        let id = self.auto_component_id();
        self.component_owner.insert(id, node);
        if let Some(data) = self.get_mut(node) {
            data.components.push(ComponentSlot {
                id,
                component: Box::new(component),
            });
        }
        Ok(id)
    }

    /// Set a node attribute.
    pub fn set_attribute(
        &mut self,
        node: NodeHandle,
        key: &str,
        value: Value,
    ) -> Result<(), SceneError> {
        let data = self
            .get_mut(node)
            .ok_or(SceneError::StaleNode { node })?;
        data.attributes.insert(key.to_owned(), value);
        Ok(())
    }

    /// Add a tag to a node.
    pub fn add_tag(&mut self, node: NodeHandle, tag: &str) -> Result<(), SceneError> {
        let data = self
            .get_mut(node)
            .ok_or(SceneError::StaleNode { node })?;
        data.tags.insert(tag.to_owned());
        Ok(())
    }

    // -- inspection ---------------------------------------------------------

    /// Look a node up by the identifier it currently wears.
    pub fn find_by_id(&self, id: u32) -> Option<NodeHandle> {
        self.by_id.get(&id).copied()
    }

    /// Node name.
    pub fn name(&self, node: NodeHandle) -> Option<&str> {
        self.get(node).map(|d| d.name.as_str())
    }

    /// Parent of `node`.
    pub fn parent(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.get(node).and_then(|d| d.parent)
    }

    /// Direct children of `node`.
    pub fn children(&self, node: NodeHandle) -> &[NodeHandle] {
        self.get(node).map(|d| d.children.as_slice()).unwrap_or(&[])
    }

    /// Read a node attribute.
    pub fn attribute(&self, node: NodeHandle, key: &str) -> Option<&Value> {
        self.get(node).and_then(|d| d.attributes.get(key))
    }

    /// Tags on `node`, sorted.
    pub fn tags(&self, node: NodeHandle) -> Vec<&str> {
        self.get(node)
            .map(|d| d.tags.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Components on `node`.
    pub fn components(&self, node: NodeHandle) -> &[ComponentSlot] {
        self.get(node).map(|d| d.components.as_slice()).unwrap_or(&[])
    }

    /// Mutable access to the components on `node`.
    pub fn components_mut(&mut self, node: NodeHandle) -> &mut [ComponentSlot] {
        match self.get_mut(node) {
            Some(d) => d.components.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Component ids across `node`'s subtree, in identifier layout order.
    pub fn subtree_component_ids(&self, node: NodeHandle) -> Vec<u32> {
        self.subtree(node)
            .iter()
            .filter_map(|&n| self.get(n))
            .flat_map(|d| d.components.iter().map(|c| c.id))
            .collect()
    }

    /// Node ids across `node`'s subtree, in preorder.
    pub fn subtree_node_ids(&self, node: NodeHandle) -> Vec<u32> {
        self.subtree(node)
            .iter()
            .filter_map(|&n| self.get(n).map(|d| d.id))
            .collect()
    }

    /// How many times attributes were applied to `node`.
    pub fn apply_count(&self, node: NodeHandle) -> u32 {
        self.get(node).map(|d| d.apply_count).unwrap_or(0)
    }

    /// `node` and all its descendants, preorder.
    pub fn subtree(&self, node: NodeHandle) -> Vec<NodeHandle> {
        let mut out = Vec::new();
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            if let Some(d) = self.get(n) {
                out.push(n);
                stack.extend(d.children.iter().rev().copied());
            }
        }
        out
    }

    // -- internals ----------------------------------------------------------

    fn get(&self, node: NodeHandle) -> Option<&NodeData> {
        self.nodes
            .get(node.slot() as usize)
            .filter(|s| s.handle == node)
            .and_then(|s| s.data.as_ref())
    }

    fn get_mut(&mut self, node: NodeHandle) -> Option<&mut NodeData> {
        self.nodes
            .get_mut(node.slot() as usize)
            .filter(|s| s.handle == node)
            .and_then(|s| s.data.as_mut())
    }

    fn insert_node(&mut self, data: NodeData) -> NodeHandle {
        let id = data.id;
        let handle = match self.vacant.pop() {
            Some(slot) => {
                let entry = &mut self.nodes[slot as usize];
                entry.data = Some(data);
                entry.handle
            }
            None => {
                let handle = NodeHandle::new(self.nodes.len() as u32, 0);
                self.nodes.push(NodeSlot {
                    handle,
                    data: Some(data),
                });
                handle
            }
        };
        self.by_id.insert(id, handle);
        self.live += 1;
        handle
    }

    /// Empty the slot of `node` and retire its handle.
    fn vacate(&mut self, node: NodeHandle) -> Option<NodeData> {
        let entry = self
            .nodes
            .get_mut(node.slot() as usize)
            .filter(|s| s.handle == node)?;
        let data = entry.data.take()?;
        entry.handle = node.successor();
        self.vacant.push(node.slot());
        self.live -= 1;
        Some(data)
    }

    fn in_blocks(blocks: &[(u32, u32)], id: u32) -> bool {
        blocks.iter().any(|&(first, last)| id >= first && id <= last)
    }

    fn auto_node_id(&mut self) -> u32 {
        loop {
            let id = self.next_node_id;
            self.next_node_id = self.next_node_id.wrapping_add(1).max(1);
            if !self.by_id.contains_key(&id) && !Self::in_blocks(&self.reserved_nodes, id) {
                return id;
            }
        }
    }

    fn auto_component_id(&mut self) -> u32 {
        loop {
            let id = self.next_component_id;
            self.next_component_id = self.next_component_id.wrapping_add(1).max(1);
            if !self.component_owner.contains_key(&id)
                && !Self::in_blocks(&self.reserved_components, id)
            {
                return id;
            }
        }
    }

    /// Check that the id block starting at `node_id` / `component_base` is
    /// free, ignoring ids held by `owner` (the subtree being re-keyed).
    fn check_block(
        &self,
        node_count: u32,
        component_count: u32,
        node_id: u32,
        component_base: u32,
        owner: &[NodeHandle],
    ) -> Result<(), SceneError> {
        for k in 0..node_count {
            let id = node_id
                .checked_add(k)
                .ok_or(SceneError::NodeIdInUse { id: u32::MAX })?;
            if let Some(holder) = self.by_id.get(&id) {
                if !owner.contains(holder) {
                    return Err(SceneError::NodeIdInUse { id });
                }
            }
        }
        for k in 0..component_count {
            let id = component_base
                .checked_add(k)
                .ok_or(SceneError::ComponentIdInUse { id: u32::MAX })?;
            if let Some(holder) = self.component_owner.get(&id) {
                if !owner.contains(holder) {
                    return Err(SceneError::ComponentIdInUse { id });
                }
            }
        }
        Ok(())
    }

    fn count_components(&self, nodes: &[NodeHandle]) -> u32 {
        nodes
            .iter()
            .filter_map(|&n| self.get(n))
            .map(|d| d.components.len() as u32)
            .sum()
    }

    fn clone_subtree(
        &mut self,
        source: NodeHandle,
        parent: NodeHandle,
        next_node_id: &mut u32,
        next_component_id: &mut u32,
    ) -> Option<NodeHandle> {
        let src = self.get(source)?.clone();
        let mut data = NodeData::new(*next_node_id, &src.name, Some(parent));
        *next_node_id = next_node_id.wrapping_add(1);
        data.attributes = src.attributes.clone();
        data.tags = src.tags.clone();
        data.enabled = src.enabled;
        data.entity_type = src.entity_type;
        for slot in &src.components {
            data.components.push(ComponentSlot {
                id: *next_component_id,
                component: slot.component.clone(),
            });
            *next_component_id = next_component_id.wrapping_add(1);
        }
        let component_ids: Vec<u32> = data.components.iter().map(|c| c.id).collect();
        let handle = self.insert_node(data);
        for id in component_ids {
            self.component_owner.insert(id, handle);
        }
        if let Some(p) = self.get_mut(parent) {
            p.children.push(handle);
        }
        for child in src.children {
            self.clone_subtree(child, handle, next_node_id, next_component_id)?;
        }
        Some(handle)
    }

    fn detach(&mut self, node: NodeHandle) {
        if let Some(parent) = self.get(node).and_then(|d| d.parent) {
            if let Some(p) = self.get_mut(parent) {
                p.children.retain(|&c| c != node);
            }
        }
    }
}

impl Default for MemoryScene {
    fn default() -> Self {
        Self::new()
    }
}

impl ReKey for MemoryScene {
    fn rekey(
        &mut self,
        node: NodeHandle,
        node_id: u32,
        component_base: u32,
    ) -> Result<(), SceneError> {
        if !self.contains(node) {
            return Err(SceneError::StaleNode { node });
        }
        let subtree = self.subtree(node);
        let component_count = self.count_components(&subtree);
        self.check_block(
            subtree.len() as u32,
            component_count,
            node_id,
            component_base,
            &subtree,
        )?;

        // Drop every old id first so overlapping old/new blocks cannot clash.
        for &n in &subtree {
            if let Some(d) = self.get(n) {
                let old_id = d.id;
                let old_components: Vec<u32> = d.components.iter().map(|c| c.id).collect();
                self.by_id.remove(&old_id);
                for c in old_components {
                    self.component_owner.remove(&c);
                }
            }
        }

        let mut next_node = node_id;
        let mut next_component = component_base;
        for &n in &subtree {
            let mut assigned = Vec::new();
            if let Some(d) = self.get_mut(n) {
                d.id = next_node;
                for slot in &mut d.components {
                    slot.id = next_component;
                    assigned.push(next_component);
                    next_component = next_component.wrapping_add(1);
                }
            }
            self.by_id.insert(next_node, n);
            for c in assigned {
                self.component_owner.insert(c, n);
            }
            next_node = next_node.wrapping_add(1);
        }
        debug!(node = %node, node_id, component_base, "subtree re-keyed");
        Ok(())
    }
}

impl SceneGraph for MemoryScene {
    fn template_shape(&self, template: NodeHandle) -> Option<TemplateShape> {
        let root = self.get(template)?;
        let subtree = self.subtree(template);
        Some(TemplateShape {
            descendant_nodes: subtree.len() as u32 - 1,
            components: self.count_components(&subtree),
            has_replication_state: root
                .components
                .iter()
                .any(|c| c.component.kind() == ReplicationState::KIND),
        })
    }

    fn reserve_node_ids(&mut self, first: u32, last: u32) {
        if first <= last {
            self.reserved_nodes.push((first, last));
        }
    }

    fn reserve_component_ids(&mut self, first: u32, last: u32) {
        if first <= last {
            self.reserved_components.push((first, last));
        }
    }

    fn taken_node_id(&self, first: u32, last: u32) -> Option<u32> {
        self.by_id.keys().copied().filter(|id| (first..=last).contains(id)).min()
    }

    fn taken_component_id(&self, first: u32, last: u32) -> Option<u32> {
        self.component_owner
            .keys()
            .copied()
            .filter(|id| (first..=last).contains(id))
            .min()
    }

    fn next_auto_node_id(&self) -> Option<u32> {
        Some(self.next_node_id)
    }

    fn next_auto_component_id(&self) -> Option<u32> {
        Some(self.next_component_id)
    }

    fn create_scratch_parent(
        &mut self,
        name: &str,
        parent: Option<NodeHandle>,
        node_id: Option<u32>,
    ) -> Result<NodeHandle, SceneError> {
        let node = match node_id {
            Some(id) => self.create_node_with_id(name, parent, id)?,
            None => self.create_node(name, parent)?,
        };
        self.set_enabled(node, false);
        Ok(node)
    }

    fn prepare_template(
        &mut self,
        template: NodeHandle,
        entity_type: EntityType,
        replicated: bool,
    ) -> Result<(), SceneError> {
        let shape = self
            .template_shape(template)
            .ok_or(SceneError::StaleNode { node: template })?;
        if replicated && !shape.has_replication_state {
            self.add_component(template, ReplicationState::default())?;
        }
        let data = self
            .get_mut(template)
            .ok_or(SceneError::StaleNode { node: template })?;
        data.entity_type = Some(entity_type);
        data.enabled = false;
        Ok(())
    }

    fn clone_template(
        &mut self,
        template: NodeHandle,
        parent: NodeHandle,
        node_id: u32,
        component_base: u32,
    ) -> Option<NodeHandle> {
        if !self.contains(parent) {
            warn!(parent = %parent, "clone_template: parent is not a live node");
            return None;
        }
        let shape = self.template_shape(template)?;
        if let Err(e) = self.check_block(
            shape.nodes_per_instance(),
            shape.components,
            node_id,
            component_base,
            &[],
        ) {
            warn!(template = %template, error = %e, "clone_template: identifier block is taken");
            return None;
        }
        let mut next_node = node_id;
        let mut next_component = component_base;
        self.clone_subtree(template, parent, &mut next_node, &mut next_component)
    }

    fn node_id(&self, node: NodeHandle) -> Option<u32> {
        self.get(node).map(|d| d.id)
    }

    fn entity_type(&self, node: NodeHandle) -> Option<EntityType> {
        self.get(node).and_then(|d| d.entity_type)
    }

    fn apply_attributes(&mut self, node: NodeHandle) {
        for n in self.subtree(node) {
            if let Some(d) = self.get_mut(n) {
                d.apply_count += 1;
            }
        }
    }

    fn copy_default_attributes(&mut self, template: NodeHandle, node: NodeHandle) {
        let sources = self.subtree(template);
        let targets = self.subtree(node);
        for (src, dst) in sources.into_iter().zip(targets) {
            let attributes = match self.get(src) {
                Some(d) => d.attributes.clone(),
                None => continue,
            };
            if let Some(d) = self.get_mut(dst) {
                d.attributes = attributes;
            }
        }
    }

    fn clear_tags(&mut self, node: NodeHandle) {
        if let Some(d) = self.get_mut(node) {
            d.tags.clear();
        }
    }

    fn has_tag(&self, node: NodeHandle, tag: &str) -> bool {
        self.get(node).is_some_and(|d| d.tags.contains(tag))
    }

    fn reparent(&mut self, node: NodeHandle, parent: NodeHandle) -> Result<(), SceneError> {
        if !self.contains(node) {
            return Err(SceneError::StaleNode { node });
        }
        if !self.contains(parent) {
            return Err(SceneError::StaleNode { node: parent });
        }
        if self.subtree(node).contains(&parent) {
            return Err(SceneError::CyclicParent { node, parent });
        }
        if self.parent(node) == Some(parent) {
            return Ok(());
        }
        self.detach(node);
        if let Some(d) = self.get_mut(node) {
            d.parent = Some(parent);
        }
        if let Some(p) = self.get_mut(parent) {
            p.children.push(node);
        }
        Ok(())
    }

    fn set_enabled(&mut self, node: NodeHandle, enabled: bool) {
        if let Some(d) = self.get_mut(node) {
            d.enabled = enabled;
        }
    }

    fn is_enabled(&self, node: NodeHandle) -> bool {
        self.get(node).is_some_and(|d| d.enabled)
    }

    fn clean_dependences(&mut self, node: NodeHandle) {
        for n in self.subtree(node) {
            if let Some(d) = self.get_mut(n) {
                for slot in &mut d.components {
                    slot.component.clean_on_recycle();
                }
            }
        }
    }

    fn remove(&mut self, node: NodeHandle) {
        if node == self.root || !self.contains(node) {
            return;
        }
        self.detach(node);
        for n in self.subtree(node) {
            let Some(data) = self.vacate(n) else {
                continue;
            };
            self.by_id.remove(&data.id);
            for slot in &data.components {
                self.component_owner.remove(&slot.id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
