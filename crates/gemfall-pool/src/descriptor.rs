//! Entity type descriptors and the ordered type registry.
//!
//! A [`TypeDescriptor`] states how many instances of a type to pre-build and
//! whether those instances may ever wear a replicated identifier. Descriptors
//! are usually loaded from JSON. The template subtree to clone is attached
//! afterwards with [`TypeRegistry::set_template`], once the host has built it.
//!
//! The registry iterates in registration order. Range reservation walks it in
//! that order, so the resulting identifier layout is reproducible.

use std::collections::HashMap;

use gemfall_scene::entity_type::EntityType;
use gemfall_scene::node::NodeHandle;
use serde::{Deserialize, Serialize};

use crate::PoolError;

// ---------------------------------------------------------------------------
// TypeDescriptor
// ---------------------------------------------------------------------------

/// Static description of one pooled entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeDescriptor {
    /// Type name, e.g. `"gem.red"`. The [`EntityType`] tag derives from it.
    pub name: String,
    /// Number of instances to pre-build. Zero means the type is not pooled.
    #[serde(default)]
    pub pool_quantity: u32,
    /// Gameplay value carried by the type (score, hit points...). Opaque to
    /// the pool.
    #[serde(default)]
    pub default_value: i32,
    /// Upper bound on how many instances a single drop may spawn. Opaque to
    /// the pool.
    #[serde(default)]
    pub max_drop_quantity: u32,
    /// Whether instances may wear a replicated identifier.
    #[serde(default)]
    pub replicated_mode: bool,
    /// Template subtree to clone. Attached at runtime, never serialized.
    #[serde(skip)]
    pub template: Option<NodeHandle>,
}

impl TypeDescriptor {
    /// A local-only descriptor with `pool_quantity` instances and no template.
    pub fn new(name: &str, pool_quantity: u32) -> Self {
        Self {
            name: name.to_owned(),
            pool_quantity,
            default_value: 0,
            max_drop_quantity: 0,
            replicated_mode: false,
            template: None,
        }
    }

    /// Builder: mark the type as replicated-capable.
    pub fn replicated(mut self) -> Self {
        self.replicated_mode = true;
        self
    }

    /// Builder: attach the template.
    pub fn with_template(mut self, template: NodeHandle) -> Self {
        self.template = Some(template);
        self
    }

    /// The type tag derived from [`name`](Self::name).
    pub fn type_id(&self) -> EntityType {
        EntityType::from_name(&self.name)
    }
}

// ---------------------------------------------------------------------------
// TypeRegistry
// ---------------------------------------------------------------------------

/// Ordered collection of [`TypeDescriptor`]s.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    descriptors: Vec<TypeDescriptor>,
    by_type: HashMap<EntityType, usize>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from descriptors, in the given order.
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = TypeDescriptor>,
    ) -> Result<Self, PoolError> {
        let mut registry = Self::new();
        for d in descriptors {
            registry.register(d)?;
        }
        Ok(registry)
    }

    /// Parse a JSON array of descriptors.
    pub fn from_json(json: &str) -> Result<Self, PoolError> {
        let descriptors: Vec<TypeDescriptor> =
            serde_json::from_str(json).map_err(|e| PoolError::InvalidDescriptors {
                details: e.to_string(),
            })?;
        Self::from_descriptors(descriptors)
    }

    /// Append a descriptor.
    ///
    /// Two names hashing to the same tag are rejected, as is a repeated name.
    pub fn register(&mut self, descriptor: TypeDescriptor) -> Result<EntityType, PoolError> {
        let ty = descriptor.type_id();
        if let Some(&idx) = self.by_type.get(&ty) {
            return Err(PoolError::DuplicateType {
                name: descriptor.name,
                existing: self.descriptors[idx].name.clone(),
            });
        }
        self.by_type.insert(ty, self.descriptors.len());
        self.descriptors.push(descriptor);
        Ok(ty)
    }

    /// Attach the template for `ty`.
    pub fn set_template(&mut self, ty: EntityType, template: NodeHandle) -> Result<(), PoolError> {
        let idx = *self
            .by_type
            .get(&ty)
            .ok_or(PoolError::UnknownType { entity_type: ty })?;
        self.descriptors[idx].template = Some(template);
        Ok(())
    }

    /// Look a descriptor up by tag.
    pub fn get(&self, ty: EntityType) -> Option<&TypeDescriptor> {
        self.by_type.get(&ty).map(|&idx| &self.descriptors[idx])
    }

    /// Look a descriptor up by name.
    pub fn get_by_name(&self, name: &str) -> Option<&TypeDescriptor> {
        self.get(EntityType::from_name(name))
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.descriptors.iter()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether no type is registered.
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
