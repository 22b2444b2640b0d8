//! A playable level: scene, type table, pool and warm-up bundled together.
//!
//! The host builds template subtrees in [`Level::scene_mut`], attaches them
//! with [`Level::register_template`], calls [`Level::start`], and then calls
//! [`Level::update`] once per frame until [`Level::is_ready`]. Gameplay goes
//! through [`Level::spawn`] and [`Level::despawn`].

use gemfall_pool::category::{Allocation, IdRequest, RestoreReport};
use gemfall_pool::config::IdBases;
use gemfall_pool::descriptor::TypeRegistry;
use gemfall_pool::dump::PoolDump;
use gemfall_pool::pool::{CreateMode, Pool, ReservedIds};
use gemfall_pool::{FreeError, PoolError};
use gemfall_scene::entity_type::EntityType;
use gemfall_scene::node::NodeHandle;
use gemfall_scene::scene::{MemoryScene, SceneGraph};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::warmup::{FrameReport, WarmupError, WarmupLoop};

/// What [`Level::despawn`] did with a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Despawn {
    /// Returned to its pool.
    Recycled,
    /// Not pooled; removed from the scene.
    Destroyed,
}

/// Owns everything one level needs.
#[derive(Debug)]
pub struct Level {
    scene: MemoryScene,
    registry: TypeRegistry,
    pool: Pool,
    warmup: WarmupLoop,
    /// Configured bases; [`Level::start`] raises them past the host's ids.
    ids: IdBases,
}

impl Level {
    pub fn new(config: EngineConfig) -> Result<Self, PoolError> {
        let registry = config.registry()?;
        Ok(Self {
            scene: MemoryScene::new(),
            registry,
            pool: Pool::new(config.ids),
            warmup: WarmupLoop::new(config.warmup),
            ids: config.ids,
        })
    }

    // -- accessors ----------------------------------------------------------

    pub fn scene(&self) -> &MemoryScene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut MemoryScene {
        &mut self.scene
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn warmup(&self) -> &WarmupLoop {
        &self.warmup
    }

    pub fn is_ready(&self) -> bool {
        self.pool.is_ready()
    }

    // -- lifecycle ----------------------------------------------------------

    /// Attach the template subtree for the type called `name`.
    pub fn register_template(&mut self, name: &str, template: NodeHandle) -> Result<(), PoolError> {
        self.registry
            .set_template(EntityType::from_name(name), template)
    }

    /// Reserve identifiers and create every category.
    ///
    /// The replicated bases are raised past every id the scene has handed
    /// out automatically, so nodes the host built before the level started
    /// never sit inside the replicated spans. Peers must build the same host
    /// scene to agree on the bases.
    pub fn start(&mut self) -> Result<ReservedIds, WarmupError> {
        let mut bases = self.ids;
        if let Some(next) = self.scene.next_auto_node_id() {
            bases.replicated_node = bases.replicated_node.max(next);
        }
        if let Some(next) = self.scene.next_auto_component_id() {
            bases.replicated_component = bases.replicated_component.max(next);
        }
        if bases != self.ids {
            info!(
                replicated_node = bases.replicated_node,
                replicated_component = bases.replicated_component,
                "replicated bases raised past host ids"
            );
        }
        self.pool.set_bases(bases)?;
        let reserved = self
            .warmup
            .begin(&mut self.pool, &mut self.scene, &self.registry)?;
        info!(types = self.registry.len(), "level started");
        Ok(reserved)
    }

    /// One frame of warm-up.
    pub fn update(&mut self) -> Result<FrameReport, WarmupError> {
        self.warmup.frame(&mut self.pool, &mut self.scene)
    }

    /// Finish warm-up in as many frames as it takes.
    pub fn finish_warmup(&mut self) -> Result<u64, WarmupError> {
        self.warmup
            .run_to_completion(&mut self.pool, &mut self.scene)
    }

    pub fn set_create_mode(&mut self, mode: CreateMode) {
        self.pool.set_create_mode(mode);
    }

    /// End of a match: return in-use instances to their pools and go back
    /// to local create mode. The pools stay warm.
    pub fn restore_all(&mut self, selective: bool) -> RestoreReport {
        self.pool.restore_all(&mut self.scene, selective)
    }

    /// Return every instance to its pool, then tear the pool down.
    pub fn teardown(&mut self) -> RestoreReport {
        let report = self.pool.restore_all(&mut self.scene, false);
        self.pool.stop(&mut self.scene);
        self.warmup.reset();
        info!(restored = report.restored, failed = report.failed, "level torn down");
        report
    }

    // -- gameplay -----------------------------------------------------------

    /// Take an instance of the type called `type_name` from its pool.
    pub fn spawn(
        &mut self,
        type_name: &str,
        request: IdRequest,
        parent: Option<NodeHandle>,
    ) -> Result<Allocation, PoolError> {
        self.pool.allocate(
            &mut self.scene,
            EntityType::from_name(type_name),
            request,
            parent,
        )
    }

    /// Give a node back. Pooled instances are recycled; anything else is
    /// removed from the scene.
    pub fn despawn(&mut self, node: NodeHandle) -> Result<Despawn, FreeError> {
        match self.pool.free(&mut self.scene, node) {
            Ok(()) => Ok(Despawn::Recycled),
            Err(FreeError::UnknownType { .. }) => {
                debug!(node = %node, "despawned node is not pooled, destroying");
                self.scene.remove(node);
                Ok(Despawn::Destroyed)
            }
            Err(e) => Err(e),
        }
    }

    /// Move a spawned instance to a replicated id.
    pub fn replicate(&mut self, node: NodeHandle, request: IdRequest) -> Result<u32, PoolError> {
        self.pool
            .change_to_replicated_id(&mut self.scene, node, request)
    }

    // -- introspection ------------------------------------------------------

    pub fn dump(&self) -> PoolDump {
        self.pool.dump(&self.scene)
    }

    /// The one-line pool listing shown on the debug console.
    pub fn debug_console(&self) -> String {
        self.pool.debug_summary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gemfall_pool::descriptor::TypeDescriptor;

    fn level() -> Level {
        let config = EngineConfig::default()
            .with_type(TypeDescriptor::new("gem", 4).replicated())
            .with_type(TypeDescriptor::new("bomb", 2));
        let mut level = Level::new(config).unwrap();
        let gem = level.scene_mut().create_node("gem", None).unwrap();
        let bomb = level.scene_mut().create_node("bomb", None).unwrap();
        level.register_template("gem", gem).unwrap();
        level.register_template("bomb", bomb).unwrap();
        level
    }

    #[test]
    fn unknown_template_name_is_refused() {
        let mut level = level();
        let node = level.scene_mut().create_node("ghost", None).unwrap();
        let err = level.register_template("ghost", node).unwrap_err();
        assert!(matches!(err, PoolError::UnknownType { .. }));
    }

    #[test]
    fn despawn_recycles_pooled_and_destroys_the_rest() {
        let mut level = level();
        level.start().unwrap();
        level.finish_warmup().unwrap();

        let gem = level.spawn("gem", IdRequest::Local, None).unwrap();
        assert_eq!(level.despawn(gem.node), Ok(Despawn::Recycled));
        assert!(level.scene().contains(gem.node));

        let stray = level.scene_mut().create_node("stray", None).unwrap();
        assert_eq!(level.despawn(stray), Ok(Despawn::Destroyed));
        assert!(!level.scene().contains(stray));

        assert!(matches!(
            level.despawn(gem.node),
            Err(FreeError::DoubleFree { .. })
        ));
    }

    #[test]
    fn teardown_returns_everything_and_stops() {
        let mut level = level();
        level.start().unwrap();
        level.finish_warmup().unwrap();
        level.set_create_mode(CreateMode::Replicated);
        for _ in 0..3 {
            level.spawn("gem", IdRequest::Replicated, None).unwrap();
        }
        level.spawn("bomb", IdRequest::Local, None).unwrap();
        assert_eq!(level.debug_console(), "gem(1/4) bomb(1/2)");

        let report = level.teardown();
        assert_eq!(report.restored, 4);
        assert_eq!(level.pool().categories().count(), 0);
        assert!(!level.warmup().is_ready());
    }
}
