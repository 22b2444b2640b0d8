//! Gemfall Engine -- level setup and frame-paced pool warm-up.
//!
//! This crate ties [`gemfall_pool`] to a host frame loop. A [`Level`] owns
//! the scene, the pooled type table and the pool; its [`WarmupLoop`] spreads
//! template cloning over as many frames as the per-frame budget requires.
//!
//! # Quick Start
//!
//! ```
//! use gemfall_engine::prelude::*;
//!
//! let config = EngineConfig::default()
//!     .with_type(TypeDescriptor::new("gem.red", 16).replicated());
//! let mut level = Level::new(config).unwrap();
//! let red = level.scene_mut().create_node("gem.red", None).unwrap();
//! level.register_template("gem.red", red).unwrap();
//!
//! level.start().unwrap();
//! while !level.is_ready() {
//!     level.update().unwrap();
//! }
//!
//! let gem = level.spawn("gem.red", IdRequest::Local, None).unwrap();
//! assert_eq!(level.despawn(gem.node), Ok(Despawn::Recycled));
//! ```
//!
//! [`Level`]: level::Level
//! [`WarmupLoop`]: warmup::WarmupLoop

#![deny(unsafe_code)]

pub mod config;
pub mod level;
pub mod warmup;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the scene crate for convenience.
pub use gemfall_scene;

/// Re-export the pool crate for convenience.
pub use gemfall_pool;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use gemfall_pool::prelude::*;
    pub use gemfall_scene::prelude::*;

    pub use crate::config::{EngineConfig, WarmupConfig};
    pub use crate::level::{Despawn, Level};
    pub use crate::warmup::{
        FrameReport, WarmupDiagnostics, WarmupError, WarmupLoop, WarmupState,
    };
}
