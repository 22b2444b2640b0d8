//! Frame-paced pool warm-up.
//!
//! The [`WarmupLoop`] spreads pool population over several frames so that
//! loading a level never stalls rendering. Each frame:
//!
//! 1. A [`FrameBudget`] is started with the configured number of
//!    microseconds.
//! 2. [`Pool::advance`] clones templates and applies attributes until the
//!    budget runs out or every category is populated.
//! 3. Frame timing is recorded in [`WarmupDiagnostics`].
//!
//! # Example
//!
//! ```
//! use gemfall_engine::config::WarmupConfig;
//! use gemfall_engine::warmup::{WarmupLoop, WarmupState};
//! use gemfall_pool::prelude::*;
//! use gemfall_scene::prelude::*;
//!
//! let mut scene = MemoryScene::new();
//! let gem = scene.create_node("gem", None).unwrap();
//! let registry =
//!     TypeRegistry::from_descriptors([TypeDescriptor::new("gem", 8).with_template(gem)]).unwrap();
//!
//! let mut pool = Pool::new(IdBases::default());
//! let mut warmup = WarmupLoop::new(WarmupConfig::default());
//! warmup.begin(&mut pool, &mut scene, &registry).unwrap();
//! warmup.run_to_completion(&mut pool, &mut scene).unwrap();
//!
//! assert_eq!(warmup.state(), WarmupState::Ready);
//! assert!(pool.is_ready());
//! ```

use std::time::{Duration, Instant};

use gemfall_pool::budget::FrameBudget;
use gemfall_pool::category::Advance;
use gemfall_pool::descriptor::TypeRegistry;
use gemfall_pool::pool::{Pool, ReservedIds};
use gemfall_pool::PoolError;
use gemfall_scene::scene::SceneGraph;
use tracing::{debug, info};

use crate::config::WarmupConfig;

// ---------------------------------------------------------------------------
// WarmupState / WarmupError
// ---------------------------------------------------------------------------

/// Where the warm-up stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmupState {
    /// [`WarmupLoop::begin`] has not run yet.
    Idle,
    WarmingUp,
    Ready,
}

/// Errors produced while warming a pool up.
#[derive(Debug, thiserror::Error)]
pub enum WarmupError {
    /// The pool was still populating after the configured frame limit.
    #[error("pool still populating after {frames} frames")]
    FrameLimit { frames: u64 },

    /// Setup or population failed inside the pool.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

// ---------------------------------------------------------------------------
// WarmupDiagnostics
// ---------------------------------------------------------------------------

/// Timing of the warm-up so far.
#[derive(Debug, Clone, Default)]
pub struct WarmupDiagnostics {
    /// Frames run.
    pub frames: u64,
    /// Wall-clock time spent inside [`Pool::advance`], all frames.
    pub total_time: Duration,
    pub longest_frame: Duration,
    pub last_frame: Duration,
}

/// What one warm-up frame did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameReport {
    /// 1-based index of the frame.
    pub frame: u64,
    pub result: Advance,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// WarmupLoop
// ---------------------------------------------------------------------------

/// Drives pool setup and population one frame at a time.
#[derive(Debug, Clone)]
pub struct WarmupLoop {
    config: WarmupConfig,
    state: WarmupState,
    diagnostics: WarmupDiagnostics,
}

impl WarmupLoop {
    pub fn new(config: WarmupConfig) -> Self {
        Self {
            config,
            state: WarmupState::Idle,
            diagnostics: WarmupDiagnostics::default(),
        }
    }

    /// Reserve identifiers and create categories. Population starts with the
    /// next [`frame`](Self::frame).
    pub fn begin<S: SceneGraph + ?Sized>(
        &mut self,
        pool: &mut Pool,
        scene: &mut S,
        registry: &TypeRegistry,
    ) -> Result<ReservedIds, WarmupError> {
        let reserved = pool.reserve_ranges(scene, registry)?;
        pool.create_categories(scene, registry)?;
        self.state = WarmupState::WarmingUp;
        self.diagnostics = WarmupDiagnostics::default();
        Ok(reserved)
    }

    /// Run one frame of population.
    ///
    /// Once the pool is ready further frames do nothing and report
    /// [`Advance::Done`].
    pub fn frame<S: SceneGraph + ?Sized>(
        &mut self,
        pool: &mut Pool,
        scene: &mut S,
    ) -> Result<FrameReport, WarmupError> {
        if self.state == WarmupState::Ready {
            return Ok(FrameReport {
                frame: self.diagnostics.frames,
                result: Advance::Done,
                elapsed: Duration::ZERO,
            });
        }

        let started = Instant::now();
        let mut budget = FrameBudget::from_micros(self.config.frame_budget_us);
        let result = pool.advance(scene, &mut budget)?;
        let elapsed = started.elapsed();

        let d = &mut self.diagnostics;
        d.frames += 1;
        d.total_time += elapsed;
        d.last_frame = elapsed;
        d.longest_frame = d.longest_frame.max(elapsed);

        debug!(
            frame = d.frames,
            elapsed_us = elapsed.as_micros() as u64,
            pending = pool.pending_len(),
            "warm-up frame"
        );
        if result == Advance::Done {
            self.state = WarmupState::Ready;
            info!(
                frames = d.frames,
                total_us = d.total_time.as_micros() as u64,
                longest_us = d.longest_frame.as_micros() as u64,
                "pool warm-up complete"
            );
        } else {
            self.state = WarmupState::WarmingUp;
        }

        Ok(FrameReport {
            frame: self.diagnostics.frames,
            result,
            elapsed,
        })
    }

    /// Run frames until the pool is ready. Returns the number of frames the
    /// warm-up took in total.
    pub fn run_to_completion<S: SceneGraph + ?Sized>(
        &mut self,
        pool: &mut Pool,
        scene: &mut S,
    ) -> Result<u64, WarmupError> {
        while self.state != WarmupState::Ready {
            if let Some(max) = self.config.max_frames {
                if self.diagnostics.frames >= max {
                    return Err(WarmupError::FrameLimit {
                        frames: self.diagnostics.frames,
                    });
                }
            }
            self.frame(pool, scene)?;
        }
        Ok(self.diagnostics.frames)
    }

    /// Forget progress, e.g. after the pool was stopped.
    pub fn reset(&mut self) {
        self.state = WarmupState::Idle;
        self.diagnostics = WarmupDiagnostics::default();
    }

    // -- accessors ----------------------------------------------------------

    pub fn state(&self) -> WarmupState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == WarmupState::Ready
    }

    pub fn config(&self) -> &WarmupConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &WarmupDiagnostics {
        &self.diagnostics
    }
}
