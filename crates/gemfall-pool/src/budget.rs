//! Work budgets for time-sliced population.
//!
//! Population asks its budget after every unit of work (one clone, or one
//! attribute application) whether it should yield. A unit is never
//! interrupted, so every call makes at least one unit of progress even with
//! a zero budget.

use std::time::{Duration, Instant};

/// Decides when a time-sliced operation yields.
pub trait Budget {
    /// Called after each completed unit of work. `true` means stop now.
    fn exhausted(&mut self) -> bool;
}

/// Wall-clock budget for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameBudget {
    started: Instant,
    limit: Option<Duration>,
}

impl FrameBudget {
    /// Budget of `micros` microseconds, starting now.
    pub fn from_micros(micros: u64) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(Duration::from_micros(micros)),
        }
    }

    /// Never exhausted.
    pub fn unlimited() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
        }
    }

    /// Time spent since the budget was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl Budget for FrameBudget {
    fn exhausted(&mut self) -> bool {
        match self.limit {
            Some(limit) => self.started.elapsed() >= limit,
            None => false,
        }
    }
}

/// Deterministic budget counting units of work.
///
/// `WorkBudget::new(n)` allows `n` budget checks to pass before reporting
/// exhaustion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkBudget {
    remaining: u32,
}

impl WorkBudget {
    pub fn new(units: u32) -> Self {
        Self { remaining: units }
    }

    /// Checks left before exhaustion.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}

impl Budget for WorkBudget {
    fn exhausted(&mut self) -> bool {
        if self.remaining == 0 {
            return true;
        }
        self.remaining -= 1;
        false
    }
}
