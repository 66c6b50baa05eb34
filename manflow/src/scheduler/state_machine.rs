//! Pure state for the tick scheduler
//!
//! Nothing here knows about clocks, sockets or encoding. [`Phase`] decides
//! what one flow does on one tick and [`Cycle`] tracks the rotating tick
//! counter and whether the scheduler should keep going. `super::Scheduler`
//! follows their output without consideration.

use std::num::NonZeroU32;

/// What a single enabled flow does on the current tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not this flow's tick
    Pending,
    /// Emit the flow now
    Due,
    /// The flow has reached its repeat limit and will never be emitted again
    Exhausted,
}

impl Phase {
    /// Classify a flow with repeat `limit` (0 for none) that has been emitted
    /// `emitted` times and is assigned to `assigned_tick`, on `current_tick`.
    #[must_use]
    pub fn of(limit: u32, emitted: u64, assigned_tick: u32, current_tick: u32) -> Self {
        if limit != 0 && emitted >= u64::from(limit) {
            Phase::Exhausted
        } else if assigned_tick == current_tick {
            Phase::Due
        } else {
            Phase::Pending
        }
    }
}

/// Outcome of [`Cycle::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Keep ticking
    Continue,
    /// A full cycle passed without a single emission
    Finished,
}

/// The rotating tick counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cycle {
    tick: u32,
    max_tick: NonZeroU32,
    sent: bool,
}

impl Cycle {
    /// Create a new cycle of `max_tick` ticks, starting at tick 0.
    #[must_use]
    pub fn new(max_tick: NonZeroU32) -> Self {
        Self {
            tick: 0,
            max_tick,
            sent: false,
        }
    }

    /// The current tick.
    #[must_use]
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Note that a flow was emitted during the current cycle.
    pub fn mark_sent(&mut self) {
        self.sent = true;
    }

    /// Move to the next tick. When the counter wraps the cycle is finished if
    /// nothing was emitted during it, otherwise a new cycle begins.
    pub fn advance(&mut self) -> Step {
        self.tick = (self.tick + 1) % self.max_tick.get();
        if self.tick != 0 {
            return Step::Continue;
        }
        if !self.sent {
            return Step::Finished;
        }
        self.sent = false;
        Step::Continue
    }
}
