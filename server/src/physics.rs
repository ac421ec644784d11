//! Block physics.
//!
//! A [`Simulator`] is told synchronously about every cell change on its level
//! and is ticked once per world update. Simulators that need a delay park
//! grid indices in a [`BlockUpdateQueue`] and re-evaluate them when they fire.
//!
//! All mutations go back through [`Level::set_block`], so physics obeys the
//! same bounds checks and broadcasts as player edits. Implementations must not
//! hold their own locks while calling it: a change they make is reported to
//! every simulator on the level, themselves included.

mod fluid;
mod sand;

use std::collections::BTreeMap;

use log::warn;
use protocol::BlockId;

use crate::level::Level;

pub use fluid::{Fluid, FluidSimulator};
pub use sand::SandSimulator;

/// Pending events a queue holds before it is dropped wholesale.
pub const QUEUE_CAPACITY: usize = 65_536;

pub trait Simulator: Send + Sync {
    /// Called after the cell at `index` changed from `old` to `new`.
    fn update(&self, level: &Level, new: BlockId, old: BlockId, index: usize);

    /// Called once per world tick.
    fn tick(&self, level: &Level);
}

/// Delayed re-evaluation events keyed by the tick they fire on.
#[derive(Debug)]
pub struct BlockUpdateQueue {
    now: u64,
    pending: BTreeMap<u64, Vec<usize>>,
    len: usize,
    capacity: usize,
}

impl BlockUpdateQueue {
    pub fn new() -> Self {
        Self::with_capacity(QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            now: 0,
            pending: BTreeMap::new(),
            len: 0,
            capacity,
        }
    }

    /// Schedules `index` to fire after `delay` ticks (at least one).
    ///
    /// If the queue is full, every pending event is discarded, the new one
    /// included, and `false` is returned.
    pub fn push(&mut self, index: usize, delay: u64) -> bool {
        if self.len >= self.capacity {
            warn!(
                "Block update queue exceeded {} events, dropping all pending updates",
                self.capacity
            );
            self.clear();
            return false;
        }
        self.pending
            .entry(self.now + delay.max(1))
            .or_default()
            .push(index);
        self.len += 1;
        true
    }

    /// Advances one tick and returns the events that reached zero.
    pub fn tick(&mut self) -> Vec<usize> {
        self.now += 1;
        let mut fired = Vec::new();
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() > self.now {
                break;
            }
            fired.extend(entry.remove());
        }
        self.len -= fired.len();
        fired
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for BlockUpdateQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// The simulators every loaded level runs.
pub fn default_simulators() -> Vec<Box<dyn Simulator>> {
    vec![
        Box::new(FluidSimulator::new(Fluid::Water)),
        Box::new(FluidSimulator::new(Fluid::Lava)),
        Box::new(SandSimulator),
    ]
}
