use parking_lot::Mutex;
use protocol::block::{self, BlockId};

use super::{BlockUpdateQueue, Simulator};
use crate::level::Level;

/// Horizontal neighbours first, then the cell below.
const SPREAD_OFFSETS: [(i32, i32, i32); 5] = [
    (1, 0, 0),
    (-1, 0, 0),
    (0, 0, 1),
    (0, 0, -1),
    (0, -1, 0),
];

/// Cells whose fluid may flow into a given cell: its horizontal neighbours and the one above.
const INFLOW_OFFSETS: [(i32, i32, i32); 5] = [
    (1, 0, 0),
    (-1, 0, 0),
    (0, 0, 1),
    (0, 0, -1),
    (0, 1, 0),
];

/// Water spread is blocked within this Chebyshev distance of a sponge.
pub const SPONGE_RADIUS: i32 = 2;
/// Radius re-examined when a sponge disappears.
pub const SPONGE_RELEASE_RADIUS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fluid {
    Water,
    Lava,
}

impl Fluid {
    /// The flowing form, the only one that spreads.
    pub fn active(self) -> BlockId {
        match self {
            Fluid::Water => block::WATER,
            Fluid::Lava => block::LAVA,
        }
    }

    /// Ticks between a cell becoming active and it spreading.
    pub fn delay(self) -> u64 {
        match self {
            Fluid::Water => 5,
            Fluid::Lava => 30,
        }
    }

    fn is_opposite(self, id: BlockId) -> bool {
        match self {
            Fluid::Water => block::is_lava(id),
            Fluid::Lava => block::is_water(id),
        }
    }
}

/// Spreads one kind of fluid through air.
pub struct FluidSimulator {
    fluid: Fluid,
    queue: Mutex<BlockUpdateQueue>,
}

impl FluidSimulator {
    pub fn new(fluid: Fluid) -> Self {
        Self {
            fluid,
            queue: Mutex::new(BlockUpdateQueue::new()),
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    fn schedule(&self, index: usize) {
        self.queue.lock().push(index, self.fluid.delay());
    }

    fn schedule_active_around(&self, level: &Level, index: usize, offsets: &[(i32, i32, i32)]) {
        let (x, y, z) = level.position(index);
        for (dx, dy, dz) in offsets {
            if let Some(neighbour) = level.index(x + dx, y + dy, z + dz) {
                if level.get_block_index(neighbour) == self.fluid.active() {
                    self.schedule(neighbour);
                }
            }
        }
    }

    fn spread(&self, level: &Level, index: usize) {
        if level.get_block_index(index) != self.fluid.active() {
            return;
        }
        let (x, y, z) = level.position(index);

        for (dx, dy, dz) in SPREAD_OFFSETS {
            let (tx, ty, tz) = (x + dx, y + dy, z + dz);
            if level.index(tx, ty, tz).is_none() {
                continue;
            }
            let target = level.get_block(tx, ty, tz);

            if target == block::AIR {
                if self.fluid == Fluid::Water && near_sponge(level, tx, ty, tz, SPONGE_RADIUS) {
                    continue;
                }
                level.set_block(tx, ty, tz, self.fluid.active(), true);
            } else if self.fluid.is_opposite(target) {
                match self.fluid {
                    Fluid::Water => {
                        level.set_block(tx, ty, tz, block::STONE, true);
                    }
                    Fluid::Lava => {
                        level.set_block(x, y, z, block::STONE, true);
                        return;
                    }
                }
            }
        }
    }

    fn absorb(&self, level: &Level, index: usize) {
        let (x, y, z) = level.position(index);
        for_cube(x, y, z, SPONGE_RADIUS, |cx, cy, cz| {
            if block::is_water(level.get_block(cx, cy, cz)) {
                level.set_block(cx, cy, cz, block::AIR, true);
            }
        });
    }

    fn release(&self, level: &Level, index: usize) {
        let (x, y, z) = level.position(index);
        for_cube(x, y, z, SPONGE_RELEASE_RADIUS, |cx, cy, cz| {
            if let Some(cell) = level.index(cx, cy, cz) {
                if level.get_block_index(cell) == block::WATER {
                    self.schedule(cell);
                }
            }
        });
    }
}

impl Simulator for FluidSimulator {
    fn update(&self, level: &Level, new: BlockId, old: BlockId, index: usize) {
        if new == self.fluid.active() {
            self.schedule(index);
        } else if new == block::AIR {
            self.schedule_active_around(level, index, &INFLOW_OFFSETS);
        }

        if self.fluid == Fluid::Water {
            if new == block::SPONGE {
                self.absorb(level, index);
            } else if old == block::SPONGE {
                self.release(level, index);
            }
        }
    }

    fn tick(&self, level: &Level) {
        let fired = self.queue.lock().tick();
        for index in fired {
            self.spread(level, index);
        }
    }
}

fn for_cube(x: i32, y: i32, z: i32, radius: i32, mut f: impl FnMut(i32, i32, i32)) {
    for cy in y - radius..=y + radius {
        for cz in z - radius..=z + radius {
            for cx in x - radius..=x + radius {
                f(cx, cy, cz);
            }
        }
    }
}

fn near_sponge(level: &Level, x: i32, y: i32, z: i32, radius: i32) -> bool {
    let mut found = false;
    for_cube(x, y, z, radius, |cx, cy, cz| {
        found |= level.get_block(cx, cy, cz) == block::SPONGE;
    });
    found
}
