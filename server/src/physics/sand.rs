use protocol::block::{self, BlockId};

use super::Simulator;
use crate::level::Level;

fn falls(id: BlockId) -> bool {
    matches!(id, block::SAND | block::GRAVEL)
}

/// Drops sand and gravel straight onto the first solid block beneath them.
///
/// The move is instantaneous: the landing cell is set, then the original
/// cell is cleared. Setting first keeps a block resting on the one that
/// falls from landing in a cell that is about to be filled.
#[derive(Debug, Default)]
pub struct SandSimulator;

impl SandSimulator {
    fn fall(&self, level: &Level, x: i32, y: i32, z: i32, id: BlockId) {
        let mut floor = y;
        while floor > 0 && block::is_passable(level.get_block(x, floor - 1, z)) {
            floor -= 1;
        }
        if floor == y {
            return;
        }
        level.set_block(x, floor, z, id, true);
        level.set_block(x, y, z, block::AIR, true);
    }
}

impl Simulator for SandSimulator {
    fn update(&self, level: &Level, new: BlockId, _old: BlockId, index: usize) {
        let (x, y, z) = level.position(index);
        if falls(new) {
            self.fall(level, x, y, z, new);
        } else if block::is_passable(new) {
            let above = level.get_block(x, y + 1, z);
            if falls(above) {
                self.fall(level, x, y + 1, z, above);
            }
        }
    }

    fn tick(&self, _level: &Level) {}
}
