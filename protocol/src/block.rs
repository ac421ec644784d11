//! Block ids.

pub type BlockId = u8;

pub const AIR: BlockId = 0;
pub const STONE: BlockId = 1;
pub const GRASS: BlockId = 2;
pub const DIRT: BlockId = 3;
pub const COBBLESTONE: BlockId = 4;
pub const WOOD: BlockId = 5;
pub const SAPLING: BlockId = 6;
pub const BEDROCK: BlockId = 7;
pub const WATER: BlockId = 8;
pub const STILL_WATER: BlockId = 9;
pub const LAVA: BlockId = 10;
pub const STILL_LAVA: BlockId = 11;
pub const SAND: BlockId = 12;
pub const GRAVEL: BlockId = 13;
pub const SPONGE: BlockId = 19;
pub const GLASS: BlockId = 20;
pub const OBSIDIAN: BlockId = 49;

/// Highest id of the original block set.
pub const MAX_CLASSIC: BlockId = 49;

/// Highest id added by custom block support level 1.
pub const MAX_CUSTOM: BlockId = 65;

/// Custom block support level advertised by the server.
pub const CUSTOM_BLOCK_LEVEL: u8 = 1;

/// Highest block id a client at the given support level understands.
pub fn max_block(support_level: u8) -> BlockId {
    if support_level >= CUSTOM_BLOCK_LEVEL {
        MAX_CUSTOM
    } else {
        MAX_CLASSIC
    }
}

/// Maps a custom block to the closest classic block.
///
/// Classic blocks map to themselves.
pub fn fallback(id: BlockId) -> BlockId {
    match id {
        50 => 44, // cobblestone slab -> slab
        51 => 39, // rope -> brown mushroom
        52 => SAND,
        53 => AIR, // snow
        54 => LAVA, // fire
        55 => 33,
        56 => 25,
        57 => DIRT,
        58 => 29,
        59 => 28,
        60 => GLASS, // ice
        61 => 42,
        62 => OBSIDIAN,
        63 => 36,
        64 => WOOD,
        65 => STONE,
        other if other > MAX_CUSTOM => AIR,
        other => other,
    }
}

/// Blocks a falling block passes through.
pub fn is_passable(id: BlockId) -> bool {
    matches!(id, AIR | WATER | STILL_WATER | LAVA | STILL_LAVA)
}

pub fn is_water(id: BlockId) -> bool {
    matches!(id, WATER | STILL_WATER)
}

pub fn is_lava(id: BlockId) -> bool {
    matches!(id, LAVA | STILL_LAVA)
}
