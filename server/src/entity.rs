//! Entities and the identity registry.
//!
//! An entity is any avatar placed in a level. Player-controlled entities are
//! owned by their [`Session`], and keep a weak reference back to it so that
//! level broadcasts can reach the connection.

use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use protocol::{Extension, FixedLocation, Location, Packet, SELF_ID};

use crate::level::Level;
use crate::session::Session;

/// Number of assignable identities; ids run from 0 to 254.
pub const MAX_ENTITIES: usize = SELF_ID as usize;

/// Largest per-axis move, in fixed-point units, sent as a relative update.
pub const RELATIVE_MOVE_LIMIT: i32 = 32;

struct Motion {
    current: Location,
    /// Location as last broadcast to observers.
    previous: Location,
}

pub struct Entity {
    id: u8,
    name: String,
    display_name: RwLock<String>,
    list_name: RwLock<String>,
    skin: RwLock<String>,
    level: RwLock<Weak<Level>>,
    motion: Mutex<Motion>,
    owner: Option<Weak<Session>>,
}

impl Entity {
    pub fn new(id: u8, name: &str, owner: Option<Weak<Session>>, location: Location) -> Self {
        Self {
            id,
            name: name.to_string(),
            display_name: RwLock::new(name.to_string()),
            list_name: RwLock::new(name.to_string()),
            skin: RwLock::new(name.to_string()),
            level: RwLock::new(Weak::new()),
            motion: Mutex::new(Motion {
                current: location,
                previous: location,
            }),
            owner,
        }
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn display_name(&self) -> String {
        self.display_name.read().clone()
    }

    pub fn set_display_name(&self, name: &str) {
        *self.display_name.write() = name.to_string();
    }

    pub fn list_name(&self) -> String {
        self.list_name.read().clone()
    }

    pub fn set_list_name(&self, name: &str) {
        *self.list_name.write() = name.to_string();
    }

    pub fn skin(&self) -> String {
        self.skin.read().clone()
    }

    pub fn set_skin(&self, skin: &str) {
        *self.skin.write() = skin.to_string();
    }

    /// The owning session, if this entity is player-controlled and still connected.
    pub fn session(&self) -> Option<Arc<Session>> {
        self.owner.as_ref().and_then(Weak::upgrade)
    }

    pub fn level(&self) -> Option<Arc<Level>> {
        self.level.read().upgrade()
    }

    pub fn set_level(&self, level: Option<&Arc<Level>>) {
        *self.level.write() = level.map(Arc::downgrade).unwrap_or_default();
    }

    pub fn location(&self) -> Location {
        self.motion.lock().current
    }

    pub fn previous_location(&self) -> Location {
        self.motion.lock().previous
    }

    /// Records a move that observers learn about on the next tick.
    pub fn set_location(&self, location: Location) {
        self.motion.lock().current = location;
    }

    /// Moves the entity and marks the move as already broadcast.
    pub fn place(&self, location: Location) {
        let mut motion = self.motion.lock();
        motion.current = location;
        motion.previous = location;
    }

    /// Classifies the movement since the last broadcast and resets the baseline.
    pub fn take_movement(&self) -> (Movement, FixedLocation) {
        let mut motion = self.motion.lock();
        let previous = motion.previous.to_fixed();
        let current = motion.current.to_fixed();
        motion.previous = motion.current;
        (Movement::classify(previous, current), current)
    }
}

/// Smallest update able to express a movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Movement {
    None,
    Position { dx: i8, dy: i8, dz: i8 },
    Orientation { yaw: u8, pitch: u8 },
    PositionOrientation { dx: i8, dy: i8, dz: i8, yaw: u8, pitch: u8 },
    /// Too far for a relative move.
    Teleport,
}

impl Movement {
    pub fn classify(previous: FixedLocation, current: FixedLocation) -> Movement {
        let (dx, dy, dz) = (
            current.x - previous.x,
            current.y - previous.y,
            current.z - previous.z,
        );
        let moved = dx != 0 || dy != 0 || dz != 0;
        let turned = current.yaw != previous.yaw || current.pitch != previous.pitch;

        if [dx, dy, dz].iter().any(|d| d.abs() > RELATIVE_MOVE_LIMIT) {
            return Movement::Teleport;
        }

        match (moved, turned) {
            (false, false) => Movement::None,
            (true, false) => Movement::Position {
                dx: dx as i8,
                dy: dy as i8,
                dz: dz as i8,
            },
            (false, true) => Movement::Orientation {
                yaw: current.yaw,
                pitch: current.pitch,
            },
            (true, true) => Movement::PositionOrientation {
                dx: dx as i8,
                dy: dy as i8,
                dz: dz as i8,
                yaw: current.yaw,
                pitch: current.pitch,
            },
        }
    }

    pub fn packet(&self, id: u8, current: FixedLocation) -> Option<Packet> {
        match *self {
            Movement::None => None,
            Movement::Position { dx, dy, dz } => Some(Packet::PositionUpdate { id, dx, dy, dz }),
            Movement::Orientation { yaw, pitch } => {
                Some(Packet::OrientationUpdate { id, yaw, pitch })
            }
            Movement::PositionOrientation {
                dx,
                dy,
                dz,
                yaw,
                pitch,
            } => Some(Packet::PositionOrientationUpdate {
                id,
                dx,
                dy,
                dz,
                yaw,
                pitch,
            }),
            Movement::Teleport => Some(Packet::Teleport {
                id,
                location: current,
            }),
        }
    }
}

/// Id an observer uses for `entity`: its own avatar is always [`SELF_ID`].
fn id_for(viewer: &Session, entity: &Entity) -> u8 {
    match viewer.entity() {
        Some(own) if own.id() == entity.id() => SELF_ID,
        _ => entity.id(),
    }
}

/// Packet that makes `entity` appear for `viewer`.
pub fn spawn_packet_for(viewer: &Session, entity: &Entity) -> Packet {
    let id = id_for(viewer, entity);
    let location = entity.location().to_fixed();
    if viewer.supports(Extension::ExtPlayerList) {
        Packet::ExtAddEntity2 {
            id,
            display_name: entity.display_name(),
            skin_name: entity.skin(),
            location,
        }
    } else {
        Packet::SpawnPlayer {
            id,
            name: entity.display_name(),
            location,
        }
    }
}

/// Absolute position of `entity` for `viewer`.
pub fn teleport_packet_for(viewer: &Session, entity: &Entity) -> Packet {
    Packet::Teleport {
        id: id_for(viewer, entity),
        location: entity.location().to_fixed(),
    }
}

pub fn despawn_packet(entity: &Entity) -> Packet {
    Packet::DespawnPlayer { id: entity.id() }
}

pub fn list_add_packet(entity: &Entity) -> Packet {
    Packet::ExtAddPlayerName {
        name_id: entity.id() as i16,
        player_name: entity.name().to_string(),
        list_name: entity.list_name(),
        group_name: "Players".to_string(),
        group_rank: 0,
    }
}

pub fn list_remove_packet(entity: &Entity) -> Packet {
    Packet::ExtRemovePlayerName {
        name_id: entity.id() as i16,
    }
}

/// Assigns entity identities.
pub struct EntityRegistry {
    slots: RwLock<Vec<Option<Arc<Entity>>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(vec![None; MAX_ENTITIES]),
        }
    }

    /// Builds an entity with the lowest free id and registers it.
    ///
    /// Returns `None` without calling `build` when every id is taken.
    pub fn allocate(&self, build: impl FnOnce(u8) -> Entity) -> Option<Arc<Entity>> {
        let mut slots = self.slots.write();
        let free = slots.iter().position(Option::is_none)?;
        let entity = Arc::new(build(free as u8));
        slots[free] = Some(Arc::clone(&entity));
        Some(entity)
    }

    /// Releases `id`, returning the entity that held it.
    pub fn remove(&self, id: u8) -> Option<Arc<Entity>> {
        self.slots.write().get_mut(id as usize).and_then(Option::take)
    }

    pub fn get(&self, id: u8) -> Option<Arc<Entity>> {
        self.slots.read().get(id as usize).cloned().flatten()
    }

    pub fn all(&self) -> Vec<Arc<Entity>> {
        self.slots.read().iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.slots.read().iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
