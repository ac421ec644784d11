//! Level world store
//!
//! A level is a dense block grid plus its spawn point, appearance settings
//! and the entities currently placed in it. Every write goes through
//! [`Level::set_block`], which:
//! - writes the cell under the grid lock and releases it
//! - marks the level dirty
//! - sends the change to every session viewing the level
//! - notifies each registered [`Simulator`]
//!
//! Simulators may call back into `set_block` from that notification, so no
//! lock is held while it runs.

use std::iter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use protocol::block::{self, BlockId};
use protocol::{level_data, Location, Packet, ProtocolError};
use serde::{Deserialize, Serialize};

use crate::entity::{despawn_packet, spawn_packet_for, Entity};
use crate::environment::{EnvConfig, EnvMask};
use crate::error::StorageError;
use crate::physics::Simulator;
use crate::session::Session;

/// Height of a player's eyes above their feet.
pub const EYE_HEIGHT: f32 = 1.59375;

/// Save contract between a level and its storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelData {
    pub name: String,
    pub width: u16,
    pub height: u16,
    pub length: u16,
    pub spawn: Location,
    pub env: EnvConfig,
    pub blocks: Vec<BlockId>,
}

pub struct Level {
    name: String,
    width: usize,
    height: usize,
    length: usize,
    blocks: RwLock<Vec<BlockId>>,
    spawn: RwLock<Location>,
    env: RwLock<EnvConfig>,
    dirty: AtomicBool,
    entities: RwLock<Vec<Arc<Entity>>>,
    simulators: Vec<Box<dyn Simulator>>,
}

impl Level {
    /// An all-air level with the spawn at its centre.
    pub fn new(name: &str, width: u16, height: u16, length: u16) -> Self {
        let (width, height, length) = (width as usize, height as usize, length as usize);
        Self {
            name: name.to_string(),
            width,
            height,
            length,
            blocks: RwLock::new(vec![block::AIR; width * height * length]),
            spawn: RwLock::new(Location::new(
                width as f32 / 2.0,
                height as f32 / 2.0,
                length as f32 / 2.0,
                0.0,
                0.0,
            )),
            env: RwLock::new(EnvConfig::default()),
            dirty: AtomicBool::new(false),
            entities: RwLock::new(Vec::new()),
            simulators: Vec::new(),
        }
    }

    /// Dirt up to half height with a grass surface.
    pub fn generate_flat(name: &str, width: u16, height: u16, length: u16) -> Self {
        let level = Self::new(name, width, height, length);
        let surface = level.height / 2;
        {
            let mut blocks = level.blocks.write();
            let layer = level.width * level.length;
            for y in 0..surface {
                let id = if y + 1 == surface { block::GRASS } else { block::DIRT };
                blocks[y * layer..(y + 1) * layer].fill(id);
            }
        }
        *level.spawn.write() = Location::new(
            level.width as f32 / 2.0 + 0.5,
            surface as f32 + EYE_HEIGHT,
            level.length as f32 / 2.0 + 0.5,
            0.0,
            0.0,
        );
        level
    }

    pub fn from_data(data: LevelData) -> Result<Self, StorageError> {
        let level = Self::new(&data.name, data.width, data.height, data.length);
        if data.blocks.len() != level.volume() {
            return Err(StorageError::Corrupt(format!(
                "level '{}' is {}x{}x{} but holds {} blocks",
                data.name,
                data.width,
                data.height,
                data.length,
                data.blocks.len()
            )));
        }
        *level.blocks.write() = data.blocks;
        *level.spawn.write() = data.spawn;
        *level.env.write() = data.env;
        Ok(level)
    }

    pub fn to_data(&self) -> LevelData {
        LevelData {
            name: self.name.clone(),
            width: self.width as u16,
            height: self.height as u16,
            length: self.length as u16,
            spawn: self.spawn(),
            env: self.env(),
            blocks: self.blocks.read().clone(),
        }
    }

    /// Registers a simulator. Levels are shared only after setup, so this takes `&mut self`.
    pub fn add_simulator(&mut self, simulator: Box<dyn Simulator>) {
        self.simulators.push(simulator);
    }

    pub fn with_simulators(mut self, simulators: Vec<Box<dyn Simulator>>) -> Self {
        self.simulators.extend(simulators);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimensions(&self) -> (usize, usize, usize) {
        (self.width, self.height, self.length)
    }

    pub fn volume(&self) -> usize {
        self.width * self.height * self.length
    }

    /// Grid index of a cell, or `None` outside the level.
    pub fn index(&self, x: i32, y: i32, z: i32) -> Option<usize> {
        if x < 0 || y < 0 || z < 0 {
            return None;
        }
        let (x, y, z) = (x as usize, y as usize, z as usize);
        if x >= self.width || y >= self.height || z >= self.length {
            return None;
        }
        Some((y * self.length + z) * self.width + x)
    }

    /// Coordinates of a grid index.
    pub fn position(&self, index: usize) -> (i32, i32, i32) {
        let x = index % self.width;
        let z = (index / self.width) % self.length;
        let y = index / (self.width * self.length);
        (x as i32, y as i32, z as i32)
    }

    /// Block at a cell; air outside the level.
    pub fn get_block(&self, x: i32, y: i32, z: i32) -> BlockId {
        self.index(x, y, z)
            .map_or(block::AIR, |index| self.get_block_index(index))
    }

    pub fn get_block_index(&self, index: usize) -> BlockId {
        self.blocks.read().get(index).copied().unwrap_or(block::AIR)
    }

    /// Writes a cell. Returns false if the cell is outside the level or
    /// already holds `id`.
    pub fn set_block(&self, x: i32, y: i32, z: i32, id: BlockId, broadcast: bool) -> bool {
        match self.index(x, y, z) {
            Some(index) => self.set_block_index(index, id, broadcast),
            None => false,
        }
    }

    pub fn set_block_index(&self, index: usize, id: BlockId, broadcast: bool) -> bool {
        let old = {
            let mut blocks = self.blocks.write();
            match blocks.get_mut(index) {
                Some(cell) if *cell != id => std::mem::replace(cell, id),
                _ => return false,
            }
        };
        self.dirty.store(true, Ordering::Release);

        if broadcast {
            let (x, y, z) = self.position(index);
            for viewer in self.viewers() {
                viewer.send_block(x as i16, y as i16, z as i16, id);
            }
        }

        for simulator in &self.simulators {
            simulator.update(self, id, old, index);
        }
        true
    }

    pub fn spawn(&self) -> Location {
        *self.spawn.read()
    }

    pub fn set_spawn(&self, spawn: Location) {
        *self.spawn.write() = spawn;
        self.dirty.store(true, Ordering::Release);
    }

    pub fn env(&self) -> EnvConfig {
        self.env.read().clone()
    }

    /// Replaces the appearance settings and sends viewers only what changed.
    pub fn set_env(&self, env: EnvConfig) {
        let mask = {
            let mut current = self.env.write();
            let mask = env.diff(&current);
            *current = env.clone();
            mask
        };
        if mask.is_empty() {
            return;
        }
        self.dirty.store(true, Ordering::Release);
        for viewer in self.viewers() {
            for packet in env.packets_for(mask, &viewer.extensions()) {
                viewer.send(&packet);
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    pub fn entities(&self) -> Vec<Arc<Entity>> {
        self.entities.read().clone()
    }

    /// Sessions of the player-controlled entities in this level.
    pub fn viewers(&self) -> Vec<Arc<Session>> {
        self.entities
            .read()
            .iter()
            .filter_map(|entity| entity.session())
            .collect()
    }

    pub fn broadcast(&self, packet: &Packet) {
        for viewer in self.viewers() {
            viewer.send(packet);
        }
    }

    /// Places `entity` in this level and exchanges spawns with everyone already here.
    pub fn add_entity(self: &Arc<Self>, entity: &Arc<Entity>) {
        entity.set_level(Some(self));
        let existing = {
            let mut entities = self.entities.write();
            let existing = entities.clone();
            entities.push(Arc::clone(entity));
            existing
        };

        for other in &existing {
            if let Some(session) = other.session() {
                session.send(&spawn_packet_for(&session, entity));
            }
        }
        if let Some(session) = entity.session() {
            for other in existing.iter().chain(iter::once(entity)) {
                session.send(&spawn_packet_for(&session, other));
            }
        }
    }

    /// Takes `entity` out of this level and despawns it for the remaining viewers.
    pub fn remove_entity(&self, entity: &Entity) -> bool {
        let removed = {
            let mut entities = self.entities.write();
            let before = entities.len();
            entities.retain(|e| e.id() != entity.id());
            entities.len() != before
        };
        if removed {
            entity.set_level(None);
            self.broadcast(&despawn_packet(entity));
        }
        removed
    }

    /// Streams the whole level to `session`, as that client is able to display it.
    pub fn send_snapshot(&self, session: &Session) -> Result<(), ProtocolError> {
        let blocks: Vec<BlockId> = self
            .blocks
            .read()
            .iter()
            .map(|&id| session.visible_block(id))
            .collect();
        let compressed = level_data::compress(&blocks)?;

        session.send(&Packet::LevelInitialize);
        for chunk in level_data::chunk_packets(&compressed) {
            session.send(&chunk);
        }
        session.send(&Packet::LevelFinalize {
            width: self.width as i16,
            height: self.height as i16,
            length: self.length as i16,
        });
        for packet in self.env().packets_for(EnvMask::ALL, &session.extensions()) {
            session.send(&packet);
        }
        Ok(())
    }

    /// Sends each entity's movement since the last flush to the other viewers.
    pub fn flush_movement(&self) {
        let entities = self.entities();
        let viewers = self.viewers();
        for entity in &entities {
            let (movement, current) = entity.take_movement();
            let Some(packet) = movement.packet(entity.id(), current) else {
                continue;
            };
            for viewer in &viewers {
                if viewer.entity().map(|own| own.id()) != Some(entity.id()) {
                    viewer.send(&packet);
                }
            }
        }
    }

    /// Runs one physics step.
    pub fn tick(&self) {
        for simulator in &self.simulators {
            simulator.tick(self);
        }
    }
}
