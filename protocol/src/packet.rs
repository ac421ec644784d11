//! Packet definitions.
//!
//! Every packet is a one-byte id followed by a fixed-size payload. A few ids
//! are shared by both directions with different meanings, so decoding needs
//! to know which way the bytes travelled.

use crate::codec::{PacketReader, PacketWriter};
use crate::error::ProtocolError;
use crate::extension::{Extension, ExtensionSet};
use crate::{FixedLocation, CPE_MAGIC};

pub mod id {
    pub const IDENTIFICATION: u8 = 0x00;
    pub const PING: u8 = 0x01;
    pub const LEVEL_INITIALIZE: u8 = 0x02;
    pub const LEVEL_DATA_CHUNK: u8 = 0x03;
    pub const LEVEL_FINALIZE: u8 = 0x04;
    pub const SET_BLOCK_CLIENT: u8 = 0x05;
    pub const SET_BLOCK: u8 = 0x06;
    pub const SPAWN_PLAYER: u8 = 0x07;
    pub const POSITION: u8 = 0x08;
    pub const POSITION_ORIENTATION_UPDATE: u8 = 0x09;
    pub const POSITION_UPDATE: u8 = 0x0A;
    pub const ORIENTATION_UPDATE: u8 = 0x0B;
    pub const DESPAWN_PLAYER: u8 = 0x0C;
    pub const MESSAGE: u8 = 0x0D;
    pub const DISCONNECT: u8 = 0x0E;
    pub const UPDATE_USER_TYPE: u8 = 0x0F;
    pub const EXT_INFO: u8 = 0x10;
    pub const EXT_ENTRY: u8 = 0x11;
    pub const SET_CLICK_DISTANCE: u8 = 0x12;
    pub const CUSTOM_BLOCK_SUPPORT_LEVEL: u8 = 0x13;
    pub const HOLD_THIS: u8 = 0x14;
    pub const EXT_ADD_PLAYER_NAME: u8 = 0x16;
    pub const EXT_REMOVE_PLAYER_NAME: u8 = 0x18;
    pub const ENV_SET_COLOR: u8 = 0x19;
    pub const ENV_SET_WEATHER_TYPE: u8 = 0x1F;
    pub const EXT_ADD_ENTITY2: u8 = 0x21;
    pub const PLAYER_CLICKED: u8 = 0x22;
    pub const SET_MAP_ENV_URL: u8 = 0x28;
    pub const SET_MAP_ENV_PROPERTY: u8 = 0x29;
}

/// Which way a packet travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to server.
    Serverbound,
    /// Server to client.
    Clientbound,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    PlayerIdentification {
        protocol_version: u8,
        username: String,
        verification_key: String,
        supports_cpe: bool,
    },
    ServerIdentification {
        protocol_version: u8,
        name: String,
        motd: String,
        user_type: u8,
    },
    Ping,
    LevelInitialize,
    LevelDataChunk {
        data: Vec<u8>,
        percent: u8,
    },
    LevelFinalize {
        width: i16,
        height: i16,
        length: i16,
    },
    SetBlockClient {
        x: i16,
        y: i16,
        z: i16,
        destroy: bool,
        block: u8,
    },
    SetBlock {
        x: i16,
        y: i16,
        z: i16,
        block: u8,
    },
    SpawnPlayer {
        id: u8,
        name: String,
        location: FixedLocation,
    },
    Teleport {
        id: u8,
        location: FixedLocation,
    },
    PlayerPosition {
        held_block: u8,
        location: FixedLocation,
    },
    PositionOrientationUpdate {
        id: u8,
        dx: i8,
        dy: i8,
        dz: i8,
        yaw: u8,
        pitch: u8,
    },
    PositionUpdate {
        id: u8,
        dx: i8,
        dy: i8,
        dz: i8,
    },
    OrientationUpdate {
        id: u8,
        yaw: u8,
        pitch: u8,
    },
    DespawnPlayer {
        id: u8,
    },
    Message {
        kind: u8,
        text: String,
    },
    ChatMessage {
        partial: bool,
        text: String,
    },
    Disconnect {
        reason: String,
    },
    UpdateUserType {
        user_type: u8,
    },
    ExtInfo {
        app_name: String,
        extension_count: i16,
    },
    ExtEntry {
        name: String,
        version: i32,
    },
    SetClickDistance {
        distance: i16,
    },
    CustomBlockSupportLevel {
        level: u8,
    },
    HoldThis {
        block: u8,
        prevent_change: bool,
    },
    ExtAddPlayerName {
        name_id: i16,
        player_name: String,
        list_name: String,
        group_name: String,
        group_rank: u8,
    },
    ExtRemovePlayerName {
        name_id: i16,
    },
    EnvSetColor {
        variable: u8,
        red: i16,
        green: i16,
        blue: i16,
    },
    EnvSetWeatherType {
        weather: u8,
    },
    ExtAddEntity2 {
        id: u8,
        display_name: String,
        skin_name: String,
        location: FixedLocation,
    },
    PlayerClicked {
        button: u8,
        action: u8,
        yaw: i16,
        pitch: i16,
        target: u8,
        x: i16,
        y: i16,
        z: i16,
        face: u8,
    },
    SetMapEnvUrl {
        url: String,
    },
    SetMapEnvProperty {
        property: u8,
        value: i32,
    },
}

impl Packet {
    /// Payload size (excluding the id byte) of packet `id` travelling in
    /// `direction`, or `None` if no such packet exists.
    pub fn payload_size(id: u8, direction: Direction, ext: &ExtensionSet) -> Option<usize> {
        use Direction::*;

        let coords = if ext.contains(Extension::ExtEntityPositions) {
            12
        } else {
            6
        };

        let size = match (id, direction) {
            (id::IDENTIFICATION, _) => 130,
            (id::PING, Clientbound) => 0,
            (id::LEVEL_INITIALIZE, Clientbound) => 0,
            (id::LEVEL_DATA_CHUNK, Clientbound) => 1027,
            (id::LEVEL_FINALIZE, Clientbound) => 6,
            (id::SET_BLOCK_CLIENT, Serverbound) => 8,
            (id::SET_BLOCK, Clientbound) => 7,
            (id::SPAWN_PLAYER, Clientbound) => 67 + coords,
            (id::POSITION, _) => 3 + coords,
            (id::POSITION_ORIENTATION_UPDATE, Clientbound) => 6,
            (id::POSITION_UPDATE, Clientbound) => 4,
            (id::ORIENTATION_UPDATE, Clientbound) => 3,
            (id::DESPAWN_PLAYER, Clientbound) => 1,
            (id::MESSAGE, _) => 65,
            (id::DISCONNECT, Clientbound) => 64,
            (id::UPDATE_USER_TYPE, Clientbound) => 1,
            (id::EXT_INFO, _) => 66,
            (id::EXT_ENTRY, _) => 68,
            (id::SET_CLICK_DISTANCE, Clientbound) => 2,
            (id::CUSTOM_BLOCK_SUPPORT_LEVEL, _) => 1,
            (id::HOLD_THIS, Clientbound) => 2,
            (id::EXT_ADD_PLAYER_NAME, Clientbound) => 195,
            (id::EXT_REMOVE_PLAYER_NAME, Clientbound) => 2,
            (id::ENV_SET_COLOR, Clientbound) => 7,
            (id::ENV_SET_WEATHER_TYPE, Clientbound) => 1,
            (id::EXT_ADD_ENTITY2, Clientbound) => 131 + coords,
            (id::PLAYER_CLICKED, Serverbound) => 14,
            (id::SET_MAP_ENV_URL, Clientbound) => 64,
            (id::SET_MAP_ENV_PROPERTY, Clientbound) => 5,
            _ => return None,
        };
        Some(size)
    }

    pub fn id(&self) -> u8 {
        match self {
            Packet::PlayerIdentification { .. } | Packet::ServerIdentification { .. } => {
                id::IDENTIFICATION
            }
            Packet::Ping => id::PING,
            Packet::LevelInitialize => id::LEVEL_INITIALIZE,
            Packet::LevelDataChunk { .. } => id::LEVEL_DATA_CHUNK,
            Packet::LevelFinalize { .. } => id::LEVEL_FINALIZE,
            Packet::SetBlockClient { .. } => id::SET_BLOCK_CLIENT,
            Packet::SetBlock { .. } => id::SET_BLOCK,
            Packet::SpawnPlayer { .. } => id::SPAWN_PLAYER,
            Packet::Teleport { .. } | Packet::PlayerPosition { .. } => id::POSITION,
            Packet::PositionOrientationUpdate { .. } => id::POSITION_ORIENTATION_UPDATE,
            Packet::PositionUpdate { .. } => id::POSITION_UPDATE,
            Packet::OrientationUpdate { .. } => id::ORIENTATION_UPDATE,
            Packet::DespawnPlayer { .. } => id::DESPAWN_PLAYER,
            Packet::Message { .. } | Packet::ChatMessage { .. } => id::MESSAGE,
            Packet::Disconnect { .. } => id::DISCONNECT,
            Packet::UpdateUserType { .. } => id::UPDATE_USER_TYPE,
            Packet::ExtInfo { .. } => id::EXT_INFO,
            Packet::ExtEntry { .. } => id::EXT_ENTRY,
            Packet::SetClickDistance { .. } => id::SET_CLICK_DISTANCE,
            Packet::CustomBlockSupportLevel { .. } => id::CUSTOM_BLOCK_SUPPORT_LEVEL,
            Packet::HoldThis { .. } => id::HOLD_THIS,
            Packet::ExtAddPlayerName { .. } => id::EXT_ADD_PLAYER_NAME,
            Packet::ExtRemovePlayerName { .. } => id::EXT_REMOVE_PLAYER_NAME,
            Packet::EnvSetColor { .. } => id::ENV_SET_COLOR,
            Packet::EnvSetWeatherType { .. } => id::ENV_SET_WEATHER_TYPE,
            Packet::ExtAddEntity2 { .. } => id::EXT_ADD_ENTITY2,
            Packet::PlayerClicked { .. } => id::PLAYER_CLICKED,
            Packet::SetMapEnvUrl { .. } => id::SET_MAP_ENV_URL,
            Packet::SetMapEnvProperty { .. } => id::SET_MAP_ENV_PROPERTY,
        }
    }

    /// Encodes the packet, id byte included.
    pub fn encode(&self, ext: &ExtensionSet) -> Vec<u8> {
        let extended = ext.contains(Extension::ExtEntityPositions);
        let mut w = PacketWriter::new(self.id());

        match self {
            Packet::PlayerIdentification {
                protocol_version,
                username,
                verification_key,
                supports_cpe,
            } => {
                w.write_u8(*protocol_version)
                    .write_string(username)
                    .write_string(verification_key)
                    .write_u8(if *supports_cpe { CPE_MAGIC } else { 0 });
            }
            Packet::ServerIdentification {
                protocol_version,
                name,
                motd,
                user_type,
            } => {
                w.write_u8(*protocol_version)
                    .write_string(name)
                    .write_string(motd)
                    .write_u8(*user_type);
            }
            Packet::Ping | Packet::LevelInitialize => {}
            Packet::LevelDataChunk { data, percent } => {
                let len = data.len().min(crate::level_data::CHUNK_SIZE);
                w.write_i16(len as i16)
                    .write_bytes(data, crate::level_data::CHUNK_SIZE)
                    .write_u8(*percent);
            }
            Packet::LevelFinalize {
                width,
                height,
                length,
            } => {
                w.write_i16(*width).write_i16(*height).write_i16(*length);
            }
            Packet::SetBlockClient {
                x,
                y,
                z,
                destroy,
                block,
            } => {
                w.write_i16(*x)
                    .write_i16(*y)
                    .write_i16(*z)
                    .write_u8(if *destroy { 0 } else { 1 })
                    .write_u8(*block);
            }
            Packet::SetBlock { x, y, z, block } => {
                w.write_i16(*x).write_i16(*y).write_i16(*z).write_u8(*block);
            }
            Packet::SpawnPlayer { id, name, location } => {
                w.write_u8(*id).write_string(name);
                write_location(&mut w, location, extended);
            }
            Packet::Teleport { id, location } => {
                w.write_u8(*id);
                write_location(&mut w, location, extended);
            }
            Packet::PlayerPosition {
                held_block,
                location,
            } => {
                w.write_u8(*held_block);
                write_location(&mut w, location, extended);
            }
            Packet::PositionOrientationUpdate {
                id,
                dx,
                dy,
                dz,
                yaw,
                pitch,
            } => {
                w.write_u8(*id)
                    .write_i8(*dx)
                    .write_i8(*dy)
                    .write_i8(*dz)
                    .write_u8(*yaw)
                    .write_u8(*pitch);
            }
            Packet::PositionUpdate { id, dx, dy, dz } => {
                w.write_u8(*id).write_i8(*dx).write_i8(*dy).write_i8(*dz);
            }
            Packet::OrientationUpdate { id, yaw, pitch } => {
                w.write_u8(*id).write_u8(*yaw).write_u8(*pitch);
            }
            Packet::DespawnPlayer { id } => {
                w.write_u8(*id);
            }
            Packet::Message { kind, text } => {
                w.write_u8(*kind).write_string(text);
            }
            Packet::ChatMessage { partial, text } => {
                w.write_u8(u8::from(*partial)).write_string(text);
            }
            Packet::Disconnect { reason } => {
                w.write_string(reason);
            }
            Packet::UpdateUserType { user_type } => {
                w.write_u8(*user_type);
            }
            Packet::ExtInfo {
                app_name,
                extension_count,
            } => {
                w.write_string(app_name).write_i16(*extension_count);
            }
            Packet::ExtEntry { name, version } => {
                w.write_string(name).write_i32(*version);
            }
            Packet::SetClickDistance { distance } => {
                w.write_i16(*distance);
            }
            Packet::CustomBlockSupportLevel { level } => {
                w.write_u8(*level);
            }
            Packet::HoldThis {
                block,
                prevent_change,
            } => {
                w.write_u8(*block).write_u8(u8::from(*prevent_change));
            }
            Packet::ExtAddPlayerName {
                name_id,
                player_name,
                list_name,
                group_name,
                group_rank,
            } => {
                w.write_i16(*name_id)
                    .write_string(player_name)
                    .write_string(list_name)
                    .write_string(group_name)
                    .write_u8(*group_rank);
            }
            Packet::ExtRemovePlayerName { name_id } => {
                w.write_i16(*name_id);
            }
            Packet::EnvSetColor {
                variable,
                red,
                green,
                blue,
            } => {
                w.write_u8(*variable)
                    .write_i16(*red)
                    .write_i16(*green)
                    .write_i16(*blue);
            }
            Packet::EnvSetWeatherType { weather } => {
                w.write_u8(*weather);
            }
            Packet::ExtAddEntity2 {
                id,
                display_name,
                skin_name,
                location,
            } => {
                w.write_u8(*id)
                    .write_string(display_name)
                    .write_string(skin_name);
                write_location(&mut w, location, extended);
            }
            Packet::PlayerClicked {
                button,
                action,
                yaw,
                pitch,
                target,
                x,
                y,
                z,
                face,
            } => {
                w.write_u8(*button)
                    .write_u8(*action)
                    .write_i16(*yaw)
                    .write_i16(*pitch)
                    .write_u8(*target)
                    .write_i16(*x)
                    .write_i16(*y)
                    .write_i16(*z)
                    .write_u8(*face);
            }
            Packet::SetMapEnvUrl { url } => {
                w.write_string(url);
            }
            Packet::SetMapEnvProperty { property, value } => {
                w.write_u8(*property).write_i32(*value);
            }
        }

        w.finish()
    }

    /// Decodes the payload of packet `id` (id byte already consumed).
    pub fn decode(
        id: u8,
        payload: &[u8],
        direction: Direction,
        ext: &ExtensionSet,
    ) -> Result<Packet, ProtocolError> {
        let size = Self::payload_size(id, direction, ext).ok_or(ProtocolError::UnknownPacket(id))?;
        if payload.len() < size {
            return Err(ProtocolError::ShortRead {
                needed: size,
                available: payload.len(),
            });
        }

        let extended = ext.contains(Extension::ExtEntityPositions);
        let serverbound = direction == Direction::Serverbound;
        let mut r = PacketReader::new(&payload[..size]);

        let packet = match id {
            id::IDENTIFICATION if serverbound => Packet::PlayerIdentification {
                protocol_version: r.read_u8()?,
                username: r.read_string()?,
                verification_key: r.read_string()?,
                supports_cpe: r.read_u8()? == CPE_MAGIC,
            },
            id::IDENTIFICATION => Packet::ServerIdentification {
                protocol_version: r.read_u8()?,
                name: r.read_string()?,
                motd: r.read_string()?,
                user_type: r.read_u8()?,
            },
            id::PING => Packet::Ping,
            id::LEVEL_INITIALIZE => Packet::LevelInitialize,
            id::LEVEL_DATA_CHUNK => {
                let len = r.read_i16()?;
                if !(0..=crate::level_data::CHUNK_SIZE as i16).contains(&len) {
                    return Err(ProtocolError::InvalidValue(format!(
                        "chunk length {}",
                        len
                    )));
                }
                let raw = r.read_bytes(crate::level_data::CHUNK_SIZE)?;
                Packet::LevelDataChunk {
                    data: raw[..len as usize].to_vec(),
                    percent: r.read_u8()?,
                }
            }
            id::LEVEL_FINALIZE => Packet::LevelFinalize {
                width: r.read_i16()?,
                height: r.read_i16()?,
                length: r.read_i16()?,
            },
            id::SET_BLOCK_CLIENT => Packet::SetBlockClient {
                x: r.read_i16()?,
                y: r.read_i16()?,
                z: r.read_i16()?,
                destroy: r.read_u8()? == 0,
                block: r.read_u8()?,
            },
            id::SET_BLOCK => Packet::SetBlock {
                x: r.read_i16()?,
                y: r.read_i16()?,
                z: r.read_i16()?,
                block: r.read_u8()?,
            },
            id::SPAWN_PLAYER => Packet::SpawnPlayer {
                id: r.read_u8()?,
                name: r.read_string()?,
                location: read_location(&mut r, extended)?,
            },
            id::POSITION if serverbound => Packet::PlayerPosition {
                held_block: r.read_u8()?,
                location: read_location(&mut r, extended)?,
            },
            id::POSITION => Packet::Teleport {
                id: r.read_u8()?,
                location: read_location(&mut r, extended)?,
            },
            id::POSITION_ORIENTATION_UPDATE => Packet::PositionOrientationUpdate {
                id: r.read_u8()?,
                dx: r.read_i8()?,
                dy: r.read_i8()?,
                dz: r.read_i8()?,
                yaw: r.read_u8()?,
                pitch: r.read_u8()?,
            },
            id::POSITION_UPDATE => Packet::PositionUpdate {
                id: r.read_u8()?,
                dx: r.read_i8()?,
                dy: r.read_i8()?,
                dz: r.read_i8()?,
            },
            id::ORIENTATION_UPDATE => Packet::OrientationUpdate {
                id: r.read_u8()?,
                yaw: r.read_u8()?,
                pitch: r.read_u8()?,
            },
            id::DESPAWN_PLAYER => Packet::DespawnPlayer { id: r.read_u8()? },
            id::MESSAGE if serverbound => Packet::ChatMessage {
                partial: r.read_u8()? != 0,
                text: r.read_string()?,
            },
            id::MESSAGE => Packet::Message {
                kind: r.read_u8()?,
                text: r.read_string()?,
            },
            id::DISCONNECT => Packet::Disconnect {
                reason: r.read_string()?,
            },
            id::UPDATE_USER_TYPE => Packet::UpdateUserType {
                user_type: r.read_u8()?,
            },
            id::EXT_INFO => Packet::ExtInfo {
                app_name: r.read_string()?,
                extension_count: r.read_i16()?,
            },
            id::EXT_ENTRY => Packet::ExtEntry {
                name: r.read_string()?,
                version: r.read_i32()?,
            },
            id::SET_CLICK_DISTANCE => Packet::SetClickDistance {
                distance: r.read_i16()?,
            },
            id::CUSTOM_BLOCK_SUPPORT_LEVEL => Packet::CustomBlockSupportLevel {
                level: r.read_u8()?,
            },
            id::HOLD_THIS => Packet::HoldThis {
                block: r.read_u8()?,
                prevent_change: r.read_u8()? != 0,
            },
            id::EXT_ADD_PLAYER_NAME => Packet::ExtAddPlayerName {
                name_id: r.read_i16()?,
                player_name: r.read_string()?,
                list_name: r.read_string()?,
                group_name: r.read_string()?,
                group_rank: r.read_u8()?,
            },
            id::EXT_REMOVE_PLAYER_NAME => Packet::ExtRemovePlayerName {
                name_id: r.read_i16()?,
            },
            id::ENV_SET_COLOR => Packet::EnvSetColor {
                variable: r.read_u8()?,
                red: r.read_i16()?,
                green: r.read_i16()?,
                blue: r.read_i16()?,
            },
            id::ENV_SET_WEATHER_TYPE => Packet::EnvSetWeatherType {
                weather: r.read_u8()?,
            },
            id::EXT_ADD_ENTITY2 => Packet::ExtAddEntity2 {
                id: r.read_u8()?,
                display_name: r.read_string()?,
                skin_name: r.read_string()?,
                location: read_location(&mut r, extended)?,
            },
            id::PLAYER_CLICKED => Packet::PlayerClicked {
                button: r.read_u8()?,
                action: r.read_u8()?,
                yaw: r.read_i16()?,
                pitch: r.read_i16()?,
                target: r.read_u8()?,
                x: r.read_i16()?,
                y: r.read_i16()?,
                z: r.read_i16()?,
                face: r.read_u8()?,
            },
            id::SET_MAP_ENV_URL => Packet::SetMapEnvUrl {
                url: r.read_string()?,
            },
            id::SET_MAP_ENV_PROPERTY => Packet::SetMapEnvProperty {
                property: r.read_u8()?,
                value: r.read_i32()?,
            },
            other => return Err(ProtocolError::UnknownPacket(other)),
        };

        Ok(packet)
    }
}

fn write_location(w: &mut PacketWriter, location: &FixedLocation, extended: bool) {
    w.write_coord(location.x, extended)
        .write_coord(location.y, extended)
        .write_coord(location.z, extended)
        .write_u8(location.yaw)
        .write_u8(location.pitch);
}

fn read_location(r: &mut PacketReader<'_>, extended: bool) -> Result<FixedLocation, ProtocolError> {
    Ok(FixedLocation {
        x: r.read_coord(extended)?,
        y: r.read_coord(extended)?,
        z: r.read_coord(extended)?,
        yaw: r.read_u8()?,
        pitch: r.read_u8()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_encoded(packet: &Packet, direction: Direction, ext: &ExtensionSet) -> Packet {
        let bytes = packet.encode(ext);
        let size = Packet::payload_size(bytes[0], direction, ext).unwrap();
        assert_eq!(bytes.len(), size + 1, "size table disagrees for {:?}", packet);
        Packet::decode(bytes[0], &bytes[1..], direction, ext).unwrap()
    }

    #[test]
    fn test_identification_layout() {
        let packet = Packet::PlayerIdentification {
            protocol_version: 7,
            username: "Steve".to_string(),
            verification_key: "-".to_string(),
            supports_cpe: true,
        };
        let bytes = packet.encode(&ExtensionSet::empty());

        assert_eq!(bytes.len(), 131);
        assert_eq!(bytes[0], 0x00);
        assert_eq!(bytes[1], 7);
        assert_eq!(&bytes[2..7], b"Steve");
        assert_eq!(bytes[7], b' ');
        assert_eq!(bytes[130], CPE_MAGIC);
    }

    #[test]
    fn test_shared_ids_decode_by_direction() {
        let ext = ExtensionSet::empty();
        let chat = Packet::ChatMessage {
            partial: true,
            text: "hello".to_string(),
        };
        assert_eq!(decode_encoded(&chat, Direction::Serverbound, &ext), chat);

        let message = Packet::Message {
            kind: 0,
            text: "hello".to_string(),
        };
        assert_eq!(decode_encoded(&message, Direction::Clientbound, &ext), message);
    }

    #[test]
    fn test_extended_positions_change_sizes() {
        let plain = ExtensionSet::empty();
        let wide: ExtensionSet = [Extension::ExtEntityPositions].into_iter().collect();

        assert_eq!(Packet::payload_size(id::POSITION, Direction::Serverbound, &plain), Some(9));
        assert_eq!(Packet::payload_size(id::POSITION, Direction::Serverbound, &wide), Some(15));
        assert_eq!(Packet::payload_size(id::SPAWN_PLAYER, Direction::Clientbound, &wide), Some(79));

        let far = Packet::Teleport {
            id: 3,
            location: FixedLocation {
                x: 40_000 * 32,
                y: 64,
                z: -3,
                yaw: 10,
                pitch: 20,
            },
        };
        assert_eq!(decode_encoded(&far, Direction::Clientbound, &wide), far);
    }

    #[test]
    fn test_serverbound_only_ids_rejected_clientbound() {
        let ext = ExtensionSet::empty();
        assert_eq!(Packet::payload_size(id::SET_BLOCK_CLIENT, Direction::Clientbound, &ext), None);
        assert_eq!(Packet::payload_size(id::SET_BLOCK, Direction::Serverbound, &ext), None);
        assert!(matches!(
            Packet::decode(0x55, &[], Direction::Serverbound, &ext),
            Err(ProtocolError::UnknownPacket(0x55))
        ));
    }

    #[test]
    fn test_truncated_payload_is_error() {
        let ext = ExtensionSet::empty();
        let payload = [0, 1, 0, 2];
        let result = Packet::decode(id::SET_BLOCK_CLIENT, &payload, Direction::Serverbound, &ext);
        assert!(matches!(result, Err(ProtocolError::ShortRead { needed: 8, .. })));
    }

    #[test]
    fn test_set_block_client_mode() {
        let ext = ExtensionSet::empty();
        let payload = [0, 1, 0, 2, 0, 3, 0, 5];
        let packet = Packet::decode(id::SET_BLOCK_CLIENT, &payload, Direction::Serverbound, &ext);
        match packet.unwrap() {
            Packet::SetBlockClient {
                x,
                y,
                z,
                destroy,
                block,
            } => {
                assert_eq!((x, y, z), (1, 2, 3));
                assert!(destroy);
                assert_eq!(block, 5);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_level_chunk_keeps_declared_length() {
        let ext = ExtensionSet::empty();
        let chunk = Packet::LevelDataChunk {
            data: vec![1, 2, 3],
            percent: 42,
        };
        assert_eq!(decode_encoded(&chunk, Direction::Clientbound, &ext), chunk);
    }

    #[test]
    fn test_cpe_packet_sizes_match_encoding() {
        let ext = ExtensionSet::empty();
        let packets = vec![
            Packet::ExtInfo {
                app_name: "x".into(),
                extension_count: 3,
            },
            Packet::ExtAddPlayerName {
                name_id: 1,
                player_name: "a".into(),
                list_name: "b".into(),
                group_name: "c".into(),
                group_rank: 0,
            },
            Packet::EnvSetColor {
                variable: 0,
                red: -1,
                green: -1,
                blue: -1,
            },
            Packet::ExtAddEntity2 {
                id: 1,
                display_name: "a".into(),
                skin_name: "b".into(),
                location: FixedLocation::default(),
            },
            Packet::SetMapEnvProperty {
                property: 4,
                value: 512,
            },
        ];
        for packet in packets {
            decode_encoded(&packet, Direction::Clientbound, &ext);
        }

        let click = Packet::PlayerClicked {
            button: 1,
            action: 0,
            yaw: 64,
            pitch: -32,
            target: 255,
            x: 3,
            y: 4,
            z: 5,
            face: 2,
        };
        assert_eq!(decode_encoded(&click, Direction::Serverbound, &ext), click);
    }
}
