//! Per-connection read loop.
//!
//! A [`Connection`] owns the read half of a client socket. It drives the
//! session through identification and extension negotiation, hands it to
//! [`Server::login`], and then dispatches in-game packets until the peer
//! goes away, breaks the protocol or is kicked.
//!
//! Packet handlers never await. Anything slow (commands) is handed off to
//! its own task, so a session only ever blocks on its own socket.

use std::sync::Arc;

use log::{debug, info, warn};
use protocol::block::{self, BlockId};
use protocol::{
    Direction, Extension, ExtensionSet, FixedLocation, Location, Packet, ProtocolError, APP_NAME,
    PROTOCOL_VERSION, STRING_LENGTH,
};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::command::CommandSender;
use crate::entity::teleport_packet_for;
use crate::event::Event;
use crate::network::wait_until_set;
use crate::server::{Server, NAME_IN_USE};
use crate::session::Session;
use crate::utils::{is_valid_chat, is_valid_name};

/// Longest chat line a client may assemble from partial messages.
pub const MAX_CHAT_LENGTH: usize = 4096;

#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The client is disconnected with this reason.
    #[error("kicked: {0}")]
    Kicked(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Reads one serverbound packet, sized by the extensions active right now.
pub async fn read_packet<R>(reader: &mut R, ext: &ExtensionSet) -> Result<Packet, ConnectionError>
where
    R: AsyncRead + Unpin,
{
    let id = reader.read_u8().await?;
    let size = Packet::payload_size(id, Direction::Serverbound, ext)
        .ok_or(ProtocolError::UnknownPacket(id))?;
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    Ok(Packet::decode(id, &payload, Direction::Serverbound, ext)?)
}

/// Where the connection is in the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiation {
    AwaitingIdentification,
    AwaitingExtInfo,
    /// Extension entries still to come.
    AwaitingExtEntries(u16),
    AwaitingBlockSupport,
    Complete,
}

pub struct Connection<R> {
    server: Arc<Server>,
    session: Arc<Session>,
    reader: BufReader<R>,
    negotiation: Negotiation,
    /// Partial chat line being assembled.
    chat: String,
}

impl<R: AsyncRead + Unpin> Connection<R> {
    pub fn new(server: Arc<Server>, session: Arc<Session>, reader: R) -> Self {
        Self {
            server,
            session,
            reader: BufReader::new(reader),
            negotiation: Negotiation::AwaitingIdentification,
            chat: String::new(),
        }
    }

    /// Reads and handles packets until the session ends, then tears it down.
    pub async fn run(mut self) {
        let mut closed = self.session.closed_signal();
        let result = loop {
            let ext = self.session.extensions();
            let packet = tokio::select! {
                packet = read_packet(&mut self.reader, &ext) => packet,
                _ = wait_until_set(&mut closed) => break Ok(()),
            };
            if let Err(e) = packet.and_then(|packet| self.handle(packet)) {
                break Err(e);
            }
        };

        match result {
            Ok(()) => self.server.disconnect(&self.session, None),
            Err(ConnectionError::Kicked(reason)) => self.server.kick(&self.session, &reason),
            Err(ConnectionError::Protocol(e)) => {
                warn!("Protocol error from {}: {}", self.session.addr(), e);
                self.server.kick(&self.session, &e.to_string());
            }
            Err(ConnectionError::Io(e)) => {
                debug!("Connection {} closed: {}", self.session.addr(), e);
                self.server.disconnect(&self.session, None);
            }
        }
    }

    /// Handles one packet according to the handshake stage.
    pub fn handle(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        match (self.negotiation, packet) {
            (
                Negotiation::AwaitingIdentification,
                Packet::PlayerIdentification {
                    protocol_version,
                    username,
                    supports_cpe,
                    ..
                },
            ) => self.identify(protocol_version, &username, supports_cpe),
            (Negotiation::AwaitingExtInfo, Packet::ExtInfo { app_name, extension_count }) => {
                debug!(
                    "{} runs {} with {} extensions",
                    self.session.name(),
                    app_name,
                    extension_count
                );
                match u16::try_from(extension_count) {
                    Ok(count) if count > 0 => {
                        self.negotiation = Negotiation::AwaitingExtEntries(count);
                        Ok(())
                    }
                    _ => self.finish_negotiation(),
                }
            }
            (Negotiation::AwaitingExtEntries(remaining), Packet::ExtEntry { name, version }) => {
                if let Some(ext) = Extension::negotiate(&name, version) {
                    self.session.enable_extension(ext);
                }
                if remaining > 1 {
                    self.negotiation = Negotiation::AwaitingExtEntries(remaining - 1);
                    Ok(())
                } else {
                    self.finish_negotiation()
                }
            }
            (Negotiation::AwaitingBlockSupport, Packet::CustomBlockSupportLevel { level }) => {
                self.session
                    .set_block_support_level(level.min(block::CUSTOM_BLOCK_LEVEL));
                self.complete_login()
            }
            (Negotiation::Complete, packet) => self.dispatch(packet),
            (_, packet) => Err(ProtocolError::UnexpectedPacket(packet.id()).into()),
        }
    }

    fn identify(
        &mut self,
        protocol_version: u8,
        username: &str,
        supports_cpe: bool,
    ) -> Result<(), ConnectionError> {
        if protocol_version != PROTOCOL_VERSION {
            return Err(ConnectionError::Kicked(format!(
                "Unsupported protocol version {} (server speaks {})",
                protocol_version, PROTOCOL_VERSION
            )));
        }
        if !is_valid_name(username) {
            return Err(ConnectionError::Kicked("Invalid name!".to_string()));
        }
        if self.server.clients().is_name_taken(username) {
            return Err(ConnectionError::Kicked(NAME_IN_USE.to_string()));
        }
        self.session.set_name(username);
        info!("{} identified from {}", username, self.session.addr());

        if !supports_cpe {
            return self.complete_login();
        }
        self.session.send(&Packet::ExtInfo {
            app_name: APP_NAME.to_string(),
            extension_count: Extension::ALL.len() as i16,
        });
        for ext in Extension::ALL {
            self.session.send(&Packet::ExtEntry {
                name: ext.name().to_string(),
                version: ext.version(),
            });
        }
        self.negotiation = Negotiation::AwaitingExtInfo;
        Ok(())
    }

    fn finish_negotiation(&mut self) -> Result<(), ConnectionError> {
        if self.session.supports(Extension::CustomBlocks) {
            self.session.send(&Packet::CustomBlockSupportLevel {
                level: block::CUSTOM_BLOCK_LEVEL,
            });
            self.negotiation = Negotiation::AwaitingBlockSupport;
            return Ok(());
        }
        self.complete_login()
    }

    fn complete_login(&mut self) -> Result<(), ConnectionError> {
        self.negotiation = Negotiation::Complete;
        self.server
            .login(&self.session)
            .map_err(ConnectionError::Kicked)
    }

    fn dispatch(&mut self, packet: Packet) -> Result<(), ConnectionError> {
        match packet {
            Packet::SetBlockClient {
                x,
                y,
                z,
                destroy,
                block,
            } => {
                self.handle_block(x, y, z, destroy, block);
                Ok(())
            }
            Packet::PlayerPosition {
                held_block,
                location,
            } => {
                self.handle_move(held_block, location);
                Ok(())
            }
            Packet::ChatMessage { partial, text } => {
                self.handle_chat(partial, text);
                Ok(())
            }
            Packet::PlayerClicked {
                button,
                action,
                target,
                x,
                y,
                z,
                face,
                ..
            } if self.session.supports(Extension::PlayerClick) => {
                self.server.fire(&Event::Click {
                    session: Arc::clone(&self.session),
                    button,
                    action,
                    target,
                    x,
                    y,
                    z,
                    face,
                });
                Ok(())
            }
            packet => Err(ProtocolError::UnexpectedPacket(packet.id()).into()),
        }
    }

    fn handle_block(&self, x: i16, y: i16, z: i16, destroy: bool, block: BlockId) {
        let Some(entity) = self.session.entity() else {
            return;
        };
        let Some(level) = entity.level() else {
            return;
        };
        let (bx, by, bz) = (x as i32, y as i32, z as i32);
        if level.index(bx, by, bz).is_none() {
            return;
        }
        let current = level.get_block(bx, by, bz);
        let revert = || self.session.send_block(x, y, z, current);

        if !destroy && block > self.session.max_block() {
            self.session.send_message("Invalid block type!");
            revert();
            return;
        }
        if !within_reach(entity.location(), bx, by, bz, self.session.reach()) {
            debug!("{} tried to edit out of reach at {},{},{}", self.session.name(), x, y, z);
            revert();
            return;
        }

        let session = Arc::clone(&self.session);
        let event = if destroy {
            Event::BlockBreak {
                session,
                level: Arc::clone(&level),
                x: bx,
                y: by,
                z: bz,
                block: current,
            }
        } else {
            Event::BlockPlace {
                session,
                level: Arc::clone(&level),
                x: bx,
                y: by,
                z: bz,
                block,
            }
        };
        if self.server.fire(&event).is_cancelled() {
            revert();
            return;
        }

        let new = if destroy { block::AIR } else { block };
        if !level.set_block(bx, by, bz, new, true) {
            revert();
        }
    }

    fn handle_move(&self, held_block: u8, location: FixedLocation) {
        if self.session.supports(Extension::HeldBlock) {
            self.session.set_held_block(held_block);
        }
        let Some(entity) = self.session.entity() else {
            return;
        };
        let from = entity.location();
        let to = location.to_location();
        if from.same_on_wire(&to) {
            return;
        }

        let outcome = self.server.fire(&Event::EntityMove {
            entity: Arc::clone(&entity),
            from,
            to,
        });
        if outcome.is_cancelled() {
            self.session.send(&teleport_packet_for(&self.session, &entity));
            return;
        }
        entity.set_location(to);
    }

    fn handle_chat(&mut self, partial: bool, text: String) {
        if partial && self.session.supports(Extension::LongerMessages) {
            // Chunks arrive trimmed; the client filled every one of them.
            self.chat.push_str(&format!("{:<width$}", text, width = STRING_LENGTH));
            if self.chat.len() > MAX_CHAT_LENGTH {
                self.chat.clear();
                self.session.send_message("Message too long!");
            }
            return;
        }
        self.chat.push_str(&text);
        let line = std::mem::take(&mut self.chat);
        let line = line.trim_end();
        if line.is_empty() {
            return;
        }

        if !is_valid_chat(line) {
            self.session.send_message("Invalid characters in chat message!");
            return;
        }
        if let Some(command) = line.strip_prefix('/') {
            self.server
                .execute_command(CommandSender::Player(Arc::clone(&self.session)), command);
            return;
        }

        let outcome = self.server.fire(&Event::Chat {
            session: Arc::clone(&self.session),
            message: line.to_string(),
        });
        if outcome.is_cancelled() {
            return;
        }
        info!("<{}> {}", self.session.name(), line);
        self.server
            .broadcast_message(&format!("<{}> {}", self.session.name(), line));
    }
}

/// Whether block `(x, y, z)` is within `reach` of `eye`, measured to the
/// closest point of the block's unit cube.
pub fn within_reach(eye: Location, x: i32, y: i32, z: i32, reach: f32) -> bool {
    let axis = |eye: f32, cell: i32| eye.clamp(cell as f32, cell as f32 + 1.0) - eye;
    let (dx, dy, dz) = (axis(eye.x, x), axis(eye.y, y), axis(eye.z, z));
    dx * dx + dy * dy + dz * dz <= reach * reach
}
