//! # Voxel World Server Library
//!
//! This library provides the authoritative server for the classic voxel
//! world protocol (version 7) and a set of its extensions. It owns the
//! block grids, admits and tracks players, runs the block physics and
//! relays every change to the clients that can see it.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative World
//! Every block edit goes through [`level::Level::set_block`], which writes
//! the grid, marks the level dirty, pushes the change to each viewer in a
//! form that viewer can display and notifies the physics simulators.
//! Clients never change the world directly: a rejected edit is answered
//! with a revert.
//!
//! ### Session Lifecycle
//! Each connection moves through `Negotiating → InGame → Closed`:
//! - Identification, version and name checks
//! - Optional extension negotiation (exact name and version match)
//! - Capacity-gated login, entity allocation and level snapshot
//! - Idempotent teardown that releases everything login took
//!
//! ### Broadcasting
//! Sends are non-blocking pushes onto a per-session queue drained by that
//! session's writer task, so broadcasting never waits on a slow client and
//! no registry lock is ever held across socket I/O.
//!
//! ## Architecture Design
//!
//! ### Task Per Connection
//! Every accepted socket gets a read loop ([`connection::Connection`]), a
//! writer task and a keep-alive task. The [`server::Server`] core runs three
//! periodic loops next to them: the world tick (movement flush and physics),
//! the save sweep and the optional heartbeat.
//!
//! ### Shared State
//! Registries (sessions, players, entities, levels, commands, handlers,
//! plugins) each sit behind their own `parking_lot` lock, held only for
//! the duration of a lookup or a copy of the membership list. Per-session
//! negotiated fields are atomics. The player count is a lock-free
//! compare-and-swap counter.
//!
//! ## Module Organization
//!
//! ### Protocol Sessions (`session`, `connection`, `network`)
//! - Session state, outbound queue and close signal
//! - Handshake, negotiation and in-game packet dispatch
//! - TCP accept loop, writer and keep-alive tasks
//!
//! ### World (`level`, `environment`, `physics`, `storage`)
//! - Block grid, snapshots, membership and movement flush
//! - Maskable environment properties
//! - Water, lava and sand/gravel simulators over a delayed update queue
//! - Pluggable level persistence, gzip-compressed on disk
//!
//! ### Players (`entity`, `client_manager`)
//! - Entity identities, movement classification and spawn packets
//! - Session and player registries, capacity counter
//!
//! ### Server Core (`server`, `event`, `command`, `plugin`, `heartbeat`)
//! - Composition root and periodic loops
//! - Cancellable domain events
//! - Permission-gated commands run on their own task
//! - Statically linked plugins
//! - Server list heartbeat
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use server::config::ServerConfig;
//! use server::server::Server;
//! use server::storage::FileLevelStorage;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let storage = Arc::new(FileLevelStorage::new(&config.level_dir));
//!     let listener = TcpListener::bind(config.bind_address()).await?;
//!
//!     // Loads (or generates) the main level and registers built-in commands
//!     let server = Server::new(config, storage);
//!     server.serve(listener).await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod command;
pub mod config;
pub mod connection;
pub mod entity;
pub mod environment;
pub mod error;
pub mod event;
pub mod heartbeat;
pub mod level;
pub mod network;
pub mod physics;
pub mod plugin;
pub mod server;
pub mod session;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use protocol::{Direction, Packet};
    use tokio::sync::mpsc::Receiver;

    use crate::config::ServerConfig;
    use crate::server::Server;
    use crate::session::{Outbound, Session};
    use crate::storage::MemoryLevelStorage;

    pub fn test_addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    /// Decodes everything queued for `session` so far.
    pub fn drain(session: &Session, rx: &mut Receiver<Outbound>) -> Vec<Packet> {
        let ext = session.extensions();
        let mut packets = Vec::new();
        while let Ok(item) = rx.try_recv() {
            let Outbound::Data(bytes) = item else {
                continue;
            };
            let packet = Packet::decode(bytes[0], &bytes[1..], Direction::Clientbound, &ext)
                .expect("queued packet should decode");
            packets.push(packet);
        }
        packets
    }

    pub fn test_config() -> ServerConfig {
        ServerConfig {
            name: "Test Server".to_string(),
            max_players: 8,
            default_level_size: (16, 16, 16),
            ..ServerConfig::default()
        }
    }

    pub fn test_server() -> Arc<Server> {
        Server::new(test_config(), Arc::new(MemoryLevelStorage::new()))
    }

    /// Logs in a player without a socket, as if negotiation had finished.
    pub fn login(
        server: &Arc<Server>,
        name: &str,
    ) -> Result<(Arc<Session>, Receiver<Outbound>), String> {
        let id = server.clients().next_session_id();
        let (session, rx) = Session::new(id, test_addr(), server.config().reach_distance);
        server.clients().add_session(Arc::clone(&session));
        session.set_name(name);
        server.login(&session).map(|()| (session, rx))
    }
}
