//! Per-connection state shared between the connection's own read loop and
//! everything that broadcasts to it.
//!
//! The read loop is the only writer of the negotiated fields; broadcasters
//! only read them. All of them are atomics so a broadcast never has to take
//! a lock owned by another connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use log::{debug, warn};
use parking_lot::RwLock;
use protocol::block::{self, BlockId};
use protocol::codec::to_fixed;
use protocol::{Extension, ExtensionSet, Packet};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};

use crate::entity::Entity;
use crate::utils::wrap_message;

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Negotiating = 0,
    InGame = 1,
    Closed = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Negotiating,
            1 => SessionState::InGame,
            _ => SessionState::Closed,
        }
    }
}

/// Packets that may wait for the writer before the client is dropped as stalled.
pub const OUTBOUND_CAPACITY: usize = 16_384;

/// Items queued for the connection's writer task.
#[derive(Debug)]
pub enum Outbound {
    Data(Vec<u8>),
    /// Flush what is queued, then shut the socket.
    Close,
}

pub struct Session {
    id: u64,
    addr: SocketAddr,
    state: AtomicU8,
    name: OnceLock<String>,
    extensions: AtomicU32,
    block_support: AtomicU8,
    /// Reach in fixed-point units.
    reach: AtomicU16,
    held_block: AtomicU8,
    outbound: mpsc::Sender<Outbound>,
    closed: watch::Sender<bool>,
    entity: RwLock<Option<Arc<Entity>>>,
}

impl Session {
    /// Creates a session and the receiving end of its outbound queue.
    pub fn new(
        id: u64,
        addr: SocketAddr,
        reach: f32,
    ) -> (Arc<Session>, mpsc::Receiver<Outbound>) {
        let (outbound, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (closed, _) = watch::channel(false);
        let session = Session {
            id,
            addr,
            state: AtomicU8::new(SessionState::Negotiating as u8),
            name: OnceLock::new(),
            extensions: AtomicU32::new(0),
            block_support: AtomicU8::new(0),
            reach: AtomicU16::new(to_fixed(reach).clamp(0, i16::MAX as i32) as u16),
            held_block: AtomicU8::new(block::AIR),
            outbound,
            closed,
            entity: RwLock::new(None),
        };
        (Arc::new(session), rx)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Moves from `from` to `to`; fails if the session is no longer in `from`.
    pub fn advance(&self, from: SessionState, to: SessionState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Marks the session closed and returns the state it was in.
    pub fn mark_closed(&self) -> SessionState {
        SessionState::from_u8(self.state.swap(SessionState::Closed as u8, Ordering::AcqRel))
    }

    /// Login name, empty until identification succeeds.
    pub fn name(&self) -> &str {
        self.name.get().map(String::as_str).unwrap_or("")
    }

    pub fn set_name(&self, name: &str) -> bool {
        self.name.set(name.to_string()).is_ok()
    }

    pub fn extensions(&self) -> ExtensionSet {
        ExtensionSet::from_bits(self.extensions.load(Ordering::Acquire))
    }

    pub fn supports(&self, ext: Extension) -> bool {
        self.extensions().contains(ext)
    }

    pub fn enable_extension(&self, ext: Extension) {
        let mut set = ExtensionSet::empty();
        set.insert(ext);
        self.extensions.fetch_or(set.bits(), Ordering::AcqRel);
    }

    pub fn block_support_level(&self) -> u8 {
        self.block_support.load(Ordering::Acquire)
    }

    pub fn set_block_support_level(&self, level: u8) {
        self.block_support.store(level, Ordering::Release);
    }

    /// Reach distance in blocks.
    pub fn reach(&self) -> f32 {
        self.reach.load(Ordering::Acquire) as f32 / 32.0
    }

    pub fn reach_fixed(&self) -> i16 {
        self.reach.load(Ordering::Acquire) as i16
    }

    pub fn held_block(&self) -> BlockId {
        self.held_block.load(Ordering::Acquire)
    }

    pub fn set_held_block(&self, block: BlockId) {
        self.held_block.store(block, Ordering::Release);
    }

    /// Puts `block` in the client's hand. Needs HeldBlock.
    pub fn hold_block(&self, block: BlockId, locked: bool) -> bool {
        if !self.supports(Extension::HeldBlock) {
            return false;
        }
        self.set_held_block(block);
        self.send(&Packet::HoldThis {
            block,
            prevent_change: locked,
        });
        true
    }

    /// Highest block id this client understands.
    pub fn max_block(&self) -> BlockId {
        block::max_block(self.block_support_level())
    }

    /// Translates a block into one this client can display.
    pub fn visible_block(&self, block: BlockId) -> BlockId {
        if block > self.max_block() {
            block::fallback(block)
        } else {
            block
        }
    }

    pub fn entity(&self) -> Option<Arc<Entity>> {
        self.entity.read().clone()
    }

    pub fn set_entity(&self, entity: Option<Arc<Entity>>) {
        *self.entity.write() = entity;
    }

    /// Queues a packet for the writer task. Silently dropped once closed.
    pub fn send(&self, packet: &Packet) {
        if self.is_closed() {
            return;
        }
        let bytes = packet.encode(&self.extensions());
        match self.outbound.try_send(Outbound::Data(bytes)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Session {} is not reading, dropping it", self.id);
                self.close();
            }
            Err(TrySendError::Closed(_)) => debug!("Session {} writer already gone", self.id),
        }
    }

    /// Sends a chat line, wrapped over as many packets as needed.
    pub fn send_message(&self, text: &str) {
        for line in wrap_message(text) {
            self.send(&Packet::Message { kind: 0, text: line });
        }
    }

    pub fn send_block(&self, x: i16, y: i16, z: i16, block: BlockId) {
        self.send(&Packet::SetBlock {
            x,
            y,
            z,
            block: self.visible_block(block),
        });
    }

    /// Stops the keep-alive and the read loop, and shuts the socket once
    /// everything already queued has been written.
    pub fn close(&self) {
        self.closed.send_replace(true);
        let _ = self.outbound.try_send(Outbound::Close);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Receiver that flips to `true` when [`close`](Self::close) is called.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain, test_addr};

    #[test]
    fn test_state_transitions_are_checked() {
        let (session, _rx) = Session::new(1, test_addr(), 5.0);
        assert_eq!(session.state(), SessionState::Negotiating);

        assert!(!session.advance(SessionState::InGame, SessionState::Closed));
        assert!(session.advance(SessionState::Negotiating, SessionState::InGame));
        assert!(!session.advance(SessionState::Negotiating, SessionState::InGame));

        assert_eq!(session.mark_closed(), SessionState::InGame);
        assert_eq!(session.mark_closed(), SessionState::Closed);
    }

    #[test]
    fn test_name_set_once() {
        let (session, _rx) = Session::new(1, test_addr(), 5.0);
        assert_eq!(session.name(), "");
        assert!(session.set_name("Alice"));
        assert!(!session.set_name("Mallory"));
        assert_eq!(session.name(), "Alice");
    }

    #[test]
    fn test_extensions_accumulate() {
        let (session, _rx) = Session::new(1, test_addr(), 5.0);
        session.enable_extension(Extension::LongerMessages);
        session.enable_extension(Extension::HeldBlock);

        assert!(session.supports(Extension::HeldBlock));
        assert!(session.supports(Extension::LongerMessages));
        assert!(!session.supports(Extension::CustomBlocks));
        assert_eq!(
            session.extensions().iter().collect::<Vec<_>>(),
            vec![Extension::HeldBlock, Extension::LongerMessages]
        );
    }

    #[test]
    fn test_hold_block_needs_held_block() {
        let (session, mut rx) = Session::new(1, test_addr(), 5.0);
        assert!(!session.hold_block(block::STONE, true));
        assert!(drain(&session, &mut rx).is_empty());

        session.enable_extension(Extension::HeldBlock);
        assert!(session.hold_block(block::STONE, true));
        assert_eq!(session.held_block(), block::STONE);
        assert_eq!(
            drain(&session, &mut rx),
            vec![Packet::HoldThis { block: block::STONE, prevent_change: true }]
        );
    }

    #[test]
    fn test_full_queue_drops_stalled_client() {
        let (session, _rx) = Session::new(1, test_addr(), 5.0);
        for _ in 0..OUTBOUND_CAPACITY {
            session.send(&Packet::Ping);
        }
        assert!(!session.is_closed());

        session.send(&Packet::Ping);
        assert!(session.is_closed());
    }

    #[test]
    fn test_custom_blocks_fall_back_without_support() {
        let (session, mut rx) = Session::new(1, test_addr(), 5.0);
        session.send_block(1, 2, 3, 60);
        session.set_block_support_level(1);
        session.send_block(1, 2, 3, 60);

        let packets = drain(&session, &mut rx);
        assert_eq!(
            packets,
            vec![
                Packet::SetBlock { x: 1, y: 2, z: 3, block: block::GLASS },
                Packet::SetBlock { x: 1, y: 2, z: 3, block: 60 },
            ]
        );
    }

    #[test]
    fn test_nothing_sent_after_close() {
        let (session, mut rx) = Session::new(1, test_addr(), 5.0);
        session.send(&Packet::Ping);
        session.close();
        session.send(&Packet::Ping);

        assert!(matches!(rx.try_recv(), Ok(Outbound::Data(_))));
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close)));
        assert!(rx.try_recv().is_err());
        assert!(session.is_closed());
    }

    #[test]
    fn test_reach_is_fixed_point() {
        let (session, _rx) = Session::new(1, test_addr(), 5.0);
        assert_eq!(session.reach_fixed(), 160);
        assert_eq!(session.reach(), 5.0);
    }
}
