//! Domain events and their dispatch.
//!
//! Handlers run synchronously on the firing task, in registration order,
//! while the handler table is read-locked. A handler must therefore never
//! register another handler, and should do little more than inspect the
//! event and possibly cancel it.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;
use protocol::{BlockId, Location};

use crate::entity::Entity;
use crate::level::Level;
use crate::session::Session;

#[derive(Clone)]
pub enum Event {
    /// A socket was accepted. Cancelling drops it before any session exists.
    Connect { addr: SocketAddr },
    Disconnect { session: Arc<Session> },
    /// Identification finished. Cancelling kicks with the given reason.
    Login { session: Arc<Session> },
    Join { session: Arc<Session>, level: Arc<Level> },
    Quit { session: Arc<Session> },
    Chat { session: Arc<Session>, message: String },
    Click {
        session: Arc<Session>,
        button: u8,
        action: u8,
        target: u8,
        x: i16,
        y: i16,
        z: i16,
        face: u8,
    },
    EntityMove {
        entity: Arc<Entity>,
        from: Location,
        to: Location,
    },
    BlockPlace {
        session: Arc<Session>,
        level: Arc<Level>,
        x: i32,
        y: i32,
        z: i32,
        block: BlockId,
    },
    /// `block` is the block being removed.
    BlockBreak {
        session: Arc<Session>,
        level: Arc<Level>,
        x: i32,
        y: i32,
        z: i32,
        block: BlockId,
    },
    LevelLoad { level: Arc<Level> },
    LevelUnload { level: Arc<Level> },
    LevelSave { level: Arc<Level> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Login,
    Join,
    Quit,
    Chat,
    Click,
    EntityMove,
    BlockPlace,
    BlockBreak,
    LevelLoad,
    LevelUnload,
    LevelSave,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connect { .. } => EventKind::Connect,
            Event::Disconnect { .. } => EventKind::Disconnect,
            Event::Login { .. } => EventKind::Login,
            Event::Join { .. } => EventKind::Join,
            Event::Quit { .. } => EventKind::Quit,
            Event::Chat { .. } => EventKind::Chat,
            Event::Click { .. } => EventKind::Click,
            Event::EntityMove { .. } => EventKind::EntityMove,
            Event::BlockPlace { .. } => EventKind::BlockPlace,
            Event::BlockBreak { .. } => EventKind::BlockBreak,
            Event::LevelLoad { .. } => EventKind::LevelLoad,
            Event::LevelUnload { .. } => EventKind::LevelUnload,
            Event::LevelSave { .. } => EventKind::LevelSave,
        }
    }
}

/// Result of dispatching an event, shared by all of its handlers.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Outcome {
    cancelled: bool,
    reason: Option<String>,
}

impl Outcome {
    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn cancel_with(&mut self, reason: &str) {
        self.cancelled = true;
        self.reason = Some(reason.to_string());
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

pub type Handler = Box<dyn Fn(&Event, &mut Outcome) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<HashMap<EventKind, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&Event, &mut Outcome) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .entry(kind)
            .or_default()
            .push(Box::new(handler));
    }

    /// Runs every handler registered for the event's kind.
    pub fn fire(&self, event: &Event) -> Outcome {
        let mut outcome = Outcome::default();
        if let Some(handlers) = self.handlers.read().get(&event.kind()) {
            for handler in handlers {
                handler(event, &mut outcome);
            }
        }
        outcome
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }
}
