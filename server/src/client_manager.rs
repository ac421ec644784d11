//! Connected-session tracking and player capacity management
//!
//! This module keeps track of every accepted connection and of the subset that
//! completed login, including:
//! - Session registration from accept until teardown
//! - Logged-in players keyed by case-insensitive name
//! - The global connected-player counter and its capacity gate
//!
//! The capacity gate is a lock-free compare-and-swap loop: logins race on a
//! single counter far more often than the maximum is actually reached.

use log::debug;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::session::Session;

/// Registry of sessions and logged-in players
pub struct ClientManager {
    /// Every accepted connection that has not been torn down yet
    sessions: RwLock<Vec<Arc<Session>>>,
    /// Logged-in players by lower-case name
    players: RwLock<HashMap<String, Arc<Session>>>,
    /// Players currently holding a slot
    player_count: AtomicUsize,
    max_players: usize,
    next_session_id: AtomicU64,
}

impl ClientManager {
    pub fn new(max_players: usize) -> Self {
        Self {
            sessions: RwLock::new(Vec::new()),
            players: RwLock::new(HashMap::new()),
            player_count: AtomicUsize::new(0),
            max_players,
            next_session_id: AtomicU64::new(1),
        }
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn add_session(&self, session: Arc<Session>) {
        self.sessions.write().push(session);
    }

    pub fn remove_session(&self, id: u64) -> bool {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|s| s.id() != id);
        sessions.len() != before
    }

    /// Snapshot of every connected session.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().clone()
    }

    /// Registers a logged-in player, refusing a name already in use
    ///
    /// Names are compared case-insensitively.
    pub fn add_player(&self, session: Arc<Session>) -> bool {
        let key = session.name().to_lowercase();
        let mut players = self.players.write();
        if players.contains_key(&key) {
            return false;
        }
        players.insert(key, session);
        true
    }

    pub fn remove_player(&self, name: &str) -> Option<Arc<Session>> {
        self.players.write().remove(&name.to_lowercase())
    }

    pub fn find_player(&self, name: &str) -> Option<Arc<Session>> {
        self.players.read().get(&name.to_lowercase()).cloned()
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        self.players.read().contains_key(&name.to_lowercase())
    }

    /// Snapshot of every logged-in player.
    pub fn players(&self) -> Vec<Arc<Session>> {
        self.players.read().values().cloned().collect()
    }

    /// Claims a player slot; fails once `max_players` are logged in
    ///
    /// The counter never exceeds the maximum, however many callers race.
    pub fn try_reserve_slot(&self) -> bool {
        let mut current = self.player_count.load(Ordering::Acquire);
        loop {
            if current >= self.max_players {
                return false;
            }
            match self.player_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => {
                    debug!("Player slot contention, retrying");
                    current = actual;
                }
            }
        }
    }

    /// Returns a slot claimed with [`try_reserve_slot`](Self::try_reserve_slot).
    pub fn release_slot(&self) {
        let _ = self
            .player_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    pub fn player_count(&self) -> usize {
        self.player_count.load(Ordering::Acquire)
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::test_addr;
    use std::thread;

    fn named(manager: &ClientManager, name: &str) -> Arc<Session> {
        let (session, _rx) = Session::new(manager.next_session_id(), test_addr(), 5.0);
        session.set_name(name);
        session
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(8);
        assert_eq!(manager.len(), 0);
        assert!(manager.is_empty());
        assert_eq!(manager.player_count(), 0);
        assert_eq!(manager.max_players(), 8);
    }

    #[test]
    fn test_add_and_remove_session() {
        let manager = ClientManager::new(8);
        let a = named(&manager, "a");
        let b = named(&manager, "b");
        manager.add_session(Arc::clone(&a));
        manager.add_session(Arc::clone(&b));
        assert_eq!(manager.len(), 2);

        assert!(manager.remove_session(a.id()));
        assert!(!manager.remove_session(a.id()));
        assert_eq!(manager.sessions()[0].id(), b.id());
    }

    #[test]
    fn test_duplicate_name_rejected_case_insensitively() {
        let manager = ClientManager::new(8);
        assert!(manager.add_player(named(&manager, "Alice")));
        assert!(!manager.add_player(named(&manager, "ALICE")));
        assert!(manager.is_name_taken("alice"));
        assert_eq!(manager.find_player("aLiCe").unwrap().name(), "Alice");

        manager.remove_player("Alice");
        assert!(!manager.is_name_taken("alice"));
    }

    #[test]
    fn test_reserve_slot_max_capacity() {
        let manager = ClientManager::new(2);
        assert!(manager.try_reserve_slot());
        assert!(manager.try_reserve_slot());
        assert!(!manager.try_reserve_slot());
        assert_eq!(manager.player_count(), 2);

        manager.release_slot();
        assert!(manager.try_reserve_slot());
    }

    #[test]
    fn test_release_slot_never_underflows() {
        let manager = ClientManager::new(2);
        manager.release_slot();
        assert_eq!(manager.player_count(), 0);
    }

    #[test]
    fn test_concurrent_reservations_respect_maximum() {
        let manager = Arc::new(ClientManager::new(10));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = Arc::clone(&manager);
                thread::spawn(move || (0..10).filter(|_| manager.try_reserve_slot()).count())
            })
            .collect();

        let granted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(granted, 10);
        assert_eq!(manager.player_count(), 10);
    }
}
