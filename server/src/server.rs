//! Server core
//!
//! [`Server`] is the composition root. It owns every registry, each behind
//! its own lock, and the collaborators the core talks to:
//! - sessions and players ([`ClientManager`])
//! - entity identities ([`EntityRegistry`])
//! - loaded levels, with the main level always present
//! - event handlers, commands and plugins
//! - the level storage backend
//!
//! [`Server::serve`] runs the accept loop alongside three periodic loops:
//! the world tick (movement flush and physics), the save sweep and the
//! optional heartbeat. No registry lock is ever held across an `.await`;
//! broadcasting is a non-blocking queue push per session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, error, info, warn};
use parking_lot::RwLock;
use protocol::{Extension, Location, Packet, PROTOCOL_VERSION};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::client_manager::ClientManager;
use crate::command::{
    builtin_commands, parse_command_line, permission_granted, Command, CommandSender,
};
use crate::config::ServerConfig;
use crate::entity::{
    list_add_packet, list_remove_packet, teleport_packet_for, Entity, EntityRegistry,
};
use crate::error::{ServerError, StorageError};
use crate::event::{Event, EventBus, Outcome};
use crate::heartbeat::{Heartbeat, HeartbeatReport};
use crate::level::Level;
use crate::network;
use crate::physics::default_simulators;
use crate::plugin::Plugin;
use crate::session::{Session, SessionState};
use crate::storage::LevelStorage;
use crate::utils::generate_salt;

pub const SERVER_FULL: &str = "Server full!";
pub const NAME_IN_USE: &str = "Name already in use!";
pub const SHUTDOWN_NOTICE: &str = "Server shutting down";

/// User type reported to operators in the server identification.
const OPERATOR_USER_TYPE: u8 = 0x64;

pub struct Server {
    config: ServerConfig,
    clients: ClientManager,
    entities: EntityRegistry,
    main_level: Arc<Level>,
    levels: RwLock<HashMap<String, Arc<Level>>>,
    events: EventBus,
    commands: RwLock<HashMap<String, Arc<Command>>>,
    plugins: RwLock<Vec<Arc<dyn Plugin>>>,
    operators: RwLock<Vec<String>>,
    storage: Arc<dyn LevelStorage>,
    salt: String,
    url: RwLock<Option<String>>,
    shutdown: watch::Sender<bool>,
}

impl Server {
    /// Builds the server and loads its main level, generating flat terrain
    /// when storage has none.
    pub fn new(config: ServerConfig, storage: Arc<dyn LevelStorage>) -> Arc<Self> {
        let main_level = Arc::new(open_main_level(&config, storage.as_ref()));
        let (shutdown, _) = watch::channel(false);

        let server = Arc::new(Self {
            clients: ClientManager::new(config.max_players),
            entities: EntityRegistry::new(),
            levels: RwLock::new(HashMap::from([(
                main_level.name().to_string(),
                Arc::clone(&main_level),
            )])),
            main_level,
            events: EventBus::new(),
            commands: RwLock::new(HashMap::new()),
            plugins: RwLock::new(Vec::new()),
            operators: RwLock::new(config.operators.clone()),
            storage,
            salt: generate_salt(),
            url: RwLock::new(None),
            shutdown,
            config,
        });

        for command in builtin_commands() {
            server.register_command(command);
        }
        server
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn clients(&self) -> &ClientManager {
        &self.clients
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// Public play URL reported by the heartbeat directory.
    pub fn url(&self) -> Option<String> {
        self.url.read().clone()
    }

    fn set_url(&self, url: String) {
        let mut current = self.url.write();
        if current.as_deref() != Some(url.as_str()) {
            info!("Server URL: {}", url);
            *current = Some(url);
        }
    }

    pub fn fire(&self, event: &Event) -> Outcome {
        self.events.fire(event)
    }

    // Players

    /// Admits a session that finished identification and negotiation.
    ///
    /// On failure nothing has been committed and the returned reason should
    /// be sent to the client as a kick.
    pub fn login(self: &Arc<Self>, session: &Arc<Session>) -> Result<(), String> {
        let outcome = self.fire(&Event::Login {
            session: Arc::clone(session),
        });
        if outcome.is_cancelled() {
            return Err(outcome.reason().unwrap_or("Login cancelled").to_string());
        }

        if !self.clients.try_reserve_slot() {
            return Err(SERVER_FULL.to_string());
        }

        let spawn = self.main_level.spawn();
        let Some(entity) = self.entities.allocate(|id| {
            Entity::new(id, session.name(), Some(Arc::downgrade(session)), spawn)
        }) else {
            self.clients.release_slot();
            return Err(SERVER_FULL.to_string());
        };

        if !self.clients.add_player(Arc::clone(session)) {
            self.entities.remove(entity.id());
            self.clients.release_slot();
            return Err(NAME_IN_USE.to_string());
        }
        session.set_entity(Some(Arc::clone(&entity)));

        if !session.advance(SessionState::Negotiating, SessionState::InGame) {
            session.set_entity(None);
            self.clients.remove_player(session.name());
            self.entities.remove(entity.id());
            self.clients.release_slot();
            return Err("Disconnected".to_string());
        }

        info!(
            "{} logged in from {} as entity {}",
            session.name(),
            session.addr(),
            entity.id()
        );

        session.send(&Packet::ServerIdentification {
            protocol_version: PROTOCOL_VERSION,
            name: self.config.name.clone(),
            motd: self.config.motd.clone(),
            user_type: self.user_type(session.name()),
        });
        if session.supports(Extension::ClickDistance) {
            session.send(&Packet::SetClickDistance {
                distance: session.reach_fixed(),
            });
        }
        self.announce_presence(session, &entity);
        self.broadcast_message(&format!("{} joined the game", session.name()));

        let main = Arc::clone(&self.main_level);
        self.join_level(session, &main);
        Ok(())
    }

    /// Adds the new player to every player list, and fills in its own list.
    fn announce_presence(&self, session: &Arc<Session>, entity: &Entity) {
        let added = list_add_packet(entity);
        for player in self.clients.players() {
            if player.supports(Extension::ExtPlayerList) {
                player.send(&added);
            }
            if player.id() == session.id() || !session.supports(Extension::ExtPlayerList) {
                continue;
            }
            if let Some(other) = player.entity() {
                session.send(&list_add_packet(&other));
            }
        }
    }

    /// Tears a session down. Calling it again for the same session does nothing.
    pub fn disconnect(&self, session: &Arc<Session>, reason: Option<&str>) {
        if let Some(reason) = reason {
            session.send(&Packet::Disconnect {
                reason: reason.to_string(),
            });
        }
        let previous = session.mark_closed();
        if previous == SessionState::Closed {
            return;
        }
        session.close();

        match reason {
            Some(reason) => info!(
                "Session {} ({}) kicked: {}",
                session.id(),
                session.addr(),
                reason
            ),
            None => info!("Session {} ({}) disconnected", session.id(), session.addr()),
        }
        self.fire(&Event::Disconnect {
            session: Arc::clone(session),
        });

        if previous == SessionState::InGame {
            self.fire(&Event::Quit {
                session: Arc::clone(session),
            });
            if let Some(entity) = session.entity() {
                if let Some(level) = entity.level() {
                    level.remove_entity(&entity);
                }
                self.entities.remove(entity.id());
                let removed = list_remove_packet(&entity);
                for player in self.clients.players() {
                    if player.id() != session.id() && player.supports(Extension::ExtPlayerList) {
                        player.send(&removed);
                    }
                }
            }
            session.set_entity(None);
            self.clients.remove_player(session.name());
            self.clients.release_slot();
            self.broadcast_message(&format!("{} left the game", session.name()));
        }
        self.clients.remove_session(session.id());
    }

    pub fn kick(&self, session: &Arc<Session>, reason: &str) {
        self.disconnect(session, Some(reason));
    }

    /// Sends a chat line to every logged-in player.
    pub fn broadcast_message(&self, text: &str) {
        for player in self.clients.players() {
            player.send_message(text);
        }
    }

    /// Moves a player's entity into `level`, streaming the level first.
    pub fn join_level(self: &Arc<Self>, session: &Arc<Session>, level: &Arc<Level>) {
        let Some(entity) = session.entity() else {
            return;
        };
        if let Some(current) = entity.level() {
            if Arc::ptr_eq(&current, level) {
                return;
            }
            current.remove_entity(&entity);
        }

        if let Err(e) = level.send_snapshot(session) {
            error!("Failed to send level '{}' to {}: {}", level.name(), session.name(), e);
            self.kick(session, "Failed to send level");
            return;
        }
        entity.place(level.spawn());
        level.add_entity(&entity);

        // Lost a race with disconnect, which could not see the level yet.
        if session.state() != SessionState::InGame {
            level.remove_entity(&entity);
            return;
        }
        debug!("{} joined level '{}'", session.name(), level.name());
        self.fire(&Event::Join {
            session: Arc::clone(session),
            level: Arc::clone(level),
        });
    }

    /// Moves an entity and shows everyone in its level. Returns false if the
    /// entity was already there or a handler cancelled the move.
    pub fn teleport(&self, entity: &Arc<Entity>, to: Location) -> bool {
        let from = entity.location();
        if from.same_on_wire(&to) {
            return false;
        }
        let outcome = self.fire(&Event::EntityMove {
            entity: Arc::clone(entity),
            from,
            to,
        });
        if outcome.is_cancelled() {
            return false;
        }

        entity.place(to);
        if let Some(level) = entity.level() {
            for viewer in level.viewers() {
                viewer.send(&teleport_packet_for(&viewer, entity));
            }
        }
        true
    }

    // Commands and permissions

    /// Registers a command; fails if the name is taken.
    pub fn register_command(&self, command: Command) -> bool {
        let mut commands = self.commands.write();
        if commands.contains_key(&command.name) {
            return false;
        }
        commands.insert(command.name.clone(), Arc::new(command));
        true
    }

    pub fn commands(&self) -> Vec<Arc<Command>> {
        self.commands.read().values().cloned().collect()
    }

    pub fn is_operator(&self, name: &str) -> bool {
        self.operators
            .read()
            .iter()
            .any(|op| op.eq_ignore_ascii_case(name))
    }

    fn user_type(&self, name: &str) -> u8 {
        if self.is_operator(name) {
            OPERATOR_USER_TYPE
        } else {
            0
        }
    }

    /// Grants or revokes operator status. An online player is told its new
    /// user type. Returns false if nothing changed.
    pub fn set_operator(&self, name: &str, operator: bool) -> bool {
        {
            let mut operators = self.operators.write();
            let existing = operators.iter().position(|op| op.eq_ignore_ascii_case(name));
            match (existing, operator) {
                (None, true) => operators.push(name.to_string()),
                (Some(index), false) => {
                    operators.remove(index);
                }
                _ => return false,
            }
        }
        info!("{} is {} an operator", name, if operator { "now" } else { "no longer" });
        if let Some(session) = self.clients.find_player(name) {
            session.send(&Packet::UpdateUserType {
                user_type: self.user_type(name),
            });
        }
        true
    }

    pub fn has_permission(&self, sender: &CommandSender, permission: &str) -> bool {
        match sender {
            CommandSender::Console => true,
            CommandSender::Player(session) => {
                self.is_operator(session.name())
                    || permission_granted(&self.config.default_permissions, permission)
            }
        }
    }

    /// Runs a command line (without the leading slash) on the blocking pool.
    ///
    /// Returns `None` if the command is unknown or not permitted; the sender
    /// is told why.
    pub fn execute_command(
        self: &Arc<Self>,
        sender: CommandSender,
        line: &str,
    ) -> Option<JoinHandle<()>> {
        let (name, args) = parse_command_line(line);
        let Some(command) = self.commands.read().get(&name).cloned() else {
            sender.send_message(&format!("Unknown command: {}", name));
            return None;
        };
        if let Some(permission) = &command.permission {
            if !self.has_permission(&sender, permission) {
                sender.send_message("You do not have permission to use that command");
                return None;
            }
        }

        debug!("{} ran /{} {}", sender.name(), name, args);
        let server = Arc::clone(self);
        let args = args.to_string();
        Some(tokio::task::spawn_blocking(move || {
            command.run(&server, &sender, &args)
        }))
    }

    // Plugins

    pub fn register_plugin(self: &Arc<Self>, plugin: Arc<dyn Plugin>) {
        info!("Enabling plugin {}", plugin.name());
        plugin.enable(self);
        self.plugins.write().push(plugin);
    }

    pub fn plugin_names(&self) -> Vec<String> {
        self.plugins
            .read()
            .iter()
            .map(|p| p.name().to_string())
            .collect()
    }

    // Levels

    pub fn main_level(&self) -> Arc<Level> {
        Arc::clone(&self.main_level)
    }

    pub fn level(&self, name: &str) -> Option<Arc<Level>> {
        self.levels.read().get(name).cloned()
    }

    pub fn levels(&self) -> Vec<Arc<Level>> {
        self.levels.read().values().cloned().collect()
    }

    /// Returns the named level, loading it from storage if needed.
    pub fn load_level(&self, name: &str) -> Result<Arc<Level>, StorageError> {
        if let Some(level) = self.level(name) {
            return Ok(level);
        }
        let data = self.storage.load(name)?;
        let level = Arc::new(Level::from_data(data)?.with_simulators(default_simulators()));

        let level = {
            let mut levels = self.levels.write();
            Arc::clone(levels.entry(name.to_string()).or_insert(level))
        };
        info!("Loaded level '{}'", name);
        self.fire(&Event::LevelLoad {
            level: Arc::clone(&level),
        });
        Ok(level)
    }

    /// Generates and registers a new flat level. Fails if the name is taken.
    pub fn generate_level(&self, name: &str, size: (u16, u16, u16)) -> Option<Arc<Level>> {
        let mut levels = self.levels.write();
        if levels.contains_key(name) {
            return None;
        }
        let level = Level::generate_flat(name, size.0, size.1, size.2)
            .with_simulators(default_simulators());
        level.mark_dirty();
        let level = Arc::new(level);
        levels.insert(name.to_string(), Arc::clone(&level));
        Some(level)
    }

    /// Hands a level to storage. Returns `Ok(false)` if a handler vetoed the save.
    pub fn save_level(&self, level: &Arc<Level>) -> Result<bool, StorageError> {
        let outcome = self.fire(&Event::LevelSave {
            level: Arc::clone(level),
        });
        if outcome.is_cancelled() {
            return Ok(false);
        }

        let was_dirty = level.take_dirty();
        match self.storage.save(&level.to_data()) {
            Ok(()) => Ok(true),
            Err(e) => {
                if was_dirty {
                    level.mark_dirty();
                }
                Err(e)
            }
        }
    }

    /// Saves every level changed since its last save. Returns how many were written.
    pub fn save_dirty_levels(&self) -> usize {
        self.save_levels(true)
    }

    pub fn save_all_levels(&self) -> usize {
        self.save_levels(false)
    }

    fn save_levels(&self, only_dirty: bool) -> usize {
        let mut saved = 0;
        for level in self.levels() {
            if only_dirty && !level.is_dirty() {
                continue;
            }
            match self.save_level(&level) {
                Ok(true) => saved += 1,
                Ok(false) => debug!("Save of level '{}' cancelled", level.name()),
                Err(e) => error!("Failed to save level '{}': {}", level.name(), e),
            }
        }
        saved
    }

    /// Saves and drops a level, moving its players to the main level.
    ///
    /// The main level can't be unloaded. A level that fails to save stays loaded.
    pub fn unload_level(self: &Arc<Self>, name: &str) -> bool {
        if name == self.main_level.name() {
            warn!("Refusing to unload the main level");
            return false;
        }
        let Some(level) = self.level(name) else {
            return false;
        };
        let outcome = self.fire(&Event::LevelUnload {
            level: Arc::clone(&level),
        });
        if outcome.is_cancelled() {
            return false;
        }

        for entity in level.entities() {
            if let Some(session) = entity.session() {
                self.join_level(&session, &self.main_level());
            } else {
                level.remove_entity(&entity);
            }
        }

        if let Err(e) = self.save_level(&level) {
            error!("Not unloading level '{}': save failed: {}", name, e);
            return false;
        }
        self.levels.write().remove(name);
        info!("Unloaded level '{}'", name);
        true
    }

    // Loops

    /// One world update: flush movement and step physics on every level.
    pub fn tick(&self) {
        for level in self.levels() {
            level.flush_movement();
            level.tick();
        }
    }

    /// Asks [`serve`](Self::serve) to stop.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Accepts connections and runs the periodic loops until [`shutdown`](Self::shutdown).
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), ServerError> {
        info!("Listening on {}", listener.local_addr()?);
        let mut shutdown = self.shutdown.subscribe();

        let mut loops = vec![
            tokio::spawn(run_tick_loop(Arc::clone(&self))),
            tokio::spawn(run_save_loop(Arc::clone(&self))),
        ];
        if self.config.heartbeat.enabled {
            loops.push(tokio::spawn(run_heartbeat_loop(Arc::clone(&self))));
        }

        tokio::select! {
            _ = network::accept_loop(Arc::clone(&self), &listener) => {}
            _ = network::wait_until_set(&mut shutdown) => {}
        }
        for task in loops {
            task.abort();
        }

        self.finish_shutdown().await;
        drop(listener);
        Ok(())
    }

    async fn finish_shutdown(self: &Arc<Self>) {
        info!("Shutting down");
        for session in self.clients.sessions() {
            self.disconnect(&session, Some(SHUTDOWN_NOTICE));
        }

        let server = Arc::clone(self);
        match tokio::task::spawn_blocking(move || server.save_dirty_levels()).await {
            Ok(saved) => info!("Saved {} level(s)", saved),
            Err(e) => error!("Final save failed: {}", e),
        }

        let plugins = std::mem::take(&mut *self.plugins.write());
        for plugin in plugins {
            info!("Disabling plugin {}", plugin.name());
            plugin.disable(self);
        }
    }

    fn heartbeat_report(&self) -> HeartbeatReport {
        HeartbeatReport {
            name: self.config.name.clone(),
            port: self.config.port,
            users: self.clients.player_count(),
            max: self.config.max_players,
            public: self.config.public,
            salt: self.salt.clone(),
        }
    }
}

fn open_main_level(config: &ServerConfig, storage: &dyn LevelStorage) -> Level {
    let name = &config.main_level;
    let loaded = storage.load(name).and_then(Level::from_data);
    let level = match loaded {
        Ok(level) => {
            info!("Loaded main level '{}'", name);
            level
        }
        Err(e) => {
            match e {
                StorageError::NotFound(_) => info!("No saved main level, generating '{}'", name),
                e => error!("Failed to load main level '{}': {}; generating a new one", name, e),
            }
            let (width, height, length) = config.default_level_size;
            let level = Level::generate_flat(name, width, height, length);
            level.mark_dirty();
            level
        }
    };
    level.with_simulators(default_simulators())
}

async fn run_tick_loop(server: Arc<Server>) {
    let period = server.config.tick_interval();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let started = Instant::now();
        server.tick();
        let elapsed = started.elapsed();
        if elapsed > period {
            debug!("Slow tick: {:?} (budget {:?})", elapsed, period);
        }
    }
}

async fn run_save_loop(server: Arc<Server>) {
    let mut ticker = interval(server.config.save_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let sweeper = Arc::clone(&server);
        match tokio::task::spawn_blocking(move || sweeper.save_dirty_levels()).await {
            Ok(0) => {}
            Ok(saved) => debug!("Autosaved {} level(s)", saved),
            Err(e) => error!("Save sweep failed: {}", e),
        }
    }
}

async fn run_heartbeat_loop(server: Arc<Server>) {
    let heartbeat = match Heartbeat::new(&server.config.heartbeat.url) {
        Ok(heartbeat) => heartbeat,
        Err(e) => {
            warn!("Heartbeat disabled: {}", e);
            return;
        }
    };
    let mut ticker = interval(std::time::Duration::from_secs(
        server.config.heartbeat.interval_secs.max(1),
    ));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match heartbeat.beat(&server.heartbeat_report()).await {
            Ok(Some(url)) => server.set_url(url),
            Ok(None) => debug!("Heartbeat response carried no URL"),
            Err(e) => warn!("Heartbeat failed: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Weather;
    use crate::event::EventKind;
    use crate::storage::MemoryLevelStorage;
    use crate::testing::{drain, login, test_config, test_server};
    use parking_lot::Mutex;
    use protocol::{block, SELF_ID};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_login_sends_identification_level_and_spawn() {
        let server = test_server();
        let (session, mut rx) = login(&server, "Alice").unwrap();

        let packets = drain(&session, &mut rx);
        assert!(matches!(
            packets.first(),
            Some(Packet::ServerIdentification { protocol_version: 7, .. })
        ));
        let init = packets.iter().position(|p| *p == Packet::LevelInitialize).unwrap();
        let finalize = packets
            .iter()
            .position(|p| matches!(p, Packet::LevelFinalize { .. }))
            .unwrap();
        let spawn = packets
            .iter()
            .position(|p| matches!(p, Packet::SpawnPlayer { id: SELF_ID, .. }))
            .unwrap();
        assert!(init < finalize && finalize < spawn);

        let expected = server.main_level().spawn().to_fixed();
        match &packets[spawn] {
            Packet::SpawnPlayer { location, .. } => assert_eq!(*location, expected),
            _ => unreachable!(),
        }
        assert_eq!(session.state(), SessionState::InGame);
        assert_eq!(server.clients().player_count(), 1);
    }

    #[tokio::test]
    async fn test_capacity_gate() {
        let mut config = test_config();
        config.max_players = 2;
        let server = Server::new(config, Arc::new(MemoryLevelStorage::new()));

        login(&server, "one").unwrap();
        login(&server, "two").unwrap();
        assert_eq!(login(&server, "three").err().as_deref(), Some(SERVER_FULL));
        assert_eq!(server.clients().player_count(), 2);
        assert_eq!(server.entities().len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_login_commits_nothing() {
        let server = test_server();
        server
            .events()
            .register(EventKind::Login, |_, outcome| outcome.cancel_with("You are banned"));

        assert_eq!(login(&server, "Mallory").err().as_deref(), Some("You are banned"));
        assert_eq!(server.clients().player_count(), 0);
        assert!(server.entities().is_empty());
        assert!(server.clients().find_player("Mallory").is_none());
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let server = test_server();
        login(&server, "Alice").unwrap();
        assert_eq!(login(&server, "alice").err().as_deref(), Some(NAME_IN_USE));
        assert_eq!(server.clients().player_count(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent_and_releases_everything() {
        let server = test_server();
        let quits = Arc::new(AtomicUsize::new(0));
        {
            let quits = Arc::clone(&quits);
            server.events().register(EventKind::Quit, move |_, _| {
                quits.fetch_add(1, Ordering::SeqCst);
            });
        }

        let (alice, _alice_rx) = login(&server, "Alice").unwrap();
        let (bob, mut bob_rx) = login(&server, "Bob").unwrap();
        let alice_id = alice.entity().unwrap().id();
        drain(&bob, &mut bob_rx);

        server.disconnect(&alice, None);
        server.disconnect(&alice, None);

        assert_eq!(quits.load(Ordering::SeqCst), 1);
        assert_eq!(server.clients().player_count(), 1);
        assert!(server.entities().get(alice_id).is_none());
        assert!(server.clients().find_player("alice").is_none());
        assert_eq!(server.main_level().entities().len(), 1);

        let bob_sees = drain(&bob, &mut bob_rx);
        assert!(bob_sees.contains(&Packet::DespawnPlayer { id: alice_id }));
        assert!(bob_sees
            .iter()
            .any(|p| matches!(p, Packet::Message { text, .. } if text == "Alice left the game")));
    }

    #[tokio::test]
    async fn test_kick_sends_reason() {
        let server = test_server();
        let (alice, mut rx) = login(&server, "Alice").unwrap();
        drain(&alice, &mut rx);

        server.kick(&alice, "Bye");
        assert_eq!(
            drain(&alice, &mut rx),
            vec![Packet::Disconnect { reason: "Bye".to_string() }]
        );
        assert!(alice.is_closed());
    }

    #[tokio::test]
    async fn test_freed_entity_id_is_reused() {
        let server = test_server();
        let (a, _a_rx) = login(&server, "Aaa").unwrap();
        let (_b, _b_rx) = login(&server, "Bbb").unwrap();
        let a_id = a.entity().unwrap().id();
        server.disconnect(&a, None);

        let (c, _c_rx) = login(&server, "Ccc").unwrap();
        assert_eq!(c.entity().unwrap().id(), a_id);
    }

    #[tokio::test]
    async fn test_teleport_unchanged_is_noop_and_cancellable() {
        let server = test_server();
        let (alice, mut alice_rx) = login(&server, "Alice").unwrap();
        let (bob, mut bob_rx) = login(&server, "Bob").unwrap();
        drain(&alice, &mut alice_rx);
        drain(&bob, &mut bob_rx);

        let entity = alice.entity().unwrap();
        assert!(!server.teleport(&entity, entity.location()));

        let mut target = entity.location();
        target.x += 10.0;
        assert!(server.teleport(&entity, target));
        assert_eq!(entity.location(), target);
        assert!(matches!(
            drain(&alice, &mut alice_rx).as_slice(),
            [Packet::Teleport { id: SELF_ID, .. }]
        ));
        let bob_sees = drain(&bob, &mut bob_rx);
        assert!(matches!(bob_sees.as_slice(), [Packet::Teleport { id, .. }] if *id == entity.id()));

        server
            .events()
            .register(EventKind::EntityMove, |_, outcome| outcome.cancel());
        let mut further = target;
        further.z += 5.0;
        assert!(!server.teleport(&entity, further));
        assert_eq!(entity.location(), target);
    }

    #[tokio::test]
    async fn test_console_command_runs_on_own_task() {
        let server = test_server();
        server.main_level().set_block(0, 15, 0, block::STONE, false);

        let handle = server.execute_command(CommandSender::Console, "save").unwrap();
        handle.await.unwrap();
        assert!(!server.main_level().is_dirty());
    }

    #[tokio::test]
    async fn test_command_permission_denied() {
        let server = test_server();
        let (alice, mut rx) = login(&server, "Alice").unwrap();
        drain(&alice, &mut rx);

        let sender = CommandSender::Player(Arc::clone(&alice));
        assert!(server.execute_command(sender.clone(), "save").is_none());
        assert!(server.execute_command(sender.clone(), "nosuchcommand").is_none());

        let replies = drain(&alice, &mut rx);
        assert_eq!(replies.len(), 2);

        let handle = server.execute_command(sender, "list").unwrap();
        handle.await.unwrap();
        assert!(drain(&alice, &mut rx)
            .iter()
            .any(|p| matches!(p, Packet::Message { text, .. } if text.contains("Alice"))));
    }

    #[tokio::test]
    async fn test_operators_hold_every_permission() {
        let mut config = test_config();
        config.operators = vec!["Root".to_string()];
        let server = Server::new(config, Arc::new(MemoryLevelStorage::new()));
        let (root, _rx) = login(&server, "root").unwrap();

        assert!(server.has_permission(&CommandSender::Player(root), "server.save"));
        assert!(server.has_permission(&CommandSender::Console, "anything"));
    }

    #[tokio::test]
    async fn test_op_and_deop_update_user_type() {
        let server = test_server();
        let (alice, mut rx) = login(&server, "Alice").unwrap();
        drain(&alice, &mut rx);
        let player = CommandSender::Player(Arc::clone(&alice));
        assert!(!server.has_permission(&player, "server.save"));

        let handle = server.execute_command(CommandSender::Console, "op alice").unwrap();
        handle.await.unwrap();
        assert!(server.has_permission(&player, "server.save"));
        assert!(drain(&alice, &mut rx).contains(&Packet::UpdateUserType {
            user_type: OPERATOR_USER_TYPE
        }));

        let handle = server.execute_command(player.clone(), "deop Alice").unwrap();
        handle.await.unwrap();
        assert!(!server.is_operator("Alice"));
        assert!(drain(&alice, &mut rx).contains(&Packet::UpdateUserType { user_type: 0 }));
        assert!(!server.set_operator("Alice", false));
    }

    #[tokio::test]
    async fn test_hold_command_hands_block() {
        let server = test_server();
        let (alice, mut rx) = login(&server, "Alice").unwrap();
        alice.enable_extension(Extension::HeldBlock);
        server.set_operator("Alice", true);
        drain(&alice, &mut rx);

        let sender = CommandSender::Player(Arc::clone(&alice));
        server.execute_command(sender.clone(), "hold 4").unwrap().await.unwrap();
        assert_eq!(
            drain(&alice, &mut rx),
            vec![Packet::HoldThis { block: block::COBBLESTONE, prevent_change: false }]
        );

        server.execute_command(sender, "hold 200").unwrap().await.unwrap();
        assert!(drain(&alice, &mut rx).iter().any(|p| {
            matches!(p, Packet::Message { text, .. } if text.starts_with("Usage"))
        }));
    }

    /// Counts lifecycle calls and checks the listener is still bound at disable time.
    struct RecordingPlugin {
        enabled: AtomicUsize,
        disabled: AtomicUsize,
        listener_open_at_disable: Mutex<Option<bool>>,
        addr: Mutex<Option<std::net::SocketAddr>>,
    }

    impl RecordingPlugin {
        fn new() -> Self {
            Self {
                enabled: AtomicUsize::new(0),
                disabled: AtomicUsize::new(0),
                listener_open_at_disable: Mutex::new(None),
                addr: Mutex::new(None),
            }
        }
    }

    impl Plugin for RecordingPlugin {
        fn name(&self) -> &str {
            "recorder"
        }

        fn enable(&self, server: &Arc<Server>) {
            self.enabled.fetch_add(1, Ordering::SeqCst);
            server.register_command(Command::new("wave", "Waves", None, |_, sender, _, _| {
                sender.send_message("*waves*")
            }));
            server
                .events()
                .register(EventKind::Chat, |_, outcome| outcome.cancel());
        }

        fn disable(&self, _server: &Arc<Server>) {
            self.disabled.fetch_add(1, Ordering::SeqCst);
            if let Some(addr) = *self.addr.lock() {
                *self.listener_open_at_disable.lock() =
                    Some(std::net::TcpStream::connect(addr).is_ok());
            }
        }
    }

    #[tokio::test]
    async fn test_plugin_enabled_on_register_and_disabled_on_shutdown() {
        let server = test_server();
        let plugin = Arc::new(RecordingPlugin::new());
        server.register_plugin(Arc::clone(&plugin) as Arc<dyn Plugin>);
        assert_eq!(plugin.enabled.load(Ordering::SeqCst), 1);
        assert_eq!(server.plugin_names(), vec!["recorder".to_string()]);

        let (alice, mut rx) = login(&server, "Alice").unwrap();
        drain(&alice, &mut rx);
        let sender = CommandSender::Player(Arc::clone(&alice));
        server.execute_command(sender, "wave").unwrap().await.unwrap();
        assert_eq!(
            drain(&alice, &mut rx),
            vec![Packet::Message { kind: 0, text: "*waves*".to_string() }]
        );
        let outcome = server.fire(&Event::Chat {
            session: Arc::clone(&alice),
            message: "hi".to_string(),
        });
        assert!(outcome.is_cancelled());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        *plugin.addr.lock() = Some(listener.local_addr().unwrap());
        let serving = tokio::spawn(Arc::clone(&server).serve(listener));
        server.shutdown();
        serving.await.unwrap().unwrap();

        assert_eq!(plugin.disabled.load(Ordering::SeqCst), 1);
        assert_eq!(*plugin.listener_open_at_disable.lock(), Some(true));
        assert!(server.plugin_names().is_empty());
        assert_eq!(
            drain(&alice, &mut rx),
            vec![Packet::Disconnect { reason: SHUTDOWN_NOTICE.to_string() }]
        );
    }

    #[test]
    fn test_main_level_loaded_from_storage() {
        let storage = Arc::new(MemoryLevelStorage::new());
        let level = Level::new("main", 8, 8, 8);
        level.set_block(1, 1, 1, block::GLASS, false);
        storage.save(&level.to_data()).unwrap();

        let server = Server::new(test_config(), storage);
        assert_eq!(server.main_level().get_block(1, 1, 1), block::GLASS);
        assert!(!server.main_level().is_dirty());
    }

    #[test]
    fn test_level_lifecycle() {
        let storage = Arc::new(MemoryLevelStorage::new());
        let server = Server::new(test_config(), Arc::clone(&storage) as Arc<dyn LevelStorage>);

        assert!(matches!(server.load_level("other"), Err(StorageError::NotFound(_))));
        let other = server.generate_level("other", (8, 8, 8)).unwrap();
        assert!(server.generate_level("other", (8, 8, 8)).is_none());

        let mut env = other.env();
        env.weather = Weather::Raining;
        other.set_env(env);

        assert!(!server.unload_level("main"));
        assert!(server.unload_level("other"));
        assert!(server.level("other").is_none());
        assert!(storage.contains("other"));

        let reloaded = server.load_level("other").unwrap();
        assert_eq!(reloaded.env().weather, Weather::Raining);
    }

    #[test]
    fn test_cancelled_unload_keeps_level() {
        let server = test_server();
        server.generate_level("other", (8, 8, 8)).unwrap();
        server
            .events()
            .register(EventKind::LevelUnload, |_, outcome| outcome.cancel());
        assert!(!server.unload_level("other"));
        assert!(server.level("other").is_some());
    }

    #[test]
    fn test_save_sweep_skips_clean_levels() {
        let server = test_server();
        assert_eq!(server.save_dirty_levels(), 1);
        assert_eq!(server.save_dirty_levels(), 0);
        server.main_level().set_block(0, 15, 0, block::STONE, false);
        assert_eq!(server.save_dirty_levels(), 1);
    }

    #[tokio::test]
    async fn test_tick_flushes_movement() {
        let server = test_server();
        let (alice, mut alice_rx) = login(&server, "Alice").unwrap();
        let (bob, mut bob_rx) = login(&server, "Bob").unwrap();
        drain(&alice, &mut alice_rx);
        drain(&bob, &mut bob_rx);

        let entity = alice.entity().unwrap();
        let mut location = entity.location();
        location.yaw = 90.0;
        entity.set_location(location);
        server.tick();

        assert_eq!(
            drain(&bob, &mut bob_rx),
            vec![Packet::OrientationUpdate { id: entity.id(), yaw: 64, pitch: 0 }]
        );
        assert!(drain(&alice, &mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_notifies_sessions_and_stops_serving() {
        let server = test_server();
        let (alice, mut rx) = login(&server, "Alice").unwrap();
        drain(&alice, &mut rx);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let serving = tokio::spawn(Arc::clone(&server).serve(listener));
        server.shutdown();
        serving.await.unwrap().unwrap();

        assert_eq!(
            drain(&alice, &mut rx),
            vec![Packet::Disconnect { reason: SHUTDOWN_NOTICE.to_string() }]
        );
        assert_eq!(server.clients().player_count(), 0);
    }
}
