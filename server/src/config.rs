//! Server configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file at all) yields a working server. Command-line flags are
//! applied on top in `main`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ServerError;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub name: String,
    pub motd: String,
    pub host: String,
    pub port: u16,
    pub max_players: usize,
    pub public: bool,
    /// Level players are placed on after login.
    pub main_level: String,
    pub level_dir: PathBuf,
    /// Width, height and length of a generated main level.
    pub default_level_size: (u16, u16, u16),
    pub tick_interval_ms: u64,
    pub save_interval_secs: u64,
    pub keepalive_interval_secs: u64,
    /// Maximum block edit distance, in blocks.
    pub reach_distance: f32,
    pub heartbeat: HeartbeatConfig,
    /// Players holding every permission.
    pub operators: Vec<String>,
    /// Permissions granted to every player.
    pub default_permissions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    pub enabled: bool,
    pub url: String,
    pub interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: "Voxel Server".to_string(),
            motd: "Welcome!".to_string(),
            host: "0.0.0.0".to_string(),
            port: 25565,
            max_players: 32,
            public: false,
            main_level: "main".to_string(),
            level_dir: PathBuf::from("levels"),
            default_level_size: (128, 64, 128),
            tick_interval_ms: 50,
            save_interval_secs: 120,
            keepalive_interval_secs: 2,
            reach_distance: 5.0,
            heartbeat: HeartbeatConfig::default(),
            operators: Vec::new(),
            default_permissions: vec!["server.help".to_string(), "server.list".to_string()],
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "https://www.classicube.net/server/heartbeat".to_string(),
            interval_secs: 45,
        }
    }
}

impl ServerConfig {
    pub fn from_toml(text: &str) -> Result<Self, ServerError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads the config file at `path`, falling back to defaults when it is missing.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs.max(1))
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs.max(1))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
