use protocol::ProtocolError;
use thiserror::Error;

/// Failure reported by a [`LevelStorage`](crate::storage::LevelStorage) backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("level '{0}' not found")]
    NotFound(String),

    #[error("invalid level name '{0}'")]
    InvalidName(String),

    #[error("level file is corrupt: {0}")]
    Corrupt(String),

    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("level encoding failed: {0}")]
    Encoding(#[from] bincode::Error),
}

/// Top-level server failure.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("heartbeat failed: {0}")]
    Heartbeat(#[from] reqwest::Error),
}
