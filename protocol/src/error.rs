use thiserror::Error;

/// Failure to decode or frame a packet.
///
/// Every variant is fatal to the session that produced it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet truncated: needed {needed} bytes, had {available}")]
    ShortRead { needed: usize, available: usize },

    #[error("unknown packet id 0x{0:02X}")]
    UnknownPacket(u8),

    #[error("packet 0x{0:02X} is not valid here")]
    UnexpectedPacket(u8),

    #[error("invalid field value: {0}")]
    InvalidValue(String),

    #[error("level data compression failed: {0}")]
    Compression(#[from] std::io::Error),
}
