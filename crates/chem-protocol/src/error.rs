//! Error types for the sensor board protocol
//!
//! Decoding never produces these: decode primitives return `None` on
//! malformed input. They cover configuration-time mistakes only.

use thiserror::Error;

/// Errors raised while building protocol objects
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Transport name not recognized
    #[error("unknown transport: {0}")]
    UnknownTransport(String),

    /// Board id outside the addressable range
    #[error("board id out of range: 0x{0:02X}")]
    BoardIdOutOfRange(u8),

    /// Channel id outside the two-hex-digit range of the board
    #[error("channel {channel} out of range for a board with {channels} channel(s)")]
    ChannelOutOfRange { channel: u8, channels: u8 },
}
