//! Error types for the sensor bus

use thiserror::Error;

/// Errors that can occur on a sensor bus
#[derive(Debug, Error)]
pub enum BusError {
    /// The channel could not be (re)opened
    #[error("connection to {endpoint} unavailable: {reason}")]
    ConnectionUnavailable { endpoint: String, reason: String },

    /// No endpoint has ever been connected, so there is nothing to reconnect to
    #[error("bus {0} is not connected")]
    NotConnected(String),

    /// The bus was shut down while an operation was waiting
    #[error("bus {0} was closed")]
    Closed(String),

    /// Failed to enumerate serial ports
    #[error("failed to enumerate ports: {0}")]
    EnumerationFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error
    #[error("protocol error: {0}")]
    Protocol(#[from] chem_protocol::ProtocolError),
}
