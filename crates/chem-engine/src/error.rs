//! Error types for the engine

use std::path::PathBuf;

use thiserror::Error;

/// Errors loading or validating static configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration directory could be determined
    #[error("could not determine configuration directory")]
    NoConfigDir,

    /// The configuration file could not be read or written
    #[error("configuration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the schema
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The configuration parses but is inconsistent
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors that can occur in the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Bus error
    #[error("bus error: {0}")]
    Bus(#[from] chem_bus::BusError),

    /// No bus with this name is attached
    #[error("unknown bus: {0}")]
    UnknownBus(String),

    /// Ownership is held by someone else
    #[error("bus {bus} is owned by {owner}")]
    AlreadyOwned { bus: String, owner: String },
}
