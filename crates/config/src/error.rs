//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A file could not be read or written.
    #[error("failed to access {path}: {source}")]
    FileAccess {
        /// The offending path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The TOML document failed to parse.
    #[error("invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// A JSON document failed to parse or serialize.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// A chain coordinate was not valid hex.
    #[error("invalid chain coordinate: {0}")]
    InvalidChainCoordinate(String),

    /// An address was malformed.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// A private key was malformed.
    #[error("invalid issuer key: {0}")]
    InvalidIssuerKey(String),

    /// The genesis document names no public addresses.
    #[error("genesis must list at least one public address")]
    NoAddresses,

    /// A numeric setting was out of range.
    #[error("invalid value for {name}: {value}")]
    InvalidValue {
        /// Setting name.
        name: &'static str,
        /// Offending value.
        value: String,
    },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
