//! # Lattice Storage
//!
//! Column-family key/value storage for the Lattice ledger:
//!
//! - [`Database`]: RocksDB wrapper with the six ledger column families and
//!   atomic multi-batch writes
//! - [`schema`]: composite-key encoding shared by the state column families
//!
//! Writes go through [`Database::atomic_write`], which applies a list of
//! [`WriteOp`]s all-or-nothing. Concurrent readers are unrestricted; the
//! ledger is the single writer.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod db;
pub mod schema;

pub use db::{cf, Database, DatabaseConfig, WriteOp};
pub use schema::{decode_composite_key, encode_composite_key, namespace_prefix};

use thiserror::Error;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database error.
    #[error("database error: {0}")]
    Database(String),

    /// Column family not found.
    #[error("column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Malformed key encoding.
    #[error("invalid composite key: {0}")]
    InvalidKey(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
