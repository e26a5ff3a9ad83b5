//! # Lattice Types
//!
//! Core type definitions for the Lattice ledger.
//!
//! This crate provides the fundamental types used throughout Lattice:
//! - [`Address`] - 20-byte account addresses derived from public keys
//! - [`H256`] - 32-byte Keccak256 digests
//! - [`ChainCoordinate`] - hex-encoded path naming a (sub)chain
//! - [`Transaction`] - the signed ledger transaction
//! - [`Block`] and [`BlockHeader`] - block structures with a fixed wire encoding
//!
//! ## Example
//!
//! ```rust
//! use lattice_types::{Address, H256};
//!
//! let addr: Address = "0x742d35cc6634c0532925a3b844bc9e7595f0beb1".parse().unwrap();
//! let hash = H256::keccak256(b"hello world");
//! assert_ne!(hash, H256::NIL);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod address;
pub mod block;
pub mod codec;
pub mod coordinate;
pub mod hash;
pub mod merkle;
pub mod transaction;

// Re-export main types at crate root
pub use address::Address;
pub use block::{Block, BlockHeader};
pub use coordinate::ChainCoordinate;
pub use hash::H256;
pub use merkle::merkle_root;
pub use transaction::{Signature, Transaction, TxType};

/// Result type alias for Lattice types operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when working with Lattice types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid hex string
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    /// Invalid length for a fixed-size type
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Invalid address format
    #[error("invalid address format: {0}")]
    InvalidAddress(String),

    /// Invalid transaction
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// Decoding ran off the end of the buffer or hit a malformed prefix
    #[error("decode error: {0}")]
    Decode(String),

    /// Signature error
    #[error("signature error: {0}")]
    Signature(String),
}
