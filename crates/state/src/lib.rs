//! # Lattice State
//!
//! The block-scoped transactional state layer of the Lattice ledger.
//!
//! State lives in three column families - contract state, balances and the
//! asset registry. During block application every transaction executes
//! against a private [`TxRwSet`] staging snapshot; completed snapshots merge
//! into the block-wide [`BlkRwSet`] under a read-set conflict check, and
//! [`BlkRwSet::apply_changes`] drains the block's write overlay into one
//! atomic storage batch.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod asset;
pub mod balance;
pub mod blkrwset;
pub mod rwset;
pub mod txrwset;

pub use asset::Asset;
pub use balance::Balance;
pub use blkrwset::BlkRwSet;
pub use rwset::{KvRwSet, KvWrite};
pub use txrwset::{TxRwSet, TxRwSnapshot};

use thiserror::Error;

/// Namespace of the asset registry inside the `asset` column family.
pub const ASSET_NAMESPACE: &str = "asset";

/// Suffix terminating numeric ids inside composite keys.
pub const ID_KEY_SUFFIX: &str = "$";

/// Balance key recording an account's nonce counter.
pub const NONCE_KEY: &str = "n$";

/// Errors produced by the state layer.
#[derive(Error, Debug)]
pub enum StateError {
    /// A staged read disagrees with the block's view of the same key.
    #[error("{namespace} readset conflict -- {key}")]
    ReadSetConflict {
        /// Namespace of the conflicting key ("chaincode", "asset", "balance").
        namespace: &'static str,
        /// Decoded key.
        key: String,
    },

    /// The asset does not exist.
    #[error("asset {0} not found")]
    AssetNotFound(u32),

    /// An update tried to change `id`, `issuer` or `owner`.
    #[error("asset update failed: id, issuer, owner are readonly attributes")]
    AssetReadOnly,

    /// Malformed asset JSON.
    #[error("invalid asset payload: {0}")]
    InvalidAssetPayload(String),

    /// Underlying storage failure.
    #[error(transparent)]
    Storage(#[from] lattice_storage::StorageError),

    /// Value decoding failure.
    #[error("state decode error: {0}")]
    Decode(String),
}

/// Result type for state operations.
pub type Result<T> = std::result::Result<T, StateError>;

/// Builds the balance composite key for `(address, asset_id)`.
pub fn balance_key(asset_id: u32) -> String {
    format!("{asset_id}{ID_KEY_SUFFIX}")
}

/// Builds the asset registry composite key for `asset_id`.
pub fn asset_key(asset_id: u32) -> String {
    format!("{asset_id}{ID_KEY_SUFFIX}")
}
