//! # Lattice Ledger
//!
//! The ledger facade wires block storage, the block read/write set and the
//! contract worker pools into one atomic append path:
//!
//! 1. `set_block` opens the block's read/write set.
//! 2. Every transaction executes in parallel against a private staging view
//!    and merges in index order, with one redo on a read-set conflict.
//! 3. `apply_changes` drains the block overlay once the barrier releases.
//! 4. Block storage and state batches land in a single atomic write.
//!
//! An optional mirror tap receives the same write batches post-commit and
//! never blocks the append path.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod block_storage;
pub mod executor;
pub mod ledger;
pub mod merge_store;
pub mod mirror;

pub use executor::LedgerConfig;
pub use ledger::{Ledger, ValidatorHook};
pub use mirror::{Mirror, MirrorSink};

use lattice_types::H256;
use thiserror::Error;

/// Errors produced by the ledger.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Underlying storage failure. Fatal on the commit path.
    #[error(transparent)]
    Storage(#[from] lattice_storage::StorageError),

    /// State layer failure.
    #[error(transparent)]
    State(#[from] lattice_state::StateError),

    /// Contract execution failure.
    #[error(transparent)]
    Vm(#[from] lattice_vm::VmError),

    /// The sender cannot cover a balance movement.
    #[error("balance insufficient for asset {asset_id}")]
    BalanceInsufficient {
        /// The asset whose balance went negative.
        asset_id: u32,
    },

    /// A block does not extend the current chain tip.
    #[error("height mismatch: expected {expected}, got {actual}")]
    HeightMismatch {
        /// Expected next height.
        expected: u32,
        /// Height carried by the block.
        actual: u32,
    },

    /// A stored record failed to decode.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// A referenced block or transaction does not exist.
    #[error("not found: {0}")]
    NotFound(H256),

    /// The operation is not supported on a validating peer.
    #[error("unsupported: {0}")]
    Unsupported(&'static str),
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
