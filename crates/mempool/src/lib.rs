//! # Lattice Mempool
//!
//! The ordered transaction pool feeding the consensus batcher.
//!
//! Transactions are kept in a total order on
//! `(to_chain, sender, nonce, fee descending)`; iteration is stable and
//! consistent with that order, a side map gives O(1) hash lookup, and the
//! pool is capacity-bounded with front (order-minimum) eviction.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod pool;

pub use pool::TxPool;

/// Result type alias for mempool operations.
pub type Result<T> = std::result::Result<T, MempoolError>;

/// Errors that can occur in mempool operations.
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    /// Transaction already exists in the pool.
    #[error("transaction already existed")]
    AlreadyExists,
}
