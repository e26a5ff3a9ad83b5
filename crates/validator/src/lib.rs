//! # Lattice Validator
//!
//! Transaction admission and batch assembly.
//!
//! The validator owns the mempool: it admits transactions after syntactic,
//! signature, nonce and blacklist checks, keeps speculative balance and
//! asset-registry projections for the consensus leader path, shapes
//! deterministic batches under size and time triggers, and reacts to
//! consensus outcomes (re-enqueue, commit, speculative apply/rollback,
//! verification failure).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod validator;

pub use validator::{LedgerView, Validator, ValidatorConfig};

use thiserror::Error;

/// Errors produced during transaction admission and verification.
#[derive(Error, Debug)]
pub enum ValidatorError {
    /// The transaction is malformed or fails a pre-check.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The transaction is already pooled.
    #[error("transaction {0} already existed")]
    DuplicateTransaction(String),

    /// The sender is blacklisted.
    #[error("sender {0} is blacklisted")]
    Blacklisted(String),

    /// The referenced asset does not exist.
    #[error("asset {0} not found")]
    AssetNotFound(u32),

    /// An asset update touched a read-only attribute.
    #[error(transparent)]
    State(#[from] lattice_state::StateError),

    /// The sender's balance cannot cover the transaction.
    #[error("balance insufficient for asset {0}")]
    BalanceInsufficient(u32),
}

/// Result type for validator operations.
pub type Result<T> = std::result::Result<T, ValidatorError>;
