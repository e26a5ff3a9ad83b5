//! # Lattice Core
//!
//! Collaborator interfaces for the Lattice transaction execution core.
//!
//! The execution core treats its surrounding services as black boxes behind
//! the traits defined here:
//! - [`Consensus`] - orders batches of transactions and emits committed output
//! - [`NetworkStack`] - relays blocks and transactions to peers
//! - [`TxNotifier`] - delivers per-transaction outcomes back to submitters

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod notify;
pub mod traits;

pub use notify::{TxNotification, TxNotifier};
pub use traits::consensus::{BatchCallback, BatchOutcome, Consensus, ConsensusOutput};
pub use traits::network::{Inventory, NetworkStack};
