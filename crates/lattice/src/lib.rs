//! # Lattice Node
//!
//! The full node: wires the validator, ledger, consensus engine and network
//! relay into one service.
//!
//! - [`Blockchain`] consumes committed consensus output, assembles blocks in
//!   height order (buffering orphans), appends them to the ledger and relays
//!   them.
//! - [`NoopsConsensus`] is the built-in single-node engine; registering an
//!   engine named `"noops"` auto-starts the blockchain services.
//! - [`Node`] owns the wiring and the service lifecycle.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod chain;
pub mod commands;
pub mod node;
pub mod noops;
pub mod relay;

pub use chain::Blockchain;
pub use node::Node;
pub use noops::NoopsConsensus;
pub use relay::LogRelay;
