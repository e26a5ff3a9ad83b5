//! # Lattice Configuration
//!
//! This crate provides configuration parsing and genesis handling for the
//! Lattice ledger.
//!
//! Lattice uses a single-config philosophy where all node settings are
//! defined in one `lattice.toml` file; the genesis state is a separate JSON
//! document so it can be shared across nodes.
//!
//! ## Configuration Sections
//!
//! - `[chain]` - chain coordinate and fee policy
//! - `[storage]` - data directory
//! - `[pool]` - mempool capacity and batching knobs
//! - `[consensus]` - batch size/timeout handed to the consensus engine
//! - `[vm]` - script interpreter resource limits (`vm.*` keys)
//! - `[mirror]` - optional document-store mirror tap
//! - `[logging]` - log filter

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

mod config;
mod error;
mod genesis;

pub use config::*;
pub use error::*;
pub use genesis::*;
