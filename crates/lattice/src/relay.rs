//! Network relay stub.
//!
//! Peer networking is outside the execution core; this relay satisfies the
//! interface and logs the inventory it would gossip.

use lattice_core::{Inventory, NetworkStack};
use tracing::debug;

/// A relay that logs instead of gossiping.
#[derive(Debug, Default)]
pub struct LogRelay;

impl NetworkStack for LogRelay {
    fn relay(&self, inventory: Inventory) {
        match &inventory {
            Inventory::Block(block) => {
                debug!(hash = %block.hash(), height = block.height(), "relay block")
            }
            Inventory::Transaction(tx) => debug!(hash = %tx.hash(), "relay transaction"),
        }
    }
}
