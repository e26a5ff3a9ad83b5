//! Network relay trait.
//!
//! Peer discovery and gossip live outside the execution core; the core only
//! needs a single `relay` entry point for freshly committed inventory.

use lattice_types::{Block, Transaction, H256};

/// Something that can be relayed to peers: a block or a transaction, each
/// with a hash identity.
#[derive(Debug, Clone)]
pub enum Inventory {
    /// A committed block.
    Block(Block),
    /// A validated transaction.
    Transaction(Transaction),
}

impl Inventory {
    /// Returns the identity of the carried item.
    pub fn hash(&self) -> H256 {
        match self {
            Inventory::Block(block) => block.hash(),
            Inventory::Transaction(tx) => tx.hash(),
        }
    }
}

/// The relay interface exposed by the networking layer.
pub trait NetworkStack: Send + Sync {
    /// Relays inventory to peers. Must not block the commit path.
    fn relay(&self, inventory: Inventory);
}
