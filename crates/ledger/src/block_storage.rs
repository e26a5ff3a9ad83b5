//! Persistent block storage.
//!
//! Layout:
//! - `blocks`: header bytes keyed by block hash
//! - `block-index`: `'h' || height` -> block hash, `'t' || height` ->
//!   concatenated transaction hashes, `"height"` -> latest height
//! - `transactions`: transaction bytes keyed by transaction hash

use crate::{LedgerError, Result};
use lattice_storage::{cf, Database, WriteOp};
use lattice_types::{Block, BlockHeader, Transaction, TxType, H256};
use std::sync::Arc;

const HEIGHT_KEY: &[u8] = b"height";

fn hash_index_key(height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(b'h');
    key.extend_from_slice(&height.to_le_bytes());
    key
}

fn tx_index_key(height: u32) -> Vec<u8> {
    let mut key = Vec::with_capacity(5);
    key.push(b't');
    key.extend_from_slice(&height.to_le_bytes());
    key
}

/// Block and transaction persistence over the shared database.
pub struct BlockStorage {
    db: Arc<Database>,
}

impl BlockStorage {
    /// Creates block storage over the database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// The latest committed height, if any block was committed.
    pub fn height(&self) -> Result<Option<u32>> {
        Ok(self
            .db
            .get(cf::BLOCK_INDEX, HEIGHT_KEY)?
            .map(|bytes| {
                let mut buf = [0u8; 4];
                let n = bytes.len().min(4);
                buf[..n].copy_from_slice(&bytes[..n]);
                u32::from_le_bytes(buf)
            }))
    }

    /// Builds the write operations persisting a block.
    pub fn append_ops(&self, block: &Block) -> Vec<WriteOp> {
        let hash = block.hash();
        let mut ops = Vec::with_capacity(3 + block.transactions.len() + 1);

        ops.push(WriteOp::put(
            cf::BLOCKS,
            hash.as_bytes().to_vec(),
            block.header.encode(),
        ));
        ops.push(WriteOp::put(
            cf::BLOCK_INDEX,
            hash_index_key(block.height()),
            hash.as_bytes().to_vec(),
        ));

        let mut tx_hashes = Vec::with_capacity(block.transactions.len() * 32);
        for tx in &block.transactions {
            let tx_hash = tx.hash();
            tx_hashes.extend_from_slice(tx_hash.as_bytes());
            ops.push(WriteOp::put(
                cf::TRANSACTIONS,
                tx_hash.as_bytes().to_vec(),
                tx.encode(),
            ));
        }
        ops.push(WriteOp::put(
            cf::BLOCK_INDEX,
            tx_index_key(block.height()),
            tx_hashes,
        ));
        ops.push(WriteOp::put(
            cf::BLOCK_INDEX,
            HEIGHT_KEY.to_vec(),
            block.height().to_le_bytes().to_vec(),
        ));
        ops
    }

    /// Header lookup by block hash.
    pub fn header_by_hash(&self, hash: &H256) -> Result<Option<BlockHeader>> {
        match self.db.get(cf::BLOCKS, hash.as_bytes())? {
            Some(bytes) => Ok(Some(
                BlockHeader::decode(&bytes).map_err(|e| LedgerError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Block hash lookup by height.
    pub fn hash_by_number(&self, height: u32) -> Result<Option<H256>> {
        match self.db.get(cf::BLOCK_INDEX, &hash_index_key(height))? {
            Some(bytes) => Ok(Some(
                H256::from_slice(&bytes).map_err(|e| LedgerError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Header lookup by height.
    pub fn header_by_number(&self, height: u32) -> Result<Option<BlockHeader>> {
        match self.hash_by_number(height)? {
            Some(hash) => self.header_by_hash(&hash),
            None => Ok(None),
        }
    }

    /// Transaction hash list of a block.
    pub fn tx_hashes_by_number(&self, height: u32) -> Result<Vec<H256>> {
        let Some(bytes) = self.db.get(cf::BLOCK_INDEX, &tx_index_key(height))? else {
            return Ok(Vec::new());
        };
        if bytes.len() % 32 != 0 {
            return Err(LedgerError::Corrupt(format!(
                "transaction hash list length {}",
                bytes.len()
            )));
        }
        bytes
            .chunks(32)
            .map(|chunk| {
                H256::from_slice(chunk).map_err(|e| LedgerError::Corrupt(e.to_string()))
            })
            .collect()
    }

    /// Transaction lookup by hash.
    pub fn tx_by_hash(&self, hash: &H256) -> Result<Option<Transaction>> {
        match self.db.get(cf::TRANSACTIONS, hash.as_bytes())? {
            Some(bytes) => Ok(Some(
                Transaction::decode(&bytes).map_err(|e| LedgerError::Corrupt(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    /// Transactions of a block, optionally filtered by type.
    pub fn txs_by_number(&self, height: u32, filter: Option<TxType>) -> Result<Vec<Transaction>> {
        let mut txs = Vec::new();
        for hash in self.tx_hashes_by_number(height)? {
            let Some(tx) = self.tx_by_hash(&hash)? else {
                return Err(LedgerError::NotFound(hash));
            };
            if filter.is_none() || filter == Some(tx.tx_type) {
                txs.push(tx);
            }
        }
        Ok(txs)
    }

    /// Transactions of a block identified by hash, optionally filtered.
    pub fn txs_by_hash(&self, hash: &H256, filter: Option<TxType>) -> Result<Vec<Transaction>> {
        match self.header_by_hash(hash)? {
            Some(header) => self.txs_by_number(header.height, filter),
            None => Ok(Vec::new()),
        }
    }
}
