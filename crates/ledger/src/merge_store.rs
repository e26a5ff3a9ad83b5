//! Classified merged and cross-chain transaction lookups.
//!
//! Cross-chain settlement itself is out of scope; the ledger only records
//! which transactions need merging and the lookup tables tying a merged
//! transaction to the transactions it settles. Records live in the
//! `block-index` column family under dedicated key prefixes.

use crate::{LedgerError, Result};
use lattice_storage::{cf, Database, WriteOp};
use lattice_types::{Transaction, H256};
use std::sync::Arc;

const MERGE_LOOKUP_PREFIX: u8 = b'm';
const PENDING_PREFIX: u8 = b'g';

fn merge_lookup_key(merge_tx_hash: &H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(MERGE_LOOKUP_PREFIX);
    key.extend_from_slice(merge_tx_hash.as_bytes());
    key
}

fn pending_key(timestamp: u32, tx_hash: &H256) -> Vec<u8> {
    let mut key = Vec::with_capacity(37);
    key.push(PENDING_PREFIX);
    // big-endian so lexicographic order is time order
    key.extend_from_slice(&timestamp.to_be_bytes());
    key.extend_from_slice(tx_hash.as_bytes());
    key
}

/// Merged/cross-chain transaction classification store.
pub struct MergeStore {
    db: Arc<Database>,
}

impl MergeStore {
    /// Creates the store over the shared database.
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Builds the operations recording transactions that await merging.
    pub fn classify_ops(&self, txs: &[Transaction], committed_at: u32) -> Vec<WriteOp> {
        txs.iter()
            .map(|tx| {
                WriteOp::put(
                    cf::BLOCK_INDEX,
                    pending_key(committed_at, &tx.hash()),
                    tx.hash().as_bytes().to_vec(),
                )
            })
            .collect()
    }

    /// Stores the transaction hashes settled by a merged transaction.
    pub fn put_txs_hash_by_merge_tx_hash(
        &self,
        merge_tx_hash: &H256,
        tx_hashes: &[H256],
    ) -> Result<()> {
        let mut value = Vec::with_capacity(tx_hashes.len() * 32);
        for hash in tx_hashes {
            value.extend_from_slice(hash.as_bytes());
        }
        self.db
            .atomic_write(vec![WriteOp::put(
                cf::BLOCK_INDEX,
                merge_lookup_key(merge_tx_hash),
                value,
            )])
            .map_err(LedgerError::from)
    }

    /// The transaction hashes settled by a merged transaction.
    pub fn txs_hash_by_merge_tx_hash(&self, merge_tx_hash: &H256) -> Result<Vec<H256>> {
        let Some(bytes) = self
            .db
            .get(cf::BLOCK_INDEX, &merge_lookup_key(merge_tx_hash))?
        else {
            return Ok(Vec::new());
        };
        if bytes.len() % 32 != 0 {
            return Err(LedgerError::Corrupt(format!(
                "merge lookup length {}",
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

    /// Hashes of transactions classified within the trailing `duration`
    /// seconds of `now`.
    pub fn merged_tx_hashes_since(&self, now: u32, duration: u32) -> Result<Vec<H256>> {
        let from = now.saturating_sub(duration);
        let start = pending_key(from, &H256::ZERO);
        let end = {
            let mut key = Vec::with_capacity(5);
            key.push(PENDING_PREFIX);
            key.extend_from_slice(&now.saturating_add(1).to_be_bytes());
            key
        };

        let entries = self.db.get_by_range(cf::BLOCK_INDEX, &start, &end)?;
        entries
            .into_iter()
            .map(|(_, value)| {
                H256::from_slice(&value).map_err(|e| LedgerError::Corrupt(e.to_string()))
            })
            .collect()
    }
}
