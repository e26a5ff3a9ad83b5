//! The block-wide read/write set.
//!
//! A [`BlkRwSet`] buffers every read and intended write of the block being
//! applied, across the three state namespaces. Transactions merge their
//! staging snapshots in transaction-index order; `apply_changes` blocks
//! until the last expected index has merged, then drains the write overlay
//! into storage operations.
//!
//! Lock acquisition order is always chain code, then asset, then balance.

use crate::balance::{decode_amount, decode_nonce, encode_amount};
use crate::rwset::{KvRwSet, KvWrite};
use crate::txrwset::TxRwSnapshot;
use crate::{asset_key, balance_key, Asset, Balance, Result, StateError, ASSET_NAMESPACE, NONCE_KEY};
use lattice_storage::{
    cf, decode_composite_key, encode_composite_key, namespace_prefix, Database, WriteOp,
};
use lattice_types::{merkle_root, Address, Transaction, H256};
use num_bigint::BigInt;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// The three state namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ns {
    Chain,
    Asset,
    Balance,
}

impl Ns {
    fn cf(self) -> &'static str {
        match self {
            Ns::Chain => cf::SCONTRACT,
            Ns::Asset => cf::ASSET,
            Ns::Balance => cf::BALANCE,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Ns::Chain => "chaincode",
            Ns::Asset => "asset",
            Ns::Balance => "balance",
        }
    }
}

#[derive(Debug, Default)]
struct Progress {
    height: u32,
    expected: u32,
    cur: u32,
}

/// The read-write set of the block currently being applied.
pub struct BlkRwSet {
    chain: RwLock<KvRwSet>,
    asset: RwLock<KvRwSet>,
    balance: RwLock<KvRwSet>,

    db: Arc<Database>,

    txs: Mutex<Vec<Transaction>>,
    err_txs: Mutex<Vec<Transaction>>,

    progress: Mutex<Progress>,
    turn: Condvar,
}

impl BlkRwSet {
    /// Creates a block set over the given database.
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            chain: RwLock::new(KvRwSet::new()),
            asset: RwLock::new(KvRwSet::new()),
            balance: RwLock::new(KvRwSet::new()),
            db,
            txs: Mutex::new(Vec::new()),
            err_txs: Mutex::new(Vec::new()),
            progress: Mutex::new(Progress::default()),
            turn: Condvar::new(),
        }
    }

    /// Resets the set for a new block of `tx_count` transactions.
    pub fn set_block(&self, height: u32, tx_count: u32) {
        debug!(height, tx_count, "BlkRwSet set_block");
        *self.chain.write() = KvRwSet::new();
        *self.asset.write() = KvRwSet::new();
        *self.balance.write() = KvRwSet::new();
        self.txs.lock().clear();
        self.err_txs.lock().clear();
        let mut progress = self.progress.lock();
        progress.height = height;
        progress.expected = tx_count;
        progress.cur = 0;
    }

    /// Height of the block being applied.
    pub fn block_height(&self) -> u32 {
        self.progress.lock().height
    }

    fn set(&self, ns: Ns) -> &RwLock<KvRwSet> {
        match ns {
            Ns::Chain => &self.chain,
            Ns::Asset => &self.asset,
            Ns::Balance => &self.balance,
        }
    }

    /// Reads one key. When `committed` is false the block overlay is
    /// consulted first and a storage fallthrough is recorded as a read;
    /// when true the overlay is bypassed entirely.
    fn get_ns(&self, ns: Ns, ckey: &[u8], committed: bool) -> Result<Option<Vec<u8>>> {
        if !committed {
            let mut set = self.set(ns).write();
            if let Some(effective) = set.effective(ckey) {
                return Ok(effective.map(|v| v.to_vec()));
            }
            let stored = self.db.get(ns.cf(), ckey)?;
            set.record_read(ckey.to_vec(), stored.clone());
            return Ok(stored);
        }
        Ok(self.db.get(ns.cf(), ckey)?)
    }

    fn put_ns(&self, ns: Ns, ckey: Vec<u8>, write: KvWrite) {
        self.set(ns).write().writes.insert(ckey, write);
    }

    /// Merges a storage scan with the block overlay; tombstones suppress
    /// keys and the result iterates lexicographically on the composite key.
    fn range_ns(
        &self,
        ns: Ns,
        prefix: &[u8],
        start: &[u8],
        end: Option<&[u8]>,
        committed: bool,
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let stored = match end {
            Some(end) => self.db.get_by_range(ns.cf(), start, end)?,
            None => self.db.get_by_prefix(ns.cf(), prefix)?,
        };
        let mut out: BTreeMap<Vec<u8>, Vec<u8>> = stored.into_iter().collect();

        if !committed {
            let set = self.set(ns).read();
            let in_bounds = |key: &[u8]| match end {
                Some(end) => key >= start && key < end,
                None => key.starts_with(prefix),
            };
            for (key, value) in &set.reads {
                if in_bounds(key) {
                    match value {
                        Some(value) => {
                            out.insert(key.clone(), value.clone());
                        }
                        None => {
                            out.remove(key);
                        }
                    }
                }
            }
            for (key, write) in &set.writes {
                if in_bounds(key) {
                    match write {
                        KvWrite::Put(value) => {
                            out.insert(key.clone(), value.clone());
                        }
                        KvWrite::Delete => {
                            out.remove(key);
                        }
                    }
                }
            }
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Contract state
    // ------------------------------------------------------------------

    /// Gets contract state for a contract address and key.
    pub fn get_chain_state(
        &self,
        contract_addr: &str,
        key: &str,
        committed: bool,
    ) -> Result<Option<Vec<u8>>> {
        let ckey = encode_composite_key(contract_addr, key);
        self.get_ns(Ns::Chain, &ckey, committed)
    }

    /// Gets contract state in `[start_key, end_key)`, or the whole contract
    /// namespace when `end_key` is empty.
    pub fn get_chain_state_by_range(
        &self,
        contract_addr: &str,
        start_key: &str,
        end_key: &str,
        committed: bool,
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let prefix = namespace_prefix(contract_addr);
        let start = encode_composite_key(contract_addr, start_key);
        if end_key.is_empty() {
            self.range_ns(Ns::Chain, &prefix, &start, None, committed)
        } else {
            let end = encode_composite_key(contract_addr, end_key);
            self.range_ns(Ns::Chain, &prefix, &start, Some(&end), committed)
        }
    }

    /// Stages a contract state write.
    pub fn set_chain_state(&self, contract_addr: &str, key: &str, value: Vec<u8>) {
        let ckey = encode_composite_key(contract_addr, key);
        self.put_ns(Ns::Chain, ckey, KvWrite::Put(value));
    }

    /// Stages a contract state deletion.
    pub fn del_chain_state(&self, contract_addr: &str, key: &str) {
        let ckey = encode_composite_key(contract_addr, key);
        self.put_ns(Ns::Chain, ckey, KvWrite::Delete);
    }

    // ------------------------------------------------------------------
    // Balances
    // ------------------------------------------------------------------

    /// Gets the balance of `(addr, asset_id)`.
    pub fn get_balance_state(
        &self,
        addr: &Address,
        asset_id: u32,
        committed: bool,
    ) -> Result<Option<BigInt>> {
        let ckey = encode_composite_key(&addr.to_hex_string(), &balance_key(asset_id));
        Ok(self
            .get_ns(Ns::Balance, &ckey, committed)?
            .map(|bytes| decode_amount(&bytes)))
    }

    /// Gets every balance of `addr`, including its nonce counter.
    pub fn get_balance_states(&self, addr: &Address, committed: bool) -> Result<Balance> {
        let ns = addr.to_hex_string();
        let prefix = namespace_prefix(&ns);
        let start = encode_composite_key(&ns, "");
        let entries = self.range_ns(Ns::Balance, &prefix, &start, None, committed)?;

        let mut balance = Balance::new();
        for (ckey, value) in entries {
            let (_, key) = decode_composite_key(&ckey)?;
            if key == NONCE_KEY {
                balance.nonce = decode_nonce(&value);
                continue;
            }
            let id_str = key.trim_end_matches('$');
            let asset_id: u32 = id_str
                .parse()
                .map_err(|_| StateError::Decode(format!("bad balance key: {key}")))?;
            balance.set(asset_id, decode_amount(&value));
        }
        Ok(balance)
    }

    /// Stages a balance write.
    pub fn set_balance_state(&self, addr: &Address, asset_id: u32, amount: &BigInt) {
        let ckey = encode_composite_key(&addr.to_hex_string(), &balance_key(asset_id));
        self.put_ns(Ns::Balance, ckey, KvWrite::Put(encode_amount(amount)));
    }

    /// Stages a balance deletion.
    pub fn del_balance_state(&self, addr: &Address, asset_id: u32) {
        let ckey = encode_composite_key(&addr.to_hex_string(), &balance_key(asset_id));
        self.put_ns(Ns::Balance, ckey, KvWrite::Delete);
    }

    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    /// Gets an asset registry entry.
    pub fn get_asset_state(&self, asset_id: u32, committed: bool) -> Result<Option<Asset>> {
        let ckey = encode_composite_key(ASSET_NAMESPACE, &asset_key(asset_id));
        match self.get_ns(Ns::Asset, &ckey, committed)? {
            Some(bytes) => Ok(Some(Asset::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Gets every registered asset.
    pub fn get_asset_states(&self, committed: bool) -> Result<BTreeMap<u32, Asset>> {
        let prefix = namespace_prefix(ASSET_NAMESPACE);
        let start = encode_composite_key(ASSET_NAMESPACE, "");
        let entries = self.range_ns(Ns::Asset, &prefix, &start, None, committed)?;

        let mut assets = BTreeMap::new();
        for (_, value) in entries {
            let asset = Asset::from_bytes(&value)?;
            assets.insert(asset.id, asset);
        }
        Ok(assets)
    }

    /// Stages an asset registry write.
    pub fn set_asset_state(&self, asset: &Asset) {
        let ckey = encode_composite_key(ASSET_NAMESPACE, &asset_key(asset.id));
        self.put_ns(Ns::Asset, ckey, KvWrite::Put(asset.to_bytes()));
    }

    /// Stages an asset registry deletion.
    pub fn del_asset_state(&self, asset_id: u32) {
        let ckey = encode_composite_key(ASSET_NAMESPACE, &asset_key(asset_id));
        self.put_ns(Ns::Asset, ckey, KvWrite::Delete);
    }

    /// Raw uncommitted read of a balance composite key, recording the
    /// observation. Used by staging views.
    pub(crate) fn get_ns_balance_raw(&self, ckey: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_ns(Ns::Balance, ckey, false)
    }

    /// Raw uncommitted read of an asset composite key, recording the
    /// observation. Used by staging views.
    pub(crate) fn get_ns_asset_raw(&self, ckey: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_ns(Ns::Asset, ckey, false)
    }

    // ------------------------------------------------------------------
    // Merge and commit
    // ------------------------------------------------------------------

    /// Merges an accepted transaction's staging snapshot at its index.
    ///
    /// Merges are serialized in index order: the call blocks until every
    /// lower index has merged. A read-set conflict leaves the barrier where
    /// it is so the caller can re-execute and merge again at the same
    /// index.
    pub fn merge(
        &self,
        snapshot: TxRwSnapshot,
        tx: &Transaction,
        transfer_txs: Vec<Transaction>,
        tx_index: u32,
    ) -> Result<()> {
        self.wait_turn(tx_index);

        {
            let mut chain = self.chain.write();
            let mut asset = self.asset.write();
            let mut balance = self.balance.write();

            Self::check_conflicts(&chain, &snapshot.chain, Ns::Chain)?;
            Self::check_conflicts(&asset, &snapshot.asset, Ns::Asset)?;
            Self::check_conflicts(&balance, &snapshot.balance, Ns::Balance)?;

            Self::overlay(&mut chain, snapshot.chain);
            Self::overlay(&mut asset, snapshot.asset);
            Self::overlay(&mut balance, snapshot.balance);
        }

        let mut txs = self.txs.lock();
        txs.push(tx.clone());
        txs.extend(transfer_txs);
        drop(txs);

        self.advance(tx_index);
        Ok(())
    }

    /// Records a transaction as rejected at its index, advancing the
    /// barrier. A snapshot may still be supplied for side effects that must
    /// survive the rejection (the pre-execution fee transfer of a failed
    /// contract call); its writes are overlaid without a conflict check.
    pub fn merge_rejected(
        &self,
        snapshot: Option<TxRwSnapshot>,
        tx: &Transaction,
        tx_index: u32,
    ) {
        self.wait_turn(tx_index);

        if let Some(snapshot) = snapshot {
            let mut chain = self.chain.write();
            let mut asset = self.asset.write();
            let mut balance = self.balance.write();
            Self::overlay(&mut chain, snapshot.chain);
            Self::overlay(&mut asset, snapshot.asset);
            Self::overlay(&mut balance, snapshot.balance);
        }

        self.err_txs.lock().push(tx.clone());
        self.advance(tx_index);
    }

    fn check_conflicts(block: &KvRwSet, staged: &KvRwSet, ns: Ns) -> Result<()> {
        for (key, observed) in &staged.reads {
            if let Some(effective) = block.effective(key) {
                if effective != observed.as_deref() {
                    let decoded = decode_composite_key(key)
                        .map(|(ns, k)| format!("{ns} {k}"))
                        .unwrap_or_else(|_| format!("0x{}", hex::encode(key)));
                    return Err(StateError::ReadSetConflict {
                        namespace: ns.label(),
                        key: decoded,
                    });
                }
            }
        }
        Ok(())
    }

    fn overlay(block: &mut KvRwSet, staged: KvRwSet) {
        for (key, value) in staged.reads {
            block.record_read(key, value);
        }
        for (key, write) in staged.writes {
            block.writes.insert(key, write);
        }
    }

    fn wait_turn(&self, tx_index: u32) {
        let mut progress = self.progress.lock();
        while progress.cur != tx_index {
            self.turn.wait(&mut progress);
        }
    }

    fn advance(&self, tx_index: u32) {
        let mut progress = self.progress.lock();
        progress.cur = tx_index + 1;
        debug!(height = progress.height, cur = progress.cur, "BlkRwSet merge advanced");
        self.turn.notify_all();
    }

    /// Drains the block into storage operations.
    ///
    /// Blocks until every expected transaction index has merged, then
    /// returns the write batch together with the accepted and rejected
    /// transaction lists.
    pub fn apply_changes(&self) -> Result<(Vec<WriteOp>, Vec<Transaction>, Vec<Transaction>)> {
        {
            let mut progress = self.progress.lock();
            while progress.cur != progress.expected {
                self.turn.wait(&mut progress);
            }
            debug!(
                height = progress.height,
                tx_count = progress.expected,
                "BlkRwSet apply_changes"
            );
        }

        let chain = self.chain.read();
        let asset = self.asset.read();
        let balance = self.balance.read();

        let mut ops = Vec::new();
        for (set, ns) in [(&*chain, Ns::Chain), (&*asset, Ns::Asset), (&*balance, Ns::Balance)] {
            for (key, write) in &set.writes {
                match write {
                    KvWrite::Put(value) => {
                        ops.push(WriteOp::put(ns.cf(), key.clone(), value.clone()))
                    }
                    KvWrite::Delete => ops.push(WriteOp::delete(ns.cf(), key.clone())),
                }
            }
        }

        let accepted = std::mem::take(&mut *self.txs.lock());
        let rejected = std::mem::take(&mut *self.err_txs.lock());
        Ok((ops, accepted, rejected))
    }

    /// Merkle root over the canonical encodings of the three namespace sets.
    pub fn root_hash(&self) -> H256 {
        let chain = self.chain.read();
        let asset = self.asset.read();
        let balance = self.balance.read();
        let hashes = [
            H256::keccak256(&chain.canonical_encoding()),
            H256::keccak256(&asset.canonical_encoding()),
            H256::keccak256(&balance.canonical_encoding()),
        ];
        merkle_root(&hashes)
    }
}
