//! Per-transaction staging snapshots.
//!
//! Each transaction of a block executes against its own [`TxRwSet`]. The
//! snapshot sees the transaction's prior writes, then the block overlay,
//! then committed storage - but never another pending transaction's staging.
//! On completion the snapshot is taken and merged into the block set under
//! the read-set conflict check.

use crate::balance::{decode_amount, decode_nonce, encode_amount, encode_nonce};
use crate::rwset::{KvRwSet, KvWrite};
use crate::{asset_key, balance_key, Asset, Balance, BlkRwSet, Result, StateError, ASSET_NAMESPACE, NONCE_KEY};
use lattice_storage::{decode_composite_key, encode_composite_key, namespace_prefix};
use lattice_types::Address;
use num_bigint::BigInt;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// The three staged namespace sets of one transaction, ready to merge.
#[derive(Debug, Default, Clone)]
pub struct TxRwSnapshot {
    /// Contract state overlay.
    pub chain: KvRwSet,
    /// Asset registry overlay.
    pub asset: KvRwSet,
    /// Balance overlay.
    pub balance: KvRwSet,
}

impl TxRwSnapshot {
    /// True when nothing was read or written.
    pub fn is_empty(&self) -> bool {
        self.chain.is_empty() && self.asset.is_empty() && self.balance.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    chain: KvRwSet,
    asset: KvRwSet,
    balance: KvRwSet,
}

/// A private staging view for one transaction execution.
pub struct TxRwSet {
    block: Arc<BlkRwSet>,
    inner: Mutex<Inner>,
}

impl TxRwSet {
    /// Creates a staging view over the block set.
    pub fn new(block: Arc<BlkRwSet>) -> Self {
        Self {
            block,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// The block set this view stages against.
    pub fn block(&self) -> &Arc<BlkRwSet> {
        &self.block
    }

    /// Takes the staged sets, leaving this view empty.
    pub fn take_snapshot(&self) -> TxRwSnapshot {
        let mut inner = self.inner.lock();
        TxRwSnapshot {
            chain: std::mem::take(&mut inner.chain),
            asset: std::mem::take(&mut inner.asset),
            balance: std::mem::take(&mut inner.balance),
        }
    }

    // ------------------------------------------------------------------
    // Contract state
    // ------------------------------------------------------------------

    /// Reads contract state, observing own writes first.
    pub fn get_chain_state(&self, contract_addr: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let ckey = encode_composite_key(contract_addr, key);
        {
            let inner = self.inner.lock();
            if let Some(effective) = inner.chain.effective(&ckey) {
                return Ok(effective.map(|v| v.to_vec()));
            }
        }
        let value = self.block.get_chain_state(contract_addr, key, false)?;
        self.inner.lock().chain.record_read(ckey, value.clone());
        Ok(value)
    }

    /// Reads contract state in `[start_key, end_key)` (whole namespace when
    /// `end_key` is empty), merged with this view's overlay.
    pub fn get_chain_state_by_range(
        &self,
        contract_addr: &str,
        start_key: &str,
        end_key: &str,
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut out = self
            .block
            .get_chain_state_by_range(contract_addr, start_key, end_key, false)?;

        let prefix = namespace_prefix(contract_addr);
        let start = encode_composite_key(contract_addr, start_key);
        let end = if end_key.is_empty() {
            None
        } else {
            Some(encode_composite_key(contract_addr, end_key))
        };
        let in_bounds = |key: &[u8]| match &end {
            Some(end) => key >= start.as_slice() && key < end.as_slice(),
            None => key.starts_with(&prefix),
        };

        let inner = self.inner.lock();
        for (key, write) in &inner.chain.writes {
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
        Ok(out)
    }

    /// Stages a contract state write.
    pub fn set_chain_state(&self, contract_addr: &str, key: &str, value: Vec<u8>) {
        let ckey = encode_composite_key(contract_addr, key);
        self.inner.lock().chain.writes.insert(ckey, KvWrite::Put(value));
    }

    /// Stages a contract state deletion.
    pub fn del_chain_state(&self, contract_addr: &str, key: &str) {
        let ckey = encode_composite_key(contract_addr, key);
        self.inner.lock().chain.writes.insert(ckey, KvWrite::Delete);
    }

    /// Number of staged contract-state entries.
    pub fn staged_chain_items(&self) -> usize {
        self.inner.lock().chain.writes.len()
    }

    // ------------------------------------------------------------------
    // Balances
    // ------------------------------------------------------------------

    fn get_balance_raw(&self, addr: &Address, key: &str) -> Result<Option<Vec<u8>>> {
        let ns = addr.to_hex_string();
        let ckey = encode_composite_key(&ns, key);
        {
            let inner = self.inner.lock();
            if let Some(effective) = inner.balance.effective(&ckey) {
                return Ok(effective.map(|v| v.to_vec()));
            }
        }
        let value = self.block.get_ns_balance_raw(&ckey)?;
        self.inner.lock().balance.record_read(ckey, value.clone());
        Ok(value)
    }

    /// Reads the balance of `(addr, asset_id)`.
    pub fn get_balance(&self, addr: &Address, asset_id: u32) -> Result<Option<BigInt>> {
        Ok(self
            .get_balance_raw(addr, &balance_key(asset_id))?
            .map(|bytes| decode_amount(&bytes)))
    }

    /// Stages a balance write.
    pub fn set_balance(&self, addr: &Address, asset_id: u32, amount: &BigInt) {
        let ckey = encode_composite_key(&addr.to_hex_string(), &balance_key(asset_id));
        self.inner
            .lock()
            .balance
            .writes
            .insert(ckey, KvWrite::Put(encode_amount(amount)));
    }

    /// Reads the account nonce counter.
    pub fn get_account_nonce(&self, addr: &Address) -> Result<u32> {
        Ok(self
            .get_balance_raw(addr, NONCE_KEY)?
            .map(|bytes| decode_nonce(&bytes))
            .unwrap_or(0))
    }

    /// Stages the account nonce counter.
    pub fn set_account_nonce(&self, addr: &Address, nonce: u32) {
        let ckey = encode_composite_key(&addr.to_hex_string(), NONCE_KEY);
        self.inner
            .lock()
            .balance
            .writes
            .insert(ckey, KvWrite::Put(encode_nonce(nonce)));
    }

    /// Reads every balance of `addr`, merged with this view's overlay.
    pub fn get_balances(&self, addr: &Address) -> Result<Balance> {
        let mut balance = self.block.get_balance_states(addr, false)?;

        let ns = addr.to_hex_string();
        let prefix = namespace_prefix(&ns);
        let inner = self.inner.lock();
        for (ckey, write) in &inner.balance.writes {
            if !ckey.starts_with(&prefix) {
                continue;
            }
            let (_, key) = decode_composite_key(ckey)?;
            if key == NONCE_KEY {
                if let KvWrite::Put(value) = write {
                    balance.nonce = decode_nonce(value);
                }
                continue;
            }
            let asset_id: u32 = key
                .trim_end_matches('$')
                .parse()
                .map_err(|_| StateError::Decode(format!("bad balance key: {key}")))?;
            match write {
                KvWrite::Put(value) => balance.set(asset_id, decode_amount(value)),
                KvWrite::Delete => {
                    balance.amounts.remove(&asset_id);
                }
            }
        }
        Ok(balance)
    }

    // ------------------------------------------------------------------
    // Assets
    // ------------------------------------------------------------------

    /// Reads an asset registry entry.
    pub fn get_asset(&self, asset_id: u32) -> Result<Option<Asset>> {
        let ckey = encode_composite_key(ASSET_NAMESPACE, &asset_key(asset_id));
        {
            let inner = self.inner.lock();
            if let Some(effective) = inner.asset.effective(&ckey) {
                return match effective {
                    Some(bytes) => Ok(Some(Asset::from_bytes(bytes)?)),
                    None => Ok(None),
                };
            }
        }
        let value = self.block.get_ns_asset_raw(&ckey)?;
        self.inner.lock().asset.record_read(ckey, value.clone());
        match value {
            Some(bytes) => Ok(Some(Asset::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stages an asset registry write.
    pub fn set_asset(&self, asset: &Asset) {
        let ckey = encode_composite_key(ASSET_NAMESPACE, &asset_key(asset.id));
        self.inner
            .lock()
            .asset
            .writes
            .insert(ckey, KvWrite::Put(asset.to_bytes()));
    }
}
