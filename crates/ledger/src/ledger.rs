//! The ledger facade.

use crate::block_storage::BlockStorage;
use crate::executor::{Executor, LedgerConfig};
use crate::merge_store::MergeStore;
use crate::mirror::Mirror;
use crate::{LedgerError, Result};
use lattice_core::TxNotifier;
use lattice_state::{Asset, Balance, BlkRwSet, TxRwSet};
use lattice_storage::{cf, encode_composite_key, Database, WriteOp};
use lattice_types::{
    merkle_root, Address, Block, BlockHeader, Transaction, TxType, H256,
};
use lattice_vm::{
    wrap_state_json, ContractCode, ContractJob, ADMIN_KEY, GLOBAL_CONTRACT_KEY,
    GLOBAL_STATE_NAMESPACE,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default admin address seeded at genesis.
pub const DEFAULT_ADMIN_ADDR: &str = "0x29763bb368f2d4f62416a1d7a82d16885c206a36";

/// The default global contract, deployed at genesis into the global slot.
const DEFAULT_GLOBAL_CONTRACT: &str = r#"
function L0Init(args)
    return true
end

function L0Invoke(func, args)
    if type(args) ~= "table" then
        return false
    end
    local key = args[1]
    if type(key) ~= "string" then
        return false
    end
    if func == "SetGlobalState" then
        local value = args[2]
        if value == nil then
            return false
        end
        L0.SetGlobalState(key, value)
        return true
    elseif func == "DelGlobalState" then
        L0.DelGlobalState(key)
        return true
    end
    return false
end

function L0Query(args)
    if type(args) ~= "table" then
        return ""
    end
    local key = args[1]
    if type(key) ~= "string" then
        return ""
    end
    local v = L0.GetGlobalState(key)
    if v == nil then
        return ""
    end
    return v
end
"#;

/// Pool cleanup the ledger performs after every committed block.
pub trait ValidatorHook: Send + Sync {
    /// Removes committed and rejected transactions from the pool.
    fn remove_txs_in_verification(&self, txs: &[Transaction]);
}

/// The ledger: block storage, state layer and execution wired together.
pub struct Ledger {
    db: Arc<Database>,
    block_store: BlockStorage,
    state: Arc<BlkRwSet>,
    executor: Executor,
    merge_store: MergeStore,
    notifier: Arc<TxNotifier>,
    validator: RwLock<Option<Arc<dyn ValidatorHook>>>,
    mirror: RwLock<Option<Mirror>>,
}

impl Ledger {
    /// Opens the ledger; bootstraps the genesis block when the store is
    /// empty.
    pub fn new(
        db: Arc<Database>,
        config: LedgerConfig,
        genesis: Block,
        notifier: Arc<TxNotifier>,
    ) -> Result<Arc<Self>> {
        let state = Arc::new(BlkRwSet::new(Arc::clone(&db)));
        let ledger = Arc::new(Self {
            block_store: BlockStorage::new(Arc::clone(&db)),
            executor: Executor::new(Arc::clone(&state), config),
            merge_store: MergeStore::new(Arc::clone(&db)),
            state,
            db,
            notifier,
            validator: RwLock::new(None),
            mirror: RwLock::new(None),
        });

        if ledger.block_store.height()?.is_none() {
            ledger.init(genesis)?;
        }
        Ok(ledger)
    }

    /// Wires the validator hook for post-commit pool cleanup.
    pub fn set_validator(&self, validator: Arc<dyn ValidatorHook>) {
        *self.validator.write() = Some(validator);
    }

    /// Wires the optional post-commit mirror tap.
    pub fn set_mirror(&self, mirror: Mirror) {
        *self.mirror.write() = Some(mirror);
    }

    /// Generates the genesis state: the genesis block plus the admin
    /// address record and the default global contract.
    fn init(&self, genesis: Block) -> Result<()> {
        info!(hash = %genesis.hash(), "bootstrapping genesis block");
        let committed = self.append_block(genesis, true)?;

        let admin = wrap_state_json(
            &serde_json::to_vec(DEFAULT_ADMIN_ADDR)
                .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
        );
        let global_contract = ContractCode {
            code: DEFAULT_GLOBAL_CONTRACT.to_string(),
            vm_type: "luavm".to_string(),
        };
        let contract = wrap_state_json(
            &serde_json::to_vec(&global_contract)
                .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
        );

        self.db.atomic_write(vec![
            WriteOp::put(
                cf::SCONTRACT,
                encode_composite_key(GLOBAL_STATE_NAMESPACE, ADMIN_KEY),
                admin,
            ),
            WriteOp::put(
                cf::SCONTRACT,
                encode_composite_key(GLOBAL_STATE_NAMESPACE, GLOBAL_CONTRACT_KEY),
                contract,
            ),
        ])?;

        debug!(height = committed.height(), "genesis committed");
        Ok(())
    }

    /// The latest committed height.
    pub fn height(&self) -> Result<u32> {
        self.block_store
            .height()?
            .ok_or_else(|| LedgerError::Corrupt("empty chain".to_string()))
    }

    /// Applies a block atomically and returns its committed form (accepted
    /// transactions only, Merkle root filled in).
    ///
    /// `pack` distinguishes locally packed blocks from synced ones; both
    /// take the same commit path.
    pub fn append_block(&self, block: Block, pack: bool) -> Result<Block> {
        let height = block.height();
        let txs = block.transactions;
        debug!(height, txs = txs.len(), pack, "append block");

        // 1. open the block set and execute everything in parallel
        self.state.set_block(height, txs.len() as u32);
        let errors = self.executor.execute_block(&txs);

        // 2. barrier: collect the block overlay
        let (state_ops, accepted, rejected) = self.state.apply_changes()?;

        // 3. final block: accepted transactions, Merkle root over their
        //    hashes in order
        let tx_hashes: Vec<H256> = accepted.iter().map(Transaction::hash).collect();
        let mut header = block.header;
        header.merkle_root = merkle_root(&tx_hashes);
        let committed = Block::new(header, accepted);

        // 4. one atomic write: block storage + state + merge classification
        let mut ops = self.block_store.append_ops(&committed);
        ops.extend(state_ops);

        let merge_candidates: Vec<Transaction> = committed
            .transactions
            .iter()
            .filter(|tx| {
                (tx.tx_type == TxType::Merged && tx.from_chain != tx.to_chain)
                    || tx.tx_type == TxType::AcrossChain
            })
            .cloned()
            .collect();
        ops.extend(
            self.merge_store
                .classify_ops(&merge_candidates, committed.header.timestamp),
        );

        self.db.atomic_write(ops.clone())?;

        // 5. post-commit: mirror tap, pool cleanup, notifications
        if let Some(mirror) = &*self.mirror.read() {
            mirror.publish(&ops);
        }

        if let Some(validator) = &*self.validator.read() {
            validator.remove_txs_in_verification(&committed.transactions);
            validator.remove_txs_in_verification(&rejected);
        }
        for tx in &committed.transactions {
            self.notifier.notify(tx, None);
        }
        for tx in &rejected {
            let message = errors
                .get(&tx.hash())
                .cloned()
                .unwrap_or_else(|| "rejected".to_string());
            self.notifier.notify(tx, Some(message));
        }

        if !merge_candidates.is_empty() {
            info!(
                height,
                merge_txs = merge_candidates.len(),
                "classified cross-chain transactions"
            );
        }

        Ok(committed)
    }

    /// Walks the hash chain from the tip to genesis, verifying every link.
    pub fn verify_chain(&self) -> Result<()> {
        let height = self.height()?;
        let mut current = self
            .block_store
            .header_by_number(height)?
            .ok_or_else(|| LedgerError::Corrupt(format!("missing header {height}")))?;

        for number in (1..=height).rev() {
            let previous = self
                .block_store
                .header_by_number(number - 1)?
                .ok_or_else(|| LedgerError::Corrupt(format!("missing header {}", number - 1)))?;
            if previous.hash() != current.previous_hash {
                return Err(LedgerError::Corrupt(format!(
                    "block {number} does not link to its parent"
                )));
            }
            current = previous;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    /// Header lookup by height.
    pub fn get_block_by_number(&self, height: u32) -> Result<Option<BlockHeader>> {
        self.block_store.header_by_number(height)
    }

    /// Header lookup by block hash.
    pub fn get_block_by_hash(&self, hash: &H256) -> Result<Option<BlockHeader>> {
        self.block_store.header_by_hash(hash)
    }

    /// Block hash lookup by height.
    pub fn get_block_hash_by_number(&self, height: u32) -> Result<Option<H256>> {
        self.block_store.hash_by_number(height)
    }

    /// Hash of the latest committed block.
    pub fn get_last_block_hash(&self) -> Result<H256> {
        let height = self.height()?;
        self.block_store
            .hash_by_number(height)?
            .ok_or_else(|| LedgerError::Corrupt(format!("missing hash for height {height}")))
    }

    /// Transaction lookup by hash.
    pub fn get_tx_by_hash(&self, hash: &H256) -> Result<Option<Transaction>> {
        self.block_store.tx_by_hash(hash)
    }

    /// Transaction hash list of a block.
    pub fn get_transaction_hash_list(&self, height: u32) -> Result<Vec<H256>> {
        self.block_store.tx_hashes_by_number(height)
    }

    /// Transactions of a block by height, optionally filtered by type.
    pub fn get_txs_by_block_number(
        &self,
        height: u32,
        filter: Option<TxType>,
    ) -> Result<Vec<Transaction>> {
        self.block_store.txs_by_number(height, filter)
    }

    /// Transactions of a block by hash, optionally filtered by type.
    pub fn get_txs_by_block_hash(
        &self,
        hash: &H256,
        filter: Option<TxType>,
    ) -> Result<Vec<Transaction>> {
        self.block_store.txs_by_hash(hash, filter)
    }

    /// Committed balances of an account (block overlay included while a
    /// block is being applied).
    pub fn get_balances(&self, addr: &Address) -> Result<Balance> {
        Ok(self.state.get_balance_states(addr, false)?)
    }

    /// Asset registry lookup.
    pub fn get_asset(&self, id: u32) -> Result<Option<Asset>> {
        Ok(self.state.get_asset_state(id, false)?)
    }

    /// Every registered asset.
    pub fn get_assets(&self) -> Result<BTreeMap<u32, Asset>> {
        Ok(self.state.get_asset_states(false)?)
    }

    /// Complex queries are served by non-validating peers only.
    pub fn complex_query(&self, _key: &str) -> Result<Vec<u8>> {
        Err(LedgerError::Unsupported("complex query on validating peer"))
    }

    /// Stores the transactions settled by a merged transaction.
    pub fn put_txs_hash_by_merge_tx_hash(
        &self,
        merge_tx_hash: &H256,
        tx_hashes: &[H256],
    ) -> Result<()> {
        self.merge_store
            .put_txs_hash_by_merge_tx_hash(merge_tx_hash, tx_hashes)
    }

    /// The transactions settled by a merged transaction.
    pub fn get_txs_by_merge_tx_hash(&self, merge_tx_hash: &H256) -> Result<Vec<Transaction>> {
        let mut txs = Vec::new();
        for hash in self.merge_store.txs_hash_by_merge_tx_hash(merge_tx_hash)? {
            let Some(tx) = self.block_store.tx_by_hash(&hash)? else {
                return Err(LedgerError::NotFound(hash));
            };
            txs.push(tx);
        }
        Ok(txs)
    }

    /// Transactions classified for merging within the trailing `duration`
    /// seconds of `now`.
    pub fn get_merged_transaction(&self, now: u32, duration: u32) -> Result<Vec<Transaction>> {
        let mut txs = Vec::new();
        for hash in self.merge_store.merged_tx_hashes_since(now, duration)? {
            if let Some(tx) = self.block_store.tx_by_hash(&hash)? {
                txs.push(tx);
            } else {
                warn!(tx_hash = %hash, "classified transaction missing from store");
            }
        }
        Ok(txs)
    }

    /// Runs a read-only contract query; nothing is committed.
    pub fn query_contract(&self, tx: &Transaction) -> Result<Vec<u8>> {
        if tx.tx_type != TxType::ContractQuery {
            return Err(LedgerError::Vm(lattice_vm::VmError::Execution(
                "not a query transaction".to_string(),
            )));
        }
        let staging = Arc::new(TxRwSet::new(Arc::clone(&self.state)));
        let value = self.executor.run_contract(tx, &staging)?;
        Ok(value.as_display_string().into_bytes())
    }

    /// The block set; exposed for the node wiring and tests.
    pub fn state(&self) -> &Arc<BlkRwSet> {
        &self.state
    }

    /// Committed balances read helper for the validator projections.
    pub fn balance_from_db(&self, addr: &Address) -> Option<Balance> {
        self.state.get_balance_states(addr, true).ok()
    }

    /// Committed asset read helper for the validator projections.
    pub fn asset_from_db(&self, id: u32) -> Option<Asset> {
        self.state.get_asset_state(id, true).ok().flatten()
    }

    /// Parses a contract query payload; exposed for RPC-side validation.
    pub fn parse_contract_payload(tx: &Transaction) -> Result<ContractJob> {
        Ok(ContractJob::from_tx(tx.clone())?)
    }
}
