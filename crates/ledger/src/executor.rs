//! Parallel block execution.
//!
//! Every transaction of a block runs against its own staging view and
//! merges into the block set in index order. Contract transactions are
//! dispatched to the interpreter worker pools; everything else applies its
//! balance and registry effects in-process. A read-set conflict triggers
//! one re-execution against the freshest block-local state; a second
//! failure records the transaction as rejected.

use crate::{LedgerError, Result};
use lattice_state::{Asset, BlkRwSet, TxRwSet};
use lattice_types::{Address, ChainCoordinate, Transaction, TxType, H256};
use lattice_vm::js::JsRuntime;
use lattice_vm::lua::LuaRuntime;
use lattice_vm::{
    ContractCode, ContractHandler, ContractJob, ScriptValue, VmConfig, VmError, VmFlavor,
    VmResult, WorkerPool, CONTRACT_CODE_KEY, GLOBAL_CONTRACT_KEY, GLOBAL_STATE_NAMESPACE,
};
use num_bigint::BigInt;
use num_traits::Zero;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Ledger-side configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// The local chain coordinate; only matching sides touch local balances.
    pub local_chain: ChainCoordinate,
    /// Address credited with transaction fees.
    pub fee_collector: Address,
    /// Interpreter limits for the worker pools.
    pub vm: VmConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            local_chain: ChainCoordinate::new(vec![0]),
            fee_collector: Address::ZERO,
            vm: VmConfig::default(),
        }
    }
}

/// Applies one transaction's balance effect to a staging view.
///
/// The sender side pays `amount + fee` and must not go negative except for
/// `Issue`/`IssueUpdate`; the recipient side receives `amount`; the fee is
/// credited to the fee collector. Only sides whose chain coordinate matches
/// the local chain are touched. The sender's nonce counter advances to
/// `tx.nonce + 1`.
pub fn apply_balances(
    staging: &TxRwSet,
    tx: &Transaction,
    local_chain: &ChainCoordinate,
    fee_collector: &Address,
) -> Result<()> {
    let asset_id = tx.asset_id;
    let outgoing = BigInt::from(tx.amount) + BigInt::from(tx.fee);

    if &tx.from_chain == local_chain {
        let current = staging
            .get_balance(&tx.sender, asset_id)?
            .unwrap_or_else(BigInt::zero);
        let debited = current - &outgoing;
        if debited.sign() == num_bigint::Sign::Minus && !tx.tx_type.is_issue() {
            return Err(LedgerError::BalanceInsufficient { asset_id });
        }
        staging.set_balance(&tx.sender, asset_id, &debited);

        let nonce = staging.get_account_nonce(&tx.sender)?;
        staging.set_account_nonce(&tx.sender, nonce.max(tx.nonce + 1));

        if tx.fee > 0 {
            let collected = staging
                .get_balance(fee_collector, asset_id)?
                .unwrap_or_else(BigInt::zero)
                + BigInt::from(tx.fee);
            staging.set_balance(fee_collector, asset_id, &collected);
        }
    }

    if &tx.to_chain == local_chain {
        let current = staging
            .get_balance(&tx.recipient, asset_id)?
            .unwrap_or_else(BigInt::zero);
        staging.set_balance(&tx.recipient, asset_id, &(current + BigInt::from(tx.amount)));
    }
    Ok(())
}

/// Applies an `Issue`/`IssueUpdate` asset-registry effect to a staging view.
fn apply_asset(staging: &TxRwSet, tx: &Transaction) -> Result<()> {
    let payload = String::from_utf8_lossy(&tx.payload);
    match tx.tx_type {
        TxType::Issue => {
            if staging.get_asset(tx.asset_id)?.is_some() {
                return Err(LedgerError::State(lattice_state::StateError::InvalidAssetPayload(
                    format!("asset {} already exists", tx.asset_id),
                )));
            }
            let base = Asset {
                id: tx.asset_id,
                issuer: tx.sender,
                owner: tx.recipient,
                ..Default::default()
            };
            let created = base.update(&payload)?;
            staging.set_asset(&created);
        }
        TxType::IssueUpdate => {
            let Some(asset) = staging.get_asset(tx.asset_id)? else {
                return Err(LedgerError::State(lattice_state::StateError::AssetNotFound(
                    tx.asset_id,
                )));
            };
            if !payload.is_empty() {
                let updated = asset.update(&payload)?;
                staging.set_asset(&updated);
            }
        }
        _ => {}
    }
    Ok(())
}

/// The contract handler bound to one transaction's staging view.
pub struct TxExecHandler {
    staging: Arc<TxRwSet>,
    local_chain: ChainCoordinate,
    fee_collector: Address,
}

impl TxExecHandler {
    /// Binds a handler to a staging view.
    pub fn new(staging: Arc<TxRwSet>, config: &LedgerConfig) -> Arc<Self> {
        Arc::new(Self {
            staging,
            local_chain: config.local_chain.clone(),
            fee_collector: config.fee_collector,
        })
    }
}

impl ContractHandler for TxExecHandler {
    fn transfer(&self, tx: &Transaction) -> VmResult<()> {
        apply_balances(&self.staging, tx, &self.local_chain, &self.fee_collector)
            .map_err(|e| VmError::Handler(e.to_string()))
    }

    fn get_state(&self, namespace: &str, key: &str) -> VmResult<Option<Vec<u8>>> {
        self.staging
            .get_chain_state(namespace, key)
            .map_err(|e| VmError::Handler(e.to_string()))
    }

    fn put_state(&self, namespace: &str, key: &str, value: Vec<u8>) -> VmResult<()> {
        self.staging.set_chain_state(namespace, key, value);
        Ok(())
    }

    fn delete_state(&self, namespace: &str, key: &str) -> VmResult<()> {
        self.staging.del_chain_state(namespace, key);
        Ok(())
    }

    fn get_balance(&self, addr: &str, asset_id: u32) -> VmResult<Option<String>> {
        let addr = Address::from_str(addr).map_err(|e| VmError::Handler(e.to_string()))?;
        Ok(self
            .staging
            .get_balance(&addr, asset_id)
            .map_err(|e| VmError::Handler(e.to_string()))?
            .map(|amount| amount.to_string()))
    }

    fn add_transfer(&self, from: &str, to: &str, asset_id: u32, amount: i64) -> VmResult<()> {
        let from = Address::from_str(from).map_err(|e| VmError::Handler(e.to_string()))?;
        let to = Address::from_str(to).map_err(|e| VmError::Handler(e.to_string()))?;
        let amount = BigInt::from(amount);

        let source = self
            .staging
            .get_balance(&from, asset_id)
            .map_err(|e| VmError::Handler(e.to_string()))?
            .unwrap_or_else(BigInt::zero);
        let debited = source - &amount;
        if debited.sign() == num_bigint::Sign::Minus {
            return Err(VmError::Handler(format!(
                "balance insufficient for asset {asset_id}"
            )));
        }
        self.staging.set_balance(&from, asset_id, &debited);

        let target = self
            .staging
            .get_balance(&to, asset_id)
            .map_err(|e| VmError::Handler(e.to_string()))?
            .unwrap_or_else(BigInt::zero);
        self.staging.set_balance(&to, asset_id, &(target + amount));
        Ok(())
    }

    fn block_height(&self) -> u32 {
        self.staging.block().block_height()
    }
}

/// The per-block execution engine.
pub struct Executor {
    state: Arc<BlkRwSet>,
    config: LedgerConfig,
    lua_pool: Arc<WorkerPool>,
    js_pool: Arc<WorkerPool>,
}

impl Executor {
    /// Creates the executor and spawns both worker pools.
    pub fn new(state: Arc<BlkRwSet>, config: LedgerConfig) -> Self {
        let lua_pool = Arc::new(WorkerPool::new("luavm", config.vm.clone(), |vm_config| {
            Box::new(LuaRuntime::new(vm_config))
        }));
        let js_pool = Arc::new(WorkerPool::new("jsvm", config.vm.clone(), |vm_config| {
            Box::new(JsRuntime::new(vm_config))
        }));
        Self {
            state,
            config,
            lua_pool,
            js_pool,
        }
    }

    /// The ledger configuration.
    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Executes every transaction of the block in parallel; merges happen
    /// in index order inside the block set. Returns per-transaction error
    /// messages for the rejected ones.
    pub fn execute_block(&self, txs: &[Transaction]) -> HashMap<H256, String> {
        let errors: Mutex<HashMap<H256, String>> = Mutex::new(HashMap::new());

        std::thread::scope(|scope| {
            for (index, tx) in txs.iter().enumerate() {
                let errors = &errors;
                scope.spawn(move || {
                    if let Err(message) = self.execute_one(index as u32, tx) {
                        errors.lock().insert(tx.hash(), message);
                    }
                });
            }
        });

        errors.into_inner()
    }

    /// Executes one transaction with a single redo on read-set conflict.
    fn execute_one(&self, index: u32, tx: &Transaction) -> std::result::Result<(), String> {
        let mut last_error: Option<String> = None;
        // Side effects of a failed contract run that survive the rejection
        // (the pre-execution fee transfer).
        let mut rejected_snapshot = None;

        for attempt in 0..2 {
            let staging = Arc::new(TxRwSet::new(Arc::clone(&self.state)));
            match self.run_tx(tx, &staging) {
                Ok(()) => {
                    let snapshot = staging.take_snapshot();
                    match self.state.merge(snapshot, tx, Vec::new(), index) {
                        Ok(()) => return Ok(()),
                        Err(lattice_state::StateError::ReadSetConflict { namespace, key })
                            if attempt == 0 =>
                        {
                            debug!(tx_hash = %tx.hash(), namespace, key = %key, "read-set conflict, re-executing");
                            continue;
                        }
                        Err(e) => {
                            last_error = Some(e.to_string());
                            break;
                        }
                    }
                }
                Err(message) => {
                    if tx.tx_type.is_contract() {
                        rejected_snapshot = Some(staging.take_snapshot());
                    }
                    last_error = Some(message);
                    break;
                }
            }
        }

        let message = last_error.unwrap_or_else(|| "read-set conflict".to_string());
        warn!(tx_hash = %tx.hash(), error = %message, "transaction rejected");
        // Rejected transactions still advance the merge barrier.
        self.state.merge_rejected(rejected_snapshot, tx, index);
        Err(message)
    }

    /// Runs one transaction against its staging view.
    fn run_tx(&self, tx: &Transaction, staging: &Arc<TxRwSet>) -> std::result::Result<(), String> {
        match tx.tx_type {
            TxType::Issue | TxType::IssueUpdate => {
                apply_asset(staging, tx).map_err(|e| e.to_string())?;
                apply_balances(staging, tx, &self.config.local_chain, &self.config.fee_collector)
                    .map_err(|e| e.to_string())
            }
            TxType::AtomicTransfer | TxType::AcrossChain | TxType::Merged => {
                apply_balances(staging, tx, &self.config.local_chain, &self.config.fee_collector)
                    .map_err(|e| e.to_string())
            }
            TxType::Security => {
                // Security policy payloads are recorded but have no state
                // effect inside the execution core.
                apply_balances(staging, tx, &self.config.local_chain, &self.config.fee_collector)
                    .map_err(|e| e.to_string())
            }
            TxType::LuaContractInit
            | TxType::JsContractInit
            | TxType::ContractInvoke
            | TxType::ContractQuery => self
                .run_contract(tx, staging)
                .map(|_| ())
                .map_err(|e| e.to_string()),
        }
    }

    /// Dispatches a contract transaction to the right flavor's pool.
    pub fn run_contract(
        &self,
        tx: &Transaction,
        staging: &Arc<TxRwSet>,
    ) -> Result<ScriptValue> {
        let job = ContractJob::from_tx(tx.clone())?;
        let handler = TxExecHandler::new(Arc::clone(staging), &self.config);
        let flavor = self.resolve_flavor(&job, staging)?;

        let pool = match flavor {
            VmFlavor::Lua => &self.lua_pool,
            VmFlavor::Js => &self.js_pool,
        };
        Ok(pool.send_work(job, handler)?)
    }

    /// Flavor of a contract job: by transaction type for deployments, from
    /// the stored code record otherwise.
    fn resolve_flavor(&self, job: &ContractJob, staging: &TxRwSet) -> Result<VmFlavor> {
        if let Some(flavor) = VmFlavor::of_tx(job.tx.tx_type) {
            return Ok(flavor);
        }

        let stored = if job.spec.addr.is_empty() {
            staging.get_chain_state(GLOBAL_STATE_NAMESPACE, GLOBAL_CONTRACT_KEY)?
        } else {
            staging.get_chain_state(&job.spec.addr, CONTRACT_CODE_KEY)?
        };
        let Some(stored) = stored else {
            return Err(LedgerError::Vm(VmError::Execution(format!(
                "no contract code stored for address '{}'",
                job.spec.addr
            ))));
        };
        let json = lattice_vm::unwrap_state_json(&stored)?;
        let record: ContractCode = serde_json::from_slice(&json)
            .map_err(|e| LedgerError::Corrupt(format!("contract code record: {e}")))?;
        Ok(VmFlavor::from_str_name(&record.vm_type)?)
    }
}
