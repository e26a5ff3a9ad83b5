//! The verification engine.

use crate::{Result, ValidatorError};
use crossbeam_channel::{after, tick, unbounded, Receiver, Sender};
use lattice_core::{BatchCallback, BatchOutcome, Consensus, TxNotifier};
use lattice_mempool::TxPool;
use lattice_state::{Asset, Balance};
use lattice_types::{Address, ChainCoordinate, Transaction, TxType, H256};
use num_bigint::BigInt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Read access the validator needs from the ledger.
///
/// Injected explicitly; nothing in the validator is process-wide state.
pub trait LedgerView: Send + Sync {
    /// Committed balances of an account.
    fn balance_from_db(&self, addr: &Address) -> Option<Balance>;
    /// Committed asset registry entry.
    fn asset_from_db(&self, id: u32) -> Option<Asset>;
}

/// Validator configuration.
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Run the verification checks (disabled on pure relays).
    pub is_valid: bool,
    /// Blacklist entry lifetime; also the sweep interval.
    pub blacklist_duration: Duration,
    /// Extra transactions beyond the batch size before the size trigger
    /// fires.
    pub tx_pool_delay: usize,
    /// Mempool capacity.
    pub capacity: usize,
    /// The local chain coordinate.
    pub local_chain: ChainCoordinate,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            is_valid: true,
            blacklist_duration: Duration::from_secs(300),
            tx_pool_delay: 10,
            capacity: 10_000,
            local_chain: ChainCoordinate::new(vec![0]),
        }
    }
}

/// The transaction validator.
///
/// Owns the mempool and the speculative account/asset projections.
pub struct Validator {
    config: ValidatorConfig,
    ledger: Arc<dyn LedgerView>,
    consenter: Arc<dyn Consensus>,
    pool: TxPool,
    notifier: Arc<TxNotifier>,

    // Lock order: in_txs before accounts.
    in_txs: Mutex<HashMap<H256, Transaction>>,
    accounts: Mutex<HashMap<Address, Balance>>,
    assets: Mutex<HashMap<u32, Asset>>,
    blacklist: Mutex<HashMap<Address, Instant>>,

    batch_signal: Sender<usize>,
    batch_signal_rx: Receiver<usize>,
    timer_reset: Sender<()>,
    timer_reset_rx: Receiver<()>,
}

impl Validator {
    /// Creates a validator wired to its collaborators.
    pub fn new(
        config: ValidatorConfig,
        ledger: Arc<dyn LedgerView>,
        consenter: Arc<dyn Consensus>,
        notifier: Arc<TxNotifier>,
    ) -> Arc<Self> {
        let (batch_signal, batch_signal_rx) = unbounded();
        let (timer_reset, timer_reset_rx) = unbounded();
        Arc::new(Self {
            pool: TxPool::new(config.capacity),
            config,
            ledger,
            consenter,
            notifier,
            in_txs: Mutex::new(HashMap::new()),
            accounts: Mutex::new(HashMap::new()),
            assets: Mutex::new(HashMap::new()),
            blacklist: Mutex::new(HashMap::new()),
            batch_signal,
            batch_signal_rx,
            timer_reset,
            timer_reset_rx,
        })
    }

    /// Starts the batch-assembly loop.
    pub fn start(self: &Arc<Self>) {
        info!("validator start ...");
        let validator = Arc::clone(self);
        std::thread::Builder::new()
            .name("validator-batcher".to_string())
            .spawn(move || validator.process_loop())
            .expect("validator thread spawn");
    }

    /// Number of pooled transactions.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    fn process_loop(self: Arc<Self>) {
        let sweeper = tick(self.config.blacklist_duration);
        let mut timer = after(self.consenter.batch_timeout());
        loop {
            crossbeam_channel::select! {
                recv(sweeper) -> _ => self.sweep_blacklist(),
                recv(self.batch_signal_rx) -> msg => {
                    let Ok(count) = msg else { break };
                    if count >= self.config.tx_pool_delay + self.consenter.batch_size() {
                        let batch = self.make_request_batch(&mut timer);
                        debug!(batch = batch.len(), "size-triggered batch");
                        self.submit(batch);
                    }
                }
                recv(self.timer_reset_rx) -> msg => {
                    if msg.is_err() { break }
                    timer = after(self.consenter.batch_timeout());
                }
                recv(timer) -> _ => {
                    let batch = self.make_request_batch(&mut timer);
                    if !batch.is_empty() {
                        debug!(batch = batch.len(), "timer-triggered batch");
                        self.submit(batch);
                    }
                }
            }
        }
    }

    fn sweep_blacklist(&self) {
        let horizon = self.config.blacklist_duration;
        let mut blacklist = self.blacklist.lock();
        blacklist.retain(|_, created| created.elapsed() < horizon);
    }

    /// Takes the pool prefix sharing one destination chain, capped at the
    /// consensus batch size, and resets the batch timer.
    fn make_request_batch(&self, timer: &mut Receiver<Instant>) -> Vec<Transaction> {
        *timer = after(self.consenter.batch_timeout());
        let batch_size = self.consenter.batch_size();
        let mut batch = Vec::new();
        let mut to_chain: Option<ChainCoordinate> = None;
        self.pool.iter(|tx| {
            let chain = to_chain.get_or_insert_with(|| tx.to_chain.clone());
            if tx.to_chain == *chain && batch.len() < batch_size {
                batch.push(tx.clone());
                false
            } else {
                true
            }
        });
        batch
    }

    fn submit(self: &Arc<Self>, batch: Vec<Transaction>) {
        if batch.is_empty() {
            return;
        }
        let validator = Arc::clone(self);
        let callback: BatchCallback = Arc::new(move |outcome, txs| {
            validator.consensus_outcome(outcome, txs);
        });
        self.consenter.process_batch(batch, callback);
    }

    /// Handles a consensus outcome for a batch.
    pub fn consensus_outcome(&self, outcome: BatchOutcome, txs: Vec<Transaction>) {
        if txs.is_empty() {
            return;
        }
        match outcome {
            BatchOutcome::Informational => {
                debug!(count = txs.len(), "consensus batch notification");
            }
            BatchOutcome::Reenqueue => {
                let _guard = self.in_txs.lock();
                for tx in txs {
                    let _ = self.pool.add(tx);
                }
            }
            BatchOutcome::Committed => {
                let _guard = self.in_txs.lock();
                self.pool.remove_many(&txs);
            }
            BatchOutcome::ApplyBalances => {
                let mut accounts = self.accounts.lock();
                for tx in &txs {
                    if !self.update_account_inner(&mut accounts, tx) {
                        panic!("balance is not enough");
                    }
                }
            }
            BatchOutcome::RollbackBalances => {
                let mut accounts = self.accounts.lock();
                for tx in &txs {
                    self.roll_back_account_inner(&mut accounts, tx);
                }
            }
            BatchOutcome::VerifyFailed => {
                let mut in_txs = self.in_txs.lock();
                for tx in &txs {
                    self.notifier.notify(tx, Some("failed to verify".to_string()));
                    in_txs.remove(&tx.hash());
                }
                self.pool.remove_many(&txs);
            }
        }
    }

    /// Admits a transaction from the network into the pool.
    pub fn process_transaction(&self, tx: Transaction) -> Result<()> {
        self.check_transaction(&tx)?;

        let hash = tx.hash();
        let count = {
            let mut in_txs = self.in_txs.lock();
            if in_txs.contains_key(&hash) || self.pool.contains(&hash) {
                return Err(ValidatorError::DuplicateTransaction(hash.to_string()));
            }

            match self.pool.add(tx.clone()) {
                Ok(Some(evicted)) => {
                    in_txs.remove(&evicted.hash());
                    warn!("excess capacity, removed front transaction");
                }
                Ok(None) => {}
                Err(_) => {
                    return Err(ValidatorError::DuplicateTransaction(hash.to_string()));
                }
            }
            in_txs.insert(hash, tx);
            self.pool.len()
        };

        if count == 1 {
            let _ = self.timer_reset.send(());
        }
        let _ = self.batch_signal.send(count);
        debug!(tx_hash = %hash, pool_len = count, "transaction admitted");
        Ok(())
    }

    /// Stateless and near-stateless admissibility checks.
    fn check_transaction(&self, tx: &Transaction) -> Result<()> {
        let mut accounts = self.accounts.lock();
        self.check_transaction_inner(tx, &mut accounts)
    }

    fn check_transaction_inner(
        &self,
        tx: &Transaction,
        accounts: &mut HashMap<Address, Balance>,
    ) -> Result<()> {
        tx.verify()
            .map_err(|e| ValidatorError::InvalidTransaction(e.to_string()))?;

        if tx.amount < 0 || tx.fee < 0 {
            return Err(ValidatorError::InvalidTransaction(
                "negative amount or fee".to_string(),
            ));
        }

        if self.blacklist.lock().contains_key(&tx.sender) {
            return Err(ValidatorError::Blacklisted(tx.sender.to_string()));
        }

        // Sender nonce sanity against the committed counter.
        if self.chain_is_local(&tx.from_chain) {
            let committed_nonce = self.fetch_account(accounts, &tx.sender).nonce;
            if tx.nonce < committed_nonce {
                return Err(ValidatorError::InvalidTransaction(format!(
                    "nonce {} below account nonce {committed_nonce}",
                    tx.nonce
                )));
            }
        }
        Ok(())
    }

    /// Adds an address to the blacklist; the sweep evicts it after the
    /// configured lifetime.
    pub fn blacklist(&self, addr: Address) {
        self.blacklist.lock().insert(addr, Instant::now());
    }

    /// Re-runs admissibility and applies speculative asset and balance
    /// projections for a consensus-ordered batch. Returns the accepted
    /// transactions in input order and the rejected ones separately.
    pub fn verify_txs(&self, txs: &[Transaction]) -> (Vec<Transaction>, Vec<Transaction>) {
        let mut accepted = Vec::new();
        let mut rejected = Vec::new();
        if txs.is_empty() || !self.config.is_valid {
            return (txs.to_vec(), rejected);
        }

        let in_txs = self.in_txs.lock();
        let mut accounts = self.accounts.lock();

        for tx in txs {
            if !in_txs.contains_key(&tx.hash()) {
                if let Err(e) = self.check_transaction_inner(tx, &mut accounts) {
                    error!(tx_hash = %tx.hash(), error = %e, "illegal transaction");
                    rejected.push(tx.clone());
                    continue;
                }
            }

            if let Err(e) = self.project_asset(tx) {
                error!(tx_hash = %tx.hash(), asset = tx.asset_id, error = %e, "asset projection failed");
                rejected.push(tx.clone());
                continue;
            }

            if !self.update_account_inner(&mut accounts, tx) {
                error!(tx_hash = %tx.hash(), asset = tx.asset_id, "balance is not enough");
                rejected.push(tx.clone());
                continue;
            }
            accepted.push(tx.clone());
        }

        (accepted, rejected)
    }

    /// Applies the speculative asset-registry effect of one transaction.
    fn project_asset(&self, tx: &Transaction) -> Result<()> {
        let asset_id = tx.asset_id;
        let mut assets = self.assets.lock();
        let known = match assets.get(&asset_id) {
            Some(asset) => Some(asset.clone()),
            None => self.ledger.asset_from_db(asset_id),
        };

        if tx.tx_type == TxType::Issue {
            if known.is_some() {
                return Err(ValidatorError::InvalidTransaction(format!(
                    "asset {asset_id} already exists"
                )));
            }
            let base = Asset {
                id: asset_id,
                issuer: tx.sender,
                owner: tx.recipient,
                ..Default::default()
            };
            let created = base.update(&String::from_utf8_lossy(&tx.payload))?;
            assets.insert(asset_id, created);
            return Ok(());
        }

        let Some(asset) = known else {
            return Err(ValidatorError::AssetNotFound(asset_id));
        };

        if tx.tx_type == TxType::IssueUpdate && !tx.payload.is_empty() {
            let updated = asset.update(&String::from_utf8_lossy(&tx.payload))?;
            assets.insert(asset_id, updated);
        } else {
            assets.insert(asset_id, asset);
        }
        Ok(())
    }

    fn chain_is_local(&self, chain: &ChainCoordinate) -> bool {
        chain == &self.config.local_chain
    }

    fn fetch_account<'a>(
        &self,
        accounts: &'a mut HashMap<Address, Balance>,
        addr: &Address,
    ) -> &'a mut Balance {
        accounts.entry(*addr).or_insert_with(|| {
            self.ledger.balance_from_db(addr).unwrap_or_default()
        })
    }

    /// Speculatively applies a transaction's balance effect. Returns false
    /// and restores the previous state when a non-issue sender side would
    /// go negative.
    fn update_account_inner(&self, accounts: &mut HashMap<Address, Balance>, tx: &Transaction) -> bool {
        let asset_id = tx.asset_id;
        let outgoing = BigInt::from(tx.amount) + BigInt::from(tx.fee);
        let incoming = BigInt::from(tx.amount);

        if self.chain_is_local(&tx.from_chain) {
            let sender = self.fetch_account(accounts, &tx.sender);
            sender.add(asset_id, &(-outgoing.clone()));
            if !tx.tx_type.is_issue() && sender.is_negative(asset_id) {
                sender.add(asset_id, &outgoing);
                return false;
            }
        }

        if self.chain_is_local(&tx.to_chain) {
            let recipient = self.fetch_account(accounts, &tx.recipient);
            recipient.add(asset_id, &incoming);
        }
        true
    }

    fn roll_back_account_inner(&self, accounts: &mut HashMap<Address, Balance>, tx: &Transaction) {
        let asset_id = tx.asset_id;
        let outgoing = BigInt::from(tx.amount) + BigInt::from(tx.fee);
        let incoming = BigInt::from(tx.amount);

        if self.chain_is_local(&tx.from_chain) {
            let sender = self.fetch_account(accounts, &tx.sender);
            sender.add(asset_id, &outgoing);
        }
        if self.chain_is_local(&tx.to_chain) {
            let recipient = self.fetch_account(accounts, &tx.recipient);
            recipient.add(asset_id, &(-incoming));
        }
    }

    /// Speculatively applies one transaction's balance effect.
    pub fn update_account(&self, tx: &Transaction) -> bool {
        let mut accounts = self.accounts.lock();
        self.update_account_inner(&mut accounts, tx)
    }

    /// Reverses one transaction's speculative balance effect.
    pub fn roll_back_account(&self, tx: &Transaction) {
        let mut accounts = self.accounts.lock();
        self.roll_back_account_inner(&mut accounts, tx);
    }

    /// Removes transactions that finished verification (committed or
    /// rejected) from the pool.
    pub fn remove_txs_in_verification(&self, txs: &[Transaction]) {
        let mut in_txs = self.in_txs.lock();
        for tx in txs {
            in_txs.remove(&tx.hash());
        }
        self.pool.remove_many(txs);
    }

    /// Pool lookup by hash.
    pub fn get_tx_by_hash(&self, hash: &H256) -> Option<Transaction> {
        self.pool.get_by_key(hash)
    }

    /// Speculative balance of an account.
    pub fn get_balance(&self, addr: &Address) -> Balance {
        let mut accounts = self.accounts.lock();
        self.fetch_account(&mut accounts, addr).clone()
    }

    /// Speculative asset registry lookup.
    pub fn get_asset(&self, id: u32) -> Option<Asset> {
        let assets = self.assets.lock();
        match assets.get(&id) {
            Some(asset) => Some(asset.clone()),
            None => self.ledger.asset_from_db(id),
        }
    }

    /// The notifier delivering per-transaction outcomes.
    pub fn notifier(&self) -> &Arc<TxNotifier> {
        &self.notifier
    }
}
