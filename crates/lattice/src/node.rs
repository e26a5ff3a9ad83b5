//! Node wiring.
//!
//! Builds the full service graph from configuration: storage, ledger,
//! validator, consensus engine, coordinator and the optional mirror tap.
//! Every dependency is injected explicitly; nothing is process-wide state.

use crate::chain::Blockchain;
use crate::noops::NoopsConsensus;
use crate::relay::LogRelay;
use anyhow::Context;
use lattice_config::{Config, GenesisConfig};
use lattice_core::{Consensus, TxNotifier};
use lattice_ledger::{Ledger, LedgerConfig, ValidatorHook};
use lattice_state::{Asset, Balance};
use lattice_storage::{Database, DatabaseConfig};
use lattice_types::{Address, Transaction};
use lattice_validator::{LedgerView, Validator, ValidatorConfig};
use lattice_vm::VmConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Bridges the validator's ledger reads onto the ledger facade.
struct LedgerAdapter(Arc<Ledger>);

impl LedgerView for LedgerAdapter {
    fn balance_from_db(&self, addr: &Address) -> Option<Balance> {
        self.0.balance_from_db(addr)
    }

    fn asset_from_db(&self, id: u32) -> Option<Asset> {
        self.0.asset_from_db(id)
    }
}

/// Bridges the ledger's post-commit cleanup onto the validator.
struct ValidatorAdapter(Arc<Validator>);

impl ValidatorHook for ValidatorAdapter {
    fn remove_txs_in_verification(&self, txs: &[Transaction]) {
        self.0.remove_txs_in_verification(txs);
    }
}

fn vm_config(config: &Config) -> VmConfig {
    let vm = &config.vm;
    VmConfig {
        registry_size: vm.registry_size,
        call_stack_size: vm.call_stack_size,
        max_mem: vm.max_mem,
        exec_limit_stack_depth: vm.exec_limit_stack_depth,
        exec_limit_max_opcode_count: vm.exec_limit_max_opcode_count,
        exec_limit_max_run_time: vm.exec_limit_max_run_time,
        exec_limit_max_script_size: vm.exec_limit_max_script_size,
        exec_limit_max_state_value_size: vm.exec_limit_max_state_value_size,
        exec_limit_max_state_key_length: vm.exec_limit_max_state_key_length,
        exec_limit_max_state_item_count: vm.exec_limit_max_state_item_count,
        worker_count: vm.bs_worker_cnt,
    }
}

/// The assembled node.
pub struct Node {
    ledger: Arc<Ledger>,
    validator: Arc<Validator>,
    chain: Arc<Blockchain>,
}

impl Node {
    /// Builds the node from configuration and genesis.
    pub fn build(config: &Config, genesis: &GenesisConfig) -> anyhow::Result<Self> {
        let local_chain = config.chain.chain_coordinate()?;
        let fee_collector = config.chain.fee_collector_address()?;

        let db = Arc::new(
            Database::open(DatabaseConfig {
                path: config.storage.data_dir.clone(),
                ..Default::default()
            })
            .context("open database")?,
        );

        let notifier = Arc::new(TxNotifier::new());
        let ledger_config = LedgerConfig {
            local_chain: local_chain.clone(),
            fee_collector,
            vm: vm_config(config),
        };
        let genesis_block = genesis.generate_genesis_block()?;
        let ledger = Ledger::new(db, ledger_config, genesis_block, Arc::clone(&notifier))
            .context("open ledger")?;

        let consenter: Arc<dyn Consensus> = Arc::new(NoopsConsensus::new(
            config.consensus.batch_size,
            Duration::from_millis(config.consensus.batch_timeout_ms),
            ledger.height()? + 1,
        ));

        let validator = Validator::new(
            ValidatorConfig {
                is_valid: true,
                blacklist_duration: Duration::from_secs(config.pool.blacklist_duration_secs),
                tx_pool_delay: config.pool.tx_pool_delay,
                capacity: config.pool.capacity,
                local_chain,
            },
            Arc::new(LedgerAdapter(Arc::clone(&ledger))),
            Arc::clone(&consenter),
            notifier,
        );
        ledger.set_validator(Arc::new(ValidatorAdapter(Arc::clone(&validator))));

        let chain = Blockchain::new(
            Arc::clone(&ledger),
            Arc::clone(&validator),
            Arc::clone(&consenter),
            Arc::new(LogRelay),
        )?;

        Ok(Self {
            ledger,
            validator,
            chain,
        })
    }

    /// Starts the consensus, coordinator and pool services.
    pub fn start(&self) {
        self.chain.start();
        info!("node started");
    }

    /// The ledger facade.
    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// The validator.
    pub fn validator(&self) -> &Arc<Validator> {
        &self.validator
    }

    /// The blockchain coordinator.
    pub fn chain(&self) -> &Arc<Blockchain> {
        &self.chain
    }
}
