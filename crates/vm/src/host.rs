//! The `L0` host API exposed to contract scripts.
//!
//! Scripts never touch the ledger directly. State changes and transfers are
//! offered into per-invocation staging queues and only polled out into the
//! [`ContractHandler`] when the script completes successfully; a failed or
//! cancelled invocation leaves the ledger untouched. Reads consult the
//! staged queue first so a script observes its own writes.

use crate::{VmConfig, VmError, VmResult, GLOBAL_STATE_NAMESPACE};
use lattice_types::Transaction;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Ledger-side callbacks a worker commits through.
///
/// Implemented by the block executor over the transaction's staging
/// snapshot, and by a read-only variant for queries.
pub trait ContractHandler: Send + Sync {
    /// Applies the transaction's own balance movement (pre-execution step).
    fn transfer(&self, tx: &Transaction) -> VmResult<()>;

    /// Reads contract state.
    fn get_state(&self, namespace: &str, key: &str) -> VmResult<Option<Vec<u8>>>;

    /// Writes contract state.
    fn put_state(&self, namespace: &str, key: &str, value: Vec<u8>) -> VmResult<()>;

    /// Deletes contract state.
    fn delete_state(&self, namespace: &str, key: &str) -> VmResult<()>;

    /// Reads a balance as a decimal string (arbitrary precision).
    fn get_balance(&self, addr: &str, asset_id: u32) -> VmResult<Option<String>>;

    /// Applies a transfer out of the contract's account.
    fn add_transfer(&self, from: &str, to: &str, asset_id: u32, amount: i64) -> VmResult<()>;

    /// Height of the block being applied.
    fn block_height(&self) -> u32;
}

/// A staged state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOp {
    /// Store `key = value`.
    Put {
        /// Targets the global namespace instead of the contract's own.
        global: bool,
        /// State key.
        key: String,
        /// State value.
        value: Vec<u8>,
    },
    /// Remove `key`.
    Delete {
        /// Targets the global namespace instead of the contract's own.
        global: bool,
        /// State key.
        key: String,
    },
}

impl StateOp {
    fn matches(&self, want_global: bool, want_key: &str) -> bool {
        match self {
            StateOp::Put { global, key, .. } | StateOp::Delete { global, key } => {
                *global == want_global && key == want_key
            }
        }
    }
}

/// A staged transfer out of the contract account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOp {
    /// Recipient address.
    pub to: String,
    /// Asset moved.
    pub asset_id: u32,
    /// Amount moved.
    pub amount: i64,
}

/// Per-invocation host state shared with the interpreter closures.
pub struct HostApi {
    handler: Arc<dyn ContractHandler>,
    namespace: String,
    config: VmConfig,

    // Staged queues: offered at the front, polled from the back, so polling
    // yields chronological order and later writes win at commit.
    state_queue: Mutex<VecDeque<StateOp>>,
    transfer_queue: Mutex<VecDeque<TransferOp>>,

    cancel: Arc<AtomicBool>,
    deadline: Instant,
    timed_out: AtomicBool,
}

impl HostApi {
    /// Creates the host state for one invocation.
    pub fn new(
        handler: Arc<dyn ContractHandler>,
        namespace: String,
        config: VmConfig,
        cancel: Arc<AtomicBool>,
        deadline: Instant,
    ) -> Self {
        Self {
            handler,
            namespace,
            config,
            state_queue: Mutex::new(VecDeque::new()),
            transfer_queue: Mutex::new(VecDeque::new()),
            cancel,
            deadline,
            timed_out: AtomicBool::new(false),
        }
    }

    /// The contract's state namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The invocation deadline.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// True once the invocation was cancelled or ran past its deadline.
    pub fn interrupted(&self) -> bool {
        if self.cancel.load(Ordering::Relaxed) {
            return true;
        }
        if Instant::now() >= self.deadline {
            self.timed_out.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// True when the interruption was deadline-driven.
    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::Relaxed) || Instant::now() >= self.deadline
    }

    /// Clears both staging queues.
    pub fn reset_queues(&self) {
        self.state_queue.lock().clear();
        self.transfer_queue.lock().clear();
    }

    fn check_write_caps(&self, key: &str, value_len: usize) -> VmResult<()> {
        if key.len() > self.config.exec_limit_max_state_key_length {
            return Err(VmError::StateLimit(format!(
                "key length {} exceeds {}",
                key.len(),
                self.config.exec_limit_max_state_key_length
            )));
        }
        if value_len > self.config.exec_limit_max_state_value_size {
            return Err(VmError::StateLimit(format!(
                "value size {value_len} exceeds {}",
                self.config.exec_limit_max_state_value_size
            )));
        }
        if self.state_queue.lock().len() >= self.config.exec_limit_max_state_item_count {
            return Err(VmError::StateLimit(format!(
                "staged item count exceeds {}",
                self.config.exec_limit_max_state_item_count
            )));
        }
        Ok(())
    }

    fn get(&self, global: bool, key: &str) -> VmResult<Option<Vec<u8>>> {
        // Newest staged op for the key wins.
        for op in self.state_queue.lock().iter() {
            if op.matches(global, key) {
                return Ok(match op {
                    StateOp::Put { value, .. } => Some(value.clone()),
                    StateOp::Delete { .. } => None,
                });
            }
        }
        let ns = if global { GLOBAL_STATE_NAMESPACE } else { &self.namespace };
        self.handler.get_state(ns, key)
    }

    /// Reads contract-local state.
    pub fn get_state(&self, key: &str) -> VmResult<Option<Vec<u8>>> {
        self.get(false, key)
    }

    /// Stages a contract-local write.
    pub fn put_state(&self, key: &str, value: Vec<u8>) -> VmResult<()> {
        self.check_write_caps(key, value.len())?;
        self.state_queue.lock().push_front(StateOp::Put {
            global: false,
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    /// Stages a contract-local deletion.
    pub fn del_state(&self, key: &str) -> VmResult<()> {
        self.check_write_caps(key, 0)?;
        self.state_queue.lock().push_front(StateOp::Delete {
            global: false,
            key: key.to_string(),
        });
        Ok(())
    }

    /// Reads global state.
    pub fn get_global_state(&self, key: &str) -> VmResult<Option<Vec<u8>>> {
        self.get(true, key)
    }

    /// Stages a global state write.
    pub fn set_global_state(&self, key: &str, value: Vec<u8>) -> VmResult<()> {
        self.check_write_caps(key, value.len())?;
        self.state_queue.lock().push_front(StateOp::Put {
            global: true,
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    /// Stages a global state deletion.
    pub fn del_global_state(&self, key: &str) -> VmResult<()> {
        self.check_write_caps(key, 0)?;
        self.state_queue.lock().push_front(StateOp::Delete {
            global: true,
            key: key.to_string(),
        });
        Ok(())
    }

    /// Stages a transfer out of the contract account.
    pub fn transfer(&self, to: &str, asset_id: u32, amount: i64) -> VmResult<()> {
        self.transfer_queue.lock().push_front(TransferOp {
            to: to.to_string(),
            asset_id,
            amount,
        });
        Ok(())
    }

    /// Reads a balance as a decimal string.
    pub fn get_balance(&self, addr: &str, asset_id: u32) -> VmResult<Option<String>> {
        self.handler.get_balance(addr, asset_id)
    }

    /// Height of the block being applied.
    pub fn block_height(&self) -> u32 {
        self.handler.block_height()
    }

    /// Applies the transaction's own balance movement (pre-execution).
    pub fn apply_tx_transfer(&self, tx: &Transaction) -> VmResult<()> {
        self.handler.transfer(tx)
    }

    /// Commits both queues through the handler, oldest op first.
    pub fn commit(&self) -> VmResult<()> {
        let mut states = 0usize;
        while let Some(op) = self.state_queue.lock().pop_back() {
            states += 1;
            match op {
                StateOp::Put { global, key, value } => {
                    let ns = if global { GLOBAL_STATE_NAMESPACE } else { &self.namespace };
                    self.handler.put_state(ns, &key, value)?;
                }
                StateOp::Delete { global, key } => {
                    let ns = if global { GLOBAL_STATE_NAMESPACE } else { &self.namespace };
                    self.handler.delete_state(ns, &key)?;
                }
            }
        }

        let mut transfers = 0usize;
        while let Some(op) = self.transfer_queue.lock().pop_back() {
            transfers += 1;
            self.handler
                .add_transfer(&self.namespace, &op.to, op.asset_id, op.amount)?;
        }

        debug!(namespace = %self.namespace, states, transfers, "contract commit");
        Ok(())
    }
}
