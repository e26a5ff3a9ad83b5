//! Worker-side execution of one contract job.
//!
//! A worker owns one interpreter and drives the whole invocation:
//! script resolution, size check, the transaction's own balance movement,
//! queue reset, the entry call, and the final commit of staged operations.
//! A recoverable script error is re-executed exactly once.

use crate::host::{ContractHandler, HostApi};
use crate::job::{ContractCode, ContractJob, Entry, VmFlavor};
use crate::value::ScriptValue;
use crate::{
    unwrap_state_json, wrap_state_json, VmConfig, VmError, VmResult, CONTRACT_CODE_KEY,
    GLOBAL_CONTRACT_KEY, GLOBAL_STATE_NAMESPACE,
};
use lattice_types::TxType;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// One interpreter flavor, preconfigured with the execution limits.
pub trait ScriptRuntime: Send {
    /// The flavor this runtime executes.
    fn flavor(&self) -> VmFlavor;

    /// Runs `code` and calls the entry function. The runtime must abort at
    /// its next safe point once `host.interrupted()` reports true.
    fn execute(&mut self, code: &str, entry: &Entry, host: &Arc<HostApi>) -> VmResult<ScriptValue>;
}

/// A worker: one interpreter plus the invocation driver around it.
pub struct Worker {
    config: VmConfig,
    runtime: Box<dyn ScriptRuntime>,
    cancel: Arc<AtomicBool>,
}

impl Worker {
    /// Creates a worker around a runtime. `cancel` is shared with the
    /// dispatcher, which sets it to interrupt a hung invocation.
    pub fn new(runtime: Box<dyn ScriptRuntime>, config: VmConfig, cancel: Arc<AtomicBool>) -> Self {
        Self {
            config,
            runtime,
            cancel,
        }
    }

    fn check_script_size(&self, code: &str) -> VmResult<()> {
        let size = code.len();
        if size == 0 || size > self.config.exec_limit_max_script_size {
            return Err(VmError::ScriptTooLarge {
                size,
                max: self.config.exec_limit_max_script_size,
            });
        }
        Ok(())
    }

    /// Resolves the script: the payload's code when present, otherwise the
    /// stored code slot of the target contract (global slot for an empty
    /// address). Checks that the stored flavor matches this worker.
    fn resolve_code(
        &self,
        job: &ContractJob,
        handler: &Arc<dyn ContractHandler>,
    ) -> VmResult<String> {
        if !job.spec.code.is_empty() {
            return Ok(job.spec.code.clone());
        }

        let stored = if job.spec.addr.is_empty() {
            handler.get_state(GLOBAL_STATE_NAMESPACE, GLOBAL_CONTRACT_KEY)?
        } else {
            handler.get_state(&job.spec.addr, CONTRACT_CODE_KEY)?
        };
        let stored = stored.ok_or_else(|| {
            VmError::Execution(format!(
                "no contract code stored for address '{}'",
                job.spec.addr
            ))
        })?;

        let json = unwrap_state_json(&stored)?;
        let record: ContractCode = serde_json::from_slice(&json)
            .map_err(|e| VmError::Execution(format!("corrupt contract code record: {e}")))?;

        let flavor = VmFlavor::from_str_name(&record.vm_type)?;
        if flavor != self.runtime.flavor() {
            return Err(VmError::Execution(format!(
                "contract is {} but worker runs {}",
                record.vm_type,
                self.runtime.flavor().as_str()
            )));
        }
        Ok(record.code)
    }

    /// Stages the code record of a freshly deployed contract.
    fn stage_code_record(&self, job: &ContractJob, host: &HostApi, code: &str) -> VmResult<()> {
        let record = ContractCode {
            code: code.to_string(),
            vm_type: self.runtime.flavor().as_str().to_string(),
        };
        let json = serde_json::to_vec(&record)
            .map_err(|e| VmError::Execution(format!("cannot serialize code record: {e}")))?;
        let wrapped = wrap_state_json(&json);

        if job.spec.addr.is_empty() {
            host.set_global_state(GLOBAL_CONTRACT_KEY, wrapped)
        } else {
            host.put_state(CONTRACT_CODE_KEY, wrapped)
        }
    }

    /// Executes one job end-to-end.
    pub fn run(
        &mut self,
        job: &ContractJob,
        handler: Arc<dyn ContractHandler>,
    ) -> VmResult<ScriptValue> {
        self.cancel.store(false, Ordering::Relaxed);
        let deadline =
            Instant::now() + Duration::from_millis(self.config.exec_limit_max_run_time);
        let host = Arc::new(HostApi::new(
            Arc::clone(&handler),
            job.state_namespace().to_string(),
            self.config.clone(),
            Arc::clone(&self.cancel),
            deadline,
        ));

        let code = self.resolve_code(job, &handler)?;
        self.check_script_size(&code)?;

        if !job.is_query() {
            host.apply_tx_transfer(&job.tx)?;
        }

        host.reset_queues();
        if matches!(job.tx.tx_type, TxType::LuaContractInit | TxType::JsContractInit) {
            self.stage_code_record(job, &host, &code)?;
        }

        let entry = job.entry();
        let mut result = self.runtime.execute(&code, &entry, &host);

        // One redo for recoverable script failures; timeouts and size
        // violations are final.
        if matches!(result, Err(VmError::Execution(_))) && !host.timed_out() {
            warn!(tx_hash = %job.tx.hash(), "contract execution failed, re-executing once");
            host.reset_queues();
            if matches!(job.tx.tx_type, TxType::LuaContractInit | TxType::JsContractInit) {
                self.stage_code_record(job, &host, &code)?;
            }
            result = self.runtime.execute(&code, &entry, &host);
        }

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                if host.timed_out() {
                    return Err(VmError::ExecutionTimeout);
                }
                return Err(err);
            }
        };

        if job.is_query() {
            return Ok(value);
        }

        if !value.is_truthy() {
            return Err(VmError::Execution(
                "contract entry returned a falsy result".to_string(),
            ));
        }

        host.commit()?;
        debug!(tx_hash = %job.tx.hash(), "contract committed");
        Ok(value)
    }
}
