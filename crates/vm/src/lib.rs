//! # Lattice VM
//!
//! Sandboxed contract execution for the Lattice ledger.
//!
//! A [`WorkerPool`] owns `N` workers per interpreter flavor (Lua via `mlua`,
//! JavaScript via `boa_engine`). Jobs are handed to whichever worker reports
//! ready first; every invocation runs under preset opcode, stack, memory,
//! runtime and script-size limits and can be cancelled mid-flight.
//!
//! Contracts interact with the ledger exclusively through the `L0` host API,
//! whose writes are staged in per-invocation queues and committed through a
//! [`ContractHandler`] only when the script completes successfully.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod dispatcher;
pub mod host;
pub mod job;
pub mod js;
pub mod lua;
pub mod value;
pub mod worker;

pub use dispatcher::WorkerPool;
pub use host::{ContractHandler, HostApi};
pub use job::{ContractCode, ContractJob, ContractSpec, Entry, VmFlavor};
pub use value::ScriptValue;
pub use worker::ScriptRuntime;

use lattice_types::codec::{self, Reader};
use thiserror::Error;

/// Namespace of the global contract state.
pub const GLOBAL_STATE_NAMESPACE: &str = "global";

/// Key of the global contract's code slot.
pub const GLOBAL_CONTRACT_KEY: &str = "globalContract";

/// Key of the admin address record inside the global namespace.
pub const ADMIN_KEY: &str = "admin";

/// Key of a contract's code slot inside its own namespace.
pub const CONTRACT_CODE_KEY: &str = "__contract_code";

/// Interpreter resource limits.
///
/// Defaults match the built-in configuration; `vm.*` config keys override
/// individual fields.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Interpreter registry cap.
    pub registry_size: usize,
    /// Interpreter call-stack cap.
    pub call_stack_size: usize,
    /// Per-VM memory cap in megabytes.
    pub max_mem: usize,
    /// Script stack depth.
    pub exec_limit_stack_depth: usize,
    /// Opcode budget per invocation.
    pub exec_limit_max_opcode_count: u64,
    /// Runtime cap in milliseconds.
    pub exec_limit_max_run_time: u64,
    /// Script size cap in bytes.
    pub exec_limit_max_script_size: usize,
    /// Per-write state value size cap in bytes.
    pub exec_limit_max_state_value_size: usize,
    /// Per-write state key length cap.
    pub exec_limit_max_state_key_length: usize,
    /// Staged state item count cap per invocation.
    pub exec_limit_max_state_item_count: usize,
    /// Workers per interpreter flavor.
    pub worker_count: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            registry_size: 256,
            call_stack_size: 256,
            max_mem: 200,
            exec_limit_stack_depth: 256,
            exec_limit_max_opcode_count: 5_000_000,
            exec_limit_max_run_time: 1_000,
            exec_limit_max_script_size: 128 * 1024,
            exec_limit_max_state_value_size: 50 * 1024,
            exec_limit_max_state_key_length: 128,
            exec_limit_max_state_item_count: 1_000,
            worker_count: 2,
        }
    }
}

/// Errors surfaced by contract execution.
#[derive(Error, Debug, Clone)]
pub enum VmError {
    /// The pool is not running.
    #[error("vm not running")]
    VmNotRunning,

    /// A worker's channels closed unexpectedly.
    #[error("worker closed")]
    WorkerClosed,

    /// No worker produced a result within the deadline.
    #[error("worker timeout")]
    WorkerTimeout,

    /// The script exceeded its runtime budget and was cancelled.
    #[error("execution timeout")]
    ExecutionTimeout,

    /// The script is empty or larger than the configured cap.
    #[error("contract script size {size} outside [1, {max}]")]
    ScriptTooLarge {
        /// Actual script size in bytes.
        size: usize,
        /// Configured cap.
        max: usize,
    },

    /// The script failed: syntax error, runtime error, or budget exhaustion.
    #[error("execution error: {0}")]
    Execution(String),

    /// A host-API call violated a state write cap.
    #[error("state limit exceeded: {0}")]
    StateLimit(String),

    /// The ledger-side handler failed.
    #[error("handler error: {0}")]
    Handler(String),
}

/// Result type for VM operations.
pub type VmResult<T> = std::result::Result<T, VmError>;

/// Wraps raw JSON bytes in the tagged string encoding used for contract
/// state records (`tag(0) || varint-len || bytes`).
pub fn wrap_state_json(data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + data.len());
    buf.push(0u8);
    codec::write_bytes(&mut buf, data);
    buf
}

/// Unwraps the tagged string encoding back into raw JSON bytes.
pub fn unwrap_state_json(data: &[u8]) -> VmResult<Vec<u8>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let mut reader = Reader::new(data);
    let tag = reader
        .read_u8()
        .map_err(|e| VmError::Execution(e.to_string()))?;
    if tag != 0 {
        return Err(VmError::Execution(format!("unsupported state tag {tag}")));
    }
    reader
        .read_bytes()
        .map(|b| b.to_vec())
        .map_err(|e| VmError::Execution(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_json_round_trip() {
        let json = br#"{"code":"return 1","type":"luavm"}"#;
        let wrapped = wrap_state_json(json);
        assert_eq!(wrapped[0], 0);
        assert_eq!(unwrap_state_json(&wrapped).unwrap(), json);
    }

    #[test]
    fn bad_tag_rejected() {
        assert!(unwrap_state_json(&[9, 1, 0]).is_err());
    }
}
