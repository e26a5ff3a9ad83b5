//! Contract jobs.
//!
//! A [`ContractJob`] pairs a transaction with its parsed contract payload.
//! The payload names the target contract address (empty for the global
//! contract), optionally carries the script source, and lists the
//! invocation parameters. The entry function is selected by the
//! transaction type: `L0Init` for deployments, `L0Invoke` for invocations
//! and `L0Query` for read-only queries.

use crate::{VmError, VmResult};
use lattice_types::{Transaction, TxType};
use serde::{Deserialize, Serialize};

/// Interpreter flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmFlavor {
    /// Lua 5.4 via `mlua`.
    Lua,
    /// JavaScript via `boa_engine`.
    Js,
}

impl VmFlavor {
    /// Flavor executing the given transaction type, if any.
    pub fn of_tx(tx_type: TxType) -> Option<VmFlavor> {
        match tx_type {
            TxType::LuaContractInit => Some(VmFlavor::Lua),
            TxType::JsContractInit => Some(VmFlavor::Js),
            // Invocations and queries run on the flavor that deployed the
            // contract; the worker resolves it from the stored code record.
            TxType::ContractInvoke | TxType::ContractQuery => None,
            _ => None,
        }
    }

    /// Name used in stored code records.
    pub fn as_str(&self) -> &'static str {
        match self {
            VmFlavor::Lua => "luavm",
            VmFlavor::Js => "jsvm",
        }
    }

    /// Parses a stored code record flavor.
    pub fn from_str_name(name: &str) -> VmResult<Self> {
        match name {
            "luavm" => Ok(VmFlavor::Lua),
            "jsvm" => Ok(VmFlavor::Js),
            other => Err(VmError::Execution(format!("unknown vm flavor: {other}"))),
        }
    }
}

/// The contract payload carried by contract transactions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContractSpec {
    /// Target contract address; empty addresses the global contract.
    #[serde(default)]
    pub addr: String,
    /// Script source; empty means "load from the contract's code slot".
    #[serde(default)]
    pub code: String,
    /// Invocation parameters. For `L0Invoke` the first parameter is the
    /// function selector, the rest are the argument sequence.
    #[serde(default)]
    pub params: Vec<String>,
}

impl ContractSpec {
    /// Parses a contract payload from transaction bytes.
    pub fn from_payload(payload: &[u8]) -> VmResult<Self> {
        if payload.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(payload)
            .map_err(|e| VmError::Execution(format!("invalid contract payload: {e}")))
    }

    /// Serializes the payload for embedding in a transaction.
    pub fn to_payload(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("contract spec serializes to JSON")
    }
}

/// A stored contract code record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractCode {
    /// Script source.
    pub code: String,
    /// Flavor name (`"luavm"` or `"jsvm"`).
    #[serde(rename = "type")]
    pub vm_type: String,
}

/// The entry function of an invocation.
#[derive(Debug, Clone)]
pub enum Entry {
    /// `L0Init(args)` - deployment.
    Init(Vec<String>),
    /// `L0Invoke(funcName, args)` - invocation.
    Invoke(String, Vec<String>),
    /// `L0Query(args)` - read-only query.
    Query(Vec<String>),
}

/// A unit of work for the dispatcher.
#[derive(Debug, Clone)]
pub struct ContractJob {
    /// The transaction being executed.
    pub tx: Transaction,
    /// Parsed contract payload.
    pub spec: ContractSpec,
}

impl ContractJob {
    /// Builds a job from a contract transaction.
    pub fn from_tx(tx: Transaction) -> VmResult<Self> {
        if !tx.tx_type.is_contract() {
            return Err(VmError::Execution(format!(
                "transaction type {:?} is not a contract type",
                tx.tx_type
            )));
        }
        let spec = ContractSpec::from_payload(&tx.payload)?;
        Ok(Self { tx, spec })
    }

    /// Selects the entry function for the transaction type.
    pub fn entry(&self) -> Entry {
        match self.tx.tx_type {
            TxType::LuaContractInit | TxType::JsContractInit => {
                Entry::Init(self.spec.params.clone())
            }
            TxType::ContractQuery => Entry::Query(self.spec.params.clone()),
            _ => {
                let mut params = self.spec.params.clone();
                let func = if params.is_empty() {
                    String::new()
                } else {
                    params.remove(0)
                };
                Entry::Invoke(func, params)
            }
        }
    }

    /// True for read-only queries (never commit).
    pub fn is_query(&self) -> bool {
        self.tx.tx_type == TxType::ContractQuery
    }

    /// The state namespace of the target contract.
    pub fn state_namespace(&self) -> &str {
        if self.spec.addr.is_empty() {
            crate::GLOBAL_STATE_NAMESPACE
        } else {
            &self.spec.addr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{Address, ChainCoordinate};

    fn contract_tx(tx_type: TxType, spec: &ContractSpec) -> Transaction {
        Transaction::new(
            ChainCoordinate::from_hex("00").unwrap(),
            ChainCoordinate::from_hex("00").unwrap(),
            tx_type,
            0,
            Address::ZERO,
            Address::ZERO,
            0,
            0,
            0,
            0,
        )
        .with_payload(spec.to_payload())
    }

    #[test]
    fn payload_round_trip() {
        let spec = ContractSpec {
            addr: "c1".into(),
            code: "function L0Init(args) return true end".into(),
            params: vec!["a".into(), "b".into()],
        };
        let tx = contract_tx(TxType::LuaContractInit, &spec);
        let job = ContractJob::from_tx(tx).unwrap();
        assert_eq!(job.spec, spec);
    }

    #[test]
    fn invoke_entry_splits_function_selector() {
        let spec = ContractSpec {
            addr: "c1".into(),
            code: String::new(),
            params: vec!["setValue".into(), "k".into(), "v".into()],
        };
        let job = ContractJob::from_tx(contract_tx(TxType::ContractInvoke, &spec)).unwrap();
        match job.entry() {
            Entry::Invoke(func, args) => {
                assert_eq!(func, "setValue");
                assert_eq!(args, vec!["k".to_string(), "v".to_string()]);
            }
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn non_contract_tx_rejected() {
        let tx = contract_tx(TxType::AtomicTransfer, &ContractSpec::default());
        assert!(ContractJob::from_tx(tx).is_err());
    }

    #[test]
    fn empty_addr_targets_global_namespace() {
        let job = ContractJob::from_tx(contract_tx(
            TxType::ContractQuery,
            &ContractSpec::default(),
        ))
        .unwrap();
        assert_eq!(job.state_namespace(), crate::GLOBAL_STATE_NAMESPACE);
    }
}
