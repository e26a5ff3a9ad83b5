//! End-to-end contract execution through the worker pool.

use lattice_types::{Address, ChainCoordinate, Transaction, TxType};
use lattice_vm::js::JsRuntime;
use lattice_vm::lua::LuaRuntime;
use lattice_vm::{
    ContractHandler, ContractJob, ContractSpec, ScriptValue, VmConfig, VmError, VmResult,
    WorkerPool, CONTRACT_CODE_KEY,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct MockHandler {
    state: Mutex<HashMap<(String, String), Vec<u8>>>,
    transfers: Mutex<Vec<(String, String, u32, i64)>>,
}

impl ContractHandler for MockHandler {
    fn transfer(&self, _tx: &Transaction) -> VmResult<()> {
        Ok(())
    }

    fn get_state(&self, namespace: &str, key: &str) -> VmResult<Option<Vec<u8>>> {
        Ok(self
            .state
            .lock()
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    fn put_state(&self, namespace: &str, key: &str, value: Vec<u8>) -> VmResult<()> {
        self.state
            .lock()
            .insert((namespace.to_string(), key.to_string()), value);
        Ok(())
    }

    fn delete_state(&self, namespace: &str, key: &str) -> VmResult<()> {
        self.state
            .lock()
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    fn get_balance(&self, _addr: &str, _asset_id: u32) -> VmResult<Option<String>> {
        Ok(Some("1000".to_string()))
    }

    fn add_transfer(&self, from: &str, to: &str, asset_id: u32, amount: i64) -> VmResult<()> {
        self.transfers
            .lock()
            .push((from.to_string(), to.to_string(), asset_id, amount));
        Ok(())
    }

    fn block_height(&self) -> u32 {
        1
    }
}

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

fn lua_pool(config: VmConfig) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new("luavm", config, |config| {
        Box::new(LuaRuntime::new(config))
    }))
}

fn js_pool(config: VmConfig) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new("jsvm", config, |config| {
        Box::new(JsRuntime::new(config))
    }))
}

const LUA_CONTRACT: &str = r#"
function L0Init(args)
    L0.PutState("deployed", true)
    return true
end

function L0Invoke(func, args)
    if func == "set" then
        L0.PutState(args[1], args[2])
        return true
    elseif func == "pay" then
        L0.Transfer(args[1], 0, 25)
        return true
    end
    return false
end

function L0Query(args)
    local v = L0.GetState(args[1])
    if v == nil then
        return ""
    end
    return v
end
"#;

const JS_CONTRACT: &str = r#"
function L0Init(args) {
    L0.PutState("deployed", true);
    return true;
}

function L0Invoke(func, args) {
    if (func === "set") {
        L0.PutState(args[0], args[1]);
        return true;
    }
    return false;
}

function L0Query(args) {
    var v = L0.GetState(args[0]);
    return v === null ? "" : v;
}
"#;

#[test]
fn lua_deploy_invoke_query() {
    let handler = Arc::new(MockHandler::default());
    let pool = lua_pool(VmConfig::default());

    // deploy
    let init_spec = ContractSpec {
        addr: "c1".into(),
        code: LUA_CONTRACT.into(),
        params: vec![],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::LuaContractInit, &init_spec)).unwrap();
    let result = pool.send_work(job, handler.clone()).unwrap();
    assert!(result.is_truthy());
    assert!(handler
        .state
        .lock()
        .contains_key(&("c1".to_string(), CONTRACT_CODE_KEY.to_string())));
    assert!(handler
        .state
        .lock()
        .contains_key(&("c1".to_string(), "deployed".to_string())));

    // invoke with code loaded from the stored slot
    let invoke_spec = ContractSpec {
        addr: "c1".into(),
        code: String::new(),
        params: vec!["set".into(), "color".into(), "green".into()],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::ContractInvoke, &invoke_spec)).unwrap();
    pool.send_work(job, handler.clone()).unwrap();

    // query reads the value back, committing nothing
    let query_spec = ContractSpec {
        addr: "c1".into(),
        code: String::new(),
        params: vec!["color".into()],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::ContractQuery, &query_spec)).unwrap();
    let result = pool.send_work(job, handler.clone()).unwrap();
    assert_eq!(result, ScriptValue::String("green".into()));
}

#[test]
fn lua_transfer_is_committed_through_handler() {
    let handler = Arc::new(MockHandler::default());
    let pool = lua_pool(VmConfig::default());

    let init_spec = ContractSpec {
        addr: "c2".into(),
        code: LUA_CONTRACT.into(),
        params: vec![],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::LuaContractInit, &init_spec)).unwrap();
    pool.send_work(job, handler.clone()).unwrap();

    let invoke_spec = ContractSpec {
        addr: "c2".into(),
        code: String::new(),
        params: vec!["pay".into(), "0xabc".into()],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::ContractInvoke, &invoke_spec)).unwrap();
    pool.send_work(job, handler.clone()).unwrap();

    let transfers = handler.transfers.lock();
    assert_eq!(
        transfers.as_slice(),
        &[("c2".to_string(), "0xabc".to_string(), 0, 25)]
    );
}

#[test]
fn js_deploy_invoke_query() {
    let handler = Arc::new(MockHandler::default());
    let pool = js_pool(VmConfig::default());

    let init_spec = ContractSpec {
        addr: "d1".into(),
        code: JS_CONTRACT.into(),
        params: vec![],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::JsContractInit, &init_spec)).unwrap();
    let result = pool.send_work(job, handler.clone()).unwrap();
    assert!(result.is_truthy());

    let invoke_spec = ContractSpec {
        addr: "d1".into(),
        code: String::new(),
        params: vec!["set".into(), "color".into(), "blue".into()],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::ContractInvoke, &invoke_spec)).unwrap();
    pool.send_work(job, handler.clone()).unwrap();

    let query_spec = ContractSpec {
        addr: "d1".into(),
        code: String::new(),
        params: vec!["color".into()],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::ContractQuery, &query_spec)).unwrap();
    let result = pool.send_work(job, handler).unwrap();
    assert_eq!(result, ScriptValue::String("blue".into()));
}

#[test]
fn lua_infinite_loop_times_out_without_state_writes() {
    let handler = Arc::new(MockHandler::default());
    let mut config = VmConfig::default();
    config.exec_limit_max_run_time = 50;
    config.worker_count = 1;
    let pool = lua_pool(config);

    let spec = ContractSpec {
        addr: "loop".into(),
        code: "function L0Init(args) while true do end end".into(),
        params: vec![],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::LuaContractInit, &spec)).unwrap();

    let started = Instant::now();
    let err = pool.send_work(job, handler.clone()).unwrap_err();
    assert!(matches!(err, VmError::ExecutionTimeout));
    assert!(started.elapsed() < Duration::from_millis(750));
    // nothing persisted
    assert!(handler.state.lock().is_empty());
}

#[test]
fn send_work_timed_interrupts_hung_worker() {
    let handler = Arc::new(MockHandler::default());
    let mut config = VmConfig::default();
    // worker-side budget long, dispatcher budget short
    config.exec_limit_max_run_time = 5_000;
    config.worker_count = 1;
    let pool = lua_pool(config);

    let spec = ContractSpec {
        addr: "loop".into(),
        code: "function L0Init(args) while true do end end".into(),
        params: vec![],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::LuaContractInit, &spec)).unwrap();

    let err = pool
        .send_work_timed(Duration::from_millis(100), job, handler.clone())
        .unwrap_err();
    assert!(matches!(err, VmError::WorkerTimeout));

    // the interrupted worker recovers and serves the next job
    let spec = ContractSpec {
        addr: "ok".into(),
        code: LUA_CONTRACT.into(),
        params: vec![],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::LuaContractInit, &spec)).unwrap();
    pool.send_work(job, handler).unwrap();
}

#[test]
fn empty_script_rejected() {
    let handler = Arc::new(MockHandler::default());
    let pool = lua_pool(VmConfig::default());

    let spec = ContractSpec {
        addr: "missing".into(),
        code: String::new(),
        params: vec![],
    };
    // no stored code for this address either
    let job = ContractJob::from_tx(contract_tx(TxType::ContractInvoke, &spec)).unwrap();
    let err = pool.send_work(job, handler).unwrap_err();
    assert!(matches!(err, VmError::Execution(_)));
}

#[test]
fn oversized_script_rejected() {
    let handler = Arc::new(MockHandler::default());
    let mut config = VmConfig::default();
    config.exec_limit_max_script_size = 16;
    let pool = lua_pool(config);

    let spec = ContractSpec {
        addr: "big".into(),
        code: LUA_CONTRACT.into(),
        params: vec![],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::LuaContractInit, &spec)).unwrap();
    let err = pool.send_work(job, handler).unwrap_err();
    assert!(matches!(err, VmError::ScriptTooLarge { .. }));
}

#[test]
fn async_dispatch_reports_pending_jobs() {
    let handler = Arc::new(MockHandler::default());
    let pool = lua_pool(VmConfig::default());

    let spec = ContractSpec {
        addr: "a1".into(),
        code: LUA_CONTRACT.into(),
        params: vec![],
    };
    let job = ContractJob::from_tx(contract_tx(TxType::LuaContractInit, &spec)).unwrap();

    let (done_tx, done_rx) = crossbeam_channel::bounded(1);
    pool.send_work_async(job, handler, move |result| {
        done_tx.send(result).unwrap();
    });

    let result = done_rx
        .recv_timeout(Duration::from_secs(10))
        .expect("async job completes");
    assert!(result.is_ok());
    assert_eq!(pool.pending_async_jobs(), 0);
}
