//! End-to-end block application: genesis, transfers, contracts, rejection.

use k256::ecdsa::SigningKey;
use lattice_config::GenesisConfig;
use lattice_core::TxNotifier;
use lattice_ledger::{Ledger, LedgerConfig};
use lattice_storage::{Database, DatabaseConfig};
use lattice_types::{
    Address, Block, BlockHeader, ChainCoordinate, Transaction, TxType, H256,
};
use lattice_vm::ContractSpec;
use num_bigint::BigInt;
use std::sync::Arc;
use tempfile::TempDir;

const BLOCK_NONCE: u32 = 100;

struct Harness {
    ledger: Arc<Ledger>,
    key: SigningKey,
    sender: Address,
    fee_collector: Address,
    _dir: TempDir,
}

fn chain() -> ChainCoordinate {
    ChainCoordinate::from_hex("00").unwrap()
}

fn build_harness(issue_amount: i64, tune: impl FnOnce(&mut LedgerConfig)) -> Harness {
    let dir = TempDir::new().unwrap();
    let db_config = DatabaseConfig {
        path: dir.path().to_string_lossy().to_string(),
        ..Default::default()
    };
    let db = Arc::new(Database::open(db_config).unwrap());

    let key = SigningKey::random(&mut rand::thread_rng());
    let sender = Address::from_public_key(key.verifying_key());
    let fee_collector = Address::new([0xfe; 20]);

    let mut genesis_config = GenesisConfig::default();
    genesis_config.addresses = vec![sender.to_hex_string()];
    genesis_config.issue_amount = issue_amount;
    let genesis = genesis_config.generate_genesis_block().unwrap();

    let mut config = LedgerConfig {
        local_chain: chain(),
        fee_collector,
        ..Default::default()
    };
    tune(&mut config);

    let ledger = Ledger::new(db, config, genesis, Arc::new(TxNotifier::new())).unwrap();
    Harness {
        ledger,
        key,
        sender,
        fee_collector,
        _dir: dir,
    }
}

fn next_block(ledger: &Ledger, txs: Vec<Transaction>) -> Block {
    let height = ledger.height().unwrap();
    let tip = ledger.get_block_by_number(height).unwrap().unwrap();
    let header = BlockHeader::new(tip.hash(), H256::NIL, tip.timestamp + 1, height + 1, BLOCK_NONCE);
    Block::new(header, txs)
}

fn transfer(key: &SigningKey, nonce: u32, to: Address, amount: i64, fee: i64) -> Transaction {
    Transaction::new(
        chain(),
        chain(),
        TxType::AtomicTransfer,
        nonce,
        Address::ZERO,
        to,
        0,
        amount,
        fee,
        1,
    )
    .sign(key)
    .unwrap()
}

fn balance(ledger: &Ledger, addr: &Address) -> BigInt {
    ledger.get_balances(addr).unwrap().get(0)
}

#[test]
fn genesis_credits_first_address() {
    let h = build_harness(1_000, |_| {});
    assert_eq!(h.ledger.height().unwrap(), 0);
    assert_eq!(balance(&h.ledger, &h.sender), BigInt::from(1_000));
    let asset = h.ledger.get_asset(0).unwrap().unwrap();
    assert_eq!(asset.id, 0);
}

#[test]
fn simple_transfer_block() {
    let h = build_harness(1_000, |_| {});
    let b = Address::new([0xb; 20]);

    let block = next_block(&h.ledger, vec![transfer(&h.key, 0, b, 200, 10)]);
    let committed = h.ledger.append_block(block, true).unwrap();

    assert_eq!(committed.height(), 1);
    assert_eq!(committed.transactions.len(), 1);
    assert_eq!(h.ledger.height().unwrap(), 1);
    assert_eq!(balance(&h.ledger, &h.sender), BigInt::from(790));
    assert_eq!(balance(&h.ledger, &b), BigInt::from(200));
    assert_eq!(balance(&h.ledger, &h.fee_collector), BigInt::from(10));

    // merkle root covers the accepted transaction
    assert_eq!(committed.header.merkle_root, committed.compute_merkle_root());

    // sender nonce advanced
    assert_eq!(h.ledger.get_balances(&h.sender).unwrap().nonce, 1);

    // the transaction is retrievable
    let hash = committed.transactions[0].hash();
    assert!(h.ledger.get_tx_by_hash(&hash).unwrap().is_some());
}

#[test]
fn double_spend_in_one_block_rejects_second() {
    let h = build_harness(100, |_| {});
    let b = Address::new([0xb; 20]);
    let c = Address::new([0xc; 20]);

    let txs = vec![
        transfer(&h.key, 0, b, 80, 0),
        transfer(&h.key, 1, c, 80, 0),
    ];
    let block = next_block(&h.ledger, txs);
    let committed = h.ledger.append_block(block, true).unwrap();

    assert_eq!(committed.transactions.len(), 1);
    assert_eq!(committed.transactions[0].recipient, b);
    assert_eq!(balance(&h.ledger, &h.sender), BigInt::from(20));
    assert_eq!(balance(&h.ledger, &b), BigInt::from(80));
    assert_eq!(balance(&h.ledger, &c), BigInt::from(0));
}

#[test]
fn balance_conservation_across_blocks() {
    let h = build_harness(1_000, |_| {});
    let b = Address::new([0xb; 20]);
    let c = Address::new([0xc; 20]);

    let block = next_block(&h.ledger, vec![transfer(&h.key, 0, b, 300, 5)]);
    h.ledger.append_block(block, true).unwrap();
    let block = next_block(&h.ledger, vec![transfer(&h.key, 1, c, 100, 5)]);
    h.ledger.append_block(block, true).unwrap();

    let issuer_debt = {
        // the genesis issuer account went negative by the issuance
        let issuer = GenesisConfig::default().signing_key().unwrap();
        balance(&h.ledger, &Address::from_public_key(issuer.verifying_key()))
    };
    let total = balance(&h.ledger, &h.sender)
        + balance(&h.ledger, &b)
        + balance(&h.ledger, &c)
        + balance(&h.ledger, &h.fee_collector)
        + issuer_debt;
    assert_eq!(total, BigInt::from(0));
}

#[test]
fn height_chain_links_verify() {
    let h = build_harness(1_000, |_| {});
    let b = Address::new([0xb; 20]);
    for nonce in 0..3 {
        let block = next_block(&h.ledger, vec![transfer(&h.key, nonce, b, 10, 1)]);
        let committed = h.ledger.append_block(block, true).unwrap();
        assert_eq!(committed.height(), nonce + 1);
    }
    assert_eq!(h.ledger.height().unwrap(), 3);
    h.ledger.verify_chain().unwrap();

    // every header links to its parent
    for height in 1..=3 {
        let header = h.ledger.get_block_by_number(height).unwrap().unwrap();
        let parent = h.ledger.get_block_by_number(height - 1).unwrap().unwrap();
        assert_eq!(header.previous_hash, parent.hash());
    }
}

const KV_CONTRACT: &str = r#"
function L0Init(args)
    L0.PutState("owner", args[1])
    return true
end

function L0Invoke(func, args)
    if func == "set" then
        L0.PutState(args[1], args[2])
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

fn contract_tx(
    key: &SigningKey,
    nonce: u32,
    tx_type: TxType,
    spec: &ContractSpec,
    fee: i64,
) -> Transaction {
    Transaction::new(
        chain(),
        chain(),
        tx_type,
        nonce,
        Address::ZERO,
        Address::ZERO,
        0,
        0,
        fee,
        1,
    )
    .with_payload(spec.to_payload())
    .sign(key)
    .unwrap()
}

#[test]
fn contract_deploy_invoke_query_through_blocks() {
    let h = build_harness(1_000, |_| {});
    let contract_addr = Address::new([0xcc; 20]).to_hex_string();

    let deploy = ContractSpec {
        addr: contract_addr.clone(),
        code: KV_CONTRACT.into(),
        params: vec!["alice".into()],
    };
    let block = next_block(
        &h.ledger,
        vec![contract_tx(&h.key, 0, TxType::LuaContractInit, &deploy, 1)],
    );
    let committed = h.ledger.append_block(block, true).unwrap();
    assert_eq!(committed.transactions.len(), 1);

    let invoke = ContractSpec {
        addr: contract_addr.clone(),
        code: String::new(),
        params: vec!["set".into(), "color".into(), "green".into()],
    };
    let block = next_block(
        &h.ledger,
        vec![contract_tx(&h.key, 1, TxType::ContractInvoke, &invoke, 1)],
    );
    let committed = h.ledger.append_block(block, true).unwrap();
    assert_eq!(committed.transactions.len(), 1);

    let query = ContractSpec {
        addr: contract_addr,
        code: String::new(),
        params: vec!["color".into()],
    };
    let query_tx = Transaction::new(
        chain(),
        chain(),
        TxType::ContractQuery,
        0,
        Address::ZERO,
        Address::ZERO,
        0,
        0,
        0,
        1,
    )
    .with_payload(query.to_payload());
    let result = h.ledger.query_contract(&query_tx).unwrap();
    assert_eq!(result, b"green");
}

#[test]
fn contract_timeout_rejected_but_fee_persists() {
    let h = build_harness(1_000, |config| {
        config.vm.exec_limit_max_run_time = 50;
    });

    let spec = ContractSpec {
        addr: Address::new([0xdd; 20]).to_hex_string(),
        code: "function L0Init(args) while true do end end".into(),
        params: vec![],
    };
    let block = next_block(
        &h.ledger,
        vec![contract_tx(&h.key, 0, TxType::LuaContractInit, &spec, 10)],
    );
    let committed = h.ledger.append_block(block, true).unwrap();

    // the transaction was rejected, the block is empty
    assert!(committed.transactions.is_empty());
    // but the pre-execution fee transfer survived
    assert_eq!(balance(&h.ledger, &h.sender), BigInt::from(990));
    assert_eq!(balance(&h.ledger, &h.fee_collector), BigInt::from(10));
    // and no contract state was written
    assert!(h
        .ledger
        .state()
        .get_chain_state(&Address::new([0xdd; 20]).to_hex_string(), "owner", true)
        .unwrap()
        .is_none());
}

#[test]
fn global_contract_seeded_and_queryable() {
    let h = build_harness(1_000, |_| {});

    // set a value through the global contract
    let invoke = ContractSpec {
        addr: String::new(),
        code: String::new(),
        params: vec!["SetGlobalState".into(), "motd".into(), "hello".into()],
    };
    let block = next_block(
        &h.ledger,
        vec![contract_tx(&h.key, 0, TxType::ContractInvoke, &invoke, 0)],
    );
    let committed = h.ledger.append_block(block, true).unwrap();
    assert_eq!(committed.transactions.len(), 1);

    let query = ContractSpec {
        addr: String::new(),
        code: String::new(),
        params: vec!["motd".into()],
    };
    let query_tx = Transaction::new(
        chain(),
        chain(),
        TxType::ContractQuery,
        0,
        Address::ZERO,
        Address::ZERO,
        0,
        0,
        0,
        1,
    )
    .with_payload(query.to_payload());
    let result = h.ledger.query_contract(&query_tx).unwrap();
    assert_eq!(result, b"hello");
}

#[test]
fn merge_lookup_round_trip() {
    let h = build_harness(1_000, |_| {});
    let b = Address::new([0xb; 20]);

    let block = next_block(&h.ledger, vec![transfer(&h.key, 0, b, 10, 0)]);
    let committed = h.ledger.append_block(block, true).unwrap();
    let tx_hash = committed.transactions[0].hash();

    let merge_hash = H256::keccak256(b"merged");
    h.ledger
        .put_txs_hash_by_merge_tx_hash(&merge_hash, &[tx_hash])
        .unwrap();
    let txs = h.ledger.get_txs_by_merge_tx_hash(&merge_hash).unwrap();
    assert_eq!(txs.len(), 1);
    assert_eq!(txs[0].hash(), tx_hash);
}
