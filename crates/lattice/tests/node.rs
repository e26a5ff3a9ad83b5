//! Node-level integration: the full pipeline and orphan reordering.

use k256::ecdsa::SigningKey;
use lattice::Node;
use lattice_config::{Config, GenesisConfig};
use lattice_core::ConsensusOutput;
use lattice_types::{Address, ChainCoordinate, Transaction, TxType};
use num_bigint::BigInt;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn chain_coord() -> ChainCoordinate {
    ChainCoordinate::from_hex("00").unwrap()
}

fn build_node(dir: &TempDir, key: &SigningKey, issue_amount: i64) -> Node {
    let mut config = Config::default();
    config.storage.data_dir = dir
        .path()
        .join("db")
        .to_string_lossy()
        .to_string();
    config.consensus.batch_size = 4;
    config.consensus.batch_timeout_ms = 100;
    config.pool.tx_pool_delay = 0;

    let mut genesis = GenesisConfig::default();
    genesis.addresses = vec![Address::from_public_key(key.verifying_key()).to_hex_string()];
    genesis.issue_amount = issue_amount;

    Node::build(&config, &genesis).unwrap()
}

fn transfer(key: &SigningKey, nonce: u32, to: Address, amount: i64, fee: i64) -> Transaction {
    Transaction::new(
        chain_coord(),
        chain_coord(),
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

fn wait_for_height(node: &Node, height: u32, budget: Duration) {
    let start = Instant::now();
    while node.ledger().height().unwrap() < height {
        assert!(
            start.elapsed() < budget,
            "height {height} not reached within {budget:?}"
        );
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn submitted_transfer_is_batched_committed_and_cleared() {
    let dir = TempDir::new().unwrap();
    let key = SigningKey::random(&mut rand::thread_rng());
    let sender = Address::from_public_key(key.verifying_key());
    let node = build_node(&dir, &key, 1_000);
    node.start();

    let b = Address::new([0xb; 20]);
    assert!(node.chain().process_transaction(transfer(&key, 0, b, 200, 10), false));
    assert_eq!(node.validator().pool_len(), 1);

    wait_for_height(&node, 1, Duration::from_secs(10));

    let balances = |addr: &Address| node.ledger().get_balances(addr).unwrap().get(0);
    assert_eq!(balances(&sender), BigInt::from(790));
    assert_eq!(balances(&b), BigInt::from(200));
    // default fee collector is the zero address
    assert_eq!(balances(&Address::ZERO), BigInt::from(10));

    // the pool drained after commitment
    let start = Instant::now();
    while node.validator().pool_len() > 0 {
        assert!(start.elapsed() < Duration::from_secs(5));
        std::thread::sleep(Duration::from_millis(20));
    }
}

#[test]
fn duplicate_submission_is_refused() {
    let dir = TempDir::new().unwrap();
    let key = SigningKey::random(&mut rand::thread_rng());
    let node = build_node(&dir, &key, 1_000);

    let tx = transfer(&key, 0, Address::new([0xb; 20]), 10, 0);
    assert!(node.chain().process_transaction(tx.clone(), false));
    assert!(!node.chain().process_transaction(tx, false));
}

#[test]
fn orphan_outputs_commit_in_height_order() {
    let dir = TempDir::new().unwrap();
    let key = SigningKey::random(&mut rand::thread_rng());
    let node = build_node(&dir, &key, 1_000);
    let chain = node.chain();

    let output = |height: u32| ConsensusOutput {
        height,
        time: height,
        txs: Vec::new(),
    };

    // expected next height is 1; commit it so the scenario starts at 2
    chain.handle_consensus_output(output(1));
    assert_eq!(node.ledger().height().unwrap(), 1);

    // out-of-order arrival: 3, 2, 4, 5
    chain.handle_consensus_output(output(3));
    assert_eq!(node.ledger().height().unwrap(), 1);

    chain.handle_consensus_output(output(2));
    // 2 applied directly, 3 drained from the orphan buffer
    assert_eq!(node.ledger().height().unwrap(), 3);

    chain.handle_consensus_output(output(4));
    chain.handle_consensus_output(output(5));
    assert_eq!(node.ledger().height().unwrap(), 5);

    // stale output is ignored
    chain.handle_consensus_output(output(2));
    assert_eq!(node.ledger().height().unwrap(), 5);

    // the hash chain is consistent
    node.ledger().verify_chain().unwrap();
    for height in 1..=5 {
        let header = node.ledger().get_block_by_number(height).unwrap().unwrap();
        let parent = node.ledger().get_block_by_number(height - 1).unwrap().unwrap();
        assert_eq!(header.previous_hash, parent.hash());
    }
}

#[test]
fn mempool_overflow_keeps_highest_ranked() {
    let dir = TempDir::new().unwrap();
    let key = SigningKey::random(&mut rand::thread_rng());
    let mut config = Config::default();
    config.storage.data_dir = dir.path().join("db").to_string_lossy().to_string();
    config.pool.capacity = 3;

    let mut genesis = GenesisConfig::default();
    genesis.addresses = vec![Address::from_public_key(key.verifying_key()).to_hex_string()];
    let node = Node::build(&config, &genesis).unwrap();

    let mut hashes = Vec::new();
    for (nonce, fee) in [(0u32, 1i64), (1, 2), (2, 3), (3, 4)] {
        let tx = transfer(&key, nonce, Address::new([0xb; 20]), 1, fee);
        hashes.push(tx.hash());
        assert!(node.chain().process_transaction(tx, false));
    }

    assert_eq!(node.validator().pool_len(), 3);
    assert!(node.validator().get_tx_by_hash(&hashes[0]).is_none());
    for hash in &hashes[1..] {
        assert!(node.validator().get_tx_by_hash(hash).is_some());
    }
}
