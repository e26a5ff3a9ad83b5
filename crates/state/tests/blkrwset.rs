//! Integration tests for the block read/write set and staging views.

use lattice_state::{Asset, BlkRwSet, StateError, TxRwSet};
use lattice_storage::{cf, Database, DatabaseConfig};
use lattice_types::{Address, ChainCoordinate, Transaction, TxType};
use num_bigint::BigInt;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn create_state() -> (Arc<BlkRwSet>, Arc<Database>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        path: temp_dir.path().to_string_lossy().to_string(),
        ..Default::default()
    };
    let db = Arc::new(Database::open(config).unwrap());
    (Arc::new(BlkRwSet::new(Arc::clone(&db))), db, temp_dir)
}

fn dummy_tx(nonce: u32) -> Transaction {
    Transaction::new(
        ChainCoordinate::from_hex("00").unwrap(),
        ChainCoordinate::from_hex("00").unwrap(),
        TxType::AtomicTransfer,
        nonce,
        Address::new([1u8; 20]),
        Address::new([2u8; 20]),
        0,
        1,
        0,
        0,
    )
}

#[test]
fn read_your_writes_and_tombstones() {
    let (state, _db, _dir) = create_state();
    state.set_block(1, 0);

    state.set_chain_state("c1", "k", b"v1".to_vec());
    assert_eq!(
        state.get_chain_state("c1", "k", false).unwrap().unwrap(),
        b"v1"
    );

    state.del_chain_state("c1", "k");
    assert!(state.get_chain_state("c1", "k", false).unwrap().is_none());

    // committed reads bypass the overlay
    assert!(state.get_chain_state("c1", "k", true).unwrap().is_none());
}

#[test]
fn committed_read_bypasses_overlay() {
    let (state, db, _dir) = create_state();
    let ckey = lattice_storage::encode_composite_key("c1", "k");
    db.put(cf::SCONTRACT, &ckey, b"stored").unwrap();

    state.set_block(1, 0);
    state.set_chain_state("c1", "k", b"staged".to_vec());

    assert_eq!(
        state.get_chain_state("c1", "k", false).unwrap().unwrap(),
        b"staged"
    );
    assert_eq!(
        state.get_chain_state("c1", "k", true).unwrap().unwrap(),
        b"stored"
    );
}

#[test]
fn range_merges_overlay_and_storage() {
    let (state, db, _dir) = create_state();
    for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
        let ckey = lattice_storage::encode_composite_key("c1", key);
        db.put(cf::SCONTRACT, &ckey, value.as_bytes()).unwrap();
    }

    state.set_block(1, 0);
    state.set_chain_state("c1", "b", b"22".to_vec());
    state.del_chain_state("c1", "c");
    state.set_chain_state("c1", "d", b"4".to_vec());

    let entries = state
        .get_chain_state_by_range("c1", "", "", false)
        .unwrap();
    let values: Vec<&[u8]> = entries.values().map(|v| v.as_slice()).collect();
    assert_eq!(values, vec![b"1".as_slice(), b"22", b"4"]);
}

#[test]
fn staging_snapshot_merges_into_block() {
    let (state, _db, _dir) = create_state();
    state.set_block(1, 1);

    let staging = TxRwSet::new(Arc::clone(&state));
    staging.set_chain_state("c1", "k", b"v".to_vec());
    staging.set_balance(&Address::new([1u8; 20]), 0, &BigInt::from(50));

    let tx = dummy_tx(0);
    state
        .merge(staging.take_snapshot(), &tx, vec![], 0)
        .unwrap();

    assert_eq!(
        state.get_chain_state("c1", "k", false).unwrap().unwrap(),
        b"v"
    );

    let (ops, accepted, rejected) = state.apply_changes().unwrap();
    assert_eq!(accepted.len(), 1);
    assert!(rejected.is_empty());
    assert_eq!(ops.len(), 2);
}

#[test]
fn stale_read_conflicts_and_redo_succeeds() {
    let (state, _db, _dir) = create_state();
    state.set_block(1, 2);

    // tx 1 reads the key before tx 0 merges its write.
    let staging1 = TxRwSet::new(Arc::clone(&state));
    assert!(staging1.get_chain_state("c1", "k").unwrap().is_none());
    let snapshot1 = staging1.take_snapshot();

    // tx 0 writes the key and merges first.
    let staging0 = TxRwSet::new(Arc::clone(&state));
    staging0.set_chain_state("c1", "k", b"v0".to_vec());
    state
        .merge(staging0.take_snapshot(), &dummy_tx(0), vec![], 0)
        .unwrap();

    // tx 1's observation is now stale.
    let err = state
        .merge(snapshot1, &dummy_tx(1), vec![], 1)
        .unwrap_err();
    assert!(matches!(err, StateError::ReadSetConflict { namespace: "chaincode", .. }));

    // redo against the block overlay observes the merged value and succeeds.
    let redo = TxRwSet::new(Arc::clone(&state));
    assert_eq!(redo.get_chain_state("c1", "k").unwrap().unwrap(), b"v0");
    state
        .merge(redo.take_snapshot(), &dummy_tx(1), vec![], 1)
        .unwrap();

    let (_, accepted, rejected) = state.apply_changes().unwrap();
    assert_eq!(accepted.len(), 2);
    assert!(rejected.is_empty());
}

#[test]
fn merge_none_records_rejection() {
    let (state, _db, _dir) = create_state();
    state.set_block(1, 1);
    state.merge_rejected(None, &dummy_tx(0), 0);

    let (ops, accepted, rejected) = state.apply_changes().unwrap();
    assert!(ops.is_empty());
    assert!(accepted.is_empty());
    assert_eq!(rejected.len(), 1);
}

#[test]
fn apply_changes_waits_for_all_merges() {
    let (state, _db, _dir) = create_state();
    state.set_block(1, 2);

    let state2 = Arc::clone(&state);
    let merger = std::thread::spawn(move || {
        // merge out of order: index 1 must wait for index 0
        let staging = TxRwSet::new(Arc::clone(&state2));
        staging.set_chain_state("c", "b", b"1".to_vec());
        state2
            .merge(staging.take_snapshot(), &dummy_tx(1), vec![], 1)
            .unwrap();
    });

    std::thread::sleep(Duration::from_millis(50));
    let staging = TxRwSet::new(Arc::clone(&state));
    staging.set_chain_state("c", "a", b"0".to_vec());
    state
        .merge(staging.take_snapshot(), &dummy_tx(0), vec![], 0)
        .unwrap();

    merger.join().unwrap();
    let (ops, accepted, _) = state.apply_changes().unwrap();
    assert_eq!(accepted.len(), 2);
    assert_eq!(ops.len(), 2);
}

#[test]
fn write_then_apply_then_read_committed() {
    let (state, db, _dir) = create_state();
    state.set_block(1, 1);

    let staging = TxRwSet::new(Arc::clone(&state));
    staging.set_balance(&Address::new([7u8; 20]), 3, &BigInt::from(900));
    staging.set_asset(&Asset {
        id: 3,
        name: "three".into(),
        ..Default::default()
    });
    state
        .merge(staging.take_snapshot(), &dummy_tx(0), vec![], 0)
        .unwrap();

    let (ops, _, _) = state.apply_changes().unwrap();
    db.atomic_write(ops).unwrap();

    state.set_block(2, 0);
    let amount = state
        .get_balance_state(&Address::new([7u8; 20]), 3, true)
        .unwrap()
        .unwrap();
    assert_eq!(amount, BigInt::from(900));
    let asset = state.get_asset_state(3, true).unwrap().unwrap();
    assert_eq!(asset.name, "three");
}

#[test]
fn root_hash_is_deterministic_and_content_sensitive() {
    let (state, _db, _dir) = create_state();
    state.set_block(1, 0);
    let empty = state.root_hash();

    state.set_chain_state("c", "k", b"v".to_vec());
    let with_write = state.root_hash();
    assert_ne!(empty, with_write);
    assert_eq!(with_write, state.root_hash());
}
