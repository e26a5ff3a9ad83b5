//! Integration tests for the column-family database.

use lattice_storage::{cf, Database, DatabaseConfig, WriteOp};
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_db() -> (Arc<Database>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let config = DatabaseConfig {
        path: temp_dir.path().to_string_lossy().to_string(),
        ..Default::default()
    };
    let db = Arc::new(Database::open(config).unwrap());
    (db, temp_dir)
}

#[test]
fn put_get_per_column_family() {
    let (db, _dir) = create_test_db();

    db.put(cf::BALANCE, b"key", b"one").unwrap();
    db.put(cf::ASSET, b"key", b"two").unwrap();

    assert_eq!(db.get(cf::BALANCE, b"key").unwrap().unwrap(), b"one");
    assert_eq!(db.get(cf::ASSET, b"key").unwrap().unwrap(), b"two");
    assert!(db.get(cf::SCONTRACT, b"key").unwrap().is_none());
}

#[test]
fn atomic_write_applies_all_ops() {
    let (db, _dir) = create_test_db();
    db.put(cf::BALANCE, b"gone", b"x").unwrap();

    db.atomic_write(vec![
        WriteOp::put(cf::BLOCKS, b"h".to_vec(), b"header".to_vec()),
        WriteOp::put(cf::TRANSACTIONS, b"t".to_vec(), b"tx".to_vec()),
        WriteOp::delete(cf::BALANCE, b"gone".to_vec()),
    ])
    .unwrap();

    assert_eq!(db.get(cf::BLOCKS, b"h").unwrap().unwrap(), b"header");
    assert_eq!(db.get(cf::TRANSACTIONS, b"t").unwrap().unwrap(), b"tx");
    assert!(db.get(cf::BALANCE, b"gone").unwrap().is_none());
}

#[test]
fn prefix_scan_is_ordered_and_bounded() {
    let (db, _dir) = create_test_db();

    for key in ["aa1", "aa3", "aa2", "ab1", "b"] {
        db.put(cf::SCONTRACT, key.as_bytes(), key.as_bytes()).unwrap();
    }

    let entries = db.get_by_prefix(cf::SCONTRACT, b"aa").unwrap();
    let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![b"aa1".as_slice(), b"aa2", b"aa3"]);
}

#[test]
fn range_scan_is_half_open() {
    let (db, _dir) = create_test_db();

    for key in ["a", "b", "c", "d"] {
        db.put(cf::BALANCE, key.as_bytes(), b"v").unwrap();
    }

    let entries = db.get_by_range(cf::BALANCE, b"b", b"d").unwrap();
    let keys: Vec<&[u8]> = entries.iter().map(|(k, _)| k.as_slice()).collect();
    assert_eq!(keys, vec![b"b".as_slice(), b"c"]);
}

#[test]
fn reopen_preserves_data() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_string_lossy().to_string();

    {
        let db = Database::open_default(&path).unwrap();
        db.put(cf::BLOCKS, b"k", b"v").unwrap();
    }

    let db = Database::open_default(&path).unwrap();
    assert_eq!(db.get(cf::BLOCKS, b"k").unwrap().unwrap(), b"v");
}
