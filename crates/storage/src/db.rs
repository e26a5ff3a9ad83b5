//! RocksDB wrapper with column families for ledger data.
//!
//! This module provides a high-level interface to RocksDB with the six
//! predefined column families used by the ledger. All mutation goes through
//! [`Database::atomic_write`]; single-key `put`/`delete` exist for tooling
//! and tests.

use parking_lot::RwLock;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatchWithTransaction, DB,
};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::{Result, StorageError};

/// Column family names.
pub mod cf {
    /// Block headers keyed by block hash.
    pub const BLOCKS: &str = "blocks";
    /// Height-to-hash and height-to-transaction-list index.
    pub const BLOCK_INDEX: &str = "block-index";
    /// Transactions keyed by transaction hash.
    pub const TRANSACTIONS: &str = "transactions";
    /// Contract state (composite keys).
    pub const SCONTRACT: &str = "scontract";
    /// Balances (composite keys).
    pub const BALANCE: &str = "balance";
    /// Asset registry (composite keys).
    pub const ASSET: &str = "asset";

    /// All column families.
    pub const ALL: &[&str] = &[BLOCKS, BLOCK_INDEX, TRANSACTIONS, SCONTRACT, BALANCE, ASSET];
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database directory.
    pub path: String,
    /// Enable LZ4 compression.
    pub enable_compression: bool,
    /// Maximum number of open files.
    pub max_open_files: i32,
    /// Write buffer size in bytes.
    pub write_buffer_size: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: String::from("./data/lattice"),
            enable_compression: true,
            max_open_files: 512,
            write_buffer_size: 64 * 1024 * 1024,
        }
    }
}

/// One operation of an atomic write.
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Insert or update a key.
    Put {
        /// Column family name.
        cf: &'static str,
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Column family name.
        cf: &'static str,
        /// Key bytes.
        key: Vec<u8>,
    },
}

impl WriteOp {
    /// Shorthand for a put operation.
    pub fn put(cf: &'static str, key: Vec<u8>, value: Vec<u8>) -> Self {
        Self::Put { cf, key, value }
    }

    /// Shorthand for a delete operation.
    pub fn delete(cf: &'static str, key: Vec<u8>) -> Self {
        Self::Delete { cf, key }
    }

    /// The column family this operation targets.
    pub fn cf(&self) -> &'static str {
        match self {
            Self::Put { cf, .. } | Self::Delete { cf, .. } => cf,
        }
    }

    /// The key this operation targets.
    pub fn key(&self) -> &[u8] {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// RocksDB wrapper with column families.
pub struct Database {
    inner: DBWithThreadMode<MultiThreaded>,
    config: DatabaseConfig,
    // Serializes writers; readers go straight to RocksDB.
    write_lock: RwLock<()>,
}

impl Database {
    /// Opens or creates a database at the configured path.
    pub fn open(config: DatabaseConfig) -> Result<Self> {
        info!(path = %config.path, "opening database");

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_max_open_files(config.max_open_files);
        opts.set_write_buffer_size(config.write_buffer_size);
        if config.enable_compression {
            opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        }

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = cf::ALL
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                if config.enable_compression {
                    cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
                }
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let path = Path::new(&config.path);
        let db = DB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StorageError::Database(e.to_string()))?;

        Ok(Self {
            inner: db,
            config,
            write_lock: RwLock::new(()),
        })
    }

    /// Opens a database with default configuration at `path`.
    pub fn open_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = DatabaseConfig {
            path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        };
        Self::open(config)
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.inner
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Gets a value from a column family.
    pub fn get(&self, cf_name: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(cf_name)?;
        self.inner
            .get_cf(&cf, key)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Puts a single value into a column family.
    pub fn put(&self, cf_name: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        let _guard = self.write_lock.write();
        self.inner
            .put_cf(&cf, key, value)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Deletes a single key from a column family.
    pub fn delete(&self, cf_name: &str, key: &[u8]) -> Result<()> {
        let cf = self.cf_handle(cf_name)?;
        let _guard = self.write_lock.write();
        self.inner
            .delete_cf(&cf, key)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Returns every `(key, value)` pair whose key starts with `prefix`,
    /// in lexicographic key order.
    pub fn get_by_prefix(&self, cf_name: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_handle(cf_name)?;
        let iter = self
            .inner
            .iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        let mut out = Vec::new();
        for entry in iter {
            let (key, value) = entry.map_err(|e| StorageError::Database(e.to_string()))?;
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.into_vec(), value.into_vec()));
        }
        Ok(out)
    }

    /// Returns every `(key, value)` pair with `start <= key < end`, in
    /// lexicographic key order.
    pub fn get_by_range(
        &self,
        cf_name: &str,
        start: &[u8],
        end: &[u8],
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let cf = self.cf_handle(cf_name)?;
        let iter = self
            .inner
            .iterator_cf(&cf, IteratorMode::From(start, Direction::Forward));

        let mut out = Vec::new();
        for entry in iter {
            let (key, value) = entry.map_err(|e| StorageError::Database(e.to_string()))?;
            if key.as_ref() >= end {
                break;
            }
            out.push((key.into_vec(), value.into_vec()));
        }
        Ok(out)
    }

    /// Applies a list of operations atomically: either all land or none do.
    pub fn atomic_write(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut batch = WriteBatchWithTransaction::<false>::default();
        for op in &ops {
            let cf = self.cf_handle(op.cf())?;
            match op {
                WriteOp::Put { key, value, .. } => batch.put_cf(&cf, key, value),
                WriteOp::Delete { key, .. } => batch.delete_cf(&cf, key),
            }
        }

        let _guard = self.write_lock.write();
        debug!(ops = ops.len(), "atomic write");
        self.inner
            .write(batch)
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    /// Checks whether a key exists.
    pub fn exists(&self, cf_name: &str, key: &[u8]) -> Result<bool> {
        self.get(cf_name, key).map(|v| v.is_some())
    }

    /// Returns the path to the database.
    pub fn path(&self) -> &str {
        &self.config.path
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        debug!(path = %self.config.path, "closing database");
    }
}
