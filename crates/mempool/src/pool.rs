//! The ordered transaction pool.

use crate::{MempoolError, Result};
use lattice_types::{Address, ChainCoordinate, Transaction, H256};
use parking_lot::RwLock;
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Total order key: destination chain, then sender, then nonce ascending,
/// then fee descending.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    to_chain: ChainCoordinate,
    sender: Address,
    nonce: u32,
    fee: Reverse<i64>,
}

impl OrderKey {
    fn of(tx: &Transaction) -> Self {
        Self {
            to_chain: tx.to_chain.clone(),
            sender: tx.sender,
            nonce: tx.nonce,
            fee: Reverse(tx.fee),
        }
    }
}

#[derive(Default)]
struct Inner {
    by_order: BTreeMap<OrderKey, Transaction>,
    by_hash: HashMap<H256, OrderKey>,
}

/// An ordered, capacity-bounded transaction pool.
///
/// Readers take a shared lock; all mutation takes the exclusive lock, so
/// iteration observes a consistent snapshot of the order.
pub struct TxPool {
    inner: RwLock<Inner>,
    capacity: usize,
}

impl TxPool {
    /// Creates a pool holding at most `capacity` transactions.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            capacity,
        }
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pooled transactions.
    pub fn len(&self) -> usize {
        self.inner.read().by_order.len()
    }

    /// True when the pool is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().by_order.is_empty()
    }

    /// True when `hash` is pooled.
    pub fn contains(&self, hash: &H256) -> bool {
        self.inner.read().by_hash.contains_key(hash)
    }

    /// O(1) lookup by transaction hash.
    pub fn get_by_key(&self, hash: &H256) -> Option<Transaction> {
        let inner = self.inner.read();
        let key = inner.by_hash.get(hash)?;
        inner.by_order.get(key).cloned()
    }

    /// Inserts a transaction.
    ///
    /// When the pool is at capacity the front (order-minimum) element is
    /// evicted first and returned. Fails if the hash is already pooled.
    pub fn add(&self, tx: Transaction) -> Result<Option<Transaction>> {
        let hash = tx.hash();
        let mut inner = self.inner.write();

        if inner.by_hash.contains_key(&hash) {
            return Err(MempoolError::AlreadyExists);
        }

        let evicted = if inner.by_order.len() >= self.capacity {
            let front = Self::pop_front(&mut inner);
            if let Some(evicted) = &front {
                warn!(tx_hash = %evicted.hash(), "pool at capacity, evicted front transaction");
            }
            front
        } else {
            None
        };

        let key = OrderKey::of(&tx);
        inner.by_hash.insert(hash, key.clone());
        inner.by_order.insert(key, tx);
        debug!(tx_hash = %hash, len = inner.by_order.len(), "transaction pooled");
        Ok(evicted)
    }

    fn pop_front(inner: &mut Inner) -> Option<Transaction> {
        let (_, tx) = inner.by_order.pop_first()?;
        inner.by_hash.remove(&tx.hash());
        Some(tx)
    }

    /// Removes and returns the order-minimum transaction.
    pub fn remove_front(&self) -> Option<Transaction> {
        Self::pop_front(&mut self.inner.write())
    }

    /// Removes one transaction; returns whether it was present.
    pub fn remove(&self, tx: &Transaction) -> bool {
        let mut inner = self.inner.write();
        if let Some(key) = inner.by_hash.remove(&tx.hash()) {
            inner.by_order.remove(&key);
            true
        } else {
            false
        }
    }

    /// Removes a batch of transactions.
    pub fn remove_many(&self, txs: &[Transaction]) {
        let mut inner = self.inner.write();
        for tx in txs {
            if let Some(key) = inner.by_hash.remove(&tx.hash()) {
                inner.by_order.remove(&key);
            }
        }
    }

    /// Visits transactions in order; stops when `visit` returns true.
    pub fn iter<F>(&self, mut visit: F)
    where
        F: FnMut(&Transaction) -> bool,
    {
        let inner = self.inner.read();
        for tx in inner.by_order.values() {
            if visit(tx) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::TxType;

    fn tx(sender_byte: u8, nonce: u32, fee: i64) -> Transaction {
        Transaction::new(
            ChainCoordinate::from_hex("00").unwrap(),
            ChainCoordinate::from_hex("00").unwrap(),
            TxType::AtomicTransfer,
            nonce,
            Address::new([sender_byte; 20]),
            Address::new([0xff; 20]),
            0,
            100,
            fee,
            0,
        )
    }

    #[test]
    fn iteration_follows_order_key() {
        let pool = TxPool::new(16);
        pool.add(tx(2, 0, 5)).unwrap();
        pool.add(tx(1, 1, 5)).unwrap();
        pool.add(tx(1, 0, 5)).unwrap();

        let mut seen = Vec::new();
        pool.iter(|tx| {
            seen.push((tx.sender, tx.nonce));
            false
        });
        assert_eq!(
            seen,
            vec![
                (Address::new([1; 20]), 0),
                (Address::new([1; 20]), 1),
                (Address::new([2; 20]), 0),
            ]
        );
    }

    #[test]
    fn same_sender_same_nonce_orders_by_fee_descending() {
        let pool = TxPool::new(16);
        pool.add(tx(1, 0, 1)).unwrap();
        pool.add(tx(1, 0, 9)).unwrap();

        let front = pool.remove_front().unwrap();
        assert_eq!(front.fee, 9);
    }

    #[test]
    fn overflow_evicts_order_minimum() {
        let pool = TxPool::new(3);
        pool.add(tx(1, 1, 10)).unwrap();
        pool.add(tx(1, 2, 20)).unwrap();
        pool.add(tx(1, 3, 30)).unwrap();

        let evicted = pool.add(tx(1, 4, 40)).unwrap().unwrap();
        assert_eq!(evicted.fee, 10);
        assert_eq!(pool.len(), 3);

        let fees: Vec<i64> = {
            let mut out = Vec::new();
            pool.iter(|tx| {
                out.push(tx.fee);
                false
            });
            out
        };
        assert_eq!(fees, vec![20, 30, 40]);
    }

    #[test]
    fn duplicate_add_fails() {
        let pool = TxPool::new(4);
        let sample = tx(1, 0, 1);
        pool.add(sample.clone()).unwrap();
        assert!(matches!(
            pool.add(sample),
            Err(crate::MempoolError::AlreadyExists)
        ));
    }

    #[test]
    fn hash_lookup_and_removal() {
        let pool = TxPool::new(4);
        let sample = tx(3, 0, 1);
        let hash = sample.hash();
        pool.add(sample.clone()).unwrap();

        assert!(pool.contains(&hash));
        assert_eq!(pool.get_by_key(&hash).unwrap().hash(), hash);

        assert!(pool.remove(&sample));
        assert!(!pool.contains(&hash));
        assert!(!pool.remove(&sample));
    }

    #[test]
    fn iteration_stops_on_visit_true() {
        let pool = TxPool::new(8);
        for nonce in 0..5 {
            pool.add(tx(1, nonce, 1)).unwrap();
        }
        let mut count = 0;
        pool.iter(|_| {
            count += 1;
            count == 2
        });
        assert_eq!(count, 2);
    }
}
