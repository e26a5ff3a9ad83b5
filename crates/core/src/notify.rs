//! Transaction outcome notifications.
//!
//! Submitters register interest in a transaction hash and receive exactly one
//! outcome for it: acceptance at commit, or the first error that removed the
//! transaction from the pipeline. Failures always carry the offending hash.

use crossbeam_channel::{bounded, Receiver, Sender};
use lattice_types::{Transaction, H256};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::{debug, warn};

/// The outcome delivered for a watched transaction.
#[derive(Debug, Clone)]
pub struct TxNotification {
    /// The transaction identity.
    pub hash: H256,
    /// `None` on acceptance, the failure message otherwise.
    pub error: Option<String>,
}

impl TxNotification {
    /// True when the transaction was accepted.
    pub fn is_accepted(&self) -> bool {
        self.error.is_none()
    }
}

/// Fan-out registry of per-transaction notification channels.
#[derive(Default)]
pub struct TxNotifier {
    watchers: Mutex<HashMap<H256, Sender<TxNotification>>>,
}

impl TxNotifier {
    /// Creates an empty notifier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in a transaction and returns the outcome channel.
    ///
    /// Re-registering a hash replaces the previous watcher.
    pub fn watch(&self, hash: H256) -> Receiver<TxNotification> {
        let (tx, rx) = bounded(1);
        self.watchers.lock().insert(hash, tx);
        rx
    }

    /// Delivers an outcome for a transaction and drops its watcher.
    ///
    /// Unwatched transactions are logged only.
    pub fn notify(&self, tx: &Transaction, error: Option<String>) {
        let hash = tx.hash();
        match &error {
            Some(msg) => warn!(tx_hash = %hash, error = %msg, "transaction failed"),
            None => debug!(tx_hash = %hash, "transaction accepted"),
        }

        if let Some(watcher) = self.watchers.lock().remove(&hash) {
            let _ = watcher.try_send(TxNotification { hash, error });
        }
    }

    /// Number of transactions currently watched.
    pub fn watched(&self) -> usize {
        self.watchers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_types::{Address, ChainCoordinate, TxType};

    fn tx() -> Transaction {
        Transaction::new(
            ChainCoordinate::from_hex("00").unwrap(),
            ChainCoordinate::from_hex("00").unwrap(),
            TxType::AtomicTransfer,
            0,
            Address::ZERO,
            Address::ZERO,
            0,
            1,
            0,
            0,
        )
    }

    #[test]
    fn delivers_failure_with_hash() {
        let notifier = TxNotifier::new();
        let tx = tx();
        let rx = notifier.watch(tx.hash());
        notifier.notify(&tx, Some("failed to verify".into()));
        let note = rx.try_recv().unwrap();
        assert_eq!(note.hash, tx.hash());
        assert!(!note.is_accepted());
        assert_eq!(notifier.watched(), 0);
    }

    #[test]
    fn unwatched_notify_is_noop() {
        let notifier = TxNotifier::new();
        notifier.notify(&tx(), None);
    }
}
