//! The built-in single-node consensus engine.
//!
//! `noops` orders batches trivially: every submitted batch is immediately
//! committed at the next height and pushed to the output channel. It exists
//! for single-node deployments and tests; real deployments plug a BFT
//! engine in behind the same trait.

use crossbeam_channel::{unbounded, Receiver, Sender};
use lattice_core::{BatchCallback, BatchOutcome, Consensus, ConsensusOutput};
use lattice_types::Transaction;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Trivial ordering engine committing every batch at the next height.
pub struct NoopsConsensus {
    batch_size: usize,
    batch_timeout: Duration,
    next_height: Mutex<u32>,
    output_tx: Sender<ConsensusOutput>,
    output_rx: Receiver<ConsensusOutput>,
}

impl NoopsConsensus {
    /// Creates the engine; `next_height` is the height the next committed
    /// batch lands at (current chain height + 1).
    pub fn new(batch_size: usize, batch_timeout: Duration, next_height: u32) -> Self {
        let (output_tx, output_rx) = unbounded();
        Self {
            batch_size,
            batch_timeout,
            next_height: Mutex::new(next_height),
            output_tx,
            output_rx,
        }
    }
}

impl Consensus for NoopsConsensus {
    fn start(&self) {
        info!("noops consensus started");
    }

    fn name(&self) -> &str {
        "noops"
    }

    fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn batch_timeout(&self) -> Duration {
        self.batch_timeout
    }

    fn process_batch(&self, txs: Vec<Transaction>, on_result: BatchCallback) {
        if txs.is_empty() {
            return;
        }
        let height = {
            let mut next = self.next_height.lock();
            let height = *next;
            *next += 1;
            height
        };
        let time = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);

        debug!(height, txs = txs.len(), "noops committing batch");
        on_result(BatchOutcome::Committed, txs.clone());
        let _ = self.output_tx.send(ConsensusOutput { height, time, txs });
    }

    fn output(&self) -> Receiver<ConsensusOutput> {
        self.output_rx.clone()
    }
}
