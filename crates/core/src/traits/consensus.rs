//! Consensus collaborator trait.
//!
//! The consensus algorithm itself is out of scope for the execution core.
//! The core hands it deterministically shaped batches through
//! [`Consensus::process_batch`] and consumes committed batches from the
//! output channel. Engines named `"noops"` auto-start the blockchain
//! services on registration.

use crossbeam_channel::Receiver;
use lattice_types::Transaction;
use std::sync::Arc;
use std::time::Duration;

/// Outcome reported by the consensus engine for a processed batch.
///
/// The engine may report several outcomes for the same batch over its
/// lifetime (e.g. speculative balance application followed by commitment).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Log-only notification (replica role changes and the like).
    Informational,
    /// The transactions must be returned to the pool.
    Reenqueue,
    /// The transactions were committed; drop them from the pool.
    Committed,
    /// Apply speculative balance updates for the transactions.
    ApplyBalances,
    /// Reverse previously applied speculative balance updates.
    RollbackBalances,
    /// Verification failed; notify submitters and drop the transactions.
    VerifyFailed,
}

/// Callback used by the engine to report batch outcomes to the validator.
pub type BatchCallback = Arc<dyn Fn(BatchOutcome, Vec<Transaction>) + Send + Sync>;

/// A batch committed by consensus, ready to become a block.
#[derive(Debug, Clone)]
pub struct ConsensusOutput {
    /// Height the batch commits at.
    pub height: u32,
    /// Batch commitment time (seconds since epoch).
    pub time: u32,
    /// The ordered transactions.
    pub txs: Vec<Transaction>,
}

/// The consensus engine interface consumed by the execution core.
pub trait Consensus: Send + Sync {
    /// Starts the engine.
    fn start(&self);

    /// Engine name; `"noops"` auto-starts the blockchain services.
    fn name(&self) -> &str;

    /// Preferred number of transactions per batch.
    fn batch_size(&self) -> usize;

    /// How long the validator waits before submitting a partial batch.
    fn batch_timeout(&self) -> Duration;

    /// Submits a batch for ordering. `on_result` is invoked, possibly more
    /// than once, as the engine makes progress on the batch.
    fn process_batch(&self, txs: Vec<Transaction>, on_result: BatchCallback);

    /// The channel of committed batches.
    fn output(&self) -> Receiver<ConsensusOutput>;
}
