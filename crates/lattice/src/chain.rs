//! The blockchain coordinator.
//!
//! Consumes committed consensus output, assembles blocks in strict height
//! order, buffers out-of-order outputs in a bounded orphan list, appends
//! blocks through the ledger and relays them.

use lattice_core::{Consensus, ConsensusOutput, Inventory, NetworkStack};
use lattice_ledger::Ledger;
use lattice_types::{Block, BlockHeader, Transaction, H256};
use lattice_validator::Validator;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Header nonce of generated blocks.
pub const BLOCK_NONCE: u32 = 100;

/// Maximum buffered out-of-order consensus outputs.
const MAX_ORPHANS: usize = 100;

/// Coordinates consensus output, the ledger and the network relay.
pub struct Blockchain {
    ledger: Arc<Ledger>,
    validator: Arc<Validator>,
    consenter: Arc<dyn Consensus>,
    network: Arc<dyn NetworkStack>,

    current_header: RwLock<BlockHeader>,
    synced: AtomicBool,
    // Out-of-order outputs, kept sorted by height. Owned by the consumer.
    orphans: Mutex<Vec<ConsensusOutput>>,
}

impl Blockchain {
    /// Loads the coordinator at the ledger's current tip.
    pub fn new(
        ledger: Arc<Ledger>,
        validator: Arc<Validator>,
        consenter: Arc<dyn Consensus>,
        network: Arc<dyn NetworkStack>,
    ) -> anyhow::Result<Arc<Self>> {
        let height = ledger.height()?;
        let current_header = ledger
            .get_block_by_number(height)?
            .ok_or_else(|| anyhow::anyhow!("missing tip header at height {height}"))?;
        info!(height, hash = %current_header.hash(), "loaded blockchain tip");

        Ok(Arc::new(Self {
            ledger,
            validator,
            consenter,
            network,
            current_header: RwLock::new(current_header),
            synced: AtomicBool::new(false),
            orphans: Mutex::new(Vec::new()),
        }))
    }

    /// Current tip height.
    pub fn current_height(&self) -> u32 {
        self.current_header.read().height
    }

    /// Current tip hash.
    pub fn current_block_hash(&self) -> H256 {
        self.current_header.read().hash()
    }

    /// Whether this node has caught up with consensus output.
    pub fn synced(&self) -> bool {
        self.synced.load(Ordering::Relaxed)
    }

    /// Hash of the block following `hash`, when both exist.
    pub fn get_next_block_hash(&self, hash: &H256) -> anyhow::Result<Option<H256>> {
        let Some(header) = self.ledger.get_block_by_hash(hash)? else {
            return Ok(None);
        };
        Ok(self
            .ledger
            .get_block_by_number(header.height + 1)?
            .map(|next| next.hash()))
    }

    /// Transaction lookup: the ledger first, then the validator's pool.
    pub fn get_transaction(&self, hash: &H256) -> anyhow::Result<Option<Transaction>> {
        if let Some(tx) = self.ledger.get_tx_by_hash(hash)? {
            return Ok(Some(tx));
        }
        Ok(self.validator.get_tx_by_hash(hash))
    }

    /// Starts the consensus service and the transaction pool service.
    pub fn start(self: &Arc<Self>) {
        self.consenter.start();
        let chain = Arc::clone(self);
        let output = self.consenter.output();
        std::thread::Builder::new()
            .name("chain-consumer".to_string())
            .spawn(move || {
                for committed in output.iter() {
                    chain.handle_consensus_output(committed);
                }
            })
            .expect("chain consumer thread spawn");

        self.validator.start();
        debug!("blockchain services started");
    }

    /// Admits a transaction from the network; failures are reported to the
    /// submitter through the notifier when `notify` is set.
    pub fn process_transaction(&self, tx: Transaction, notify: bool) -> bool {
        let hash = tx.hash();
        match self.validator.process_transaction(tx.clone()) {
            Ok(()) => {
                self.network.relay(Inventory::Transaction(tx));
                true
            }
            Err(e) => {
                error!(tx_hash = %hash, error = %e, "process transaction failed");
                if notify {
                    self.validator.notifier().notify(&tx, Some(e.to_string()));
                }
                false
            }
        }
    }

    /// Routes one consensus output: apply when contiguous, buffer when
    /// early, ignore when stale. Buffered outputs drain as soon as they
    /// become contiguous.
    pub fn handle_consensus_output(&self, output: ConsensusOutput) {
        let mut expected = match self.ledger.height() {
            Ok(height) => height + 1,
            Err(e) => {
                error!(error = %e, "cannot read chain height");
                return;
            }
        };

        if output.height == expected {
            self.synced.store(true, Ordering::Relaxed);
            self.process_consensus_output(output);
            expected += 1;
            self.drain_orphans(&mut expected);
        } else if output.height > expected {
            debug!(
                height = output.height,
                expected, "buffering out-of-order consensus output"
            );
            let mut orphans = self.orphans.lock();
            orphans.retain(|orphan| orphan.height >= expected);
            match orphans.binary_search_by_key(&output.height, |o| o.height) {
                Ok(_) => {} // duplicate height, keep the first
                Err(position) => orphans.insert(position, output),
            }
            if orphans.len() > MAX_ORPHANS {
                orphans.remove(0);
            }
        }
        // below the expected height: already committed, ignore
    }

    fn drain_orphans(&self, expected: &mut u32) {
        loop {
            let next = {
                let mut orphans = self.orphans.lock();
                orphans.retain(|orphan| orphan.height >= *expected);
                match orphans.first() {
                    Some(first) if first.height == *expected => Some(orphans.remove(0)),
                    _ => None,
                }
            };
            match next {
                Some(output) => {
                    self.process_consensus_output(output);
                    *expected += 1;
                }
                None => break,
            }
        }
    }

    fn process_consensus_output(&self, output: ConsensusOutput) {
        let block = self.generate_block(output.txs, output.time);
        if block.height() != output.height {
            warn!(
                block = block.height(),
                output = output.height,
                "generated block does not match consensus height"
            );
            return;
        }
        self.process_block(block, true);
    }

    /// Forms the next block from ordered transactions: current tip hash,
    /// height + 1, constant nonce, Merkle root filled by the ledger.
    pub fn generate_block(&self, txs: Vec<Transaction>, time: u32) -> Block {
        let current = self.current_header.read();
        let header = BlockHeader::new(current.hash(), H256::NIL, time, current.height + 1, BLOCK_NONCE);
        Block::new(header, txs)
    }

    /// Appends a block extending the current tip; returns false when the
    /// block does not link to it.
    pub fn process_block(&self, block: Block, pack: bool) -> bool {
        let mut current = self.current_header.write();
        if block.previous_hash() != current.hash() {
            warn!(
                height = block.height(),
                previous = %block.previous_hash(),
                tip = %current.hash(),
                "block does not extend the current tip"
            );
            return false;
        }

        match self.ledger.append_block(block, pack) {
            Ok(committed) => {
                info!(
                    height = committed.height(),
                    hash = %committed.hash(),
                    txs = committed.transactions.len(),
                    "new block"
                );
                *current = committed.header.clone();
                drop(current);
                self.network.relay(Inventory::Block(committed));
                true
            }
            Err(e) => {
                error!(error = %e, "append block failed");
                false
            }
        }
    }
}
