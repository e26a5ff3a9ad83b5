//! Optional post-commit mirror tap.
//!
//! The mirror receives the same write-batch list that was committed to
//! storage and forwards it to a document-store sink on its own thread.
//! Publishing never blocks the commit path: a full channel drops the batch
//! with a warning. When the sink fails, the offending batch is persisted to
//! a numbered file in the configured exception directory and the mirror
//! transitions to drop-with-warning mode.

use crossbeam_channel::{bounded, Sender, TrySendError};
use lattice_storage::{cf, decode_composite_key, WriteOp};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// One re-keyed entry handed to the sink.
#[derive(Debug, Clone, Serialize)]
pub struct MirrorEntry {
    /// Target collection; contract-state entries are re-keyed to
    /// `contract|<address>` with the bare state key.
    pub collection: String,
    /// `true` for put, `false` for delete.
    pub is_put: bool,
    /// Entry key (hex).
    pub key: String,
    /// Entry value (hex, empty for deletes).
    pub value: String,
}

/// A document-store sink receiving committed batches.
pub trait MirrorSink: Send + 'static {
    /// Applies one batch; an error switches the mirror to drop mode.
    fn apply(&mut self, entries: &[MirrorEntry]) -> std::result::Result<(), String>;
}

/// The non-blocking mirror tap.
pub struct Mirror {
    sender: Sender<Vec<WriteOp>>,
}

impl Mirror {
    /// Spawns the mirror thread around a sink.
    pub fn spawn<S: MirrorSink>(mut sink: S, exception_dir: PathBuf) -> Self {
        let (sender, receiver) = bounded::<Vec<WriteOp>>(64);

        std::thread::Builder::new()
            .name("ledger-mirror".to_string())
            .spawn(move || {
                let mut dropped_mode = false;
                let mut exception_seq = 0u64;
                while let Ok(ops) = receiver.recv() {
                    if dropped_mode {
                        warn!(ops = ops.len(), "mirror in drop mode, batch discarded");
                        continue;
                    }
                    let entries = reorg_batches(&ops);
                    if let Err(message) = sink.apply(&entries) {
                        error!(error = %message, "mirror sink failed");
                        if let Err(io) =
                            persist_exception(&exception_dir, exception_seq, &entries)
                        {
                            error!(error = %io, "cannot persist failing mirror batch");
                        }
                        exception_seq += 1;
                        dropped_mode = true;
                    }
                }
                info!("mirror stopped");
            })
            .expect("mirror thread spawn");

        Self { sender }
    }

    /// Publishes a committed batch; never blocks.
    pub fn publish(&self, ops: &[WriteOp]) {
        match self.sender.try_send(ops.to_vec()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("mirror backlog full, batch dropped"),
            Err(TrySendError::Disconnected(_)) => warn!("mirror stopped, batch dropped"),
        }
    }
}

/// Re-keys contract-state entries to per-contract collections; everything
/// else keeps its column family as the collection name.
fn reorg_batches(ops: &[WriteOp]) -> Vec<MirrorEntry> {
    ops.iter()
        .map(|op| {
            let (collection, key) = match op {
                WriteOp::Put { cf: name, key, .. } | WriteOp::Delete { cf: name, key } => {
                    if *name == cf::SCONTRACT {
                        match decode_composite_key(key) {
                            Ok((namespace, state_key)) => {
                                (format!("contract|{namespace}"), state_key.into_bytes())
                            }
                            Err(_) => ((*name).to_string(), key.clone()),
                        }
                    } else {
                        ((*name).to_string(), key.clone())
                    }
                }
            };
            let (is_put, value) = match op {
                WriteOp::Put { value, .. } => (true, hex::encode(value)),
                WriteOp::Delete { .. } => (false, String::new()),
            };
            MirrorEntry {
                collection,
                is_put,
                key: hex::encode(key),
                value,
            }
        })
        .collect()
}

fn persist_exception(
    dir: &PathBuf,
    seq: u64,
    entries: &[MirrorEntry],
) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(seq.to_string());
    let body = serde_json::to_vec_pretty(entries)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    struct FailingSink {
        calls: Arc<Mutex<usize>>,
    }

    impl MirrorSink for FailingSink {
        fn apply(&mut self, _entries: &[MirrorEntry]) -> std::result::Result<(), String> {
            *self.calls.lock() += 1;
            Err("sink down".to_string())
        }
    }

    #[test]
    fn failing_sink_persists_batch_and_enters_drop_mode() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(Mutex::new(0));
        let mirror = Mirror::spawn(
            FailingSink {
                calls: Arc::clone(&calls),
            },
            dir.path().to_path_buf(),
        );

        let ops = vec![WriteOp::put(cf::BALANCE, b"k".to_vec(), b"v".to_vec())];
        mirror.publish(&ops);
        mirror.publish(&ops);

        std::thread::sleep(Duration::from_millis(200));
        // only the first batch reaches the sink; the exception file exists
        assert_eq!(*calls.lock(), 1);
        assert!(dir.path().join("0").exists());
    }

    #[test]
    fn contract_entries_are_rekeyed() {
        let ckey = lattice_storage::encode_composite_key("0xabc", "color");
        let ops = vec![WriteOp::put(cf::SCONTRACT, ckey, b"green".to_vec())];
        let entries = reorg_batches(&ops);
        assert_eq!(entries[0].collection, "contract|0xabc");
        assert_eq!(entries[0].key, hex::encode(b"color"));
    }
}
