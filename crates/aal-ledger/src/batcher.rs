use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

use aal_anchor::{AnchorCallback, AnchorReport};
use aal_crypto::MerkleTree;
use aal_store::RecoveredState;
use aal_types::Digest;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::records::{Batch, Entry};
use crate::state::Shared;

/// Work sent from the ledger handle to the batcher.
pub(crate) enum Command {
    Append(Entry),
    /// Seal the open batch now; replies with its id, or `None` if empty.
    Commit(oneshot::Sender<Option<u64>>),
    /// Store the latest version of a sealed batch.
    Persist(u64),
}

/// Sole owner of the open batch, its accumulator and the batch counter.
pub(crate) struct Batcher {
    shared: Arc<Shared>,
    rx: mpsc::Receiver<Command>,
    next_batch_id: u64,
    open: Vec<Entry>,
    tree: MerkleTree,
    /// Every hash accepted so far, sealed or open.
    seen: HashSet<Digest>,
    last_entry_at: Option<Instant>,
}

impl Batcher {
    pub fn new(shared: Arc<Shared>, rx: mpsc::Receiver<Command>, recovered: &RecoveredState) -> Self {
        let mut seen: HashSet<Digest> = recovered
            .batches
            .iter()
            .flat_map(|b| b.entry_hashes.iter().copied())
            .collect();
        let mut tree = MerkleTree::new();
        for entry in &recovered.pending {
            seen.insert(entry.hash);
            tree.add_leaf(entry.hash.as_bytes());
        }
        let open = recovered.pending.clone();
        let last_entry_at = (!open.is_empty()).then(Instant::now);

        Self {
            shared,
            rx,
            next_batch_id: recovered.last_batch_id + 1,
            open,
            tree,
            seen,
            last_entry_at,
        }
    }

    pub async fn run(mut self) {
        let idle_flush = self.shared.config.idle_flush();
        debug!(next_batch_id = self.next_batch_id, open = self.open.len(), "batcher started");

        loop {
            let deadline = self.last_entry_at.map(|at| at + idle_flush);
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Append(entry)) => self.append(entry).await,
                    Some(Command::Commit(reply)) => {
                        let batch_id = self.commit().await;
                        let _ = reply.send(batch_id);
                    }
                    Some(Command::Persist(batch_id)) => {
                        self.shared.persist(batch_id).await;
                    }
                    None => break,
                },
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    debug!(entries = self.open.len(), "idle flush");
                    self.commit().await;
                }
            }
        }

        // Ingest closed and drained.
        if let Some(batch_id) = self.commit().await {
            info!(batch_id, "flushed partial batch on stop");
        }
        debug!("batcher stopped");
    }

    async fn append(&mut self, entry: Entry) {
        if !self.seen.insert(entry.hash) {
            debug!(entry = %entry.hash.short_hex(), "duplicate entry dropped");
            self.shared.write().duplicates_dropped += 1;
            return;
        }

        match self.shared.store.save_pending(&entry).await {
            Ok(()) => self.shared.write().record_write(None),
            Err(e) => {
                warn!(entry = %entry.hash.short_hex(), error = %e, "failed to journal pending entry");
                self.shared.write().record_journal_failure(e.to_string());
            }
        }

        self.tree.add_leaf(entry.hash.as_bytes());
        self.shared.write().accept(entry.clone());
        self.open.push(entry);
        self.last_entry_at = Some(Instant::now());

        if self.open.len() >= self.shared.config.batch_size {
            self.commit().await;
        }
    }

    /// Seal the open batch: root, proofs, persist, publish, queue anchoring.
    async fn commit(&mut self) -> Option<u64> {
        if self.open.is_empty() {
            return None;
        }
        let batch_id = self.next_batch_id;
        self.next_batch_id += 1;
        self.last_entry_at = None;

        let tree = std::mem::take(&mut self.tree);
        let root_hash = tree.root();
        let mut entries = std::mem::take(&mut self.open);
        for (index, entry) in entries.iter_mut().enumerate() {
            let proof = tree.proof(index).expect("accumulator holds one leaf per open entry");
            entry.seal(batch_id, proof);
        }
        let mut batch = Batch::sealed(batch_id, root_hash, entries);
        let entry_count = batch.len();

        // A batch no tier accepts stays in memory and is retried after the
        // next successful write.
        let saved = match self.shared.store.save_batch(&batch.to_record()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(batch_id, error = %e, "batch held in memory only; persistence degraded");
                self.shared.write().record_write_failure(e.to_string());
                false
            }
        };
        batch.persisted = saved;
        self.shared.write().publish(batch);
        info!(batch_id, entries = entry_count, root = %root_hash.short_hex(), "batch committed");

        if saved {
            let recovered = self.shared.flush_unsaved().await;
            if recovered > 0 {
                info!(batches = recovered, "stored batches held back by earlier failures");
            }
        }
        queue_anchor(&self.shared, batch_id, root_hash, entry_count);
        Some(batch_id)
    }
}

/// Hand a sealed root to the dispatcher. A full queue defers anchoring; the
/// root is already sealed and stored.
pub(crate) fn queue_anchor(shared: &Arc<Shared>, batch_id: u64, root_hash: Digest, entry_count: usize) {
    let metadata = BTreeMap::from([("entryCount".to_string(), entry_count.to_string())]);
    let callback = anchor_callback(Arc::downgrade(shared));
    if !shared
        .dispatcher
        .anchor_async(root_hash, batch_id, metadata, Some(callback))
    {
        warn!(batch_id, "anchoring deferred");
        shared.write().record_deferred();
    }
}

/// Runs on a dispatcher worker: record the round and ask the batcher to
/// store the updated batch.
fn anchor_callback(shared: Weak<Shared>) -> AnchorCallback {
    Box::new(move |report: &AnchorReport| {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let Some(status) = shared.write().record_anchor(report) else {
            debug!(batch_id = report.batch_id, "anchor result for unknown batch ignored");
            return;
        };
        if report.is_success() {
            info!(batch_id = report.batch_id, %status, "batch anchored");
        } else {
            warn!(
                batch_id = report.batch_id,
                error = report.outcome.error.as_deref().unwrap_or("unknown"),
                "batch anchoring failed"
            );
        }

        // Queue full or closed: the batch stays unsaved and is picked up by
        // the next flush.
        if let Some(sender) = shared.sender() {
            if sender.try_send(Command::Persist(report.batch_id)).is_err() {
                debug!(batch_id = report.batch_id, "anchor results will be stored on next flush");
            }
        }
    })
}
