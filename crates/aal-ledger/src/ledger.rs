use std::collections::BTreeMap;
use std::sync::Arc;

use aal_anchor::{AnchorManager, BackendHealth, BackendRegistry};
use aal_crypto::{verify_inclusion, MerkleProof};
use aal_store::{DurableStore, KeyValueStore, RecoveredState};
use aal_types::Digest;
use chrono::NaiveDate;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::batcher::{queue_anchor, Batcher, Command};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};
use crate::metrics::DailyMetrics;
use crate::records::{Batch, Entry, Record};
use crate::state::{LedgerView, Shared};
use crate::stats::{LedgerState, LedgerStats};

/// The audit ledger.
///
/// `add_entry` hashes a record and hands it to a background batcher; it
/// never waits on storage or anchoring. The batcher seals batches into a
/// Merkle accumulator, persists them, and queues each root with the anchor
/// dispatcher. Queries read a shared snapshot and never block the batcher
/// for longer than a copy.
pub struct AuditLedger {
    shared: Arc<Shared>,
    /// Serializes start, stop and reset.
    batcher: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl AuditLedger {
    pub fn new(config: LedgerConfig, store: Arc<dyn DurableStore>, dispatcher: AnchorManager) -> LedgerResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared::new(config, store, dispatcher)),
            batcher: tokio::sync::Mutex::new(None),
        })
    }

    /// Build storage tiers and anchor backends from configuration, with `kv`
    /// as the primary storage tier.
    ///
    /// Opening a local chain file that fails its integrity check is an
    /// error here.
    pub fn from_config(
        config: LedgerConfig,
        kv: Arc<dyn KeyValueStore>,
        registry: &BackendRegistry,
    ) -> LedgerResult<Self> {
        config.validate()?;
        let store = config.storage.build(kv)?;
        let dispatcher = AnchorManager::from_config(config.anchoring.clone(), registry)?;
        Self::new(config, store, dispatcher)
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.shared.config
    }

    pub fn state(&self) -> LedgerState {
        self.shared.state()
    }

    /// Recover durable state, start the dispatcher and the batcher.
    ///
    /// A stored batch whose root does not rebuild from its entry hashes
    /// aborts startup with [`LedgerError::CorruptState`].
    pub async fn start(&self) -> LedgerResult<()> {
        let mut batcher = self.batcher.lock().await;
        let state = self.shared.state();
        if state != LedgerState::Stopped {
            return Err(LedgerError::AlreadyStarted(state));
        }
        self.shared.set_state(LedgerState::Starting);

        let recovered = match self.recover().await {
            Ok(recovered) => recovered,
            Err(e) => {
                error!(error = %e, "ledger failed to start");
                self.shared.set_state(LedgerState::Stopped);
                return Err(e);
            }
        };
        *self.shared.write() = LedgerView::from_recovered(&recovered);

        self.shared.dispatcher.start();
        let (tx, rx) = mpsc::channel(self.shared.config.ingest_capacity);
        let task = Batcher::new(Arc::clone(&self.shared), rx, &recovered);
        *batcher = Some(tokio::spawn(task.run()));
        self.shared.open_ingest(tx);
        self.shared.set_state(LedgerState::Running);

        let requeued = self.requeue_unanchored();
        info!(
            batches = recovered.batches.len(),
            pending = recovered.pending.len(),
            last_batch_id = recovered.last_batch_id,
            requeued,
            "ledger started"
        );
        Ok(())
    }

    async fn recover(&self) -> LedgerResult<RecoveredState> {
        let recovered = self.shared.store.load().await?;
        for batch in &recovered.batches {
            batch.validate()?;
        }
        Ok(recovered)
    }

    /// Queue anchoring for recovered batches that never got an anchoring
    /// round (deferred, or interrupted by a restart).
    fn requeue_unanchored(&self) -> usize {
        let backlog: Vec<(u64, Digest, usize)> = self
            .shared
            .read()
            .batches
            .values()
            .filter(|b| b.anchor_results.is_empty())
            .map(|b| (b.batch_id, b.root_hash, b.len()))
            .collect();
        for (batch_id, root_hash, entry_count) in &backlog {
            queue_anchor(&self.shared, *batch_id, *root_hash, *entry_count);
        }
        backlog.len()
    }

    /// Accept a record and return its entry hash.
    ///
    /// Fails only when the ledger is not running or the ingest queue is
    /// full; storage and anchoring problems never surface here.
    pub fn add_entry(&self, record: Record) -> LedgerResult<Digest> {
        let entry = Entry::new(record)?;
        let hash = entry.hash;
        let sender = self.sender()?;
        sender.try_send(Command::Append(entry)).map_err(|e| match e {
            TrySendError::Full(_) => LedgerError::QueueFull {
                capacity: self.shared.config.ingest_capacity,
            },
            TrySendError::Closed(_) => LedgerError::NotRunning(self.shared.state()),
        })?;
        debug!(entry = %hash.short_hex(), "entry accepted");
        Ok(hash)
    }

    /// Seal the open batch now. Entries added before this call are
    /// included. Returns `None` when the open batch was empty.
    pub async fn force_commit(&self) -> LedgerResult<Option<u64>> {
        let sender = self.sender()?;
        let (reply, response) = oneshot::channel();
        if sender.send(Command::Commit(reply)).await.is_err() {
            return Err(LedgerError::NotRunning(self.shared.state()));
        }
        response
            .await
            .map_err(|_| LedgerError::NotRunning(self.shared.state()))
    }

    /// Check that `entry_hash` is committed under `root_hash` via `proof`.
    ///
    /// Unknown entries, a root other than the entry's batch root, and
    /// malformed proofs all yield `false`.
    pub fn verify_entry(&self, entry_hash: &Digest, proof: &MerkleProof, root_hash: &Digest) -> bool {
        let batch_root = self.shared.read().batch_of(entry_hash).map(|b| b.root_hash);
        match batch_root {
            None => {
                debug!(entry = %entry_hash.short_hex(), "verification failed: entry not committed");
                false
            }
            Some(root) if root != *root_hash => {
                debug!(entry = %entry_hash.short_hex(), "verification failed: root is not the entry's batch root");
                false
            }
            Some(_) => {
                let valid = proof.verify_record(entry_hash.as_bytes(), root_hash);
                if !valid {
                    debug!(entry = %entry_hash.short_hex(), "verification failed: proof does not reach root");
                }
                valid
            }
        }
    }

    /// Stateless check of raw leaf bytes against a proof path and root.
    pub fn verify_leaf(&self, leaf_bytes: &[u8], proof: &MerkleProof, root_hash: &Digest) -> bool {
        verify_inclusion(leaf_bytes, &proof.path, root_hash)
    }

    pub fn get_batch(&self, batch_id: u64) -> Option<Batch> {
        self.shared.read().batches.get(&batch_id).cloned()
    }

    pub fn get_batch_root(&self, batch_id: u64) -> Option<Digest> {
        self.shared.read().batches.get(&batch_id).map(|b| b.root_hash)
    }

    /// A committed or still-open entry.
    pub fn get_entry(&self, entry_hash: &Digest) -> Option<Entry> {
        self.shared.read().entry(entry_hash).cloned()
    }

    pub fn get_ledger_stats(&self) -> LedgerStats {
        let mut stats = self.shared.read().stats(self.shared.state());
        stats.dispatcher = self.shared.dispatcher.stats();
        stats
    }

    pub fn get_metrics_for_date(&self, tenant: &str, date: NaiveDate) -> DailyMetrics {
        let sample = {
            let view = self.shared.read();
            DailyMetrics::select(tenant, date, view.batches.values(), &view.pending)
        };
        DailyMetrics::from_sample(tenant, date, sample)
    }

    /// Per-backend circuit state, liveness and recent results.
    pub async fn anchor_health(&self) -> BTreeMap<String, BackendHealth> {
        self.shared.dispatcher.health_check().await
    }

    /// Drain the ingest queue, flush the partial batch, stop the dispatcher
    /// and store any batch whose latest version is not yet saved. Waits at
    /// most `stop_grace` for background work, then aborts it.
    pub async fn stop(&self) {
        let mut batcher = self.batcher.lock().await;
        if self.shared.state() != LedgerState::Running {
            return;
        }
        self.shared.set_state(LedgerState::Stopping);

        let grace = self.shared.config.stop_grace();
        let deadline = tokio::time::Instant::now() + grace;
        self.shared.close_ingest();
        if let Some(mut handle) = batcher.take() {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                warn!(?grace, "batcher did not drain within grace period; aborting");
                handle.abort();
            }
        }
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        self.shared.dispatcher.stop(remaining).await;

        let flushed = self.shared.flush_unsaved().await;
        if flushed > 0 {
            debug!(batches = flushed, "stored late anchor results");
        }
        self.shared.set_state(LedgerState::Stopped);
        info!("ledger stopped");
    }

    /// Test-only: abort background work without draining and drop all
    /// in-memory state. Durable storage is left alone; a later `start`
    /// reloads from it.
    pub async fn reset_for_testing(&self) {
        let mut batcher = self.batcher.lock().await;
        self.shared.close_ingest();
        if let Some(handle) = batcher.take() {
            handle.abort();
            let _ = handle.await;
        }
        self.shared.dispatcher.shutdown_now().await;
        *self.shared.write() = LedgerView::default();
        self.shared.set_state(LedgerState::Stopped);
        warn!("ledger reset; in-memory state cleared");
    }

    fn sender(&self) -> LedgerResult<mpsc::Sender<Command>> {
        self.shared
            .sender()
            .ok_or_else(|| LedgerError::NotRunning(self.shared.state()))
    }
}

impl Drop for AuditLedger {
    fn drop(&mut self) {
        // The batcher holds the shared state; closing its queue lets it
        // flush and exit.
        self.shared.close_ingest();
    }
}

impl std::fmt::Debug for AuditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLedger")
            .field("state", &self.shared.state())
            .field("store", &self.shared.store.name())
            .field("backends", &self.shared.dispatcher.backend_ids())
            .finish()
    }
}
