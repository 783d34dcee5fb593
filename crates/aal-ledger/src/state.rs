use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use aal_anchor::{AnchorManager, AnchorReport};
use aal_store::{DurableStore, RecoveredState};
use aal_types::{AnchorStatus, Digest};
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::warn;

use crate::batcher::Command;
use crate::config::LedgerConfig;
use crate::records::{Batch, Entry};
use crate::stats::{AnchorStats, LedgerState, LedgerStats, PersistenceStats, RollingWindow};

/// State shared by the ledger handle, the batcher task and anchor
/// callbacks.
pub(crate) struct Shared {
    pub config: LedgerConfig,
    pub store: Arc<dyn DurableStore>,
    pub dispatcher: AnchorManager,
    view: RwLock<LedgerView>,
    lifecycle: RwLock<LedgerState>,
    /// Sending half of the batcher queue; `None` while not running.
    ingest: Mutex<Option<mpsc::Sender<Command>>>,
}

impl Shared {
    pub fn new(config: LedgerConfig, store: Arc<dyn DurableStore>, dispatcher: AnchorManager) -> Self {
        Self {
            config,
            store,
            dispatcher,
            view: RwLock::new(LedgerView::default()),
            lifecycle: RwLock::new(LedgerState::Stopped),
            ingest: Mutex::new(None),
        }
    }

    pub fn sender(&self) -> Option<mpsc::Sender<Command>> {
        self.ingest.lock().expect("ingest lock poisoned").clone()
    }

    pub fn open_ingest(&self, sender: mpsc::Sender<Command>) {
        *self.ingest.lock().expect("ingest lock poisoned") = Some(sender);
    }

    /// Drop the sending half so the batcher drains and exits.
    pub fn close_ingest(&self) {
        drop(self.ingest.lock().expect("ingest lock poisoned").take());
    }

    pub fn read(&self) -> RwLockReadGuard<'_, LedgerView> {
        self.view.read().expect("ledger view lock poisoned")
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, LedgerView> {
        self.view.write().expect("ledger view lock poisoned")
    }

    pub fn state(&self) -> LedgerState {
        *self.lifecycle.read().expect("lifecycle lock poisoned")
    }

    pub fn set_state(&self, state: LedgerState) {
        *self.lifecycle.write().expect("lifecycle lock poisoned") = state;
    }

    /// Save the current version of a sealed batch.
    pub async fn persist(&self, batch_id: u64) -> bool {
        let Some(record) = self.read().batches.get(&batch_id).map(Batch::to_record) else {
            return true;
        };
        let version = record.anchor_results.len();
        match self.store.save_batch(&record).await {
            Ok(()) => {
                self.write().record_write(Some((batch_id, version)));
                true
            }
            Err(e) => {
                warn!(batch_id, error = %e, "failed to persist batch");
                self.write().record_write_failure(e.to_string());
                false
            }
        }
    }

    /// Save every batch whose stored copy is missing or stale. Stops at the
    /// first failure.
    pub async fn flush_unsaved(&self) -> usize {
        let ids = self.read().unsaved();
        let mut saved = 0;
        for batch_id in ids {
            if !self.persist(batch_id).await {
                break;
            }
            saved += 1;
        }
        saved
    }
}

/// Read side of the ledger: everything queries are answered from.
///
/// Written only by the batcher (entries, batches) and by anchor callbacks
/// (anchor bookkeeping); readers take short snapshots.
#[derive(Default)]
pub(crate) struct LedgerView {
    pub batches: BTreeMap<u64, Batch>,
    /// Sealed entry hash -> batch id.
    index: HashMap<Digest, u64>,
    /// The open batch, in arrival order.
    pub pending: Vec<Entry>,
    pub duplicates_dropped: u64,
    /// Batches whose anchor bookkeeping changed since they were stored.
    dirty: BTreeSet<u64>,
    anchor: AnchorStats,
    window: RollingWindow,
    failed_writes: u64,
    /// A pending-entry write failed and nothing has been written since.
    journal_degraded: bool,
    last_store_error: Option<String>,
}

impl LedgerView {
    pub fn from_recovered(state: &RecoveredState) -> Self {
        let mut view = Self::default();
        for record in &state.batches {
            view.publish(Batch::from_record(record.clone()));
        }
        view.pending = state.pending.clone();
        view
    }

    pub fn accept(&mut self, entry: Entry) {
        self.pending.push(entry);
    }

    /// Make a sealed batch visible and retire its entries from the open
    /// batch.
    pub fn publish(&mut self, batch: Batch) {
        for hash in &batch.entry_hashes {
            self.index.insert(*hash, batch.batch_id);
        }
        self.pending.retain(|e| !batch.entry_hashes.contains(&e.hash));
        self.batches.insert(batch.batch_id, batch);
    }

    pub fn entry(&self, hash: &Digest) -> Option<&Entry> {
        match self.index.get(hash) {
            Some(batch_id) => self.batches.get(batch_id)?.entry(hash),
            None => self.pending.iter().find(|e| e.hash == *hash),
        }
    }

    pub fn batch_of(&self, hash: &Digest) -> Option<&Batch> {
        self.batches.get(self.index.get(hash)?)
    }

    /// Record a finished anchoring round. Returns the batch's new status,
    /// or `None` for an unknown batch.
    pub fn record_anchor(&mut self, report: &AnchorReport) -> Option<AnchorStatus> {
        self.window.push(report.is_success());
        if report.is_success() {
            self.anchor.last_anchored_at = Some(report.outcome.completed_at.unwrap_or_else(Utc::now));
        } else {
            self.anchor.failed_rounds += 1;
            self.anchor.last_error = report.outcome.error.clone();
        }

        let batch = self.batches.get_mut(&report.batch_id)?;
        let was_anchored = batch.is_anchored();
        let results = if report.results.is_empty() {
            std::slice::from_ref(&report.outcome)
        } else {
            report.results.as_slice()
        };
        batch.record_anchor(results);
        if batch.is_anchored() && !was_anchored {
            self.anchor.anchored_batches += 1;
        }
        let status = batch.anchor_status;
        self.dirty.insert(report.batch_id);
        Some(status)
    }

    pub fn record_deferred(&mut self) {
        self.anchor.deferred_batches += 1;
    }

    /// A write succeeded. For a batch, `version` is the number of anchor
    /// results the stored copy carries.
    pub fn record_write(&mut self, batch: Option<(u64, usize)>) {
        self.journal_degraded = false;
        let Some((batch_id, version)) = batch else {
            return;
        };
        if let Some(batch) = self.batches.get_mut(&batch_id) {
            batch.persisted = true;
            if batch.anchor_results.len() == version {
                self.dirty.remove(&batch_id);
            }
        }
    }

    pub fn record_write_failure(&mut self, error: String) {
        self.failed_writes += 1;
        self.last_store_error = Some(error);
    }

    pub fn record_journal_failure(&mut self, error: String) {
        self.record_write_failure(error);
        self.journal_degraded = true;
    }

    /// Ids of sealed batches with no stored copy or a stale one, ascending.
    pub fn unsaved(&self) -> Vec<u64> {
        self.batches
            .values()
            .filter(|b| !b.persisted || self.dirty.contains(&b.batch_id))
            .map(|b| b.batch_id)
            .collect()
    }

    pub fn stats(&self, state: LedgerState) -> LedgerStats {
        let committed: u64 = self.batches.values().map(|b| b.len() as u64).sum();
        let unpersisted = self.batches.values().filter(|b| !b.persisted).count() as u64;
        let unanchored = self.batches.values().filter(|b| !b.is_anchored()).count() as u64;
        let last = self.batches.values().next_back();

        LedgerStats {
            state,
            entry_count: committed + self.pending.len() as u64,
            pending_entries: self.pending.len() as u64,
            batch_count: self.batches.len() as u64,
            last_batch_id: last.map_or(0, |b| b.batch_id),
            current_root_hash: last.map(|b| b.root_hash),
            duplicates_dropped: self.duplicates_dropped,
            anchor_stats: AnchorStats {
                unanchored_batches: unanchored,
                recent_success_rate: self.window.success_rate(),
                ..self.anchor.clone()
            },
            persistence: PersistenceStats {
                degraded: unpersisted > 0 || self.journal_degraded,
                failed_writes: self.failed_writes,
                unpersisted_batches: unpersisted,
                last_error: self.last_store_error.clone(),
            },
            dispatcher: Default::default(),
        }
    }
}
