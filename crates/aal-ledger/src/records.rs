use aal_types::{AnchorResult, AnchorStatus, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aal_store::BatchRecord;
pub use aal_store::{Entry, Record};

/// A sealed batch as the ledger serves it.
///
/// The accumulator root and the entries (each carrying its batch id and
/// inclusion proof) never change after commit; only the anchor bookkeeping
/// and the `persisted` flag do.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub batch_id: u64,
    pub root_hash: Digest,
    /// Merkle leaves, in arrival order.
    pub entry_hashes: Vec<Digest>,
    pub entries: Vec<Entry>,
    pub created_at: DateTime<Utc>,
    pub anchor_results: Vec<AnchorResult>,
    pub anchor_status: AnchorStatus,
    /// Whether some storage tier holds the latest version of this batch.
    pub persisted: bool,
}

impl Batch {
    /// A freshly committed batch. `entries` must already be sealed.
    pub fn sealed(batch_id: u64, root_hash: Digest, entries: Vec<Entry>) -> Self {
        Self {
            batch_id,
            root_hash,
            entry_hashes: entries.iter().map(|e| e.hash).collect(),
            entries,
            created_at: Utc::now(),
            anchor_results: Vec::new(),
            anchor_status: AnchorStatus::Pending,
            persisted: false,
        }
    }

    /// Rehydrate a batch recovered from storage.
    pub fn from_record(record: BatchRecord) -> Self {
        let anchor_status = summarize(&record.anchor_results);
        Self {
            batch_id: record.batch_id,
            root_hash: record.root_hash,
            entry_hashes: record.entry_hashes,
            entries: record.entries,
            created_at: record.timestamp,
            anchor_results: record.anchor_results,
            anchor_status,
            persisted: true,
        }
    }

    pub fn to_record(&self) -> BatchRecord {
        BatchRecord {
            batch_id: self.batch_id,
            root_hash: self.root_hash,
            entry_hashes: self.entry_hashes.clone(),
            timestamp: self.created_at,
            anchor_results: self.anchor_results.clone(),
            entries: self.entries.clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.entry_hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entry_hashes.is_empty()
    }

    pub fn entry(&self, hash: &Digest) -> Option<&Entry> {
        self.entries.iter().find(|e| e.hash == *hash)
    }

    /// Attach the results of one anchoring round.
    pub fn record_anchor(&mut self, results: &[AnchorResult]) {
        self.anchor_results.extend_from_slice(results);
        self.anchor_status = summarize(&self.anchor_results);
    }

    pub fn is_anchored(&self) -> bool {
        self.anchor_status.is_success()
    }
}

/// Best status across all results: a confirmation beats a submission,
/// which beats a failure.
fn summarize(results: &[AnchorResult]) -> AnchorStatus {
    let mut status = AnchorStatus::Pending;
    for result in results {
        status = match (status, result.status) {
            (AnchorStatus::Confirmed, _) | (_, AnchorStatus::Confirmed) => AnchorStatus::Confirmed,
            (AnchorStatus::Submitted, _) | (_, AnchorStatus::Submitted) => AnchorStatus::Submitted,
            (_, AnchorStatus::Failed) | (AnchorStatus::Failed, _) => AnchorStatus::Failed,
            _ => AnchorStatus::Pending,
        };
    }
    status
}
