use std::collections::{BTreeMap, HashSet};

use aal_crypto::{canonical_json, ContentHasher, MerkleProof, MerkleTree};
use aal_types::{AnchorResult, Digest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// A caller-supplied audit record (e.g. one validation outcome).
///
/// The ledger never interprets `payload`. `tenant`, `kind` and `outcome` are
/// broken out so read-side aggregations do not have to parse it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub tenant: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl Record {
    /// Create a record stamped with the current time.
    pub fn new(
        tenant: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            kind: kind.into(),
            outcome: None,
            payload,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.outcome = Some(outcome.into());
        self
    }

    pub fn with_occurred_at(mut self, at: DateTime<Utc>) -> Self {
        self.occurred_at = at;
        self
    }

    /// Deterministic serialization: canonical JSON with sorted keys.
    pub fn canonical_bytes(&self) -> StoreResult<Vec<u8>> {
        canonical_json(self).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Content hash of the canonical serialization.
    pub fn content_hash(&self) -> StoreResult<Digest> {
        Ok(ContentHasher::RECORD.hash(&self.canonical_bytes()?))
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// A record plus its content hash, and once committed, its batch id and
/// inclusion proof.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub hash: Digest,
    pub record: Record,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub batch_id: Option<u64>,
    #[serde(default)]
    pub proof: Option<MerkleProof>,
}

impl Entry {
    /// Wrap a record, computing its content hash.
    pub fn new(record: Record) -> StoreResult<Self> {
        Ok(Self {
            hash: record.content_hash()?,
            record,
            created_at: Utc::now(),
            batch_id: None,
            proof: None,
        })
    }

    /// Assign the batch id and proof. Happens exactly once, at commit.
    pub fn seal(&mut self, batch_id: u64, proof: MerkleProof) {
        debug_assert!(self.batch_id.is_none(), "entry sealed twice");
        self.batch_id = Some(batch_id);
        self.proof = Some(proof);
    }

    pub fn is_committed(&self) -> bool {
        self.batch_id.is_some()
    }
}

// ---------------------------------------------------------------------------
// BatchRecord
// ---------------------------------------------------------------------------

/// Persisted form of a sealed batch.
///
/// Layout: `{batchId, rootHash, entryHashes[], timestamp, anchorResults[],
/// entries[]}`. The Merkle leaves are the entry hashes in arrival order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRecord {
    pub batch_id: u64,
    pub root_hash: Digest,
    pub entry_hashes: Vec<Digest>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub anchor_results: Vec<AnchorResult>,
    #[serde(default)]
    pub entries: Vec<Entry>,
}

impl BatchRecord {
    /// Root obtained by rebuilding the accumulator from `entry_hashes`.
    pub fn recompute_root(&self) -> Digest {
        MerkleTree::build(&self.entry_hashes).root()
    }

    /// Check that the stored root is reproducible and that the embedded
    /// entries line up with `entry_hashes`.
    pub fn validate(&self) -> StoreResult<()> {
        if self.entry_hashes.is_empty() {
            return Err(self.corrupt("batch has no entries"));
        }
        let recomputed = self.recompute_root();
        if recomputed != self.root_hash {
            return Err(self.corrupt(format!(
                "root mismatch: stored {}, recomputed {}",
                self.root_hash.short_hex(),
                recomputed.short_hex()
            )));
        }
        if !self.entries.is_empty() {
            if self.entries.len() != self.entry_hashes.len() {
                return Err(self.corrupt("entry list does not match entry hashes"));
            }
            for (entry, hash) in self.entries.iter().zip(&self.entry_hashes) {
                if entry.hash != *hash || entry.batch_id != Some(self.batch_id) {
                    return Err(self.corrupt(format!(
                        "entry {} is not sealed into this batch",
                        entry.hash.short_hex()
                    )));
                }
            }
        }
        Ok(())
    }

    fn corrupt(&self, reason: impl Into<String>) -> StoreError {
        StoreError::CorruptBatch {
            batch_id: self.batch_id,
            reason: reason.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// RecoveredState
// ---------------------------------------------------------------------------

/// Durable state handed back to the ledger at startup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecoveredState {
    /// Highest batch id ever issued (0 when none).
    pub last_batch_id: u64,
    /// Sealed batches, ordered by id.
    pub batches: Vec<BatchRecord>,
    /// Accepted entries not sealed into any batch, in arrival order.
    pub pending: Vec<Entry>,
}

impl RecoveredState {
    /// Build a normalized state: batches deduplicated by id (the later
    /// version wins), pending entries deduplicated and stripped of anything
    /// already sealed, cursor at least the highest batch id.
    pub fn from_parts(cursor: u64, batches: Vec<BatchRecord>, pending: Vec<Entry>) -> Self {
        let mut by_id: BTreeMap<u64, BatchRecord> = BTreeMap::new();
        for batch in batches {
            by_id.insert(batch.batch_id, batch);
        }

        let sealed: HashSet<Digest> = by_id
            .values()
            .flat_map(|b| b.entry_hashes.iter().copied())
            .collect();
        let mut seen = HashSet::new();
        let pending = pending
            .into_iter()
            .filter(|e| !sealed.contains(&e.hash) && seen.insert(e.hash))
            .collect();

        let last_batch_id = by_id.keys().next_back().copied().unwrap_or(0).max(cursor);
        Self {
            last_batch_id,
            batches: by_id.into_values().collect(),
            pending,
        }
    }

    /// Merge the state recovered from two storage tiers.
    ///
    /// For a batch present in both, the copy carrying more anchor results
    /// is kept (it is the more recent write). Two copies of one batch id
    /// with different roots are two different batches: that is corruption.
    pub fn merge(self, other: RecoveredState) -> StoreResult<Self> {
        let mut by_id: BTreeMap<u64, BatchRecord> = BTreeMap::new();
        for batch in self.batches.into_iter().chain(other.batches) {
            if let Some(existing) = by_id.get(&batch.batch_id) {
                if existing.root_hash != batch.root_hash {
                    return Err(StoreError::CorruptBatch {
                        batch_id: batch.batch_id,
                        reason: format!(
                            "storage tiers disagree on root ({} vs {})",
                            existing.root_hash.short_hex(),
                            batch.root_hash.short_hex()
                        ),
                    });
                }
                if existing.anchor_results.len() >= batch.anchor_results.len() {
                    continue;
                }
            }
            by_id.insert(batch.batch_id, batch);
        }

        let mut pending: Vec<Entry> = self.pending.into_iter().chain(other.pending).collect();
        pending.sort_by_key(|e| e.created_at);

        Ok(Self::from_parts(
            self.last_batch_id.max(other.last_batch_id),
            by_id.into_values().collect(),
            pending,
        ))
    }

    pub fn is_empty(&self) -> bool {
        self.last_batch_id == 0 && self.batches.is_empty() && self.pending.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn entry(seed: &str) -> Entry {
        Entry::new(Record::new("acme", "validation", serde_json::json!({ "seed": seed }))).unwrap()
    }

    pub(crate) fn sealed_batch(batch_id: u64, seeds: &[&str]) -> BatchRecord {
        let mut entries: Vec<Entry> = seeds.iter().map(|s| entry(s)).collect();
        let hashes: Vec<Digest> = entries.iter().map(|e| e.hash).collect();
        let tree = MerkleTree::build(&hashes);
        for (i, e) in entries.iter_mut().enumerate() {
            e.seal(batch_id, tree.proof(i).unwrap());
        }
        BatchRecord {
            batch_id,
            root_hash: tree.root(),
            entry_hashes: hashes,
            timestamp: Utc::now(),
            anchor_results: vec![],
            entries,
        }
    }

    #[test]
    fn record_hash_is_deterministic_and_content_sensitive() {
        let at = Utc::now();
        let a = Record::new("acme", "validation", serde_json::json!({"b": 1, "a": 2}))
            .with_occurred_at(at);
        let b = Record::new("acme", "validation", serde_json::json!({"a": 2, "b": 1}))
            .with_occurred_at(at);
        assert_eq!(a.content_hash().unwrap(), b.content_hash().unwrap());

        let c = a.clone().with_outcome("fail");
        assert_ne!(a.content_hash().unwrap(), c.content_hash().unwrap());
    }

    #[test]
    fn sealed_batch_validates() {
        let batch = sealed_batch(1, &["a", "b", "c"]);
        batch.validate().unwrap();
        assert_eq!(batch.recompute_root(), batch.root_hash);
    }

    #[test]
    fn tampered_root_is_corrupt() {
        let mut batch = sealed_batch(4, &["a", "b"]);
        batch.root_hash = Digest::of(b"forged");
        assert!(matches!(
            batch.validate(),
            Err(StoreError::CorruptBatch { batch_id: 4, .. })
        ));
    }

    #[test]
    fn reordered_entries_are_corrupt() {
        let mut batch = sealed_batch(2, &["a", "b"]);
        batch.entries.swap(0, 1);
        assert!(batch.validate().is_err());
    }

    #[test]
    fn from_parts_filters_sealed_pending() {
        let batch = sealed_batch(3, &["a", "b"]);
        let stray = entry("z");
        let mut already_sealed = batch.entries[0].clone();
        already_sealed.batch_id = None;
        already_sealed.proof = None;

        let state = RecoveredState::from_parts(
            1,
            vec![batch],
            vec![already_sealed, stray.clone(), stray.clone()],
        );
        assert_eq!(state.last_batch_id, 3);
        assert_eq!(state.pending, vec![stray]);
    }

    #[test]
    fn merge_unions_tiers() {
        let primary = RecoveredState::from_parts(2, vec![sealed_batch(1, &["a"]), sealed_batch(2, &["b"])], vec![]);
        let fallback = RecoveredState::from_parts(3, vec![sealed_batch(3, &["c"])], vec![entry("d")]);
        let merged = primary.merge(fallback).unwrap();
        assert_eq!(merged.last_batch_id, 3);
        assert_eq!(
            merged.batches.iter().map(|b| b.batch_id).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(merged.pending.len(), 1);
    }

    #[test]
    fn merge_keeps_the_copy_with_more_anchor_results() {
        let stored = sealed_batch(1, &["a"]);
        let mut anchored = stored.clone();
        anchored
            .anchor_results
            .push(AnchorResult::pending(uuid::Uuid::nil(), "local", 1, stored.root_hash).succeed("tx-1".into(), true));
        let merged = RecoveredState::from_parts(1, vec![anchored], vec![])
            .merge(RecoveredState::from_parts(1, vec![stored], vec![]))
            .unwrap();
        assert_eq!(merged.batches[0].anchor_results.len(), 1);
    }

    #[test]
    fn merge_rejects_two_batches_under_one_id() {
        let primary = RecoveredState::from_parts(2, vec![sealed_batch(1, &["a"]), sealed_batch(2, &["b"])], vec![]);
        let fallback = RecoveredState::from_parts(1, vec![sealed_batch(1, &["c"])], vec![]);
        let err = primary.merge(fallback).unwrap_err();
        assert!(matches!(err, StoreError::CorruptBatch { batch_id: 1, .. }));
        assert!(err.is_corruption());
    }
}
