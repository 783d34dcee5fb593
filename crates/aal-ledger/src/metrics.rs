use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::records::{Batch, Entry};

/// Per-tenant aggregation of the entries recorded on one UTC day.
///
/// An entry belongs to the day of its record's `occurred_at`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetrics {
    pub tenant: String,
    pub date: NaiveDate,
    pub total_entries: u64,
    pub committed_entries: u64,
    pub pending_entries: u64,
    /// Committed entries whose batch has a successful anchor.
    pub anchored_entries: u64,
    pub by_kind: BTreeMap<String, u64>,
    /// Tallies by outcome label; entries without one count as `unlabeled`.
    pub by_outcome: BTreeMap<String, u64>,
    /// Batches holding at least one of the day's entries, ascending.
    pub batch_ids: Vec<u64>,
    pub first_occurred_at: Option<DateTime<Utc>>,
    pub last_occurred_at: Option<DateTime<Utc>>,
}

const UNLABELED: &str = "unlabeled";

/// Owned copy of the entries counted toward one tenant-day.
#[derive(Debug, Default)]
pub(crate) struct DaySample {
    /// `(batch id, batch anchored, entry)`, ascending by batch id.
    committed: Vec<(u64, bool, Entry)>,
    pending: Vec<Entry>,
}

fn on_day(entry: &Entry, tenant: &str, date: NaiveDate) -> bool {
    entry.record.tenant == tenant && entry.record.occurred_at.date_naive() == date
}

impl DailyMetrics {
    pub fn empty(tenant: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            tenant: tenant.into(),
            date,
            total_entries: 0,
            committed_entries: 0,
            pending_entries: 0,
            anchored_entries: 0,
            by_kind: BTreeMap::new(),
            by_outcome: BTreeMap::new(),
            batch_ids: Vec::new(),
            first_occurred_at: None,
            last_occurred_at: None,
        }
    }

    /// Copy out the entries of one tenant-day from sealed batches
    /// (ascending by id) and the open batch, so the aggregation can run
    /// after the ledger view lock is released.
    pub(crate) fn select<'a>(
        tenant: &str,
        date: NaiveDate,
        batches: impl IntoIterator<Item = &'a Batch>,
        pending: impl IntoIterator<Item = &'a Entry>,
    ) -> DaySample {
        let mut sample = DaySample::default();
        for batch in batches {
            let anchored = batch.is_anchored();
            sample.committed.extend(
                batch
                    .entries
                    .iter()
                    .filter(|e| on_day(e, tenant, date))
                    .map(|e| (batch.batch_id, anchored, e.clone())),
            );
        }
        sample
            .pending
            .extend(pending.into_iter().filter(|e| on_day(e, tenant, date)).cloned());
        sample
    }

    pub(crate) fn from_sample(tenant: &str, date: NaiveDate, sample: DaySample) -> Self {
        let mut metrics = Self::empty(tenant, date);
        for (batch_id, anchored, entry) in &sample.committed {
            metrics.observe(entry);
            metrics.committed_entries += 1;
            if *anchored {
                metrics.anchored_entries += 1;
            }
            if metrics.batch_ids.last() != Some(batch_id) {
                metrics.batch_ids.push(*batch_id);
            }
        }
        for entry in &sample.pending {
            metrics.observe(entry);
            metrics.pending_entries += 1;
        }
        metrics
    }

    fn observe(&mut self, entry: &Entry) {
        let record = &entry.record;
        self.total_entries += 1;
        *self.by_kind.entry(record.kind.clone()).or_default() += 1;
        let outcome = record.outcome.as_deref().unwrap_or(UNLABELED);
        *self.by_outcome.entry(outcome.to_string()).or_default() += 1;

        let at = record.occurred_at;
        self.first_occurred_at = Some(self.first_occurred_at.map_or(at, |first| first.min(at)));
        self.last_occurred_at = Some(self.last_occurred_at.map_or(at, |last| last.max(at)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aal_crypto::MerkleTree;
    use aal_types::AnchorResult;
    use chrono::TimeZone;

    use crate::records::Record;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
    }

    fn entry(tenant: &str, outcome: Option<&str>, when: DateTime<Utc>, seed: u32) -> Entry {
        let mut record = Record::new(tenant, "validation", serde_json::json!({ "seed": seed })).with_occurred_at(when);
        if let Some(o) = outcome {
            record = record.with_outcome(o);
        }
        Entry::new(record).unwrap()
    }

    fn collect<'a>(
        tenant: &str,
        date: NaiveDate,
        batches: impl IntoIterator<Item = &'a Batch>,
        pending: impl IntoIterator<Item = &'a Entry>,
    ) -> DailyMetrics {
        DailyMetrics::from_sample(tenant, date, DailyMetrics::select(tenant, date, batches, pending))
    }

    fn batch(batch_id: u64, mut entries: Vec<Entry>) -> Batch {
        let tree = MerkleTree::build(&entries.iter().map(|e| e.hash).collect::<Vec<_>>());
        for (i, e) in entries.iter_mut().enumerate() {
            e.seal(batch_id, tree.proof(i).unwrap());
        }
        Batch::sealed(batch_id, tree.root(), entries)
    }

    #[test]
    fn aggregates_one_tenant_and_day() {
        let mut first = batch(
            1,
            vec![
                entry("acme", Some("pass"), at(5, 9), 1),
                entry("acme", Some("fail"), at(5, 11), 2),
                entry("globex", Some("pass"), at(5, 10), 3),
            ],
        );
        let anchored = AnchorResult::pending(uuid::Uuid::nil(), "local", 1, first.root_hash)
            .succeed("1:abc".into(), true);
        first.record_anchor(&[anchored]);

        let second = batch(2, vec![entry("acme", Some("pass"), at(6, 1), 4)]);
        let pending = vec![entry("acme", None, at(5, 23), 5)];

        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let m = collect("acme", date, [&first, &second], &pending);

        assert_eq!(m.total_entries, 3);
        assert_eq!(m.committed_entries, 2);
        assert_eq!(m.pending_entries, 1);
        assert_eq!(m.anchored_entries, 2);
        assert_eq!(m.by_outcome["pass"], 1);
        assert_eq!(m.by_outcome["fail"], 1);
        assert_eq!(m.by_outcome[UNLABELED], 1);
        assert_eq!(m.by_kind["validation"], 3);
        assert_eq!(m.batch_ids, vec![1]);
        assert_eq!(m.first_occurred_at, Some(at(5, 9)));
        assert_eq!(m.last_occurred_at, Some(at(5, 23)));
    }

    #[test]
    fn sample_outlives_the_batches_it_was_taken_from() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let batches = vec![
            batch(1, vec![entry("acme", None, at(5, 1), 1), entry("globex", None, at(5, 2), 2)]),
            batch(2, vec![entry("acme", None, at(4, 1), 3)]),
            batch(3, vec![entry("acme", Some("pass"), at(5, 3), 4), entry("acme", None, at(5, 4), 5)]),
        ];
        let pending = vec![entry("acme", None, at(5, 5), 6), entry("acme", None, at(6, 1), 7)];
        let expected = collect("acme", date, &batches, &pending);

        let sample = DailyMetrics::select("acme", date, &batches, &pending);
        assert_eq!(sample.committed.len(), 3);
        assert_eq!(sample.pending.len(), 1);
        drop(batches);
        drop(pending);

        let m = DailyMetrics::from_sample("acme", date, sample);
        assert_eq!(m, expected);
        assert_eq!(m.batch_ids, vec![1, 3]);
        assert_eq!(m.committed_entries, 3);
        assert_eq!(m.pending_entries, 1);
    }

    #[test]
    fn unknown_tenant_is_empty() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 5).unwrap();
        let b = batch(1, vec![entry("acme", None, at(5, 1), 1)]);
        let m = collect("nobody", date, [&b], &Vec::<Entry>::new());
        assert_eq!(m, DailyMetrics::empty("nobody", date));
    }
}
