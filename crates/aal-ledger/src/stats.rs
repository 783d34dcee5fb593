use std::collections::VecDeque;
use std::fmt;

use aal_anchor::DispatchStats;
use aal_types::Digest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of an [`AuditLedger`](crate::AuditLedger).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for LedgerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of the ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerStats {
    pub state: LedgerState,
    /// Accepted entries, committed or not.
    pub entry_count: u64,
    /// Accepted entries waiting in the open batch.
    pub pending_entries: u64,
    pub batch_count: u64,
    pub last_batch_id: u64,
    /// Root of the most recent batch.
    pub current_root_hash: Option<Digest>,
    pub duplicates_dropped: u64,
    pub anchor_stats: AnchorStats,
    pub persistence: PersistenceStats,
    pub dispatcher: DispatchStats,
}

/// Anchoring outcomes as seen by the ledger.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorStats {
    /// Batches anchored by at least one backend.
    pub anchored_batches: u64,
    /// Anchoring rounds in which every backend failed.
    pub failed_rounds: u64,
    /// Batches whose anchoring was refused by a full dispatcher queue.
    pub deferred_batches: u64,
    /// Batches with no successful anchor yet.
    pub unanchored_batches: u64,
    /// Share of successful rounds over the recent window.
    pub recent_success_rate: Option<f64>,
    pub last_anchored_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Storage health.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceStats {
    /// Some accepted state is held in memory only.
    pub degraded: bool,
    pub failed_writes: u64,
    /// Sealed batches no storage tier accepted.
    pub unpersisted_batches: u64,
    pub last_error: Option<String>,
}

/// Success/failure outcomes of the last `capacity` anchoring rounds.
#[derive(Clone, Debug)]
pub(crate) struct RollingWindow {
    outcomes: VecDeque<bool>,
    capacity: usize,
}

impl RollingWindow {
    pub(crate) const DEFAULT_CAPACITY: usize = 100;

    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub(crate) fn push(&mut self, success: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back(success);
    }

    pub(crate) fn success_rate(&self) -> Option<f64> {
        if self.outcomes.is_empty() {
            return None;
        }
        let successes = self.outcomes.iter().filter(|s| **s).count();
        Some(successes as f64 / self.outcomes.len() as f64)
    }
}

impl Default for RollingWindow {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
