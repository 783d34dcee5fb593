use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::digest::Digest;

/// Lifecycle of a single anchoring attempt against one backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorStatus {
    /// Created, not yet handed to the backend.
    Pending,
    /// Accepted by the backend; finality not yet observed.
    Submitted,
    /// Backend reported the root as final.
    Confirmed,
    /// The attempt failed (or no backend could take it).
    Failed,
}

impl AnchorStatus {
    /// `Submitted` and `Confirmed` both count as a successful anchor.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Submitted | Self::Confirmed)
    }

    /// Whether the result will no longer change.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for AnchorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one anchoring attempt of one batch root against one backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorResult {
    pub request_id: Uuid,
    pub backend: String,
    pub status: AnchorStatus,
    pub batch_id: u64,
    pub root_hash: Digest,
    pub transaction_id: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Submission attempts made, including retries.
    pub attempts: u32,
    pub error: Option<String>,
}

impl AnchorResult {
    /// A fresh pending result.
    pub fn pending(
        request_id: Uuid,
        backend: impl Into<String>,
        batch_id: u64,
        root_hash: Digest,
    ) -> Self {
        Self {
            request_id,
            backend: backend.into(),
            status: AnchorStatus::Pending,
            batch_id,
            root_hash,
            transaction_id: None,
            submitted_at: Utc::now(),
            completed_at: None,
            attempts: 0,
            error: None,
        }
    }

    /// Finalize as a success.
    pub fn succeed(mut self, transaction_id: String, confirmed: bool) -> Self {
        self.status = if confirmed {
            AnchorStatus::Confirmed
        } else {
            AnchorStatus::Submitted
        };
        self.transaction_id = Some(transaction_id);
        self.completed_at = Some(Utc::now());
        self
    }

    /// Finalize as a failure.
    pub fn fail(mut self, error: impl Into<String>) -> Self {
        self.status = AnchorStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(AnchorStatus::Confirmed.is_success());
        assert!(AnchorStatus::Submitted.is_success());
        assert!(!AnchorStatus::Failed.is_success());
        assert!(!AnchorStatus::Pending.is_final());
        assert!(AnchorStatus::Failed.is_final());
        assert_eq!(AnchorStatus::Confirmed.to_string(), "confirmed");
    }

    #[test]
    fn result_transitions() {
        let root = Digest::of(b"root");
        let pending = AnchorResult::pending(Uuid::now_v7(), "local", 7, root);
        assert_eq!(pending.status, AnchorStatus::Pending);
        assert!(pending.completed_at.is_none());

        let ok = pending.clone().succeed("tx-1".into(), true);
        assert_eq!(ok.status, AnchorStatus::Confirmed);
        assert_eq!(ok.transaction_id.as_deref(), Some("tx-1"));
        assert!(ok.completed_at.is_some());

        let failed = pending.fail("timeout");
        assert_eq!(failed.status, AnchorStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn serializes_camel_case() {
        let result = AnchorResult::pending(Uuid::now_v7(), "local", 1, Digest::of(b"r"))
            .succeed("tx".into(), false);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["batchId"], 1);
        assert_eq!(json["status"], "submitted");
        assert_eq!(json["transactionId"], "tx");
    }
}
