use std::collections::BTreeMap;

use aal_types::Digest;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// What gets anchored: a batch root plus caller metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorPayload {
    pub root_hash: Digest,
    pub batch_id: u64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl AnchorPayload {
    pub fn new(root_hash: Digest, batch_id: u64) -> Self {
        Self {
            root_hash,
            batch_id,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A backend's acknowledgement of a submitted root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub transaction_id: String,
    /// `true` when the backend reports finality, `false` for "accepted,
    /// confirmation pending".
    pub confirmed: bool,
}

/// An anchoring target.
///
/// Backends are opaque "submit a root, get back a transaction id or an
/// error" clients. Retries, timeouts and failure isolation belong to the
/// dispatcher, not to implementations.
#[async_trait]
pub trait AnchorBackend: Send + Sync {
    /// Stable identifier, unique within one dispatcher.
    fn id(&self) -> &str;

    /// Submit one root.
    async fn submit(&self, payload: &AnchorPayload) -> Result<Submission, BackendError>;

    /// Cheap liveness check used by health checks.
    async fn is_healthy(&self) -> bool {
        true
    }
}
