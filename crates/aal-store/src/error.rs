/// Errors from durable store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from a file-backed tier.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The key-value backend rejected or failed the operation.
    #[error("key-value backend error: {0}")]
    Backend(String),

    /// A persisted batch failed its integrity check.
    #[error("corrupt batch {batch_id}: {reason}")]
    CorruptBatch { batch_id: u64, reason: String },

    /// A tier could not be read at load time. Recovering from the other
    /// tier alone could reissue batch ids that tier never saw.
    #[error("storage tier {tier} unreadable: {reason}")]
    TierUnreadable { tier: String, reason: String },

    /// Neither the primary nor the fallback tier accepted the operation.
    #[error("all storage tiers failed (primary: {primary}; fallback: {fallback})")]
    AllTiersFailed { primary: String, fallback: String },
}

impl StoreError {
    /// Corruption is fatal at startup; everything else is an availability
    /// problem.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptBatch { .. })
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
