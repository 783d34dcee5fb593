use aal_anchor::AnchorError;
use aal_store::StoreError;

use crate::stats::LedgerState;

/// Errors produced by ledger operations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger is {0}, not running")]
    NotRunning(LedgerState),

    #[error("ledger is {0}; it must be stopped to start")]
    AlreadyStarted(LedgerState),

    #[error("ingest queue is full ({capacity} entries)")]
    QueueFull { capacity: usize },

    /// Durable or anchored state failed verification at startup.
    #[error("corrupt ledger state: {0}")]
    CorruptState(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Store(#[source] StoreError),

    #[error("anchor error: {0}")]
    Anchor(#[source] AnchorError),
}

impl LedgerError {
    /// Whether the error means on-disk state cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::CorruptState(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            e if e.is_corruption() => Self::CorruptState(e.to_string()),
            StoreError::Serialization(msg) => Self::Serialization(msg),
            e => Self::Store(e),
        }
    }
}

impl From<AnchorError> for LedgerError {
    fn from(err: AnchorError) -> Self {
        match err {
            e if e.is_corruption() => Self::CorruptState(e.to_string()),
            AnchorError::Config(msg) => Self::Config(msg),
            e => Self::Anchor(e),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
