use std::path::PathBuf;
use std::time::Duration;

use aal_crypto::ChainError;

/// Failure of a single submission to a single backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Network-level failure or a 5xx response; worth retrying.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend understood the request and refused it.
    #[error("backend rejected the request: {0}")]
    Rejected(String),

    #[error("unexpected backend response: {0}")]
    Protocol(String),

    #[error("local chain write failed: {0}")]
    Chain(String),
}

/// Errors from the anchoring layer as a whole.
#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("anchor dispatcher is not running")]
    NotRunning,

    #[error("anchor queue is full")]
    QueueFull,

    #[error("no anchor result within {0:?}")]
    Timeout(Duration),

    #[error("invalid backend configuration: {0}")]
    Config(String),

    #[error("no backend factory registered under {0:?}")]
    UnknownFactory(String),

    /// A chain file exists but fails its end-to-end check. Never repaired
    /// automatically.
    #[error("chain file {path} failed integrity check: {source}")]
    ChainIntegrity {
        path: PathBuf,
        #[source]
        source: ChainError,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl AnchorError {
    /// Whether this error indicates tampering or on-disk corruption.
    pub fn is_corruption(&self) -> bool {
        matches!(self, Self::ChainIntegrity { .. })
    }
}

impl From<serde_json::Error> for AnchorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
