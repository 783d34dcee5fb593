use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::registry::BackendConfig;
use crate::retry::RetryPolicy;

/// Configuration for the anchor dispatcher.
///
/// Backends are tried in the order listed. A local chain backend is always
/// present: when none is configured, one is appended at
/// `default_chain_path` with the lowest priority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Worker tasks draining the anchor queue.
    pub workers: usize,
    /// Bound on queued anchor requests.
    pub queue_capacity: usize,
    /// Continue to the next backend after one fails.
    pub failover: bool,
    /// Submit to every backend instead of stopping at the first success.
    pub anchor_to_all: bool,
    /// Consecutive failures before a backend's circuit opens.
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
    /// Upper bound on one submission attempt.
    pub request_timeout_ms: u64,
    pub retry: RetryPolicy,
    /// Anchor results kept across all backends.
    pub history_size: usize,
    /// Anchor results kept per backend for health reporting.
    pub backend_history: usize,
    pub default_chain_path: PathBuf,
    pub backends: Vec<BackendConfig>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1_000,
            failover: true,
            anchor_to_all: false,
            failure_threshold: 5,
            reset_timeout_ms: 60_000,
            request_timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            history_size: 256,
            backend_history: 10,
            default_chain_path: PathBuf::from("aal-data/anchor-chain.json"),
            backends: Vec::new(),
        }
    }
}

impl DispatcherConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
