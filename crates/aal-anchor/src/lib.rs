//! Anchoring for the Anchored Audit Ledger.
//!
//! A batch root is "anchored" by submitting it to one or more backends that
//! record it somewhere tamper-evident. This crate provides the backends and
//! the dispatcher that drives them.
//!
//! # Backends
//!
//! All backends implement [`AnchorBackend`]:
//!
//! - [`LocalChainBackend`] -- a hash-linked chain of blocks in one local
//!   file; needs no network and is always configured
//! - [`HttpBackend`] -- a generic JSON anchoring gateway
//! - custom kinds built by factories registered in a [`BackendRegistry`]
//!
//! # Dispatch
//!
//! [`AnchorManager`] walks backends in priority order. Each backend sits
//! behind a [`CircuitBreaker`]; open circuits are skipped, failures fail
//! over to the next backend, and each call is bounded by a timeout and a
//! [`RetryPolicy`]. Queued requests are drained by a fixed worker pool, so
//! submitting a root never waits on a backend.

pub mod backend;
pub mod circuit;
pub mod config;
pub mod error;
pub mod http;
pub mod local_chain;
pub mod manager;
pub mod registry;
pub mod retry;

pub use backend::{AnchorBackend, AnchorPayload, Submission};
pub use circuit::{Admission, CircuitBreaker, CircuitSnapshot, CircuitState};
pub use config::DispatcherConfig;
pub use error::{AnchorError, BackendError};
pub use http::HttpBackend;
pub use local_chain::{Block, LocalChain, LocalChainBackend};
pub use manager::{AnchorCallback, AnchorManager, AnchorReport, BackendHealth, DispatchStats};
pub use registry::{BackendConfig, BackendFactory, BackendKind, BackendRegistry};
pub use retry::{Backoff, RetryPolicy};
