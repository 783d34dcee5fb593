//! Ledger core for the Anchored Audit Ledger (AAL).
//!
//! Records go in through [`AuditLedger::add_entry`], which returns the
//! entry hash immediately. A single background batcher owns the open batch:
//! it accumulates entry hashes into a Merkle tree, seals the batch when it
//! reaches `batch_size` (or has been idle for `idle_flush_ms`), attaches an
//! inclusion proof to every entry, persists the batch and queues its root
//! for anchoring.
//!
//! # Guarantees
//!
//! 1. A sealed batch's root rebuilds from its entry hashes.
//! 2. Every committed entry carries a proof that verifies against its
//!    batch root.
//! 3. Batch ids are strictly increasing and never reused across restarts.
//! 4. No entry lands in two batches.
//! 5. Anchoring and storage failures never lose an accepted entry; they are
//!    reported in [`LedgerStats`].

mod batcher;
pub mod config;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod records;
mod state;
pub mod stats;

pub use config::{LedgerConfig, StorageConfig};
pub use error::{LedgerError, LedgerResult};
pub use ledger::AuditLedger;
pub use metrics::DailyMetrics;
pub use records::{Batch, Entry, Record};
pub use stats::{AnchorStats, LedgerState, LedgerStats, PersistenceStats};
