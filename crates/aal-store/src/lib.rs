//! Durable storage for the Anchored Audit Ledger.
//!
//! The ledger persists two things: sealed batches (root, entry hashes,
//! entries with proofs, anchor results) and accepted entries that are not
//! yet sealed. Everything else is derived state.
//!
//! # Tiers
//!
//! All tiers implement [`DurableStore`]:
//!
//! - [`KvDurableStore`] -- primary tier over any [`KeyValueStore`]
//!   ([`InMemoryKeyValueStore`] ships for tests and single-process use)
//! - [`JournalStore`] -- append-only, CRC-checked JSON-lines file
//! - [`FallbackStore`] -- composes a primary and a fallback tier
//!
//! # Design Rules
//!
//! 1. A later save of the same batch id replaces the earlier one.
//! 2. Saving a batch retires its entries from the pending set.
//! 3. A batch whose root does not rebuild from its entry hashes is corrupt;
//!    corruption is reported, never repaired.
//! 4. The store never interprets record payloads.

pub mod error;
pub mod fallback;
pub mod journal;
pub mod kv;
pub mod memory;
pub mod object;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use fallback::FallbackStore;
pub use journal::{JournalRecord, JournalStore, SyncMode};
pub use kv::KvDurableStore;
pub use memory::InMemoryKeyValueStore;
pub use object::{BatchRecord, Entry, Record, RecoveredState};
pub use traits::{DurableStore, KeyValueStore};
