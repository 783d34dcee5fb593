use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::object::{BatchRecord, Entry, RecoveredState};

/// A fast keyed store (the primary persistence tier).
///
/// Values are opaque bytes. Implementations may expire keys written with a
/// TTL; an expired key reads as absent.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;
}

/// Durable persistence for sealed batches and the ledger cursor.
///
/// Implementations must satisfy these invariants:
/// - `save_batch` is idempotent per batch id; a later save of the same id
///   replaces the earlier one (used to attach anchor results).
/// - Saving a batch implicitly retires its entries from the pending set.
/// - `load` never returns a batch id lower than one previously saved.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Tier name for logging.
    fn name(&self) -> &str;

    /// Persist a sealed batch and advance the cursor to its id.
    async fn save_batch(&self, batch: &BatchRecord) -> StoreResult<()>;

    /// Journal an accepted entry that is not yet sealed.
    async fn save_pending(&self, entry: &Entry) -> StoreResult<()>;

    /// Recover the cursor, sealed batches and still-open entries.
    async fn load(&self) -> StoreResult<RecoveredState>;
}
