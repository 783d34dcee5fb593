use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::object::{BatchRecord, Entry, RecoveredState};
use crate::traits::{DurableStore, KeyValueStore};

const CURSOR_KEY: &str = "aal:cursor";
const PENDING_KEY: &str = "aal:pending";

fn batch_key(batch_id: u64) -> String {
    format!("aal:batch:{batch_id}")
}

/// Durable store over a [`KeyValueStore`].
///
/// Key layout:
/// - `aal:cursor`: highest batch id written, decimal
/// - `aal:batch:<id>`: JSON [`BatchRecord`]
/// - `aal:pending`: JSON array of unsealed [`Entry`] values
pub struct KvDurableStore {
    kv: Arc<dyn KeyValueStore>,
    ttl: Option<Duration>,
    /// Serializes read-modify-write sequences on the cursor and pending keys.
    write_lock: Mutex<()>,
}

impl KvDurableStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            ttl: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Apply a TTL to every key written by this store.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    async fn read_cursor(&self) -> StoreResult<u64> {
        match self.kv.get(CURSOR_KEY).await? {
            None => Ok(0),
            Some(bytes) => std::str::from_utf8(&bytes)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .ok_or_else(|| StoreError::Serialization("unreadable batch cursor".into())),
        }
    }

    async fn read_pending(&self) -> StoreResult<Vec<Entry>> {
        match self.kv.get(PENDING_KEY).await? {
            None => Ok(Vec::new()),
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
        }
    }

    async fn write_pending(&self, pending: &[Entry]) -> StoreResult<()> {
        if pending.is_empty() {
            self.kv.delete(PENDING_KEY).await?;
            return Ok(());
        }
        self.kv
            .set(PENDING_KEY, serde_json::to_vec(pending)?, self.ttl)
            .await
    }
}

#[async_trait]
impl DurableStore for KvDurableStore {
    fn name(&self) -> &str {
        "kv"
    }

    async fn save_batch(&self, batch: &BatchRecord) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;

        self.kv
            .set(&batch_key(batch.batch_id), serde_json::to_vec(batch)?, self.ttl)
            .await?;

        let cursor = self.read_cursor().await?;
        if batch.batch_id > cursor {
            self.kv
                .set(CURSOR_KEY, batch.batch_id.to_string().into_bytes(), self.ttl)
                .await?;
        }

        let pending = self.read_pending().await?;
        let before = pending.len();
        let remaining: Vec<Entry> = pending
            .into_iter()
            .filter(|e| !batch.entry_hashes.contains(&e.hash))
            .collect();
        if remaining.len() != before {
            self.write_pending(&remaining).await?;
        }

        debug!(batch_id = batch.batch_id, "batch written to kv tier");
        Ok(())
    }

    async fn save_pending(&self, entry: &Entry) -> StoreResult<()> {
        let _guard = self.write_lock.lock().await;
        let mut pending = self.read_pending().await?;
        if pending.iter().any(|e| e.hash == entry.hash) {
            return Ok(());
        }
        pending.push(entry.clone());
        self.write_pending(&pending).await
    }

    async fn load(&self) -> StoreResult<RecoveredState> {
        let cursor = self.read_cursor().await?;
        let mut batches = Vec::with_capacity(cursor as usize);
        for batch_id in 1..=cursor {
            match self.kv.get(&batch_key(batch_id)).await? {
                Some(bytes) => batches.push(serde_json::from_slice::<BatchRecord>(&bytes)?),
                // Written to the fallback tier only, or expired.
                None => warn!(batch_id, "batch missing from kv tier"),
            }
        }
        let pending = self.read_pending().await?;
        Ok(RecoveredState::from_parts(cursor, batches, pending))
    }
}
