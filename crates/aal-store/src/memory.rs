use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::traits::KeyValueStore;

struct Slot {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// In-memory, HashMap-based key-value store with TTL support.
///
/// Intended for tests, embedding, and single-process deployments that do not
/// run an external keyed store. Expired keys are dropped lazily on access.
pub struct InMemoryKeyValueStore {
    slots: RwLock<HashMap<String, Slot>>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.slots
            .read()
            .expect("lock poisoned")
            .values()
            .filter(|s| s.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = Instant::now();
        {
            let map = self.slots.read().expect("lock poisoned");
            match map.get(key) {
                None => return Ok(None),
                Some(slot) if slot.is_live(now) => return Ok(Some(slot.value.clone())),
                Some(_) => {}
            }
        }
        self.slots.write().expect("lock poisoned").remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> StoreResult<()> {
        let slot = Slot {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.slots
            .write()
            .expect("lock poisoned")
            .insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        Ok(self
            .slots
            .write()
            .expect("lock poisoned")
            .remove(key)
            .is_some())
    }
}

impl std::fmt::Debug for InMemoryKeyValueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryKeyValueStore")
            .field("key_count", &self.len())
            .finish()
    }
}
