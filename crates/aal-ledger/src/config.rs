use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use aal_anchor::DispatcherConfig;
use aal_store::{DurableStore, FallbackStore, JournalStore, KeyValueStore, KvDurableStore, SyncMode};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

/// Configuration for an [`AuditLedger`](crate::AuditLedger).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Entries per batch; reaching it commits the open batch.
    pub batch_size: usize,
    /// Commit a non-empty partial batch once no entry has arrived for this
    /// long.
    pub idle_flush_ms: u64,
    /// Bound on entries waiting for the batcher.
    pub ingest_capacity: usize,
    /// How long `stop` waits for the batcher and the dispatcher.
    pub stop_grace_ms: u64,
    pub storage: StorageConfig,
    pub anchoring: DispatcherConfig,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            idle_flush_ms: 5_000,
            ingest_capacity: 10_000,
            stop_grace_ms: 10_000,
            storage: StorageConfig::default(),
            anchoring: DispatcherConfig::default(),
        }
    }
}

impl LedgerConfig {
    pub fn idle_flush(&self) -> Duration {
        Duration::from_millis(self.idle_flush_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn validate(&self) -> LedgerResult<()> {
        if self.batch_size == 0 {
            return Err(LedgerError::Config("batch_size must be at least 1".into()));
        }
        if self.ingest_capacity == 0 {
            return Err(LedgerError::Config("ingest_capacity must be at least 1".into()));
        }
        if self.idle_flush_ms == 0 {
            return Err(LedgerError::Config("idle_flush_ms must be positive".into()));
        }
        if self.anchoring.workers == 0 || self.anchoring.queue_capacity == 0 {
            return Err(LedgerError::Config(
                "anchoring needs at least one worker and a non-empty queue".into(),
            ));
        }
        Ok(())
    }
}

/// Persistence tiers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Journal file backing the fallback tier. `None` runs on the primary
    /// tier alone.
    pub journal_path: Option<PathBuf>,
    pub sync_mode: SyncMode,
    /// Expiry for keys written to the primary tier.
    pub kv_ttl_ms: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            journal_path: Some(PathBuf::from("aal-data/ledger.journal")),
            sync_mode: SyncMode::default(),
            kv_ttl_ms: None,
        }
    }
}

impl StorageConfig {
    /// Assemble the durable store: `kv` as the primary tier, the journal
    /// (when configured) as the fallback.
    pub fn build(&self, kv: Arc<dyn KeyValueStore>) -> LedgerResult<Arc<dyn DurableStore>> {
        let primary: Arc<dyn DurableStore> =
            Arc::new(KvDurableStore::new(kv).with_ttl(self.kv_ttl_ms.map(Duration::from_millis)));
        match &self.journal_path {
            Some(path) => {
                let journal: Arc<dyn DurableStore> = Arc::new(JournalStore::open(path, self.sync_mode)?);
                Ok(Arc::new(FallbackStore::new(primary, journal)))
            }
            None => Ok(primary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aal_store::InMemoryKeyValueStore;

    #[test]
    fn defaults_are_valid() {
        let config = LedgerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.idle_flush(), Duration::from_secs(5));
        assert_eq!(config.anchoring.workers, 2);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let config = LedgerConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LedgerError::Config(_))));
    }

    #[test]
    fn parses_nested_sections() {
        let config: LedgerConfig = toml::from_str(
            r#"
            batch_size = 3

            [storage]
            journal_path = "/var/lib/aal/ledger.journal"
            sync_mode = "os_default"

            [anchoring]
            workers = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.idle_flush_ms, 5_000);
        assert_eq!(config.storage.sync_mode, SyncMode::OsDefault);
        assert_eq!(config.anchoring.workers, 1);
        assert_eq!(config.anchoring.queue_capacity, 1_000);
    }

    #[test]
    fn storage_without_journal_is_primary_only() {
        let storage = StorageConfig {
            journal_path: None,
            ..Default::default()
        };
        let store = storage.build(Arc::new(InMemoryKeyValueStore::new())).unwrap();
        assert_eq!(store.name(), "kv");
    }

    #[test]
    fn storage_with_journal_creates_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("ledger.journal");
        let storage = StorageConfig {
            journal_path: Some(path.clone()),
            ..Default::default()
        };
        storage.build(Arc::new(InMemoryKeyValueStore::new())).unwrap();
        assert!(path.exists());
    }
}
