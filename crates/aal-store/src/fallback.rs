use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, warn};

use crate::error::{StoreError, StoreResult};
use crate::object::{BatchRecord, Entry, RecoveredState};
use crate::traits::DurableStore;

/// Two-tier durable store: every write goes to `primary`, and to `fallback`
/// only when the primary rejects it.
///
/// `load` merges both tiers, so a batch that only reached the fallback during
/// a primary outage is still recovered.
pub struct FallbackStore {
    primary: Arc<dyn DurableStore>,
    fallback: Arc<dyn DurableStore>,
}

impl FallbackStore {
    pub fn new(primary: Arc<dyn DurableStore>, fallback: Arc<dyn DurableStore>) -> Self {
        Self { primary, fallback }
    }

    pub fn primary(&self) -> &Arc<dyn DurableStore> {
        &self.primary
    }

    pub fn fallback(&self) -> &Arc<dyn DurableStore> {
        &self.fallback
    }
}

#[async_trait]
impl DurableStore for FallbackStore {
    fn name(&self) -> &str {
        "fallback"
    }

    async fn save_batch(&self, batch: &BatchRecord) -> StoreResult<()> {
        let primary_err = match self.primary.save_batch(batch).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!(
            batch_id = batch.batch_id,
            tier = self.primary.name(),
            error = %primary_err,
            "primary tier rejected batch; writing to fallback"
        );
        match self.fallback.save_batch(batch).await {
            Ok(()) => {
                debug!(batch_id = batch.batch_id, tier = self.fallback.name(), "batch saved to fallback");
                Ok(())
            }
            Err(fallback_err) => {
                error!(batch_id = batch.batch_id, error = %fallback_err, "all storage tiers failed");
                Err(StoreError::AllTiersFailed {
                    primary: primary_err.to_string(),
                    fallback: fallback_err.to_string(),
                })
            }
        }
    }

    async fn save_pending(&self, entry: &Entry) -> StoreResult<()> {
        let primary_err = match self.primary.save_pending(entry).await {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        debug!(entry = %entry.hash.short_hex(), error = %primary_err, "pending entry diverted to fallback");
        self.fallback
            .save_pending(entry)
            .await
            .map_err(|fallback_err| StoreError::AllTiersFailed {
                primary: primary_err.to_string(),
                fallback: fallback_err.to_string(),
            })
    }

    /// Both tiers must be readable. A batch that only reached the unreadable
    /// tier would otherwise be invisible, and its id issued again.
    async fn load(&self) -> StoreResult<RecoveredState> {
        let primary = self.primary.load().await;
        let fallback = self.fallback.load().await;

        match (primary, fallback) {
            (Ok(p), Ok(f)) => p.merge(f),
            (Err(e), Ok(_)) => Err(unreadable(self.primary.name(), e)),
            (Ok(_), Err(e)) => Err(unreadable(self.fallback.name(), e)),
            (Err(p), Err(f)) => {
                if p.is_corruption() {
                    return Err(p);
                }
                if f.is_corruption() {
                    return Err(f);
                }
                Err(StoreError::AllTiersFailed {
                    primary: p.to_string(),
                    fallback: f.to_string(),
                })
            }
        }
    }
}

fn unreadable(tier: &str, e: StoreError) -> StoreError {
    if e.is_corruption() {
        return e;
    }
    error!(tier, error = %e, "storage tier unreadable; refusing to recover from the other alone");
    StoreError::TierUnreadable {
        tier: tier.to_string(),
        reason: e.to_string(),
    }
}
