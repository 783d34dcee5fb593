//! Request handlers. Bodies and responses are camelCase JSON.

use std::collections::BTreeMap;
use std::sync::Arc;

use aal_anchor::CircuitState;
use aal_crypto::MerkleProof;
use aal_ledger::{AuditLedger, DailyMetrics, Entry, LedgerState, LedgerStats, Record};
use aal_types::{AnchorResult, Digest};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<AuditLedger>,
    pub config: Arc<ServerConfig>,
}

/// Body of `POST /v1/entries`. `occurredAt` defaults to the time of receipt.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEntry {
    pub tenant: String,
    pub kind: String,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

impl From<NewEntry> for Record {
    fn from(body: NewEntry) -> Self {
        let mut record = Record::new(body.tenant, body.kind, body.payload);
        record.outcome = body.outcome;
        match body.occurred_at {
            Some(at) => record.with_occurred_at(at),
            None => record,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryAccepted {
    pub entry_hash: Digest,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRoot {
    pub batch_id: u64,
    pub root_hash: Digest,
}

/// Fields are parsed leniently: a malformed hash or proof verifies as
/// `false` rather than failing the request.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub entry_hash: String,
    pub proof: serde_json::Value,
    pub root_hash: String,
}

impl VerifyRequest {
    fn into_parts(self) -> Option<(Digest, MerkleProof, Digest)> {
        let entry_hash = self.entry_hash.parse().ok()?;
        let proof = serde_json::from_value(self.proof).ok()?;
        let root_hash = self.root_hash.parse().ok()?;
        Some((entry_hash, proof, root_hash))
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendView {
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub healthy: bool,
    pub last_results: Vec<AnchorResult>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorHealth {
    pub per_backend: BTreeMap<String, BackendView>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    /// `None` when there was nothing to seal.
    pub batch_id: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub ledger: LedgerState,
    pub version: String,
}

/// `POST /v1/entries`
pub async fn add_entry(
    State(state): State<AppState>,
    Json(body): Json<NewEntry>,
) -> ServerResult<(StatusCode, Json<EntryAccepted>)> {
    let entry_hash = state.ledger.add_entry(body.into())?;
    Ok((StatusCode::ACCEPTED, Json(EntryAccepted { entry_hash })))
}

/// `GET /v1/batches/:id`
pub async fn get_batch(State(state): State<AppState>, Path(batch_id): Path<u64>) -> ServerResult<Json<Vec<Entry>>> {
    let batch = state
        .ledger
        .get_batch(batch_id)
        .ok_or_else(|| ServerError::NotFound(format!("batch {batch_id}")))?;
    Ok(Json(batch.entries))
}

/// `GET /v1/batches/:id/root`
pub async fn get_batch_root(State(state): State<AppState>, Path(batch_id): Path<u64>) -> ServerResult<Json<BatchRoot>> {
    let root_hash = state
        .ledger
        .get_batch_root(batch_id)
        .ok_or_else(|| ServerError::NotFound(format!("batch {batch_id}")))?;
    Ok(Json(BatchRoot { batch_id, root_hash }))
}

/// `POST /v1/proofs/verify`. A proof that does not check out is a
/// successful response with `isValid: false`.
pub async fn verify_proof(State(state): State<AppState>, Json(body): Json<VerifyRequest>) -> Json<VerifyResponse> {
    let Some((entry_hash, proof, root_hash)) = body.into_parts() else {
        debug!("malformed proof verification request");
        return Json(VerifyResponse { is_valid: false });
    };
    let is_valid = state.ledger.verify_entry(&entry_hash, &proof, &root_hash);
    debug!(entry = %entry_hash.short_hex(), is_valid, "proof verification");
    Json(VerifyResponse { is_valid })
}

/// `GET /v1/stats`
pub async fn stats(State(state): State<AppState>) -> Json<LedgerStats> {
    Json(state.ledger.get_ledger_stats())
}

/// `GET /v1/anchors/health`
pub async fn anchor_health(State(state): State<AppState>) -> Json<AnchorHealth> {
    let per_backend = state
        .ledger
        .anchor_health()
        .await
        .into_iter()
        .map(|(id, health)| {
            let view = BackendView {
                circuit_state: health.circuit.state,
                consecutive_failures: health.circuit.consecutive_failures,
                retry_after_ms: health.circuit.retry_after_ms,
                healthy: health.healthy,
                last_results: health.last_results,
            };
            (id, view)
        })
        .collect();
    Json(AnchorHealth { per_backend })
}

/// `GET /v1/metrics/:tenant/:date`, with the date as `YYYY-MM-DD`.
pub async fn daily_metrics(
    State(state): State<AppState>,
    Path((tenant, date)): Path<(String, String)>,
) -> ServerResult<Json<DailyMetrics>> {
    let date: NaiveDate = date
        .parse()
        .map_err(|e| ServerError::BadRequest(format!("invalid date {date:?}: {e}")))?;
    Ok(Json(state.ledger.get_metrics_for_date(&tenant, date)))
}

/// `POST /v1/admin/commit`
pub async fn force_commit(State(state): State<AppState>) -> ServerResult<Json<CommitResponse>> {
    let batch_id = state.ledger.force_commit().await?;
    Ok(Json(CommitResponse { batch_id }))
}

/// `POST /v1/admin/reset`: drop in-memory state and restart from storage.
pub async fn reset(State(state): State<AppState>) -> ServerResult<Json<HealthResponse>> {
    if !state.config.allow_test_reset {
        return Err(ServerError::Forbidden("test reset is disabled".into()));
    }
    state.ledger.reset_for_testing().await;
    state.ledger.start().await?;
    info!("ledger reset over admin API");
    Ok(Json(health_of(&state.ledger)))
}

/// `GET /v1/health`. Answers 503 unless the ledger is running.
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let body = health_of(&state.ledger);
    let status = if body.ledger == LedgerState::Running {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

fn health_of(ledger: &AuditLedger) -> HealthResponse {
    let stats = ledger.get_ledger_stats();
    let status = match stats.state {
        LedgerState::Running if stats.persistence.degraded => "degraded",
        LedgerState::Running => "ok",
        _ => "unavailable",
    };
    HealthResponse {
        status: status.to_string(),
        ledger: stats.state,
        version: env!("CARGO_PKG_VERSION").to_string(),
    }
}
