//! HTTP server for the Anchored Audit Ledger.
//!
//! Exposes entry ingest, batch and root lookup, proof verification, ledger
//! stats, anchor backend health and daily metrics as a JSON REST API.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::AppState;
pub use server::AalServer;

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;

    use aal_anchor::{AnchorBackend, AnchorManager, AnchorPayload, BackendError, DispatcherConfig, Submission};
    use aal_ledger::{AuditLedger, LedgerConfig};
    use aal_store::{InMemoryKeyValueStore, KvDurableStore};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use serde_json::{json, Value};
    use tower::util::ServiceExt;

    use super::*;

    struct Accepting;

    #[async_trait]
    impl AnchorBackend for Accepting {
        fn id(&self) -> &str {
            "accepting"
        }
        async fn submit(&self, payload: &AnchorPayload) -> Result<Submission, BackendError> {
            Ok(Submission {
                transaction_id: format!("tx-{}", payload.batch_id),
                confirmed: true,
            })
        }
    }

    pub(crate) fn ledger(batch_size: usize) -> AuditLedger {
        let config = LedgerConfig {
            batch_size,
            idle_flush_ms: 60_000,
            ..Default::default()
        };
        let store = Arc::new(KvDurableStore::new(Arc::new(InMemoryKeyValueStore::new())));
        let dispatcher = AnchorManager::new(DispatcherConfig::default(), vec![Arc::new(Accepting)]);
        AuditLedger::new(config, store, dispatcher).unwrap()
    }

    async fn app(config: ServerConfig) -> Router {
        let ledger = Arc::new(ledger(10));
        ledger.start().await.unwrap();
        AalServer::new(config, ledger).router()
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn entry(n: u32) -> Value {
        json!({ "tenant": "acme", "kind": "validation", "outcome": "pass", "payload": { "n": n } })
    }

    #[tokio::test]
    async fn health_reflects_ledger_state() {
        let ledger = Arc::new(ledger(10));
        let router = AalServer::new(ServerConfig::default(), ledger.clone()).router();

        let (status, body) = call(&router, "GET", "/v1/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "unavailable");

        ledger.start().await.unwrap();
        let (status, body) = call(&router, "GET", "/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["ledger"], "running");
        ledger.stop().await;
    }

    #[tokio::test]
    async fn entry_commit_fetch_and_verify() {
        let router = app(ServerConfig::default()).await;

        let (status, accepted) = call(&router, "POST", "/v1/entries", Some(entry(1))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let entry_hash = accepted["entryHash"].as_str().unwrap().to_string();
        assert_eq!(entry_hash.len(), 64);

        let (status, committed) = call(&router, "POST", "/v1/admin/commit", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(committed["batchId"], 1);

        let (status, entries) = call(&router, "GET", "/v1/batches/1", None).await;
        assert_eq!(status, StatusCode::OK);
        let entries = entries.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["hash"], entry_hash);
        assert_eq!(entries[0]["batchId"], 1);

        let (status, root) = call(&router, "GET", "/v1/batches/1/root", None).await;
        assert_eq!(status, StatusCode::OK);
        let root_hash = root["rootHash"].clone();

        let proof = entries[0]["proof"].clone();
        let request = json!({ "entryHash": entry_hash, "proof": proof, "rootHash": root_hash });
        let (status, verdict) = call(&router, "POST", "/v1/proofs/verify", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verdict["isValid"], true);

        let wrong_root = "ab".repeat(32);
        let request = json!({ "entryHash": entry_hash, "proof": proof, "rootHash": wrong_root });
        let (_, verdict) = call(&router, "POST", "/v1/proofs/verify", Some(request)).await;
        assert_eq!(verdict["isValid"], false);

        let request = json!({ "entryHash": "not-hex", "proof": proof, "rootHash": root_hash });
        let (status, verdict) = call(&router, "POST", "/v1/proofs/verify", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(verdict["isValid"], false);

        let request = json!({ "entryHash": entry_hash, "proof": { "leaf": 7 }, "rootHash": root_hash });
        let (_, verdict) = call(&router, "POST", "/v1/proofs/verify", Some(request)).await;
        assert_eq!(verdict["isValid"], false);

        let (_, stats) = call(&router, "GET", "/v1/stats", None).await;
        assert_eq!(stats["entryCount"], 1);
        assert_eq!(stats["batchCount"], 1);
        assert_eq!(stats["currentRootHash"], root_hash);
    }

    #[tokio::test]
    async fn commit_with_nothing_open_returns_no_batch() {
        let router = app(ServerConfig::default()).await;
        let (status, committed) = call(&router, "POST", "/v1/admin/commit", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(committed["batchId"].is_null());
    }

    #[tokio::test]
    async fn unknown_batch_is_not_found() {
        let router = app(ServerConfig::default()).await;
        let (status, body) = call(&router, "GET", "/v1/batches/42", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("batch 42"));
        let (status, _) = call(&router, "GET", "/v1/batches/42/root", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn entries_rejected_while_stopped() {
        let ledger = Arc::new(ledger(10));
        let router = AalServer::new(ServerConfig::default(), ledger).router();
        let (status, _) = call(&router, "POST", "/v1/entries", Some(entry(1))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn metrics_by_tenant_and_date() {
        let router = app(ServerConfig::default()).await;
        let body = json!({
            "tenant": "acme",
            "kind": "validation",
            "outcome": "fail",
            "occurredAt": "2026-03-14T09:30:00Z",
        });
        call(&router, "POST", "/v1/entries", Some(body)).await;

        // The batcher accepts entries asynchronously.
        let mut metrics = Value::Null;
        for _ in 0..50 {
            let (status, body) = call(&router, "GET", "/v1/metrics/acme/2026-03-14", None).await;
            assert_eq!(status, StatusCode::OK);
            metrics = body;
            if metrics["totalEntries"] == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(metrics["totalEntries"], 1);
        assert_eq!(metrics["pendingEntries"], 1);
        assert_eq!(metrics["byOutcome"]["fail"], 1);

        let (status, _) = call(&router, "GET", "/v1/metrics/acme/14-03-2026", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn anchor_health_lists_backends() {
        let router = app(ServerConfig::default()).await;
        let (status, body) = call(&router, "GET", "/v1/anchors/health", None).await;
        assert_eq!(status, StatusCode::OK);
        let backend = &body["perBackend"]["accepting"];
        assert_eq!(backend["circuitState"], "closed");
        assert_eq!(backend["healthy"], true);
        assert!(backend["lastResults"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_requires_opt_in() {
        let router = app(ServerConfig::default()).await;
        let (status, _) = call(&router, "POST", "/v1/admin/reset", None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let router = app(ServerConfig {
            allow_test_reset: true,
            ..Default::default()
        })
        .await;
        let (status, body) = call(&router, "POST", "/v1/admin/reset", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ledger"], "running");
    }
}
