use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};

/// Build the axum router with all ledger endpoints.
pub fn build_router(state: AppState) -> Router {
    let cors = state.config.cors;
    let router = Router::new()
        .route("/v1/health", get(handler::health))
        .route("/v1/entries", post(handler::add_entry))
        .route("/v1/batches/:id", get(handler::get_batch))
        .route("/v1/batches/:id/root", get(handler::get_batch_root))
        .route("/v1/proofs/verify", post(handler::verify_proof))
        .route("/v1/stats", get(handler::stats))
        .route("/v1/anchors/health", get(handler::anchor_health))
        .route("/v1/metrics/:tenant/:date", get(handler::daily_metrics))
        .route("/v1/admin/commit", post(handler::force_commit))
        .route("/v1/admin/reset", post(handler::reset))
        .with_state(state);

    let router = if cors { router.layer(CorsLayer::permissive()) } else { router };
    router.layer(TraceLayer::new_for_http())
}
