use axum::{
    Json, Router,
    routing::{get, post},
};
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::handlers::{get_scan_results_handler, submit_scan_handler};
use crate::state::AppState;

/// Create the full application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/v1", create_v1_router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Create all v1 API routes
fn create_v1_router() -> Router<AppState> {
    Router::new()
        .route("/scans", post(submit_scan_handler))
        .route("/scans/{scan_id}", get(get_scan_results_handler))
}

async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
