use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use tracing::warn;
use uuid::Uuid;

use vigil_core::api_types::{SubmitScanRequest, SubmitScanResponse};

use crate::errors::AppResult;
use crate::state::AppState;

const API_KEY_HEADER: &str = "x-api-key";

/// `POST /api/v1/scans` — accept a scan request; 202 with the queued job.
pub async fn submit_scan_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitScanRequest>,
) -> AppResult<impl IntoResponse> {
    let api_key_id = resolve_api_key(&state, &headers).await;

    let job = state
        .submission
        .submit(&request.scan_type, &request.target, api_key_id)
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitScanResponse {
            scan_id: job.id,
            status: job.status,
            scan_type: job.scan_type,
            target: job.target,
        }),
    ))
}

/// `GET /api/v1/scans/{scan_id}` — current status plus results when done.
pub async fn get_scan_results_handler(
    State(state): State<AppState>,
    Path(scan_id): Path<Uuid>,
) -> AppResult<impl IntoResponse> {
    let results = state.query.results(scan_id).await?;
    Ok(Json(results))
}

/// Attribution is best-effort: an absent, unknown, or inactive key never
/// blocks a submission.
async fn resolve_api_key(state: &AppState, headers: &HeaderMap) -> Option<Uuid> {
    let raw = headers.get(API_KEY_HEADER)?.to_str().ok()?;
    match state.api_keys.resolve(raw).await {
        Ok(id) => id,
        Err(err) => {
            warn!(error = %err, "api key lookup failed");
            None
        }
    }
}
