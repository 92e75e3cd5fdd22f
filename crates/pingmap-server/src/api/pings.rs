use axum::{body::Bytes, extract::State, Extension, Json};
use pingmap_engine::IngestSummary;

use crate::middleware::RequestId;

use super::{map_engine_error, ApiError, ApiResponse, AppState, ResponseMeta};

/// Accepts a JSON array of probes or `{ "pings": [...] }`. Unparseable
/// bodies get the standard error envelope, not axum's plain-text rejection.
pub(super) async fn ingest_pings(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Json<ApiResponse<IngestSummary>>, ApiError> {
    let body: serde_json::Value = serde_json::from_slice(&body).map_err(|e| {
        ApiError::new(
            req_id.0.clone(),
            "bad_request",
            format!("request body is not valid JSON: {e}"),
        )
    })?;

    let summary = state
        .service
        .ingest(body)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: summary,
        meta: ResponseMeta::new(req_id.0),
    }))
}
