use axum::{
    extract::{Query, State},
    Extension, Json,
};
use pingmap_engine::{CellPage, ClearReport};
use serde::Deserialize;

use crate::middleware::RequestId;

use super::{map_engine_error, ApiError, ApiResponse, AppState, ResponseMeta};

#[derive(Debug, Deserialize)]
pub(super) struct CellQuery {
    pub cursor: Option<String>,
    pub limit: Option<usize>,
}

pub(super) async fn list_cells(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Query(query): Query<CellQuery>,
) -> Result<Json<ApiResponse<CellPage>>, ApiError> {
    let page = state
        .service
        .list_cells(query.cursor.as_deref(), query.limit)
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: page,
        meta: ResponseMeta::new(req_id.0),
    }))
}

/// Behind the admin-token middleware; never reached unauthenticated.
pub(super) async fn clear_cells(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
) -> Result<Json<ApiResponse<ClearReport>>, ApiError> {
    let report = state
        .service
        .clear_all()
        .await
        .map_err(|e| map_engine_error(req_id.0.clone(), &e))?;

    Ok(Json(ApiResponse {
        data: report,
        meta: ResponseMeta::new(req_id.0),
    }))
}
