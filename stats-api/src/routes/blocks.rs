use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;

use collector::{StoreReadError, StoreSummary, StoredMetric};

use crate::state::SharedState;

/// Default page size for `GET /blocks`.
const DEFAULT_LIMIT: u32 = 100;
/// Largest page `GET /blocks` will return.
const MAX_LIMIT: u32 = 1000;

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Query string of `GET /blocks`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Lowest height to return.
    pub from: Option<u64>,
    /// Maximum number of rows, clamped to [`MAX_LIMIT`].
    pub limit: Option<u32>,
}

/// `GET /blocks?from=<height>&limit=<n>`
///
/// Rows in ascending height order.
pub async fn list_blocks(
    State(state): State<SharedState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Vec<StoredMetric>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let rows = state
        .store
        .list(params.from.unwrap_or(0), limit)
        .await
        .map_err(internal)?;
    Ok(Json(rows))
}

/// `GET /blocks/latest`
pub async fn latest_block(State(state): State<SharedState>) -> ApiResult<StoredMetric> {
    match state.store.latest().await.map_err(internal)? {
        Some(row) => Ok(Json(row)),
        None => Err((StatusCode::NOT_FOUND, "no blocks recorded yet".to_string())),
    }
}

/// `GET /blocks/{height}`
pub async fn get_block(
    State(state): State<SharedState>,
    Path(height): Path<u64>,
) -> ApiResult<StoredMetric> {
    match state.store.get(height).await.map_err(internal)? {
        Some(row) => Ok(Json(row)),
        None => Err((
            StatusCode::NOT_FOUND,
            format!("no metrics recorded for height {height}"),
        )),
    }
}

/// `GET /summary`
pub async fn summary(State(state): State<SharedState>) -> ApiResult<StoreSummary> {
    let summary = state.store.summary().await.map_err(internal)?;
    Ok(Json(summary))
}

fn internal(e: StoreReadError) -> (StatusCode, String) {
    tracing::warn!("store read failed: {e}");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
