//! Operator purge of the fetch cache.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PurgeCacheOutput {
    pub removed: usize,
}

/// `DELETE /cache`: drop every cached document and asset.
pub async fn purge_cache(State(state): State<Arc<AppState>>) -> Result<Json<PurgeCacheOutput>, ApiError> {
    let removed = state.pipeline.inliner().cache().purge().await?;
    Ok(Json(PurgeCacheOutput { removed }))
}
