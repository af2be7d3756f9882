//! Screenshot session management.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Query, State};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;
use crate::store::{SessionSummary, StoredImage};

#[derive(Debug, Deserialize)]
pub struct PurgeParams {
    /// Purge only this host's images.
    pub host: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeOutput {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub removed: usize,
}

/// `GET /session`
pub async fn session_summary(State(state): State<Arc<AppState>>) -> Result<Json<SessionSummary>, ApiError> {
    let session = state.store.current().await;
    Ok(Json(state.store.summary(&session).await?))
}

/// `POST /session`
pub async fn new_session(State(state): State<Arc<AppState>>) -> Result<Json<NewSession>, ApiError> {
    Ok(Json(NewSession { session_id: state.store.new_session().await? }))
}

/// `DELETE /session[?host=]`
pub async fn purge_session(
    State(state): State<Arc<AppState>>, Query(params): Query<PurgeParams>,
) -> Result<Json<PurgeOutput>, ApiError> {
    let session_id = state.store.current().await;
    let host = params.host.filter(|h| !h.trim().is_empty());
    let removed = match host.as_deref() {
        Some(host) => state.store.purge_host(&session_id, host).await?,
        None => state.store.purge_session(&session_id).await?,
    };
    Ok(Json(PurgeOutput { session_id, host, removed }))
}

/// `GET /session/images`
pub async fn session_images(State(state): State<Arc<AppState>>) -> Result<Json<Vec<StoredImage>>, ApiError> {
    let session = state.store.current().await;
    Ok(Json(state.store.list(&session).await?))
}
