use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use pageshot_core::Error;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ProxyParams {
    pub url: Option<String>,
    pub cookie: Option<String>,
}

/// `GET /proxy-inline`: the target page as one self-contained HTML document.
///
/// Errors are plain text since the caller usually loads the body into a frame.
pub async fn proxy_inline(State(state): State<Arc<AppState>>, Query(params): Query<ProxyParams>) -> Response {
    match proxy_inline_impl(&state, params).await {
        Ok(html) => ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], html).into_response(),
        Err(e) => e.into_plain_response(),
    }
}

async fn proxy_inline_impl(state: &AppState, params: ProxyParams) -> Result<String, ApiError> {
    let url = params
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput("url query parameter is required".into()))?;

    let target = state.pipeline.gate(&url).await?;
    let document = state.pipeline.inliner().inline(target.as_str(), params.cookie.as_deref()).await?;

    tracing::info!(
        url = %document.url,
        bytes = document.html.len(),
        stylesheets = document.stats.stylesheets,
        assets = document.stats.assets_inlined,
        "served inlined document"
    );
    Ok(document.html)
}
