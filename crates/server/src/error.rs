//! HTTP error mapping for the pageshot server.
//!
//! Handlers return [`ApiError`]; its response is `{"error", "code"}` JSON
//! with a status chosen from the core error code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use pageshot_core::Error;

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::InvalidInput(_) | Error::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            Error::SsrfBlocked(_) => StatusCode::FORBIDDEN,
            Error::FetchFailed(_) | Error::Sitemap(_) => StatusCode::BAD_GATEWAY,
            Error::RenderTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Error::RenderFailed(_)
            | Error::EncodeFailed(_)
            | Error::CacheIo { .. }
            | Error::Store(_)
            | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text rendition, used where the client expects a document body.
    pub fn into_plain_response(self) -> Response {
        (self.status(), self.0.to_string()).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {}", self.0);
        } else {
            tracing::debug!("request rejected: {}", self.0);
        }
        (status, Json(serde_json::json!({ "error": self.0.to_string(), "code": self.0.code() }))).into_response()
    }
}
