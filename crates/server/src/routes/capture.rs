use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use pageshot_client::capture::BatchProgress;
use pageshot_core::{CaptureRequest, CaptureResult, Error, ViewportMode};

use crate::error::ApiError;
use crate::state::AppState;

const KEEP_ALIVE: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct CaptureParams {
    /// Site or page to capture.
    pub url: Option<String>,
    #[serde(default)]
    pub mode: ViewportMode,
    pub cookie: Option<String>,
    /// Explicit page list; skips sitemap discovery.
    pub urls: Option<Vec<String>>,
    /// Expand `url` through the sitemap service (default: true).
    pub sitemap: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureItem {
    #[serde(flatten)]
    pub result: CaptureResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureSummary {
    pub total: usize,
    pub captured: usize,
    pub failed: usize,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct CaptureOutput {
    pub results: Vec<CaptureItem>,
    pub summary: CaptureSummary,
}

/// One finished page, as broadcast on `/capture/events`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureEvent {
    pub index: usize,
    pub total: usize,
    pub status: &'static str,
    pub page_url: String,
    pub host: String,
    pub mode: ViewportMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<BatchProgress<'_>> for CaptureEvent {
    fn from(progress: BatchProgress<'_>) -> Self {
        let (status, host, title, error) = match progress.result {
            CaptureResult::Captured(page) => ("captured", page.host.clone(), page.title.clone(), None),
            CaptureResult::Failed(page) => ("failed", page.host.clone(), None, Some(page.error.clone())),
        };
        Self {
            index: progress.index,
            total: progress.total,
            status,
            page_url: progress.result.page_url().to_string(),
            host,
            mode: progress.result.mode(),
            title,
            error,
        }
    }
}

/// `POST /capture`: capture a site (or an explicit page list) into the current session.
pub async fn capture(
    State(state): State<Arc<AppState>>, Json(params): Json<CaptureParams>,
) -> Result<Json<CaptureOutput>, ApiError> {
    let output = capture_impl(&state, params).await?;
    Ok(Json(output))
}

async fn page_urls(state: &AppState, params: &CaptureParams) -> Result<Vec<String>, Error> {
    if let Some(urls) = params.urls.as_ref().filter(|urls| !urls.is_empty()) {
        return Ok(urls.clone());
    }

    let url = params
        .url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| Error::InvalidInput("url or urls is required".into()))?;
    let target = state.pipeline.gate(url).await?;

    if params.sitemap.unwrap_or(true) {
        state.sitemap.discover(&target).await
    } else {
        Ok(vec![target.to_string()])
    }
}

pub async fn capture_impl(state: &AppState, params: CaptureParams) -> Result<CaptureOutput, Error> {
    let urls = page_urls(state, &params).await?;
    let cookie = params.cookie.filter(|c| !c.trim().is_empty());
    let requests: Vec<CaptureRequest> =
        urls.into_iter().map(|url| CaptureRequest::new(url, params.mode).with_cookie(cookie.clone())).collect();

    let events = state.events.clone();
    let results = state
        .pipeline
        .capture_batch(requests, |progress| {
            // no subscribers is fine
            let _ = events.send(CaptureEvent::from(progress));
        })
        .await?;

    let session_id = state.store.current().await;
    let mut items = Vec::with_capacity(results.len());
    for result in results {
        let image_url = match &result {
            CaptureResult::Captured(page) => Some(state.store.store(page).await?.image_url),
            CaptureResult::Failed(_) => None,
        };
        items.push(CaptureItem { result, image_url });
    }

    let captured = items.iter().filter(|item| item.result.is_captured()).count();
    Ok(CaptureOutput {
        summary: CaptureSummary { total: items.len(), captured, failed: items.len() - captured, session_id },
        results: items,
    })
}

/// `GET /capture/events`: progress of every batch as Server-Sent Events.
pub async fn capture_events(State(state): State<Arc<AppState>>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.events.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event("capture").json_data(&event) {
                    Ok(sse) => yield Ok(sse),
                    Err(e) => tracing::warn!("failed to encode capture event: {e}"),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "progress subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::router;
    use crate::routes::testing::{StaticFetcher, state};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use tower::ServiceExt;

    fn site() -> StaticFetcher {
        StaticFetcher::default()
            .route("https://shop.test/", "text/html", "<html><head><title>Home</title></head><body>home</body></html>")
            .route("https://shop.test/about", "text/html", "<html><body>about</body></html>")
    }

    async fn post_json(app: axum::Router, uri: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_capture_explicit_pages_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(dir.path(), site()).await;
        let mut events = state.events.subscribe();
        let app = router(state.clone());

        let (status, body) = post_json(
            app.clone(),
            "/capture",
            serde_json::json!({
                "mode": "mobile",
                "urls": ["https://shop.test/", "https://shop.test/missing", "https://shop.test/about"]
            }),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let results = body["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["status"], "captured");
        assert_eq!(results[0]["pageUrl"], "https://shop.test/");
        assert_eq!(results[0]["mode"], "mobile");
        assert_eq!(results[1]["status"], "failed");
        assert!(results[1]["error"].as_str().unwrap().starts_with("FETCH_FAILED"));
        assert!(results[1].get("imageUrl").is_none());
        assert_eq!(results[2]["pageUrl"], "https://shop.test/about");

        assert_eq!(body["summary"]["total"], 3);
        assert_eq!(body["summary"]["captured"], 2);
        assert_eq!(body["summary"]["failed"], 1);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push((event.index, event.status));
        }
        seen.sort();
        assert_eq!(seen, vec![(0, "captured"), (1, "failed"), (2, "captured")]);

        // the stored image is served statically
        let image_url = results[0]["imageUrl"].as_str().unwrap();
        let response = app.oneshot(Request::get(image_url).body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..2], &[0xff, 0xd8]);
    }

    #[tokio::test]
    async fn test_capture_without_sitemap_uses_target() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path(), site()).await);

        let (status, body) =
            post_json(app, "/capture", serde_json::json!({ "url": "shop.test", "sitemap": false })).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"][0]["pageUrl"], "https://shop.test/");
        assert_eq!(body["results"][0]["title"], "Fixture");
        assert_eq!(body["results"][0]["mode"], "desktop");
    }

    #[tokio::test]
    async fn test_capture_requires_a_target() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(state(dir.path(), site()).await);

        let (status, body) = post_json(app, "/capture", serde_json::json!({ "mode": "tablet" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");
    }

    #[test]
    fn test_event_from_failed_progress() {
        let request = CaptureRequest::new("https://shop.test/x", ViewportMode::Tablet);
        let result = CaptureResult::failed(&request, &Error::FetchFailed("status 500".into()));
        let event = CaptureEvent::from(BatchProgress { index: 4, total: 9, result: &result });

        assert_eq!(event.status, "failed");
        assert_eq!(event.host, "shop.test");
        assert_eq!(event.mode, ViewportMode::Tablet);
        assert_eq!(event.error.as_deref(), Some("FETCH_FAILED: status 500"));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["pageUrl"], "https://shop.test/x");
        assert!(json.get("title").is_none());
    }
}
