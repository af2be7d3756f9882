//! HTTP surface.
//!
//! | Route | Handler |
//! |-------|---------|
//! | `GET /proxy-inline` | [`proxy::proxy_inline`] |
//! | `POST /capture` | [`capture::capture`] |
//! | `GET /capture/events` | [`capture::capture_events`] |
//! | `GET/POST/DELETE /session` | [`session`] |
//! | `GET /session/images` | [`session::session_images`] |
//! | `GET /export/pdf` | [`export::export_pdf`] |
//! | `GET /export/offline` | [`export::export_offline`] |
//! | `DELETE /cache` | [`cache::purge_cache`] |
//! | `GET /static/screenshots/*` | stored images |

pub mod cache;
pub mod capture;
pub mod export;
pub mod proxy;
pub mod session;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::store::STATIC_PREFIX;

pub fn router(state: Arc<AppState>) -> Router {
    let screenshots = ServeDir::new(state.store.root());

    Router::new()
        .route("/proxy-inline", get(proxy::proxy_inline))
        .route("/capture", post(capture::capture))
        .route("/capture/events", get(capture::capture_events))
        .route(
            "/session",
            get(session::session_summary).post(session::new_session).delete(session::purge_session),
        )
        .route("/session/images", get(session::session_images))
        .route("/export/pdf", get(export::export_pdf))
        .route("/export/offline", get(export::export_offline))
        .route("/cache", delete(cache::purge_cache))
        .nest_service(STATIC_PREFIX, screenshots)
        .with_state(state)
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-process state for route tests: a scripted fetcher and a sandbox
    //! that paints solid PNGs.

    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    use axum::body::Bytes;
    use image::{ColorType, ImageEncoder, Rgba, RgbaImage, codecs::png::PngEncoder};

    use pageshot_client::capture::{RenderMode, Sandbox, SandboxSpec};
    use pageshot_client::{FetchOptions, FetchResponse, Fetcher, SandboxFactory};
    use pageshot_core::{AppConfig, Error};

    use super::*;

    #[derive(Default)]
    pub struct StaticFetcher {
        routes: HashMap<String, (String, Vec<u8>)>,
    }

    impl StaticFetcher {
        pub fn route(mut self, url: &str, content_type: &str, body: impl Into<Vec<u8>>) -> Self {
            self.routes.insert(url.to_string(), (content_type.to_string(), body.into()));
            self
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for StaticFetcher {
        async fn fetch(&self, url: &str, _opts: &FetchOptions) -> Result<FetchResponse, Error> {
            let start = Instant::now();
            let (content_type, body) =
                self.routes.get(url).ok_or_else(|| Error::FetchFailed(format!("status 404 for {url}")))?;
            Ok(FetchResponse {
                url: url.to_string(),
                final_url: url.to_string(),
                status: 200,
                content_type: Some(content_type.clone()),
                bytes: Bytes::from(body.clone()),
                fetch_ms: start.elapsed().as_millis() as u64,
            })
        }
    }

    pub struct PaintFactory;

    struct PaintSandbox {
        width: u32,
    }

    #[async_trait::async_trait]
    impl SandboxFactory for PaintFactory {
        async fn create(&self, spec: SandboxSpec) -> Result<Box<dyn Sandbox>, Error> {
            Ok(Box::new(PaintSandbox { width: spec.width }))
        }
    }

    #[async_trait::async_trait]
    impl Sandbox for PaintSandbox {
        async fn load(&self, _html: &str, _timeout: Duration) -> Result<bool, Error> {
            Ok(true)
        }

        async fn settle(&self, _fonts_timeout: Duration) -> Result<(), Error> {
            Ok(())
        }

        async fn measure(&self) -> Result<u32, Error> {
            Ok(1200)
        }

        async fn title(&self) -> Result<Option<String>, Error> {
            Ok(Some("Fixture".into()))
        }

        async fn render_band(&self, _y: u32, height: u32, _mode: RenderMode) -> Result<Vec<u8>, Error> {
            let img = RgbaImage::from_pixel(self.width, height, Rgba([30, 60, 90, 255]));
            let mut buf = Vec::new();
            PngEncoder::new(&mut buf)
                .write_image(img.as_raw(), self.width, height, ColorType::Rgba8)
                .map_err(|e| Error::EncodeFailed(e.to_string()))?;
            Ok(buf)
        }

        async fn close(&self) {}
    }

    /// State over temp directories, private hosts allowed, no warm-up.
    pub async fn state(dir: &std::path::Path, fetcher: StaticFetcher) -> Arc<AppState> {
        let config = AppConfig {
            cache_dir: dir.join("cache"),
            cookie_dir: dir.join("cookies"),
            screenshot_dir: dir.join("screenshots"),
            warm_up: false,
            allow_private_hosts: true,
            settle_ms: 0,
            ..AppConfig::default()
        };
        Arc::new(AppState::with_fetcher(&config, Arc::new(fetcher), Arc::new(PaintFactory)).await.unwrap())
    }
}
