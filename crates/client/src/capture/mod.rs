//! Capture engine: inlined HTML in, compressed image out.
//!
//! Each capture owns one sandbox and walks a fixed sequence of stages:
//!
//! ```text
//! Created -> SandboxBuilt -> ContentLoaded -> Settled -> Measured -> Rendered -> Exported -> Done
//!     \____________________________ any failure ___________________________________/-> Failed
//! ```
//!
//! Load and font waits degrade on timeout; render and encode failures fail
//! the capture. The sandbox is closed on every path.

#[cfg(feature = "render")]
pub mod chromium;
pub mod pipeline;
pub mod queue;
pub mod raster;
pub mod sandbox;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;

use pageshot_core::{AppConfig, CaptureRequest, CaptureResult, CapturedPage, Error, ExportFormat};

pub use pipeline::{BatchProgress, CapturePipeline};
pub use queue::{CaptureQueue, CaptureTicket};
pub use raster::{Band, ExportOptions};
pub use sandbox::{RenderMode, Sandbox, SandboxFactory, SandboxSpec};

#[cfg(feature = "render")]
pub use chromium::ChromiumFactory;

/// Upper bound on a single band screenshot.
const BAND_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStage {
    Created,
    SandboxBuilt,
    ContentLoaded,
    Settled,
    Measured,
    Rendered,
    Exported,
    Done,
    Failed,
}

impl fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureStage::Created => "created",
            CaptureStage::SandboxBuilt => "sandbox_built",
            CaptureStage::ContentLoaded => "content_loaded",
            CaptureStage::Settled => "settled",
            CaptureStage::Measured => "measured",
            CaptureStage::Rendered => "rendered",
            CaptureStage::Exported => "exported",
            CaptureStage::Done => "done",
            CaptureStage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Instrumentation hook called on every stage transition.
pub trait CaptureObserver: Send + Sync {
    fn on_stage(&self, request: &CaptureRequest, stage: CaptureStage);
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
    pub load_timeout: Duration,
    pub fonts_timeout: Duration,
    pub settle: Duration,
    pub max_capture_height: u32,
    pub tile_threshold: u32,
    pub tile_height: u32,
    pub export: ExportOptions,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CaptureOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            load_timeout: config.load_timeout(),
            fonts_timeout: config.fonts_timeout(),
            settle: Duration::from_millis(config.settle_ms),
            max_capture_height: config.max_capture_height,
            tile_threshold: config.tile_threshold,
            tile_height: config.tile_height,
            export: ExportOptions {
                scale: config.output_scale,
                max_edge: config.max_output_edge,
                format: config.export_format,
                quality: config.export_quality,
            },
        }
    }
}

pub struct CaptureEngine {
    factory: Arc<dyn SandboxFactory>,
    options: CaptureOptions,
    observer: Option<Arc<dyn CaptureObserver>>,
}

impl CaptureEngine {
    pub fn new(factory: Arc<dyn SandboxFactory>, options: CaptureOptions) -> Self {
        Self { factory, options, observer: None }
    }

    pub fn with_observer(mut self, observer: Arc<dyn CaptureObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn format(&self) -> ExportFormat {
        self.options.export.format
    }

    fn stage(&self, request: &CaptureRequest, stage: CaptureStage) {
        tracing::debug!(url = %request.page_url, mode = %request.mode, %stage, "capture stage");
        if let Some(observer) = &self.observer {
            observer.on_stage(request, stage);
        }
    }

    /// Capture `html` as `request` describes. Never fails: errors become [`CaptureResult::Failed`].
    pub async fn capture(&self, request: &CaptureRequest, html: &str) -> CaptureResult {
        match self.try_capture(request, html).await {
            Ok(page) => CaptureResult::Captured(page),
            Err(e) => CaptureResult::failed(request, &e),
        }
    }

    /// Like [`capture`](Self::capture) but keeps the error typed.
    pub async fn try_capture(&self, request: &CaptureRequest, html: &str) -> Result<CapturedPage, Error> {
        let start = Instant::now();
        self.stage(request, CaptureStage::Created);
        tracing::info!(url = %request.page_url, mode = %request.mode, "capture started");

        let result = self.run(request, html).await;
        match &result {
            Ok(page) => {
                self.stage(request, CaptureStage::Done);
                tracing::info!(
                    url = %request.page_url,
                    mode = %request.mode,
                    width = page.dimensions.width,
                    height = page.dimensions.height,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "capture finished"
                );
            }
            Err(e) => {
                self.stage(request, CaptureStage::Failed);
                tracing::warn!(url = %request.page_url, mode = %request.mode, "capture failed: {e}");
            }
        }
        result
    }

    async fn run(&self, request: &CaptureRequest, html: &str) -> Result<CapturedPage, Error> {
        let spec = SandboxSpec::for_mode(request.mode);
        let sandbox = self.factory.create(spec).await?;
        self.stage(request, CaptureStage::SandboxBuilt);

        let result = self.drive(sandbox.as_ref(), spec, request, html).await;
        sandbox.close().await;
        result
    }

    async fn drive(
        &self, sandbox: &dyn Sandbox, spec: SandboxSpec, request: &CaptureRequest, html: &str,
    ) -> Result<CapturedPage, Error> {
        if !sandbox.load(html, self.options.load_timeout).await? {
            tracing::warn!(url = %request.page_url, "load event timed out after {:?}, proceeding", self.options.load_timeout);
        }
        self.stage(request, CaptureStage::ContentLoaded);

        if let Err(e) = sandbox.settle(self.options.fonts_timeout).await {
            tracing::warn!(url = %request.page_url, "settle incomplete, proceeding: {e}");
        }
        tokio::time::sleep(self.options.settle).await;
        self.stage(request, CaptureStage::Settled);

        let measured = sandbox.measure().await?;
        let height = raster::clamp_height(measured, self.options.max_capture_height, spec.height);
        if measured > height {
            tracing::debug!(url = %request.page_url, measured, height, "content height clamped");
        }
        let title = sandbox.title().await.unwrap_or_else(|e| {
            tracing::debug!(url = %request.page_url, "title unavailable: {e}");
            None
        });
        self.stage(request, CaptureStage::Measured);

        let canvas = match self.render(sandbox, spec.width, height, RenderMode::Surface).await {
            Ok(canvas) => canvas,
            Err(primary) => {
                tracing::warn!(url = %request.page_url, "surface render failed, retrying in viewport mode: {primary}");
                self.render(sandbox, spec.width, height, RenderMode::Viewport)
                    .await
                    .map_err(|fallback| Error::RenderFailed(format!("{primary}; fallback: {fallback}")))?
            }
        };
        self.stage(request, CaptureStage::Rendered);

        let exported = raster::export(canvas, &self.options.export)?;
        self.stage(request, CaptureStage::Exported);

        Ok(CapturedPage {
            page_url: request.page_url.clone(),
            host: request.host(),
            mode: request.mode,
            title,
            mime: self.options.export.format.mime().to_string(),
            dimensions: exported.dimensions,
            source_dimensions: exported.source_dimensions,
            image: exported.bytes,
        })
    }

    async fn render(&self, sandbox: &dyn Sandbox, width: u32, height: u32, mode: RenderMode) -> Result<RgbaImage, Error> {
        let bands = raster::tile_plan(height, self.options.tile_threshold, self.options.tile_height);
        let mut canvas = RgbaImage::new(width, height);

        for band in bands {
            let png = tokio::time::timeout(BAND_TIMEOUT, sandbox.render_band(band.y, band.height, mode))
                .await
                .map_err(|_| Error::RenderTimeout(format!("band at y={} exceeded {:?}", band.y, BAND_TIMEOUT)))??;
            raster::composite(&mut canvas, &png, band.y)?;
        }

        Ok(canvas)
    }
}
