//! Headless Chrome/Chromium sandboxes.
//!
//! One browser process is shared; every capture gets its own browser
//! context (no cookies, storage or cache shared with other captures) holding
//! a single page, sized through device-metrics emulation with a device scale
//! factor of 1.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, Viewport};
use chromiumoxide::cdp::browser_protocol::target::{CreateBrowserContextParams, CreateTargetParams};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use pageshot_core::Error;

use super::sandbox::{RenderMode, Sandbox, SandboxFactory, SandboxSpec};

/// Bound on each best-effort settle script.
const STEP_TIMEOUT: Duration = Duration::from_secs(3);

const FREEZE_CSS: &str = "*,*::before,*::after{animation:none!important;transition:none!important;caret-color:transparent!important;}";

const WAIT_LOAD_JS: &str = r#"new Promise(resolve => {
  if (document.readyState === "complete") { resolve(true); return; }
  window.addEventListener("load", () => resolve(true), { once: true });
})"#;

const TWO_FRAMES_JS: &str = "new Promise(resolve => requestAnimationFrame(() => requestAnimationFrame(() => resolve(true))))";

const FONTS_READY_JS: &str = "document.fonts ? document.fonts.ready.then(() => true) : true";

const INTERACT_JS: &str = r#"(() => {
  const target = document.elementFromPoint(5, 5) || document.body || document.documentElement;
  for (const type of ["mousemove", "mousedown", "mouseup"]) {
    target.dispatchEvent(new MouseEvent(type, { bubbles: true, clientX: 5, clientY: 5 }));
  }
  for (const type of ["keydown", "keyup"]) {
    document.dispatchEvent(new KeyboardEvent(type, { key: "Tab", code: "Tab", bubbles: true }));
  }
  return true;
})()"#;

const MEASURE_JS: &str = r#"(() => {
  const d = document.documentElement;
  const b = document.body || d;
  return Math.ceil(Math.max(d.scrollHeight, d.offsetHeight, d.clientHeight, b.scrollHeight, b.offsetHeight, b.clientHeight));
})()"#;

fn cdp_error(context: &str, e: impl std::fmt::Display) -> Error {
    Error::RenderFailed(format!("{context}: {e}"))
}

fn inject_style_js(css: &str) -> Result<String, Error> {
    let literal = serde_json::to_string(css).map_err(|e| cdp_error("style literal", e))?;
    Ok(format!(
        "(() => {{ const s = document.createElement('style'); s.textContent = {literal}; \
         (document.head || document.documentElement).appendChild(s); return true; }})()"
    ))
}

/// Launches and owns the browser process.
pub struct ChromiumFactory {
    browser: Arc<Browser>,
    handler: JoinHandle<()>,
}

impl ChromiumFactory {
    /// Launch a headless browser, from `chrome_path` or the auto-detected install.
    pub async fn launch(chrome_path: Option<&Path>) -> Result<Self, Error> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--hide-scrollbars")
            .arg("--mute-audio")
            .arg("--no-first-run");
        if let Some(path) = chrome_path {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(|e| cdp_error("browser config", e))?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(|e| cdp_error("browser launch", e))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {e}");
                }
            }
        });

        tracing::info!("headless browser launched");
        Ok(Self { browser: Arc::new(browser), handler })
    }

    /// A page in a fresh browser context, sized to `spec`.
    async fn open(&self, spec: SandboxSpec) -> Result<ChromiumSandbox, Error> {
        let context = self
            .browser
            .create_browser_context(CreateBrowserContextParams::default())
            .await
            .map_err(|e| cdp_error("browser context", e))?;

        let target = CreateTargetParams { browser_context_id: Some(context.clone()), ..CreateTargetParams::new("about:blank") };
        let page = match self.browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                if let Err(dispose) = self.browser.dispose_browser_context(context).await {
                    tracing::warn!("failed to dispose browser context: {dispose}");
                }
                return Err(cdp_error("new page", e));
            }
        };

        let sandbox = ChromiumSandbox { browser: self.browser.clone(), context, page, spec };
        if let Err(e) = sandbox.resize(spec.height).await {
            sandbox.close().await;
            return Err(e);
        }
        Ok(sandbox)
    }
}

impl Drop for ChromiumFactory {
    fn drop(&mut self) {
        self.handler.abort();
    }
}

#[async_trait::async_trait]
impl SandboxFactory for ChromiumFactory {
    async fn create(&self, spec: SandboxSpec) -> Result<Box<dyn Sandbox>, Error> {
        Ok(Box::new(self.open(spec).await?))
    }
}

pub struct ChromiumSandbox {
    browser: Arc<Browser>,
    context: BrowserContextId,
    page: Page,
    spec: SandboxSpec,
}

impl ChromiumSandbox {
    async fn resize(&self, height: u32) -> Result<(), Error> {
        let params =
            SetDeviceMetricsOverrideParams::new(i64::from(self.spec.width), i64::from(height), 1.0, self.spec.mobile);
        self.page.execute(params).await.map_err(|e| cdp_error("device metrics", e))?;
        Ok(())
    }

    async fn eval<T: serde::de::DeserializeOwned>(&self, js: &str) -> Result<T, Error> {
        self.page
            .evaluate(js)
            .await
            .map_err(|e| cdp_error("evaluate", e))?
            .into_value::<T>()
            .map_err(|e| cdp_error("evaluate result", e))
    }

    /// Run a script that may fail or stall without failing the capture.
    async fn best_effort(&self, step: &str, js: &str, limit: Duration) {
        match tokio::time::timeout(limit, self.eval::<serde_json::Value>(js)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::warn!(step, "settle step failed, proceeding: {e}"),
            Err(_) => tracing::warn!(step, "settle step timed out after {:?}, proceeding", limit),
        }
    }

    async fn screenshot(&self, clip: Option<Viewport>) -> Result<Vec<u8>, Error> {
        let mut params = ScreenshotParams::builder().format(CaptureScreenshotFormat::Png).from_surface(true);
        if let Some(clip) = clip {
            params = params.clip(clip).capture_beyond_viewport(true);
        }
        self.page.screenshot(params.build()).await.map_err(|e| cdp_error("screenshot", e))
    }
}

#[async_trait::async_trait]
impl Sandbox for ChromiumSandbox {
    async fn load(&self, html: &str, timeout: Duration) -> Result<bool, Error> {
        let loaded = tokio::time::timeout(timeout, async {
            self.page.set_content(html).await.map_err(|e| cdp_error("set content", e))?;
            self.eval::<bool>(WAIT_LOAD_JS).await
        })
        .await;

        let loaded = match loaded {
            Ok(result) => result?,
            Err(_) => false,
        };

        let width = self.spec.width;
        let pin = format!("html{{width:{width}px!important;min-width:{width}px!important;max-width:{width}px!important;}}");
        self.best_effort("pin width", &inject_style_js(&pin)?, STEP_TIMEOUT).await;
        Ok(loaded)
    }

    async fn settle(&self, fonts_timeout: Duration) -> Result<(), Error> {
        self.best_effort("freeze animations", &inject_style_js(FREEZE_CSS)?, STEP_TIMEOUT).await;
        self.best_effort("animation frames", TWO_FRAMES_JS, STEP_TIMEOUT).await;
        self.best_effort("web fonts", FONTS_READY_JS, fonts_timeout).await;
        self.best_effort("interaction", INTERACT_JS, STEP_TIMEOUT).await;
        Ok(())
    }

    async fn measure(&self) -> Result<u32, Error> {
        let height = self.eval::<f64>(MEASURE_JS).await?;
        Ok(if height.is_finite() && height > 0.0 { height.min(u32::MAX as f64) as u32 } else { 0 })
    }

    async fn title(&self) -> Result<Option<String>, Error> {
        let title = self.eval::<String>("document.title").await?;
        let title = title.trim();
        Ok((!title.is_empty()).then(|| title.to_string()))
    }

    async fn render_band(&self, y: u32, height: u32, mode: RenderMode) -> Result<Vec<u8>, Error> {
        match mode {
            RenderMode::Surface => {
                let clip = Viewport {
                    x: 0.0,
                    y: f64::from(y),
                    width: f64::from(self.spec.width),
                    height: f64::from(height),
                    scale: 1.0,
                };
                self.screenshot(Some(clip)).await
            }
            RenderMode::Viewport => {
                self.resize(height).await?;
                self.eval::<bool>(&format!("(() => {{ window.scrollTo(0, {y}); return true; }})()")).await?;
                self.eval::<bool>(TWO_FRAMES_JS).await?;
                self.screenshot(None).await
            }
        }
    }

    async fn close(&self) {
        if let Err(e) = self.page.clone().close().await {
            tracing::warn!("failed to close page: {e}");
        }
        if let Err(e) = self.browser.dispose_browser_context(self.context.clone()).await {
            tracing::warn!("failed to dispose browser context: {e}");
        }
    }
}
