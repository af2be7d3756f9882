//! Isolated rendering context seam.
//!
//! A [`Sandbox`] is one private page of a rendering backend, used by exactly
//! one capture and closed afterwards. [`SandboxFactory`] creates them.

use std::time::Duration;

use pageshot_core::{Error, ViewportMode};

/// How a band is rasterized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Clip a region of the full page surface, beyond the viewport if needed.
    Surface,
    /// Resize the viewport to the band, scroll to it and shoot the viewport.
    Viewport,
}

/// Geometry of a new sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxSpec {
    pub width: u32,
    pub height: u32,
    pub mobile: bool,
}

impl SandboxSpec {
    pub fn for_mode(mode: ViewportMode) -> Self {
        Self { width: mode.width(), height: mode.initial_height(), mobile: mode.is_mobile() }
    }
}

#[async_trait::async_trait]
pub trait Sandbox: Send + Sync {
    /// Replace the document with `html` and wait for its load event.
    ///
    /// Returns `false` when `timeout` elapsed first; the document stays in
    /// whatever state it reached.
    async fn load(&self, html: &str, timeout: Duration) -> Result<bool, Error>;

    /// Freeze animations and transitions, wait two animation frames, wait
    /// for web fonts (bounded by `fonts_timeout`) and simulate a pointer
    /// and keyboard interaction. An error means settling was incomplete;
    /// the capture proceeds regardless.
    async fn settle(&self, fonts_timeout: Duration) -> Result<(), Error>;

    /// Full content height in CSS pixels.
    async fn measure(&self) -> Result<u32, Error>;

    /// `document.title`, if non-empty.
    async fn title(&self) -> Result<Option<String>, Error>;

    /// PNG of the band `[y, y + height)` at the sandbox width.
    async fn render_band(&self, y: u32, height: u32, mode: RenderMode) -> Result<Vec<u8>, Error>;

    /// Destroy the sandbox. Errors are logged, never returned.
    async fn close(&self);
}

#[async_trait::async_trait]
pub trait SandboxFactory: Send + Sync {
    async fn create(&self, spec: SandboxSpec) -> Result<Box<dyn Sandbox>, Error>;
}
