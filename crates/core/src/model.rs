//! Shared data model: viewport modes, capture requests and results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Emulated device class; fixes the sandbox viewport width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewportMode {
    Mobile,
    Tablet,
    #[default]
    Desktop,
}

impl ViewportMode {
    /// Viewport width in CSS pixels.
    pub fn width(self) -> u32 {
        match self {
            ViewportMode::Mobile => 390,
            ViewportMode::Tablet => 834,
            ViewportMode::Desktop => 1920,
        }
    }

    /// Initial viewport height used before the document is measured.
    pub fn initial_height(self) -> u32 {
        match self {
            ViewportMode::Mobile => 844,
            ViewportMode::Tablet => 1112,
            ViewportMode::Desktop => 1080,
        }
    }

    pub fn is_mobile(self) -> bool {
        matches!(self, ViewportMode::Mobile)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ViewportMode::Mobile => "mobile",
            ViewportMode::Tablet => "tablet",
            ViewportMode::Desktop => "desktop",
        }
    }
}

impl fmt::Display for ViewportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewportMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mobile" => Ok(ViewportMode::Mobile),
            "tablet" => Ok(ViewportMode::Tablet),
            "desktop" => Ok(ViewportMode::Desktop),
            other => Err(Error::InvalidInput(format!("unknown viewport mode: {other}"))),
        }
    }
}

/// Encoded output format of a capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Jpeg,
    Png,
}

impl ExportFormat {
    pub fn mime(self) -> &'static str {
        match self {
            ExportFormat::Jpeg => "image/jpeg",
            ExportFormat::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Jpeg => "jpg",
            ExportFormat::Png => "png",
        }
    }
}

/// Pixel dimensions of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Body and content type of a successful fetch. Immutable once cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResult {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl FetchResult {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self { bytes: bytes.into(), content_type: content_type.into() }
    }

    /// Content type with parameters (`; charset=...`) stripped and lowercased.
    pub fn essence(&self) -> String {
        self.content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
    }
}

/// One page to capture at one viewport mode. Consumed exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureRequest {
    pub page_url: String,
    #[serde(default)]
    pub mode: ViewportMode,
    /// Raw `Cookie` header forwarded to the origin for the root document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie: Option<String>,
}

impl CaptureRequest {
    pub fn new(page_url: impl Into<String>, mode: ViewportMode) -> Self {
        Self { page_url: page_url.into(), mode, cookie: None }
    }

    pub fn with_cookie(mut self, cookie: Option<String>) -> Self {
        self.cookie = cookie.filter(|c| !c.trim().is_empty());
        self
    }

    /// Host of the page URL, or an empty string when it cannot be parsed.
    pub fn host(&self) -> String {
        host_of(&self.page_url)
    }
}

/// A successfully captured page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedPage {
    pub page_url: String,
    pub host: String,
    pub mode: ViewportMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub mime: String,
    /// Output image dimensions.
    pub dimensions: Dimensions,
    /// Dimensions of the full-resolution raster before downscaling.
    pub source_dimensions: Dimensions,
    #[serde(skip)]
    pub image: Vec<u8>,
}

/// A page that could not be captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedPage {
    pub page_url: String,
    pub host: String,
    pub mode: ViewportMode,
    pub error: String,
}

/// Outcome of one capture request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CaptureResult {
    Captured(CapturedPage),
    Failed(FailedPage),
}

impl CaptureResult {
    pub fn failed(request: &CaptureRequest, error: &Error) -> Self {
        CaptureResult::Failed(FailedPage {
            page_url: request.page_url.clone(),
            host: request.host(),
            mode: request.mode,
            error: error.to_string(),
        })
    }

    pub fn page_url(&self) -> &str {
        match self {
            CaptureResult::Captured(page) => &page.page_url,
            CaptureResult::Failed(page) => &page.page_url,
        }
    }

    pub fn mode(&self) -> ViewportMode {
        match self {
            CaptureResult::Captured(page) => page.mode,
            CaptureResult::Failed(page) => page.mode,
        }
    }

    pub fn is_captured(&self) -> bool {
        matches!(self, CaptureResult::Captured(_))
    }
}

/// Lowercased host of a URL, or an empty string.
pub fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default()
}
