//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (PAGESHOT_*)
//! 2. TOML config file (if PAGESHOT_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::model::ExportFormat;

mod validation;

pub use validation::ConfigError;

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (PAGESHOT_*)
/// 2. TOML config file (if PAGESHOT_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Directory holding `<hash>.bin` / `<hash>.mime` fetch cache entries.
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory holding per-host cookie jars.
    #[serde(default = "default_cookie_dir")]
    pub cookie_dir: PathBuf,

    /// Root of the screenshot session store.
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,

    /// User-Agent string presented to origins.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Timeout for asset fetches in milliseconds.
    #[serde(default = "default_asset_timeout_ms")]
    pub asset_timeout_ms: u64,

    /// Timeout for root document fetches in milliseconds.
    #[serde(default = "default_document_timeout_ms")]
    pub document_timeout_ms: u64,

    /// Maximum bytes accepted per response.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Run the session warm-up before the first document fetch for a host.
    #[serde(default = "default_true")]
    pub warm_up: bool,

    /// Pause between warm-up requests in milliseconds.
    #[serde(default = "default_pacing_ms")]
    pub pacing_ms: u64,

    /// Pause after the last warm-up request in milliseconds.
    #[serde(default = "default_settle_after_warm_up_ms")]
    pub warm_up_settle_ms: u64,

    /// Allow targets resolving to private or loopback addresses.
    #[serde(default)]
    pub allow_private_hosts: bool,

    /// External sitemap discovery endpoint.
    #[serde(default = "default_sitemap_endpoint")]
    pub sitemap_endpoint: String,

    /// Maximum number of pages taken from a sitemap.
    #[serde(default = "default_sitemap_limit")]
    pub sitemap_limit: usize,

    /// Number of captures allowed inside the render stage at once.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Content height clamp in CSS pixels.
    #[serde(default = "default_max_capture_height")]
    pub max_capture_height: u32,

    /// Pages taller than this are rendered in bands.
    #[serde(default = "default_tile_threshold")]
    pub tile_threshold: u32,

    /// Band height used when tiling.
    #[serde(default = "default_tile_height")]
    pub tile_height: u32,

    /// Output downscale factor applied to the full raster.
    #[serde(default = "default_output_scale")]
    pub output_scale: f32,

    /// Optional cap on the longest output edge in pixels.
    #[serde(default)]
    pub max_output_edge: Option<u32>,

    /// Encoded image format.
    #[serde(default)]
    pub export_format: ExportFormat,

    /// JPEG quality (1-100).
    #[serde(default = "default_export_quality")]
    pub export_quality: u8,

    /// Document load wait in milliseconds.
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,

    /// Web font readiness wait in milliseconds.
    #[serde(default = "default_fonts_timeout_ms")]
    pub fonts_timeout_ms: u64,

    /// Final settle delay after interaction simulation in milliseconds.
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Explicit Chrome/Chromium executable.
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".into()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_cookie_dir() -> PathBuf {
    PathBuf::from("./cache/cookies")
}

fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("./screenshots")
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36"
        .into()
}

fn default_asset_timeout_ms() -> u64 {
    15_000
}

fn default_document_timeout_ms() -> u64 {
    20_000
}

fn default_max_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_pacing_ms() -> u64 {
    700
}

fn default_settle_after_warm_up_ms() -> u64 {
    1_200
}

fn default_sitemap_endpoint() -> String {
    "https://getsitemap.funkpd.com/json".into()
}

fn default_sitemap_limit() -> usize {
    10
}

fn default_concurrency() -> usize {
    2
}

fn default_max_capture_height() -> u32 {
    12_000
}

fn default_tile_threshold() -> u32 {
    2_048
}

fn default_tile_height() -> u32 {
    512
}

fn default_output_scale() -> f32 {
    0.25
}

fn default_export_quality() -> u8 {
    70
}

fn default_load_timeout_ms() -> u64 {
    8_000
}

fn default_fonts_timeout_ms() -> u64 {
    5_000
}

fn default_settle_ms() -> u64 {
    150
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            cache_dir: default_cache_dir(),
            cookie_dir: default_cookie_dir(),
            screenshot_dir: default_screenshot_dir(),
            user_agent: default_user_agent(),
            asset_timeout_ms: default_asset_timeout_ms(),
            document_timeout_ms: default_document_timeout_ms(),
            max_bytes: default_max_bytes(),
            warm_up: true,
            pacing_ms: default_pacing_ms(),
            warm_up_settle_ms: default_settle_after_warm_up_ms(),
            allow_private_hosts: false,
            sitemap_endpoint: default_sitemap_endpoint(),
            sitemap_limit: default_sitemap_limit(),
            concurrency: default_concurrency(),
            max_capture_height: default_max_capture_height(),
            tile_threshold: default_tile_threshold(),
            tile_height: default_tile_height(),
            output_scale: default_output_scale(),
            max_output_edge: None,
            export_format: ExportFormat::default(),
            export_quality: default_export_quality(),
            load_timeout_ms: default_load_timeout_ms(),
            fonts_timeout_ms: default_fonts_timeout_ms(),
            settle_ms: default_settle_ms(),
            chrome_path: None,
        }
    }
}

impl AppConfig {
    pub fn asset_timeout(&self) -> Duration {
        Duration::from_millis(self.asset_timeout_ms)
    }

    pub fn document_timeout(&self) -> Duration {
        Duration::from_millis(self.document_timeout_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn fonts_timeout(&self) -> Duration {
        Duration::from_millis(self.fonts_timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `PAGESHOT_`
    /// 2. TOML file from `PAGESHOT_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("PAGESHOT_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("PAGESHOT_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.cache_dir, PathBuf::from("./cache"));
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.max_capture_height, 12_000);
        assert_eq!(config.tile_height, 512);
        assert_eq!(config.export_format, ExportFormat::Jpeg);
        assert_eq!(config.export_quality, 70);
        assert_eq!(config.sitemap_limit, 10);
        assert!(config.warm_up);
        assert!(!config.allow_private_hosts);
        assert!(config.chrome_path.is_none());
    }

    #[test]
    fn test_timeout_durations() {
        let config = AppConfig::default();
        assert_eq!(config.asset_timeout(), Duration::from_millis(15_000));
        assert_eq!(config.document_timeout(), Duration::from_millis(20_000));
        assert_eq!(config.load_timeout(), Duration::from_millis(8_000));
    }

    #[test]
    fn test_toml_layer_overrides_defaults() {
        let figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::string("concurrency = 4\nexport_format = \"png\"\ntile_height = 256"));
        let config: AppConfig = figment.extract().unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.export_format, ExportFormat::Png);
        assert_eq!(config.tile_height, 256);
        assert_eq!(config.max_capture_height, 12_000);
    }
}
