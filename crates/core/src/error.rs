//! Unified error types for pageshot.
//!
//! Display strings carry a stable `CODE:` prefix so the HTTP layer and the
//! progress stream can surface them unchanged.

use std::path::PathBuf;

use crate::config::ConfigError;

/// Unified error types for the capture pipeline.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input parameters (e.g., empty URL list).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// SSRF blocked - private/internal address not allowed.
    #[error("SSRF_BLOCKED: {0}")]
    SsrfBlocked(String),

    /// Network failure, timeout or HTTP status >= 400.
    #[error("FETCH_FAILED: {0}")]
    FetchFailed(String),

    /// A sandbox stage did not finish in time.
    #[error("RENDER_TIMEOUT: {0}")]
    RenderTimeout(String),

    /// Render failed in both primary and fallback mode.
    #[error("RENDER_FAILED: {0}")]
    RenderFailed(String),

    /// Image encoding failed.
    #[error("ENCODE_FAILED: {0}")]
    EncodeFailed(String),

    /// Cache directory is not readable or writable.
    #[error("CACHE_IO: {}: {source}", path.display())]
    CacheIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Screenshot session store failure.
    #[error("STORE_ERROR: {0}")]
    Store(String),

    /// Sitemap discovery failed.
    #[error("SITEMAP_FAILED: {0}")]
    Sitemap(String),

    /// Configuration could not be loaded or is invalid.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Build a [`Error::CacheIo`] for the given path.
    pub fn cache_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::CacheIo { path: path.into(), source }
    }

    /// Whether the error must abort the whole batch rather than a single page.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::CacheIo { .. })
    }

    /// Stable machine-readable code, the prefix of the display string.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::SsrfBlocked(_) => "SSRF_BLOCKED",
            Error::FetchFailed(_) => "FETCH_FAILED",
            Error::RenderTimeout(_) => "RENDER_TIMEOUT",
            Error::RenderFailed(_) => "RENDER_FAILED",
            Error::EncodeFailed(_) => "ENCODE_FAILED",
            Error::CacheIo { .. } => "CACHE_IO",
            Error::Store(_) => "STORE_ERROR",
            Error::Sitemap(_) => "SITEMAP_FAILED",
            Error::Config(_) => "CONFIG_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FetchFailed("status 404".to_string());
        assert!(err.to_string().contains("FETCH_FAILED"));
        assert!(err.to_string().contains("status 404"));
    }

    #[test]
    fn test_only_cache_io_is_fatal() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        assert!(Error::cache_io("/tmp/cache", io).is_fatal());
        assert!(!Error::RenderFailed("boom".into()).is_fatal());
        assert!(!Error::FetchFailed("boom".into()).is_fatal());
    }

    #[test]
    fn test_code_matches_display_prefix() {
        let errors = [
            Error::InvalidInput("x".into()),
            Error::SsrfBlocked("x".into()),
            Error::EncodeFailed("x".into()),
            Error::Sitemap("x".into()),
        ];
        for err in errors {
            assert!(err.to_string().starts_with(err.code()));
        }
    }
}
