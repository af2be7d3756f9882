//! Client side of pageshot.
//!
//! This crate provides the HTTP fetch pipeline (cookie jars, session
//! warm-up, disk-cached fetches, sitemap discovery), the asset inliner and
//! the capture engine shared by the server.

pub mod capture;
pub mod fetch;
pub mod inline;

pub use capture::{
    CaptureEngine, CaptureObserver, CaptureOptions, CapturePipeline, CaptureQueue, CaptureStage, Sandbox,
    SandboxFactory,
};
pub use fetch::{FetchCache, FetchConfig, FetchOptions, FetchResponse, Fetcher, HttpFetcher, SessionEmulator, SitemapClient};
pub use inline::{InlinedDocument, Inliner};

#[cfg(feature = "render")]
pub use capture::ChromiumFactory;
