//! Core types and shared functionality for pageshot.
//!
//! This crate provides:
//! - Disk-backed fetch cache keyed by request URL
//! - Unified error types
//! - Configuration structures
//! - Capture request/result data model

pub mod cache;
pub mod config;
pub mod error;
pub mod model;

pub use cache::DiskCache;
pub use config::{AppConfig, ConfigError};
pub use error::Error;
pub use model::{
    CaptureRequest, CaptureResult, CapturedPage, Dimensions, ExportFormat, FailedPage, FetchResult, ViewportMode,
    host_of,
};
