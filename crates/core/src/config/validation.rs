//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `max_bytes` is 0 or exceeds 100MB
    /// - a fetch timeout is below 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - `concurrency` is 0
    /// - tiling or scaling parameters are out of range
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 100 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 100MB"));
        }

        for (field, value) in [("asset_timeout_ms", self.asset_timeout_ms), ("document_timeout_ms", self.document_timeout_ms)]
        {
            if value < 100 {
                return Err(invalid(field, "must be at least 100ms"));
            }
            if value > 300_000 {
                return Err(invalid(field, "must not exceed 5 minutes (300000ms)"));
            }
        }

        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.concurrency == 0 {
            return Err(invalid("concurrency", "must be at least 1"));
        }

        if self.max_capture_height == 0 {
            return Err(invalid("max_capture_height", "must be greater than 0"));
        }
        if self.tile_height == 0 {
            return Err(invalid("tile_height", "must be greater than 0"));
        }
        if self.tile_threshold < self.tile_height {
            return Err(invalid("tile_threshold", "must be at least tile_height"));
        }

        if !(self.output_scale > 0.0 && self.output_scale <= 1.0) {
            return Err(invalid("output_scale", "must be in (0, 1]"));
        }
        if self.max_output_edge == Some(0) {
            return Err(invalid("max_output_edge", "must be greater than 0 when set"));
        }

        if self.export_quality == 0 || self.export_quality > 100 {
            return Err(invalid("export_quality", "must be between 1 and 100"));
        }

        if self.sitemap_limit == 0 {
            return Err(invalid("sitemap_limit", "must be at least 1"));
        }

        if self.allow_private_hosts {
            tracing::warn!("allow_private_hosts is set; private and loopback targets will be fetched");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_bytes_zero() {
        let config = AppConfig { max_bytes: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "max_bytes"));
    }

    #[test]
    fn test_validate_timeout_too_small() {
        let config = AppConfig { asset_timeout_ms: 50, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "asset_timeout_ms"));
    }

    #[test]
    fn test_validate_timeout_exceeds_limit() {
        let config = AppConfig { document_timeout_ms: 301_000, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "document_timeout_ms"));
    }

    #[test]
    fn test_validate_empty_user_agent() {
        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "user_agent"));
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let config = AppConfig { concurrency: 0, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "concurrency"));
    }

    #[test]
    fn test_validate_tile_threshold_below_tile_height() {
        let config = AppConfig { tile_threshold: 256, tile_height: 512, ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "tile_threshold"));
    }

    #[test]
    fn test_validate_output_scale_range() {
        let zero = AppConfig { output_scale: 0.0, ..Default::default() };
        assert!(zero.validate().is_err());
        let above = AppConfig { output_scale: 1.5, ..Default::default() };
        assert!(above.validate().is_err());
        let full = AppConfig { output_scale: 1.0, ..Default::default() };
        assert!(full.validate().is_ok());
    }

    #[test]
    fn test_validate_quality_bounds() {
        let config = AppConfig { export_quality: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "export_quality"));
        let config = AppConfig { export_quality: 100, ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
