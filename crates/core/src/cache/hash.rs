//! Content-addressed cache key generation.

use sha2::{Digest, Sha256};

/// Compute the cache key for a request URL: lowercase hex SHA-256 of the exact URL string.
pub fn compute_cache_key(url: &str) -> String {
    hex::encode(Sha256::digest(url.as_bytes()))
}

/// Compute the cookie jar key for a host.
pub fn compute_host_key(host: &str) -> String {
    compute_cache_key(&host.to_ascii_lowercase())
}
