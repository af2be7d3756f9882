//! Cache-or-fetch over the disk store.
//!
//! A hit is served without touching the network; there is no TTL and no
//! revalidation. Failed fetches are never cached, so a later call retries.

use std::sync::Arc;

use pageshot_core::cache::compute_cache_key;
use pageshot_core::{DiskCache, Error, FetchResult};

use super::{FetchOptions, Fetcher};

/// Explicit cache value shared by `Arc`; owns its entries on disk.
#[derive(Clone)]
pub struct FetchCache {
    store: DiskCache,
    fetcher: Arc<dyn Fetcher>,
}

impl FetchCache {
    pub fn new(store: DiskCache, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { store, fetcher }
    }

    pub fn fetcher(&self) -> &Arc<dyn Fetcher> {
        &self.fetcher
    }

    pub fn store(&self) -> &DiskCache {
        &self.store
    }

    /// Whether a complete entry for `url` is on disk.
    pub async fn is_cached(&self, url: &str) -> bool {
        self.store.contains(&compute_cache_key(url)).await
    }

    /// Return the cached body for `url`, fetching and storing it on a miss.
    ///
    /// `Ok(None)` means the fetch failed (status >= 400, timeout, transport
    /// error); nothing is written in that case.
    ///
    /// # Errors
    ///
    /// Only [`Error::CacheIo`] is returned: the cache directory could not be
    /// read or written.
    pub async fn fetch_cached(&self, url: &str, opts: &FetchOptions) -> Result<Option<FetchResult>, Error> {
        let key = compute_cache_key(url);

        if let Some(hit) = self.store.get(&key).await? {
            tracing::debug!(url, "cache hit");
            return Ok(Some(hit));
        }

        let response = match self.fetcher.fetch(url, opts).await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(url, "fetch failed, not cached: {e}");
                return Ok(None);
            }
        };

        let content_type = response
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let result = FetchResult::new(response.bytes.to_vec(), content_type);

        self.store.put(&key, &result).await?;
        tracing::debug!(url, bytes = result.bytes.len(), "cache miss, stored");

        Ok(Some(result))
    }

    /// Remove every cached entry.
    pub async fn purge(&self) -> Result<usize, Error> {
        self.store.purge().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::FakeFetcher;

    async fn cache_with(fetcher: Arc<FakeFetcher>) -> (tempfile::TempDir, FetchCache) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskCache::open(dir.path()).await.unwrap();
        (dir, FetchCache::new(store, fetcher))
    }

    #[tokio::test]
    async fn test_second_call_served_from_disk() {
        let fetcher = Arc::new(FakeFetcher::new().route("https://a.test/s.css", "text/css", "body{}"));
        let (_dir, cache) = cache_with(fetcher.clone()).await;

        let first = cache.fetch_cached("https://a.test/s.css", &FetchOptions::asset()).await.unwrap();
        let second = cache.fetch_cached("https://a.test/s.css", &FetchOptions::asset()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.unwrap().bytes, b"body{}");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_not_cached() {
        let fetcher = Arc::new(FakeFetcher::new());
        let (_dir, cache) = cache_with(fetcher.clone()).await;

        assert!(cache.fetch_cached("https://a.test/missing.png", &FetchOptions::asset()).await.unwrap().is_none());
        assert!(!cache.is_cached("https://a.test/missing.png").await);
        assert!(cache.fetch_cached("https://a.test/missing.png", &FetchOptions::asset()).await.unwrap().is_none());
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_entry_survives_new_cache_instance() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Arc::new(FakeFetcher::new().route("https://a.test/", "text/html", "<p>hi</p>"));
        let first = FetchCache::new(DiskCache::open(dir.path()).await.unwrap(), fetcher.clone());
        first.fetch_cached("https://a.test/", &FetchOptions::document()).await.unwrap();

        let empty = Arc::new(FakeFetcher::new());
        let second = FetchCache::new(DiskCache::open(dir.path()).await.unwrap(), empty.clone());
        let hit = second.fetch_cached("https://a.test/", &FetchOptions::document()).await.unwrap().unwrap();

        assert_eq!(hit.content_type, "text/html");
        assert_eq!(empty.calls(), 0);
    }

    #[tokio::test]
    async fn test_purge_forces_refetch() {
        let fetcher = Arc::new(FakeFetcher::new().route("https://a.test/x", "text/plain", "x"));
        let (_dir, cache) = cache_with(fetcher.clone()).await;

        cache.fetch_cached("https://a.test/x", &FetchOptions::asset()).await.unwrap();
        assert_eq!(cache.purge().await.unwrap(), 1);
        cache.fetch_cached("https://a.test/x", &FetchOptions::asset()).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }
}
