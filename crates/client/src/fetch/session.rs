//! Session warm-up: visit the origin root, then the page itself, the way a
//! person would before any asset is requested.
//!
//! The only lasting effect is cookie jar population; responses are dropped
//! and failures are logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OnceCell;
use url::Url;

use pageshot_core::AppConfig;

use super::{FetchOptions, Fetcher, RequestProfile};

pub struct SessionEmulator {
    fetcher: Arc<dyn Fetcher>,
    pacing: Duration,
    settle: Duration,
    warmed: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
}

impl SessionEmulator {
    pub fn new(fetcher: Arc<dyn Fetcher>, pacing: Duration, settle: Duration) -> Self {
        Self { fetcher, pacing, settle, warmed: Mutex::new(HashMap::new()) }
    }

    pub fn from_config(fetcher: Arc<dyn Fetcher>, config: &AppConfig) -> Self {
        Self::new(
            fetcher,
            Duration::from_millis(config.pacing_ms),
            Duration::from_millis(config.warm_up_settle_ms),
        )
    }

    /// Whether warm-up for `host` has finished in this process.
    pub fn is_warmed(&self, host: &str) -> bool {
        self.warmed
            .lock()
            .map(|w| w.get(&host.to_ascii_lowercase()).is_some_and(|cell| cell.initialized()))
            .unwrap_or(false)
    }

    fn cell(&self, host: &str) -> Option<Arc<OnceCell<()>>> {
        let mut warmed = self.warmed.lock().ok()?;
        Some(warmed.entry(host.to_string()).or_default().clone())
    }

    /// Warm up the session for the host of `url`.
    ///
    /// Runs at most once per host; returns whether this call did the work.
    pub async fn warm_up(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            tracing::debug!(url, "skipping warm-up for unparsable url");
            return false;
        };
        let Some(host) = parsed.host_str().map(str::to_ascii_lowercase) else {
            return false;
        };

        let Some(cell) = self.cell(&host) else {
            return false;
        };

        // Later callers for the host wait here until the first visit is done.
        let mut ran = false;
        cell.get_or_init(|| {
            ran = true;
            self.visit(&parsed, &host)
        })
        .await;
        ran
    }

    async fn visit(&self, parsed: &Url, host: &str) {
        let root = format!("{}/", parsed.origin().ascii_serialization());
        tracing::info!(host = %host, "warming up session");

        if let Err(e) = self.fetcher.fetch(&root, &FetchOptions::document()).await {
            tracing::warn!(host = %host, "warm-up root request failed: {e}");
        }

        let is_root = parsed.path() == "/" && parsed.query().is_none();
        if !is_root {
            tokio::time::sleep(self.pacing).await;
            let opts = FetchOptions { profile: RequestProfile::Navigation, ..Default::default() }.with_referer(&root);
            if let Err(e) = self.fetcher.fetch(parsed.as_str(), &opts).await {
                tracing::warn!(host = %host, "warm-up page request failed: {e}");
            }
        }

        tokio::time::sleep(self.settle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::FakeFetcher;

    fn emulator(fetcher: Arc<FakeFetcher>) -> SessionEmulator {
        SessionEmulator::new(fetcher, Duration::from_millis(700), Duration::from_millis(1200))
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_then_page() {
        let fetcher = Arc::new(FakeFetcher::new().route("https://shop.test/", "text/html", "root"));
        let session = emulator(fetcher.clone());

        assert!(session.warm_up("https://shop.test/products/1?ref=x").await);

        let hits = fetcher.hits();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], ("https://shop.test/".to_string(), RequestProfile::Document));
        assert_eq!(hits[1], ("https://shop.test/products/1?ref=x".to_string(), RequestProfile::Navigation));
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_url_single_request() {
        let fetcher = Arc::new(FakeFetcher::new());
        let session = emulator(fetcher.clone());

        assert!(session.warm_up("https://shop.test/").await);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_per_host() {
        let fetcher = Arc::new(FakeFetcher::new());
        let session = emulator(fetcher.clone());

        assert!(session.warm_up("https://shop.test/a").await);
        assert!(!session.warm_up("https://SHOP.test/b").await);
        assert!(session.is_warmed("shop.test"));
        assert!(session.warm_up("https://other.test/").await);
        assert_eq!(fetcher.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_delays_applied() {
        let fetcher = Arc::new(FakeFetcher::new());
        let session = emulator(fetcher);

        let start = tokio::time::Instant::now();
        session.warm_up("https://shop.test/page").await;
        assert!(start.elapsed() >= Duration::from_millis(1900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_wait_for_warm_up() {
        let fetcher = Arc::new(FakeFetcher::new());
        let session = emulator(fetcher.clone());

        let first = async {
            let ran = session.warm_up("https://shop.test/a").await;
            (ran, fetcher.calls())
        };
        let second = async {
            let ran = session.warm_up("https://shop.test/b").await;
            (ran, fetcher.calls())
        };
        let ((first_ran, _), (second_ran, calls_when_second_returned)) = tokio::join!(first, second);

        assert!(first_ran);
        assert!(!second_ran);
        assert_eq!(calls_when_second_returned, 2);
        assert!(session.is_warmed("shop.test"));
    }

    #[tokio::test]
    async fn test_failures_are_swallowed() {
        let fetcher = Arc::new(FakeFetcher::new());
        let session = SessionEmulator::new(fetcher.clone(), Duration::ZERO, Duration::ZERO);
        assert!(session.warm_up("https://down.test/x").await);
        assert!(!session.warm_up("not a url").await);
    }
}
