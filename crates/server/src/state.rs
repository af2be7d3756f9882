//! Shared application state handed to every route.

use std::sync::Arc;

use tokio::sync::broadcast;

use pageshot_client::{
    CaptureEngine, CaptureOptions, CapturePipeline, CaptureQueue, FetchCache, FetchConfig, Fetcher, HttpFetcher,
    Inliner, SandboxFactory, SessionEmulator, SitemapClient,
};
use pageshot_core::{AppConfig, DiskCache, Error};

use crate::routes::capture::CaptureEvent;
use crate::store::SessionStore;

const EVENT_BUFFER: usize = 256;

pub struct AppState {
    pub pipeline: CapturePipeline,
    pub sitemap: SitemapClient,
    pub store: SessionStore,
    pub events: broadcast::Sender<CaptureEvent>,
}

impl AppState {
    /// Wire the fetch, inline and capture layers over a live HTTP client.
    pub async fn build(config: &AppConfig, factory: Arc<dyn SandboxFactory>) -> Result<Self, Error> {
        let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(FetchConfig::from(config))?);
        Self::with_fetcher(config, fetcher, factory).await
    }

    pub async fn with_fetcher(
        config: &AppConfig, fetcher: Arc<dyn Fetcher>, factory: Arc<dyn SandboxFactory>,
    ) -> Result<Self, Error> {
        let cache = FetchCache::new(DiskCache::open(&config.cache_dir).await?, fetcher.clone());
        let mut inliner = Inliner::new(cache);
        if config.warm_up {
            inliner = inliner.with_session(Arc::new(SessionEmulator::from_config(fetcher, config)));
        }

        let engine = Arc::new(CaptureEngine::new(factory, CaptureOptions::from(config)));
        let queue = CaptureQueue::new(engine, config.concurrency);
        let pipeline = CapturePipeline::new(inliner, queue).allow_private_hosts(config.allow_private_hosts);

        let sitemap = SitemapClient::from_config(config)?;
        let store = SessionStore::open(&config.screenshot_dir).await?;
        let (events, _) = broadcast::channel(EVENT_BUFFER);

        tracing::info!(
            concurrency = config.concurrency,
            screenshots = %config.screenshot_dir.display(),
            cache = %config.cache_dir.display(),
            "application state ready"
        );
        Ok(Self { pipeline, sitemap, store, events })
    }
}
