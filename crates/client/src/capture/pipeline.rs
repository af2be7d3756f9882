//! Batch capture: gate, inline and queue every page of a request.
//!
//! Pages are inlined concurrently but submitted to the [`CaptureQueue`] in
//! request order. Per-page failures become [`CaptureResult::Failed`]; a
//! fatal error (unusable cache directory) aborts the whole batch.

use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;

use pageshot_core::{CaptureRequest, CaptureResult, Error};

use super::queue::{CaptureQueue, CaptureTicket};
use crate::fetch::{canonicalize, ensure_public_host};
use crate::inline::Inliner;

/// One finished page of a batch. Completion order is not request order.
#[derive(Debug, Clone, Copy)]
pub struct BatchProgress<'a> {
    pub index: usize,
    pub total: usize,
    pub result: &'a CaptureResult,
}

pub struct CapturePipeline {
    inliner: Inliner,
    queue: CaptureQueue,
    allow_private_hosts: bool,
}

impl CapturePipeline {
    pub fn new(inliner: Inliner, queue: CaptureQueue) -> Self {
        Self { inliner, queue, allow_private_hosts: false }
    }

    pub fn allow_private_hosts(mut self, allow: bool) -> Self {
        self.allow_private_hosts = allow;
        self
    }

    pub fn inliner(&self) -> &Inliner {
        &self.inliner
    }

    /// Canonicalize `url` and refuse private targets unless allowed.
    pub async fn gate(&self, url: &str) -> Result<url::Url, Error> {
        gate(url, self.allow_private_hosts).await
    }

    /// Capture every request; results come back in request order.
    ///
    /// `on_progress` is called as each page finishes.
    ///
    /// # Errors
    ///
    /// Only fatal errors ([`Error::is_fatal`]) are returned; running captures
    /// still complete but their results are discarded.
    pub async fn capture_batch<F>(&self, requests: Vec<CaptureRequest>, mut on_progress: F) -> Result<Vec<CaptureResult>, Error>
    where
        F: FnMut(BatchProgress<'_>),
    {
        let total = requests.len();
        tracing::info!(pages = total, "capture batch started");

        let mut preparing: Vec<_> = requests
            .iter()
            .map(|request| {
                let inliner = self.inliner.clone();
                let request = request.clone();
                let allow = self.allow_private_hosts;
                tokio::spawn(async move { prepare(&inliner, &request, allow).await })
            })
            .collect();

        let mut results: Vec<Option<CaptureResult>> = vec![None; total];
        let mut pending = FuturesUnordered::new();

        for (index, request) in requests.into_iter().enumerate() {
            let prepared = match (&mut preparing[index]).await {
                Ok(prepared) => prepared,
                Err(e) => Err(Error::FetchFailed(format!("inline task failed: {e}"))),
            };

            match prepared {
                Ok(html) => {
                    let ticket = self.queue.submit(request, html);
                    pending.push(wait_indexed(index, ticket));
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(url = %request.page_url, "aborting batch: {e}");
                    preparing[index + 1..].iter().for_each(|handle| handle.abort());
                    return Err(e);
                }
                Err(e) => {
                    tracing::warn!(url = %request.page_url, "page not captured: {e}");
                    let result = CaptureResult::failed(&request, &e);
                    on_progress(BatchProgress { index, total, result: &result });
                    results[index] = Some(result);
                }
            }
        }

        while let Some((index, result)) = pending.next().await {
            on_progress(BatchProgress { index, total, result: &result });
            results[index] = Some(result);
        }

        let results: Vec<CaptureResult> = results.into_iter().flatten().collect();
        let captured = results.iter().filter(|r| r.is_captured()).count();
        tracing::info!(pages = total, captured, failed = total - captured, "capture batch finished");
        Ok(results)
    }
}

async fn wait_indexed(index: usize, ticket: CaptureTicket) -> (usize, CaptureResult) {
    (index, ticket.wait().await)
}

async fn gate(url: &str, allow_private_hosts: bool) -> Result<url::Url, Error> {
    let parsed = canonicalize(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
    if !allow_private_hosts {
        ensure_public_host(&parsed).await.map_err(|e| Error::SsrfBlocked(format!("{parsed}: {e}")))?;
    }
    Ok(parsed)
}

async fn prepare(inliner: &Inliner, request: &CaptureRequest, allow_private_hosts: bool) -> Result<String, Error> {
    let url = gate(&request.page_url, allow_private_hosts).await?;
    let document = inliner.inline(url.as_str(), request.cookie.as_deref()).await?;
    Ok(document.html)
}
