//! FIFO capture queue with a concurrency ceiling.
//!
//! One dispatcher task takes jobs in submission order and acquires a
//! semaphore permit for each before spawning it, so admission order equals
//! submission order. A running capture holds its permit until the engine
//! returns. Dropping a [`CaptureTicket`] abandons the job: if it has not
//! been admitted yet it is skipped, otherwise it runs to completion and its
//! result is discarded.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, oneshot};

use pageshot_core::{CaptureRequest, CaptureResult, Error};

use super::CaptureEngine;

struct Job {
    request: CaptureRequest,
    html: String,
    reply: oneshot::Sender<CaptureResult>,
}

/// Handle to one submitted capture.
pub struct CaptureTicket {
    request: CaptureRequest,
    rx: oneshot::Receiver<CaptureResult>,
}

impl CaptureTicket {
    pub fn request(&self) -> &CaptureRequest {
        &self.request
    }

    /// Wait for the capture to finish.
    pub async fn wait(self) -> CaptureResult {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => CaptureResult::failed(&self.request, &Error::RenderFailed("capture task dropped".into())),
        }
    }
}

pub struct CaptureQueue {
    tx: mpsc::UnboundedSender<Job>,
    ceiling: usize,
}

impl CaptureQueue {
    /// Start a queue whose captures run on `engine`, at most `ceiling` at a time.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(engine: Arc<CaptureEngine>, ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(engine, Arc::new(Semaphore::new(ceiling)), rx));
        Self { tx, ceiling }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Enqueue a capture of the inlined document `html`.
    pub fn submit(&self, request: CaptureRequest, html: String) -> CaptureTicket {
        let (reply, rx) = oneshot::channel();
        let ticket = CaptureTicket { request: request.clone(), rx };
        if self.tx.send(Job { request, html, reply }).is_err() {
            tracing::error!("capture dispatcher is gone");
        }
        ticket
    }
}

async fn dispatch(engine: Arc<CaptureEngine>, permits: Arc<Semaphore>, mut rx: mpsc::UnboundedReceiver<Job>) {
    while let Some(job) = rx.recv().await {
        if job.reply.is_closed() {
            tracing::debug!(url = %job.request.page_url, "skipping abandoned capture");
            continue;
        }

        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };

        let engine = engine.clone();
        tokio::spawn(async move {
            let result = engine.capture(&job.request, &job.html).await;
            drop(permit);
            if job.reply.send(result).is_err() {
                tracing::debug!(url = %job.request.page_url, "capture finished after its ticket was dropped");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sandbox::testing::FakeFactory;
    use crate::capture::{CaptureObserver, CaptureOptions, CaptureStage};
    use pageshot_core::ViewportMode;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    #[derive(Default)]
    struct Admissions(Mutex<Vec<String>>);

    impl CaptureObserver for Admissions {
        fn on_stage(&self, request: &CaptureRequest, stage: CaptureStage) {
            if stage == CaptureStage::Created {
                self.0.lock().unwrap().push(request.page_url.clone());
            }
        }
    }

    fn engine(factory: FakeFactory) -> CaptureEngine {
        CaptureEngine::new(Arc::new(factory), CaptureOptions { settle: Duration::ZERO, ..Default::default() })
    }

    fn page(n: usize) -> CaptureRequest {
        CaptureRequest::new(format!("https://shop.test/{n}"), ViewportMode::Mobile)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ceiling_bounds_render_stage() {
        let factory = FakeFactory { render_delay: Duration::from_millis(250), ..FakeFactory::new(900) };
        let counters = factory.counters.clone();
        let queue = CaptureQueue::new(Arc::new(engine(factory)), 2);

        let tickets: Vec<_> = (0..6).map(|n| queue.submit(page(n), "<p>x</p>".into())).collect();
        for ticket in tickets {
            assert!(ticket.wait().await.is_captured());
        }

        assert_eq!(counters.max_rendering.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admission_follows_submission_order() {
        let admissions = Arc::new(Admissions::default());
        let factory = FakeFactory { render_delay: Duration::from_millis(50), ..FakeFactory::new(900) };
        let queue = CaptureQueue::new(Arc::new(engine(factory).with_observer(admissions.clone())), 1);

        let tickets: Vec<_> = (0..4).map(|n| queue.submit(page(n), String::new())).collect();
        for ticket in tickets {
            ticket.wait().await;
        }

        let expected: Vec<String> = (0..4).map(|n| page(n).page_url).collect();
        assert_eq!(*admissions.0.lock().unwrap(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_cancel_siblings() {
        let factory = FakeFactory { poison: Some("BAD".into()), ..FakeFactory::new(900) };
        let queue = CaptureQueue::new(Arc::new(engine(factory)), 2);

        let ok = queue.submit(page(1), "fine".into());
        let bad = queue.submit(page(2), "BAD".into());
        let ok_again = queue.submit(page(3), "fine".into());

        assert!(ok.wait().await.is_captured());
        assert!(!bad.wait().await.is_captured());
        assert!(ok_again.wait().await.is_captured());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_ticket_skipped_before_admission() {
        let factory = FakeFactory { render_delay: Duration::from_millis(100), ..FakeFactory::new(900) };
        let counters = factory.counters.clone();
        let queue = CaptureQueue::new(Arc::new(engine(factory)), 1);

        let first = queue.submit(page(1), String::new());
        drop(queue.submit(page(2), String::new()));
        let third = queue.submit(page(3), String::new());

        first.wait().await;
        third.wait().await;
        assert_eq!(counters.created.load(Ordering::SeqCst), 2);
    }
}
