//! Background check of whether the browser tab in focus belongs to the current task.
//!
//! At most one check runs at a time. Every check gets an id and results are only applied while
//! that id is still current, so a cancelled or superseded check can never overwrite newer state.

pub mod llm_client;
pub mod page_client;
pub mod prompt;
#[cfg(test)]
mod test_server;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use tokio::{sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use llm_client::Classifier;
use page_client::{FetchedPage, PageFetcher};

/// Minimum time between two started checks.
pub const RECHECK_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verdict {
    #[default]
    Unknown,
    Relevant,
    Unsure,
    Irrelevant,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelevanceState {
    pub verdict: Verdict,
    /// Only set for [Verdict::Irrelevant].
    pub label: Option<Arc<str>>,
}

#[derive(Debug, Clone)]
pub struct RelevanceRequest {
    pub model: Arc<str>,
    pub task_title: Arc<str>,
    pub window_title: Arc<str>,
}

#[derive(Debug)]
pub struct RelevanceOutcome {
    pub check_id: u64,
    pub result: Result<(Verdict, FetchedPage)>,
}

pub struct RelevancePipeline {
    fetcher: Arc<dyn PageFetcher>,
    classifier: Arc<dyn Classifier>,
    results: mpsc::UnboundedSender<RelevanceOutcome>,
    shutdown: CancellationToken,
    current_id: u64,
    inflight: Option<CancellationToken>,
    last_started: Option<Instant>,
    state: RelevanceState,
}

impl RelevancePipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        classifier: Arc<dyn Classifier>,
        results: mpsc::UnboundedSender<RelevanceOutcome>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            classifier,
            results,
            shutdown,
            current_id: 0,
            inflight: None,
            last_started: None,
            state: RelevanceState::default(),
        }
    }

    pub fn state(&self) -> &RelevanceState {
        &self.state
    }

    pub fn is_inflight(&self) -> bool {
        self.inflight.is_some()
    }

    pub fn set_fetcher(&mut self, fetcher: Arc<dyn PageFetcher>) {
        self.fetcher = fetcher;
    }

    pub fn set_classifier(&mut self, classifier: Arc<dyn Classifier>) {
        self.classifier = classifier;
    }

    fn is_due(&self, now: Instant) -> bool {
        self.last_started
            .map_or(true, |started| now.saturating_duration_since(started) >= RECHECK_INTERVAL)
    }

    /// Starts a check in the background unless one is running or the last one started too
    /// recently. Returns the id of the started check.
    pub fn start(&mut self, request: RelevanceRequest, now: Instant) -> Option<u64> {
        if self.is_inflight() || !self.is_due(now) {
            return None;
        }

        self.current_id += 1;
        let check_id = self.current_id;
        let token = self.shutdown.child_token();
        self.inflight = Some(token.clone());
        self.last_started = Some(now);
        debug!("Starting relevance check {check_id}");

        let fetcher = self.fetcher.clone();
        let classifier = self.classifier.clone();
        let results = self.results.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!("Relevance check {check_id} cancelled");
                    return;
                }
                result = run_check(fetcher, classifier, request) => result,
            };
            // The guard may already be gone, in which case nobody needs the result.
            let _ = results.send(RelevanceOutcome { check_id, result });
        });
        Some(check_id)
    }

    /// Aborts the running check. Results it might still deliver are ignored.
    pub fn cancel(&mut self) {
        if let Some(token) = self.inflight.take() {
            token.cancel();
        }
        self.current_id += 1;
    }

    /// Cancels and forgets the last verdict. Returns whether the verdict changed.
    pub fn reset(&mut self) -> bool {
        if self.is_inflight() {
            self.cancel();
        }
        let changed = self.state != RelevanceState::default();
        self.state = RelevanceState::default();
        changed
    }

    /// Applies a finished check. Returns false when the result was stale.
    pub fn apply(&mut self, outcome: RelevanceOutcome) -> bool {
        if outcome.check_id != self.current_id || self.inflight.is_none() {
            debug!("Discarding stale relevance result {}", outcome.check_id);
            return false;
        }
        self.inflight = None;
        self.state = match outcome.result {
            Ok((Verdict::Irrelevant, page)) => {
                let label = prompt::warning_label(&page);
                info!("Page {label:?} judged off-task");
                RelevanceState {
                    verdict: Verdict::Irrelevant,
                    label: Some(label.into()),
                }
            }
            Ok((verdict, _)) => {
                debug!("Relevance check {} finished with {verdict:?}", outcome.check_id);
                RelevanceState {
                    verdict,
                    label: None,
                }
            }
            Err(e) => {
                debug!("Relevance check {} failed: {e:?}", outcome.check_id);
                RelevanceState::default()
            }
        };
        true
    }
}

async fn run_check(
    fetcher: Arc<dyn PageFetcher>,
    classifier: Arc<dyn Classifier>,
    request: RelevanceRequest,
) -> Result<(Verdict, FetchedPage)> {
    let page = fetcher.fetch(&request.window_title).await?;
    let verdict = classifier
        .classify(&request.model, &request.task_title, &page)
        .await?;
    Ok((verdict, page))
}


#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::anyhow;
    use tokio::{
        sync::{mpsc, Notify},
        time::Instant,
    };
    use tokio_util::sync::CancellationToken;

    use super::{
        fakes::{FakeClassifier, FakeFetcher},
        page_client::FetchedPage,
        *,
    };

    fn request() -> RelevanceRequest {
        RelevanceRequest {
            model: "llama3".into(),
            task_title: "Budget".into(),
            window_title: "Cats - Chromium".into(),
        }
    }

    fn pipeline(
        fetcher: Arc<FakeFetcher>,
        verdict: Verdict,
    ) -> (RelevancePipeline, mpsc::UnboundedReceiver<RelevanceOutcome>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let pipeline = RelevancePipeline::new(
            fetcher,
            Arc::new(FakeClassifier(verdict)),
            sender,
            CancellationToken::new(),
        );
        (pipeline, receiver)
    }

    #[tokio::test]
    async fn test_irrelevant_result_sets_label() {
        let fetcher = Arc::new(FakeFetcher::page("Cats"));
        let (mut pipeline, mut results) = pipeline(fetcher, Verdict::Irrelevant);

        let id = pipeline.start(request(), Instant::now()).unwrap();
        let outcome = results.recv().await.unwrap();
        assert_eq!(outcome.check_id, id);
        assert!(pipeline.apply(outcome));

        assert!(!pipeline.is_inflight());
        assert_eq!(pipeline.state().verdict, Verdict::Irrelevant);
        assert_eq!(pipeline.state().label.as_deref(), Some("Cats"));
    }

    #[tokio::test]
    async fn test_second_start_while_inflight_is_noop() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher::page("Cats").gated(gate.clone()));
        let (mut pipeline, mut results) = pipeline(fetcher.clone(), Verdict::Relevant);

        let now = Instant::now();
        assert_eq!(pipeline.start(request(), now), Some(1));
        assert_eq!(pipeline.start(request(), now + Duration::from_secs(60)), None);

        gate.notify_one();
        let outcome = results.recv().await.unwrap();
        assert!(pipeline.apply(outcome));
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(pipeline.state().verdict, Verdict::Relevant);
    }

    #[tokio::test]
    async fn test_checks_are_rate_limited() {
        let fetcher = Arc::new(FakeFetcher::page("Cats"));
        let (mut pipeline, mut results) = pipeline(fetcher, Verdict::Unsure);

        let now = Instant::now();
        pipeline.start(request(), now).unwrap();
        let outcome = results.recv().await.unwrap();
        pipeline.apply(outcome);

        assert_eq!(pipeline.start(request(), now + Duration::from_secs(14)), None);
        assert_eq!(pipeline.start(request(), now + RECHECK_INTERVAL), Some(2));
    }

    #[tokio::test]
    async fn test_stale_result_is_ignored() {
        let fetcher = Arc::new(FakeFetcher::page("Cats"));
        let (mut pipeline, _results) = pipeline(fetcher, Verdict::Irrelevant);

        let id = pipeline.start(request(), Instant::now()).unwrap();
        pipeline.cancel();
        assert!(!pipeline.is_inflight());

        let applied = pipeline.apply(RelevanceOutcome {
            check_id: id,
            result: Ok((Verdict::Irrelevant, FetchedPage::default())),
        });
        assert!(!applied);
        assert_eq!(pipeline.state(), &RelevanceState::default());
    }

    #[tokio::test]
    async fn test_cancel_aborts_pending_check() {
        let gate = Arc::new(Notify::new());
        let fetcher = Arc::new(FakeFetcher::page("Cats").gated(gate.clone()));
        let (mut pipeline, mut results) = pipeline(fetcher, Verdict::Irrelevant);

        pipeline.start(request(), Instant::now()).unwrap();
        tokio::task::yield_now().await;
        pipeline.cancel();
        gate.notify_one();
        tokio::task::yield_now().await;

        let late = tokio::time::timeout(Duration::from_millis(50), results.recv()).await;
        assert!(matches!(late, Ok(None) | Err(_)));
    }

    #[tokio::test]
    async fn test_failure_clears_warning() {
        let fetcher = Arc::new(FakeFetcher::failing());
        let (mut pipeline, mut results) = pipeline(fetcher, Verdict::Irrelevant);
        pipeline.state = RelevanceState {
            verdict: Verdict::Irrelevant,
            label: Some("Cats".into()),
        };

        pipeline.start(request(), Instant::now()).unwrap();
        let outcome = results.recv().await.unwrap();
        assert!(outcome.result.is_err());
        assert!(pipeline.apply(outcome));
        assert_eq!(pipeline.state(), &RelevanceState::default());

        let outcome = RelevanceOutcome {
            check_id: 99,
            result: Err(anyhow!("late")),
        };
        assert!(!pipeline.apply(outcome));
    }

    #[tokio::test]
    async fn test_reset_reports_change() {
        let fetcher = Arc::new(FakeFetcher::page("Cats"));
        let (mut pipeline, _results) = pipeline(fetcher, Verdict::Irrelevant);
        assert!(!pipeline.reset());
        pipeline.state = RelevanceState {
            verdict: Verdict::Irrelevant,
            label: Some("Cats".into()),
        };
        assert!(pipeline.reset());
        assert_eq!(pipeline.state().verdict, Verdict::Unknown);
    }
}
