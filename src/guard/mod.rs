use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use chrono::{DateTime, FixedOffset, NaiveDate};
use collection::{
    aggregator::{BucketKey, FlushMode, UsageAggregator},
    snapshot::{DisplayScope, UsageSnapshot},
    ActiveApp,
};
use config::GuardConfig;
use relevance::{
    llm_client::{Classifier, OllamaClient},
    page_client::{DebugPageClient, PageFetcher},
    RelevanceOutcome, RelevancePipeline, RelevanceRequest,
};
use session::{GuardObserver, SessionSource, SessionState, TaskRef};
use storage::{
    entities::{TotalsQuery, UsageIncrement},
    usage_store::{UsageStorage, UsageStore},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};
use warning::{WarningInputs, WarningSignal, WarningState};

use crate::{
    utils::{
        clock::{Clock, DefaultClock},
        time::{bucket_start, day_bounds, retention_cutoff},
    },
    window_api::{GenericWindowManager, NoWindowManager, WindowManager},
};

pub mod args;
pub mod collection;
pub mod config;
pub mod relevance;
pub mod session;
pub mod shutdown;
pub mod storage;
pub mod warning;

pub const DATABASE_FILE: &str = "usage.sqlite";
pub const CONFIG_FILE: &str = "config.json";

/// Requests other parts of the application can send to a running guard.
pub enum GuardCommand {
    Reconfigure(GuardConfig),
    ShowScope(DisplayScope),
    ClearUsage,
    Snapshot(oneshot::Sender<UsageSnapshot>),
    Warning(oneshot::Sender<WarningState>),
}

/// Cheap to clone way of talking to a [Guard] running on its own task.
#[derive(Clone)]
pub struct GuardHandle {
    sender: mpsc::UnboundedSender<GuardCommand>,
}

impl GuardHandle {
    fn send(&self, command: GuardCommand) -> Result<()> {
        self.sender
            .send(command)
            .map_err(|_| anyhow!("Focus guard is not running"))
    }

    pub fn reconfigure(&self, config: GuardConfig) -> Result<()> {
        self.send(GuardCommand::Reconfigure(config))
    }

    pub fn show_scope(&self, scope: DisplayScope) -> Result<()> {
        self.send(GuardCommand::ShowScope(scope))
    }

    pub fn clear_usage(&self) -> Result<()> {
        self.send(GuardCommand::ClearUsage)
    }

    pub async fn snapshot(&self) -> Result<UsageSnapshot> {
        let (sender, receiver) = oneshot::channel();
        self.send(GuardCommand::Snapshot(sender))?;
        Ok(receiver.await?)
    }

    pub async fn warning(&self) -> Result<WarningState> {
        let (sender, receiver) = oneshot::channel();
        self.send(GuardCommand::Warning(sender))?;
        Ok(receiver.await?)
    }
}

/// Collaborators of a [Guard]. Production values come from [create_guard], tests swap in fakes.
pub struct GuardDeps {
    pub window_manager: Box<dyn WindowManager>,
    pub session: Box<dyn SessionSource>,
    pub observer: Box<dyn GuardObserver>,
    /// `None` keeps the guard running without persistence.
    pub store: Option<Box<dyn UsageStorage>>,
    pub clock: Box<dyn Clock>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub classifier: Arc<dyn Classifier>,
    /// Whether the language model service answered when the guard was created.
    pub llm_available: bool,
}

/// Samples the focused application, keeps usage statistics and decides when to warn.
///
/// All state lives here and is only touched from [Guard::run]. Network work happens on spawned
/// tasks and comes back through a channel.
pub struct Guard {
    config: GuardConfig,
    window_manager: Box<dyn WindowManager>,
    session: Box<dyn SessionSource>,
    observer: Box<dyn GuardObserver>,
    store: Option<Box<dyn UsageStorage>>,
    clock: Box<dyn Clock>,
    aggregator: UsageAggregator,
    snapshot: UsageSnapshot,
    current_day: Option<NaiveDate>,
    last_tick: Option<Instant>,
    last_app: Option<ActiveApp>,
    task: Option<TaskRef>,
    relevance: RelevancePipeline,
    relevance_results: mpsc::UnboundedReceiver<RelevanceOutcome>,
    llm_available: bool,
    warning: WarningSignal,
    commands: mpsc::UnboundedReceiver<GuardCommand>,
    shutdown: CancellationToken,
}

impl Guard {
    pub fn new(
        config: GuardConfig,
        deps: GuardDeps,
        shutdown: CancellationToken,
    ) -> (Self, GuardHandle) {
        let (command_sender, commands) = mpsc::unbounded_channel();
        let (result_sender, relevance_results) = mpsc::unbounded_channel();
        let relevance = RelevancePipeline::new(
            deps.fetcher,
            deps.classifier,
            result_sender,
            shutdown.child_token(),
        );
        let guard = Self {
            config: config.normalized(),
            window_manager: deps.window_manager,
            session: deps.session,
            observer: deps.observer,
            store: deps.store,
            clock: deps.clock,
            aggregator: UsageAggregator::new(),
            snapshot: UsageSnapshot::new(DisplayScope::Global),
            current_day: None,
            last_tick: None,
            last_app: None,
            task: None,
            relevance,
            relevance_results,
            llm_available: deps.llm_available,
            warning: WarningSignal::default(),
            commands,
            shutdown,
        };
        (
            guard,
            GuardHandle {
                sender: command_sender,
            },
        )
    }

    pub fn snapshot(&self) -> &UsageSnapshot {
        &self.snapshot
    }

    pub fn warning(&self) -> &WarningState {
        self.warning.current()
    }

    fn tracking(&self) -> bool {
        self.task.is_some()
    }

    /// Executes the guard event loop until the shutdown token is cancelled.
    pub async fn run(mut self) -> Result<()> {
        info!("Focus guard started");
        let mut interval = self.config.detection_interval();
        let mut next_tick = self.clock.instant();
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.clock.sleep_until(next_tick) => {
                    self.tick();
                    next_tick += interval;
                    let now = self.clock.instant();
                    // After a suspend, resume the cadence instead of replaying missed ticks.
                    if next_tick < now {
                        next_tick = now + interval;
                    }
                }
                Some(outcome) = self.relevance_results.recv() => self.apply_relevance(outcome),
                Some(command) = self.commands.recv() => {
                    self.handle_command(command);
                    if self.config.detection_interval() != interval {
                        interval = self.config.detection_interval();
                        next_tick = self.clock.instant() + interval;
                    }
                }
            }
        }
        self.finish();
        Ok(())
    }

    /// One heartbeat: measure, roll over, sample, accumulate, re-check and warn.
    #[instrument(skip(self), level = "trace")]
    pub fn tick(&mut self) {
        let now = self.clock.instant();
        let elapsed = self.elapsed_since_last_tick(now);
        let local_now = self.clock.local_time();

        if self.current_day != Some(local_now.date_naive()) {
            self.roll_day(local_now);
        }
        let flushed = self.aggregator.rotate(bucket_start(local_now.timestamp()));
        self.persist(&flushed);

        let session = self.session.session();
        self.update_tracking(&session);

        if !self.tracking() && !self.config.global_stats_enabled {
            self.last_app = None;
            self.refresh_warning();
            return;
        }

        let app = match self.window_manager.get_active_window_data() {
            Ok(Some(data)) => ActiveApp::from(data),
            Ok(None) => {
                trace!("No focused window");
                return;
            }
            Err(e) => {
                trace!("Failed to sample the focused window {e:?}");
                return;
            }
        };

        self.accumulate(&app, elapsed);
        self.last_app = Some(app);
        self.maybe_start_relevance_check(now);
        self.refresh_warning();
    }

    /// Time since the previous tick. Gaps longer than three intervals come from suspends or
    /// stalls and only count as one interval.
    fn elapsed_since_last_tick(&mut self, now: Instant) -> Duration {
        let interval = self.config.detection_interval();
        let elapsed = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(Duration::ZERO);
        self.last_tick = Some(now);
        if elapsed > interval * 3 {
            debug!("Tick gap of {elapsed:?} counted as {interval:?}");
            interval
        } else {
            elapsed
        }
    }

    fn roll_day(&mut self, local_now: DateTime<FixedOffset>) {
        if let Some(previous) = self.current_day {
            info!("Day changed from {previous}, starting new statistics");
        }
        let flushed = self.aggregator.drain(FlushMode::RoundRemainder);
        self.persist(&flushed);
        self.current_day = Some(local_now.date_naive());
        self.prune(local_now);
        self.rebuild_snapshot(local_now);
    }

    fn update_tracking(&mut self, session: &SessionState) {
        let task = session.tracked_task().cloned();
        if task != self.task {
            // A verdict or running check only applies to the task it was judged against.
            if self.relevance.reset() {
                debug!("Task changed, relevance verdict dropped");
            }
            match &task {
                Some(task) => info!("Tracking task {} ({})", task.title, task.id),
                None => info!("Tracking paused"),
            }
        }
        self.task = task;
        if !self.tracking() {
            self.refresh_warning();
        }
    }

    fn accumulate(&mut self, app: &ActiveApp, elapsed: Duration) {
        let millis = elapsed.as_millis() as u64;
        if millis == 0 {
            return;
        }

        let mut snapshot_changed = false;
        self.aggregator
            .record(BucketKey::global(app.key.clone()), app.name.clone(), millis);
        if self.snapshot.scope() == &DisplayScope::Global {
            self.snapshot.add(app.key.clone(), app.name.clone(), millis);
            snapshot_changed = true;
        }

        if let Some(task) = &self.task {
            self.aggregator.record(
                BucketKey::task(task.id.clone(), app.key.clone()),
                app.name.clone(),
                millis,
            );
            if matches!(self.snapshot.scope(), DisplayScope::Task(id) if *id == task.id) {
                self.snapshot.add(app.key.clone(), app.name.clone(), millis);
                snapshot_changed = true;
            }
        }

        if snapshot_changed {
            self.observer.usage_changed(&self.snapshot);
        }
    }

    fn relevance_request(&self) -> Option<RelevanceRequest> {
        if !self.config.warnings_enabled
            || !self.config.relevance_enabled
            || !self.llm_available
            || self.config.llm_model.is_empty()
        {
            return None;
        }
        let task = self.task.as_ref()?;
        let app = self.last_app.as_ref()?;
        if !app.key.contains(self.config.browser_app.as_str()) {
            return None;
        }
        Some(RelevanceRequest {
            model: self.config.llm_model.as_str().into(),
            task_title: task.title.clone(),
            window_title: app.title.clone(),
        })
    }

    fn maybe_start_relevance_check(&mut self, now: Instant) {
        if let Some(request) = self.relevance_request() {
            self.relevance.start(request, now);
        }
    }

    fn apply_relevance(&mut self, outcome: RelevanceOutcome) {
        if self.relevance.apply(outcome) {
            self.refresh_warning();
        }
    }

    fn refresh_warning(&mut self) {
        let next = warning::evaluate(&WarningInputs {
            tracking: self.tracking(),
            warnings_enabled: self.config.warnings_enabled,
            active_app: self.last_app.as_ref(),
            blacklist: &self.config.blacklist,
            browser_app: &self.config.browser_app,
            relevance: self.relevance.state(),
        });
        self.warning.update(next, self.observer.as_mut());
    }

    fn persist(&self, increments: &[UsageIncrement]) {
        if increments.is_empty() {
            return;
        }
        let Some(store) = &self.store else {
            return;
        };
        match store.add(increments) {
            Ok(()) => debug!("Flushed {} usage rows", increments.len()),
            Err(e) => warn!("Failed to save usage, {} rows lost: {e:?}", increments.len()),
        }
    }

    fn prune(&self, local_now: DateTime<FixedOffset>) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.prune_before(retention_cutoff(local_now)) {
            warn!("Failed to prune old usage {e:?}");
        }
    }

    /// Reloads today's usage for the displayed scope: stored totals plus whatever is still
    /// pending in memory.
    fn rebuild_snapshot(&mut self, local_now: DateTime<FixedOffset>) {
        let scope = self.snapshot.scope().clone();
        let mut snapshot = UsageSnapshot::new(scope.clone());

        if let Some(store) = &self.store {
            let (from, to) = day_bounds(local_now);
            let query = match &scope {
                DisplayScope::Global => TotalsQuery::global(from, to),
                DisplayScope::Task(id) => TotalsQuery::task(id.clone(), from, to),
            };
            match store.totals(&query) {
                Ok(totals) => {
                    for total in totals {
                        let millis = total.duration_sec.max(0) as u64 * 1000;
                        snapshot.add(total.app_key, total.app_name, millis);
                    }
                }
                Err(e) => warn!("Failed to load today's usage {e:?}"),
            }
        }

        for (key, name, millis) in self.aggregator.pending_for(&scope) {
            snapshot.add(key.clone(), name.clone(), millis);
        }

        self.snapshot = snapshot;
        self.observer.usage_changed(&self.snapshot);
    }

    fn reconfigure(&mut self, config: GuardConfig) {
        let config = config.normalized();
        if config == self.config {
            return;
        }
        let previous = std::mem::replace(&mut self.config, config);

        if previous.debug_port != self.config.debug_port {
            self.relevance
                .set_fetcher(Arc::new(DebugPageClient::new(self.config.debug_port)));
        }
        if previous.llm_url != self.config.llm_url
            || previous.llm_timeout_secs != self.config.llm_timeout_secs
        {
            self.relevance.set_classifier(Arc::new(OllamaClient::new(
                &self.config.llm_url,
                self.config.llm_timeout(),
            )));
        }

        let relevance_invalidated = !self.config.relevance_enabled
            || !self.config.warnings_enabled
            || previous.llm_model != self.config.llm_model
            || previous.llm_url != self.config.llm_url
            || previous.debug_port != self.config.debug_port
            || previous.browser_app != self.config.browser_app;
        if relevance_invalidated && self.relevance.reset() {
            debug!("Relevance verdict dropped after configuration change");
        }

        info!("Configuration updated");
        self.refresh_warning();
    }

    fn handle_command(&mut self, command: GuardCommand) {
        match command {
            GuardCommand::Reconfigure(config) => self.reconfigure(config),
            GuardCommand::ShowScope(scope) => {
                if &scope != self.snapshot.scope() {
                    self.snapshot = UsageSnapshot::new(scope);
                    self.rebuild_snapshot(self.clock.local_time());
                }
            }
            GuardCommand::ClearUsage => {
                let discarded = self.aggregator.drain(FlushMode::RoundRemainder);
                debug!("Dropped {} pending usage rows", discarded.len());
                if let Some(store) = &self.store {
                    if let Err(e) = store.clear() {
                        error!("Failed to clear usage {e:?}");
                    }
                }
                info!("Usage statistics cleared");
                self.rebuild_snapshot(self.clock.local_time());
            }
            GuardCommand::Snapshot(reply) => {
                let _ = reply.send(self.snapshot.clone());
            }
            GuardCommand::Warning(reply) => {
                let _ = reply.send(self.warning.current().clone());
            }
        }
    }

    /// Stops background work and writes out everything pending.
    fn finish(&mut self) {
        self.relevance.cancel();
        let flushed = self.aggregator.drain(FlushMode::RoundRemainder);
        self.persist(&flushed);
        info!("Focus guard stopped");
    }
}

/// Builds a guard wired to the real window system, store, browser and language model.
/// Anything that is unavailable degrades to a disabled feature.
pub async fn create_guard(
    app_dir: &Path,
    config: GuardConfig,
    session: Box<dyn SessionSource>,
    observer: Box<dyn GuardObserver>,
    shutdown: CancellationToken,
) -> (Guard, GuardHandle) {
    let config = config.normalized();

    let window_manager: Box<dyn WindowManager> = match GenericWindowManager::new() {
        Ok(manager) => Box::new(manager),
        Err(e) => {
            warn!("Window system is not available, focus sampling disabled: {e:?}");
            Box::new(NoWindowManager)
        }
    };

    let store: Option<Box<dyn UsageStorage>> = match UsageStore::open(&app_dir.join(DATABASE_FILE)) {
        Ok(store) => Some(Box::new(store)),
        Err(e) => {
            warn!("Usage store is not available, statistics won't be saved: {e:?}");
            None
        }
    };

    let classifier = OllamaClient::new(&config.llm_url, config.llm_timeout());
    let llm_available = classifier.is_available().await;
    if config.relevance_enabled && !llm_available {
        info!("Page relevance checks disabled, language model service is not reachable");
    }

    Guard::new(
        config.clone(),
        GuardDeps {
            window_manager,
            session,
            observer,
            store,
            clock: Box::new(DefaultClock),
            fetcher: Arc::new(DebugPageClient::new(config.debug_port)),
            classifier: Arc::new(classifier),
            llm_available,
        },
        shutdown,
    )
}

/// Represents the starting point for a guard running until the process is interrupted.
pub async fn start_guard(
    app_dir: &Path,
    config: GuardConfig,
    session: Box<dyn SessionSource>,
    observer: Box<dyn GuardObserver>,
) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let (guard, _handle) =
        create_guard(app_dir, config, session, observer, shutdown_token.clone()).await;

    let (_, guard_result) = tokio::join!(shutdown::detect_shutdown(shutdown_token), guard.run());

    if let Err(e) = &guard_result {
        error!("Focus guard got an error {e:?}");
    }
    guard_result
}
