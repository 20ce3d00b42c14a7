//! The acquisition control loop
//!
//! One [`Scheduler`] owns the active window of work items, the telemetry window
//! and the error log. Attempts run as abortable futures polled by the same loop;
//! they report back through their completion value and a "started" message, so
//! every state transition happens on the loop itself and nothing is locked.

use crate::fetch::{Fetched, Fetcher, Persister};
use crate::grid::{Coordinate, WorkSource};
use crate::proxy::ProxyPool;
use crate::sched::error_log::{ErrorEntry, ErrorLog};
use crate::sched::limiter::RateLimiter;
use crate::sched::progress::{FinalLine, ProgressLine};
use crate::sched::retry::RetryPolicy;
use crate::sched::task::{classify_status, Attempt, ResultCode, RetryDecision, WorkItem};
use crate::sched::telemetry::TelemetryWindow;
use crate::DEFAULT_CONCURRENCY;
use futures::future::{AbortHandle, Abortable, BoxFuture};
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Active window size as a multiple of the concurrency limit
pub const WINDOW_MULTIPLIER: usize = 3;

/// A Running item past this is presumed stuck
pub const LEASE: Duration = Duration::from_secs(30);

/// Loop wake-up when nothing else happens
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Progress, telemetry and error-log flush period
pub const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Scheduler knobs
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum attempts holding a limiter slot at once
    pub concurrency: usize,
    /// Minimum spacing between attempt starts
    pub min_interval: Duration,
    pub window_multiplier: usize,
    pub lease: Duration,
    pub poll_interval: Duration,
    pub report_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            min_interval: Duration::ZERO,
            window_multiplier: WINDOW_MULTIPLIER,
            lease: LEASE,
            poll_interval: POLL_INTERVAL,
            report_interval: REPORT_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    pub fn with_window_multiplier(mut self, multiplier: usize) -> Self {
        self.window_multiplier = multiplier.max(1);
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_report_interval(mut self, interval: Duration) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cap on items materialized at once
    pub fn window(&self) -> usize {
        self.concurrency.saturating_mul(self.window_multiplier)
    }
}

/// Terminal tallies of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    pub done: u64,
    pub failed: u64,
    pub files: u64,
}

/// Sent by an attempt once the limiter admits it
#[derive(Debug)]
struct Started<C> {
    coord: C,
    generation: u64,
}

/// What an attempt observed, before classification
#[derive(Debug)]
enum AttemptOutcome {
    Stored(u16),
    Empty(u16),
    Status(u16),
    PersistFailed { status: u16, error: String },
    Transport(String),
}

impl AttemptOutcome {
    fn status(&self) -> Option<u16> {
        match self {
            AttemptOutcome::Stored(status)
            | AttemptOutcome::Empty(status)
            | AttemptOutcome::Status(status)
            | AttemptOutcome::PersistFailed { status, .. } => Some(*status),
            AttemptOutcome::Transport(_) => None,
        }
    }

    fn classify(self) -> Attempt {
        match self {
            AttemptOutcome::Stored(status) => Attempt::Terminal(ResultCode::Stored { status }),
            AttemptOutcome::Empty(status) => Attempt::Terminal(ResultCode::Empty { status }),
            AttemptOutcome::Status(status) => classify_status(status),
            AttemptOutcome::PersistFailed { error, .. } => {
                Attempt::retryable(ResultCode::PersistFailed, error)
            }
            AttemptOutcome::Transport(error) => Attempt::retryable(ResultCode::NetworkError, error),
        }
    }
}

#[derive(Debug)]
struct AttemptReport<C> {
    coord: C,
    generation: u64,
    proxy: String,
    latency: Duration,
    outcome: AttemptOutcome,
}

type InFlight<C> = FuturesUnordered<Abortable<BoxFuture<'static, AttemptReport<C>>>>;

/// Drives every coordinate of a [`WorkSource`] to Done or Failed
pub struct Scheduler<C, F, W>
where
    C: Coordinate,
    F: Fetcher<C>,
    W: Persister<C, F::Payload>,
{
    config: SchedulerConfig,
    source: WorkSource<C>,
    pool: Arc<ProxyPool>,
    limiter: Arc<RateLimiter>,
    fetcher: Arc<F>,
    persister: Arc<W>,
    errors: ErrorLog,
    active: HashMap<C, WorkItem<C>>,
    telemetry: TelemetryWindow,
    stats: SweepStats,
}

impl<C, F, W> Scheduler<C, F, W>
where
    C: Coordinate,
    F: Fetcher<C>,
    W: Persister<C, F::Payload>,
{
    pub fn new(
        config: SchedulerConfig,
        source: WorkSource<C>,
        pool: Arc<ProxyPool>,
        fetcher: Arc<F>,
        persister: Arc<W>,
        errors: ErrorLog,
    ) -> Self {
        let limiter = Arc::new(RateLimiter::new(config.concurrency, config.min_interval));
        Self {
            config,
            source,
            pool,
            limiter,
            fetcher,
            persister,
            errors,
            active: HashMap::new(),
            telemetry: TelemetryWindow::new(),
            stats: SweepStats::default(),
        }
    }

    /// Run until the source is exhausted and the active window has drained
    pub async fn run(mut self) -> SweepStats {
        let (started_tx, mut started_rx) = mpsc::unbounded_channel::<Started<C>>();
        let mut in_flight: InFlight<C> = FuturesUnordered::new();

        let period = self.config.report_interval;
        let mut next_report = Instant::now() + period;
        let mut last_report = (Instant::now(), 0u64);

        info!(
            items = self.source.remaining(),
            concurrency = self.limiter.max_concurrent(),
            min_interval_ms = self.limiter.min_interval().as_millis() as u64,
            proxies = self.pool.len(),
            "starting sweep"
        );

        loop {
            let now = Instant::now();
            // Checked on every pass, so a steady stream of completions cannot hold it back.
            if now >= next_report {
                self.on_tick(now, &mut last_report);
                next_report = now + period;
            }

            self.refill(now);
            self.dispatch(now, &started_tx, &mut in_flight);

            if self.active.is_empty() && self.source.is_exhausted() {
                break;
            }

            let wake = next_report.min(now + self.config.poll_interval);
            tokio::select! {
                biased;
                Some(started) = started_rx.recv() => self.on_started(started),
                Some(finished) = in_flight.next(), if !in_flight.is_empty() => {
                    // Aborted attempts were already moved on by the reclaim path.
                    if let Ok(report) = finished {
                        self.on_report(report);
                    }
                }
                _ = tokio::time::sleep_until(wake) => {}
            }
        }

        self.flush_errors();
        self.persister.finish();

        let summary = FinalLine {
            done: self.stats.done,
            failed: self.stats.failed,
            files: self.stats.files,
        };
        println!("{}", summary);
        info!(
            done = self.stats.done,
            failed = self.stats.failed,
            files = self.stats.files,
            "sweep finished"
        );
        self.stats
    }

    /// Pull from the source until the window is full
    fn refill(&mut self, now: Instant) {
        let window = self.config.window();
        while self.active.len() < window {
            match self.source.next() {
                Some(coord) => {
                    self.active.insert(coord, WorkItem::new(coord, now));
                }
                None => break,
            }
        }
    }

    /// Hand every eligible item to the rate controller
    fn dispatch(
        &mut self,
        now: Instant,
        started: &mpsc::UnboundedSender<Started<C>>,
        in_flight: &mut InFlight<C>,
    ) {
        for item in self.active.values_mut() {
            if !item.is_eligible(now) {
                continue;
            }

            let (handle, registration) = AbortHandle::new_pair();
            let generation = item.mark_queued(handle);
            let attempt = run_attempt(
                item.coord,
                generation,
                Arc::clone(&self.limiter),
                Arc::clone(&self.pool),
                Arc::clone(&self.fetcher),
                Arc::clone(&self.persister),
                started.clone(),
            );
            in_flight.push(Abortable::new(attempt.boxed(), registration));
        }
    }

    fn on_started(&mut self, started: Started<C>) {
        if let Some(item) = self.active.get_mut(&started.coord) {
            item.mark_running(started.generation, Instant::now(), self.config.lease);
        }
    }

    fn on_report(&mut self, report: AttemptReport<C>) {
        let current = self
            .active
            .get(&report.coord)
            .is_some_and(|item| item.generation() == report.generation && item.is_in_flight());
        if !current {
            debug!(coord = %report.coord, "dropping stale completion");
            return;
        }

        match report.outcome.status() {
            Some(status) => self
                .telemetry
                .record_response(&report.proxy, status, report.latency),
            None => self.telemetry.record_error(),
        }

        match report.outcome.classify() {
            Attempt::Terminal(code) => self.complete(report.coord, code),
            Attempt::Retryable { code, error } => {
                self.retry(report.coord, code, error, Instant::now())
            }
        }
    }

    fn complete(&mut self, coord: C, code: ResultCode) {
        let Some(mut item) = self.active.remove(&coord) else {
            return;
        };
        item.complete(code);

        self.stats.done += 1;
        if code.produced_file() {
            self.stats.files += 1;
        }
        self.persister.on_terminal(&coord, &code, self.source.cursor());
    }

    fn retry(&mut self, coord: C, code: ResultCode, error: String, now: Instant) {
        let Some(item) = self.active.get_mut(&coord) else {
            return;
        };

        match item.fail_attempt(code, error, &self.config.retry, now) {
            RetryDecision::Retry { delay } => {
                debug!(
                    coord = %coord,
                    attempts = item.attempts,
                    result = %code,
                    delay_ms = delay.as_millis() as u64,
                    "retrying"
                );
            }
            RetryDecision::Failed => {
                if let Some(item) = self.active.remove(&coord) {
                    self.give_up(item);
                }
            }
        }
    }

    fn give_up(&mut self, item: WorkItem<C>) {
        self.stats.failed += 1;
        error!(
            coord = %item.coord,
            attempts = item.attempts,
            error = item.last_error.as_deref().unwrap_or_default(),
            "giving up on item"
        );

        if let Err(e) = self.errors.push(&ErrorEntry::from_item(&item)) {
            warn!(error = %e, "could not record failed item");
        }
        if let Some(code) = item.result {
            self.persister.on_terminal(&item.coord, &code, self.source.cursor());
        }
    }

    fn on_tick(&mut self, now: Instant, last_report: &mut (Instant, u64)) {
        self.report_progress(now, last_report);

        let window = self.telemetry.take();
        if !window.is_empty() {
            debug!(
                responses = window.responses(),
                errors = window.errors,
                telemetry = %serde_json::to_string(&window).unwrap_or_default(),
                "telemetry window"
            );
        }

        self.reclaim_expired(now);
        self.flush_errors();
        self.persister.on_tick(self.source.cursor());
    }

    fn report_progress(&self, now: Instant, last_report: &mut (Instant, u64)) {
        let (last_at, last_done) = *last_report;
        let elapsed = now.duration_since(last_at).as_secs_f64().max(0.001);
        let per_second = ((self.stats.done - last_done) as f64 / elapsed).round() as u64;
        let remaining = self.source.remaining() + self.active.len() as u64;
        let eta = if per_second > 0 {
            Duration::from_secs(remaining / per_second)
        } else {
            Duration::ZERO
        };

        let line = ProgressLine {
            per_second,
            active: self.active.len() as u64,
            remaining,
            files: self.stats.files,
            failed: self.stats.failed,
            eta,
        };
        println!("{}", line);
        *last_report = (now, self.stats.done);
    }

    /// Force lease-expired items back through the retry path
    fn reclaim_expired(&mut self, now: Instant) {
        let expired: Vec<C> = self
            .active
            .values()
            .filter(|item| item.lease_expired(now))
            .map(|item| item.coord)
            .collect();

        for coord in expired {
            warn!(coord = %coord, "reclaiming stuck task");
            self.retry(coord, ResultCode::LeaseExpired, "lease expired".to_string(), now);
        }
    }

    fn flush_errors(&mut self) {
        if let Err(e) = self.errors.flush() {
            warn!(error = %e, pending = self.errors.pending(), "could not flush error log");
        }
    }
}

/// One admitted request: pick a proxy, fetch, persist any payload
async fn run_attempt<C, F, W>(
    coord: C,
    generation: u64,
    limiter: Arc<RateLimiter>,
    pool: Arc<ProxyPool>,
    fetcher: Arc<F>,
    persister: Arc<W>,
    started: mpsc::UnboundedSender<Started<C>>,
) -> AttemptReport<C>
where
    C: Coordinate,
    F: Fetcher<C>,
    W: Persister<C, F::Payload>,
{
    let admitted = limiter
        .admit(async {
            let _ = started.send(Started { coord, generation });

            let proxy = pool.next();
            let began = Instant::now();
            let fetched = fetcher.fetch(&coord, &proxy).await;
            let latency = began.elapsed();

            let outcome = match fetched {
                Ok(Fetched::Payload { status, payload }) => {
                    match persister.persist(&coord, payload).await {
                        Ok(()) => AttemptOutcome::Stored(status),
                        Err(e) => AttemptOutcome::PersistFailed {
                            status,
                            error: e.to_string(),
                        },
                    }
                }
                Ok(Fetched::Empty { status }) => AttemptOutcome::Empty(status),
                Ok(Fetched::Status(status)) => AttemptOutcome::Status(status),
                Err(e) => AttemptOutcome::Transport(e.to_string()),
            };
            (proxy.label(), latency, outcome)
        })
        .await;

    let (proxy, latency, outcome) = match admitted {
        Ok(result) => result,
        Err(closed) => (String::new(), Duration::ZERO, AttemptOutcome::Transport(closed.to_string())),
    };

    AttemptReport {
        coord,
        generation,
        proxy,
        latency,
        outcome,
    }
}
