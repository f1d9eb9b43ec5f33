//! Concurrent scrape runs with pacing and adaptive block cooldown.
//!
//! A run fans its target URLs out to a small set of workers. Each worker
//! keeps its own minimum spacing between request starts, every run is capped
//! by its own concurrency limit, and all runs share one pool of permits so
//! overlapping scheduled and manual runs never burst past the configured
//! budget together.
//!
//! The first `Blocked` outcome in a run escalates it: the run's concurrency
//! drops to one and a cooldown is injected before the next dispatch. Every
//! further block in the same run extends the cooldown.

mod inflight;

pub use inflight::{InFlightUrls, UrlLease};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::{mpsc, watch, Notify, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::models::{JobRun, Product, RunParams, RunProgress, RunStatus, RunTrigger, ScrapeOutcome};
use crate::repository::{ProductStore, StoreError};
use crate::retry::UrlScraper;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dispatch accounting for one run.
struct Dispatch {
    in_flight: usize,
    limit: usize,
}

/// State shared by the workers of one run.
struct RunState {
    shared: Arc<RunShared>,
    params: RunParams,
    queue: Mutex<VecDeque<String>>,
    dispatch: Mutex<Dispatch>,
    slot_freed: Notify,
    cooldown_until: Mutex<Option<Instant>>,
    cancel: watch::Receiver<bool>,
    outcomes: mpsc::UnboundedSender<(String, ScrapeOutcome)>,
}

/// State shared by a run and every handle observing it.
struct RunShared {
    run: RwLock<JobRun>,
    cancel: watch::Sender<bool>,
    finished: watch::Sender<bool>,
}

/// Completes once the cancel flag is raised.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender dropped without cancelling: never fires.
            std::future::pending::<()>().await;
        }
    }
}

/// A claimed dispatch slot in a run; frees it on drop.
struct Slot<'a> {
    state: &'a RunState,
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        lock(&self.state.dispatch).in_flight -= 1;
        self.state.slot_freed.notify_waiters();
    }
}

impl RunState {
    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn queue_is_empty(&self) -> bool {
        lock(&self.queue).is_empty()
    }

    /// Resolve `fut` unless the run is cancelled first.
    async fn unless_cancelled<F: std::future::Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            out = fut => Some(out),
            _ = cancelled(self.cancel.clone()) => None,
        }
    }

    async fn claim_slot(&self) -> Slot<'_> {
        loop {
            let freed = self.slot_freed.notified();
            {
                let mut d = lock(&self.dispatch);
                if d.in_flight < d.limit {
                    d.in_flight += 1;
                    return Slot { state: self };
                }
            }
            freed.await;
        }
    }

    /// Slot still valid after the limit may have dropped while we waited for the pool.
    fn slot_still_valid(&self) -> bool {
        let d = lock(&self.dispatch);
        d.in_flight <= d.limit
    }

    fn cooling_down(&self) -> bool {
        lock(&self.cooldown_until).is_some_and(|until| until > Instant::now())
    }

    /// Put an undispatched URL back at the head of the queue.
    fn requeue(&self, url: String) {
        lock(&self.queue).push_front(url);
    }

    async fn wait_cooldown(&self) {
        loop {
            let until = *lock(&self.cooldown_until);
            match until {
                Some(until) if until > Instant::now() => {
                    debug!("Cooling down until {:?}", until);
                    tokio::time::sleep_until(until).await;
                }
                _ => return,
            }
        }
    }

    fn escalate(&self, url: &str, evidence: &str) {
        let until = Instant::now() + self.params.block_cooldown;
        {
            let mut cooldown = lock(&self.cooldown_until);
            *cooldown = Some(cooldown.map_or(until, |c| c.max(until)));
        }

        let first = {
            let mut d = lock(&self.dispatch);
            let first = d.limit > 1;
            d.limit = 1;
            first
        };

        let mut run = self
            .shared
            .run
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if !run.escalated {
            run.escalated = true;
            warn!(
                "Run {}: block on {} ({}); concurrency {} -> 1, cooling down {:?}",
                run.id,
                url,
                evidence,
                if first { self.params.max_concurrency } else { 1 },
                self.params.block_cooldown
            );
        } else {
            debug!("Run {}: another block on {}; cooldown extended", run.id, url);
        }
    }
}

/// Executes scrape runs against a shared worker budget.
pub struct JobRunner {
    scraper: Arc<dyn UrlScraper>,
    store: Arc<dyn ProductStore>,
    pool: Arc<Semaphore>,
    pool_size: Mutex<usize>,
    inflight: InFlightUrls,
    params: RwLock<RunParams>,
}

impl JobRunner {
    pub fn new(
        scraper: Arc<dyn UrlScraper>,
        store: Arc<dyn ProductStore>,
        params: RunParams,
    ) -> Self {
        let size = params.max_concurrency.max(1);
        Self {
            scraper,
            store,
            pool: Arc::new(Semaphore::new(size)),
            pool_size: Mutex::new(size),
            inflight: InFlightUrls::new(),
            params: RwLock::new(params),
        }
    }

    /// Parameters the next run will use.
    pub fn params(&self) -> RunParams {
        self.params
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the tunables for subsequent runs. Runs in progress keep theirs.
    pub fn set_params(&self, mut params: RunParams) {
        params.max_concurrency = params.max_concurrency.max(1);
        {
            let mut size = lock(&self.pool_size);
            if params.max_concurrency > *size {
                self.pool.add_permits(params.max_concurrency - *size);
                *size = params.max_concurrency;
            }
        }
        info!(
            "Runner params: concurrency {}, spacing {:?}, block cooldown {:?}",
            params.max_concurrency, params.min_request_spacing, params.block_cooldown
        );
        *self
            .params
            .write()
            .unwrap_or_else(PoisonError::into_inner) = params;
    }

    pub fn inflight(&self) -> &InFlightUrls {
        &self.inflight
    }

    /// Start a run over `urls` and return immediately with its handle.
    pub fn start(self: &Arc<Self>, urls: Vec<String>, trigger: RunTrigger) -> JobHandle {
        let params = self.params();
        let run = JobRun::new(trigger, urls.clone(), params.clone());
        let id = run.id;

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (finished_tx, finished_rx) = watch::channel(false);
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(RunShared {
            run: RwLock::new(run),
            cancel: cancel_tx,
            finished: finished_tx,
        });

        let workers = params.max_concurrency.max(1).min(urls.len().max(1));
        let state = Arc::new(RunState {
            shared: shared.clone(),
            queue: Mutex::new(urls.into_iter().collect()),
            dispatch: Mutex::new(Dispatch {
                in_flight: 0,
                limit: params.max_concurrency.max(1),
            }),
            slot_freed: Notify::new(),
            cooldown_until: Mutex::new(None),
            cancel: cancel_rx,
            outcomes: outcome_tx,
            params,
        });

        info!(
            "Run {} ({}) started: {} URLs, {} workers",
            id,
            trigger.as_str(),
            lock(&state.queue).len(),
            workers
        );

        let runner = self.clone();
        tokio::spawn(async move {
            let mut handles = Vec::with_capacity(workers);
            for worker_id in 0..workers {
                let runner = runner.clone();
                let state = state.clone();
                handles.push(tokio::spawn(async move {
                    runner.worker(&state, worker_id).await;
                }));
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    error!("Run {} worker panicked: {}", id, e);
                }
            }

            let (status, progress) = {
                let mut run = state
                    .shared
                    .run
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                let status = if state.is_cancelled() && run.outcomes.len() < run.targets.len() {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Completed
                };
                run.finish(status);
                (status, run.progress())
            };
            info!(
                "Run {} finished ({:?}): {}/{} done, {} ok, {} soft, {} blocked, {} hard",
                id,
                status,
                progress.done,
                progress.total,
                progress.succeeded,
                progress.soft_failed,
                progress.blocked,
                progress.hard_failed
            );
            state.shared.finished.send_replace(true);
        });

        JobHandle {
            monitor: RunMonitor {
                id,
                shared,
                finished: finished_rx,
            },
            outcomes: outcome_rx,
        }
    }

    async fn worker(&self, state: &RunState, worker_id: usize) {
        let mut last_start: Option<Instant> = None;

        loop {
            if state.is_cancelled() || state.queue_is_empty() {
                break;
            }

            if let Some(last) = last_start {
                let next = last + state.params.min_request_spacing;
                if state
                    .unless_cancelled(tokio::time::sleep_until(next))
                    .await
                    .is_none()
                {
                    break;
                }
            }

            let Some(slot) = state.unless_cancelled(state.claim_slot()).await else {
                break;
            };
            if state.unless_cancelled(state.wait_cooldown()).await.is_none() {
                break;
            }
            let Some(url) = lock(&state.queue).pop_front() else {
                break;
            };

            // Wait out a same-URL scrape before taking a shared permit.
            let lease = self.inflight.acquire(&url).await;
            let Some(Ok(permit)) = state.unless_cancelled(self.pool.acquire()).await else {
                state.requeue(url);
                break;
            };

            if !state.slot_still_valid() || state.cooling_down() {
                // Run escalated or is cooling down; give everything back and queue again.
                state.requeue(url);
                drop(permit);
                drop(lease);
                drop(slot);
                continue;
            }
            if state.is_cancelled() {
                state.requeue(url);
                break;
            }

            last_start = Some(Instant::now());
            debug!("Worker {} scraping {}", worker_id, url);

            let outcome = self.scraper.scrape(&url).await;
            if let ScrapeOutcome::Blocked { evidence, .. } = &outcome {
                state.escalate(&url, evidence);
            }

            let persisted = self.persist(&url, &outcome).await;
            drop(lease);

            {
                let mut run = state
                    .shared
                    .run
                    .write()
                    .unwrap_or_else(PoisonError::into_inner);
                if let Err(e) = persisted {
                    error!("Failed to persist outcome for {}: {}", url, e);
                    run.persist_errors += 1;
                }
                run.record(url.clone(), outcome.clone());
            }
            let _ = state.outcomes.send((url, outcome));

            drop(permit);
            drop(slot);
        }
    }

    /// Append the outcome to history and fold it into the product.
    async fn persist(&self, url: &str, outcome: &ScrapeOutcome) -> Result<(), StoreError> {
        let existing = self.store.get_product(url).await?;
        let mut snapshot = outcome.to_snapshot(url);

        // Keep per-URL history strictly increasing in time.
        if let Some(last) = existing.as_ref().and_then(|p| p.last_scraped) {
            if snapshot.scraped_at <= last {
                snapshot.scraped_at = last + chrono::Duration::microseconds(1);
            }
        }

        self.store.append_snapshot(&snapshot).await?;

        let product = match existing {
            Some(mut product) => {
                product.apply_snapshot(&snapshot);
                product
            }
            None => Product::from_snapshot(&snapshot),
        };
        self.store.upsert_product(&product).await
    }
}

/// Cloneable view of a run for progress polling and cancellation.
#[derive(Clone)]
pub struct RunMonitor {
    id: Uuid,
    shared: Arc<RunShared>,
    finished: watch::Receiver<bool>,
}

impl RunMonitor {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current state of the run.
    pub fn snapshot(&self) -> JobRun {
        self.shared
            .run
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn progress(&self) -> RunProgress {
        self.shared
            .run
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .progress()
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Stop dispatching new URLs. Scrapes already started run to completion.
    pub fn cancel(&self) {
        if !self.is_finished() {
            info!("Cancelling run {}", self.id);
        }
        self.shared.cancel.send_replace(true);
    }

    /// Wait for the run to finish and return its final record.
    pub async fn wait(&self) -> JobRun {
        let mut finished = self.finished.clone();
        // The sender lives in `shared`, which we hold, so this only ends on completion.
        let _ = finished.wait_for(|done| *done).await.is_ok();
        self.snapshot()
    }
}

/// Handle returned when a run starts.
pub struct JobHandle {
    monitor: RunMonitor,
    outcomes: mpsc::UnboundedReceiver<(String, ScrapeOutcome)>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.monitor.id
    }

    pub fn monitor(&self) -> RunMonitor {
        self.monitor.clone()
    }

    pub fn snapshot(&self) -> JobRun {
        self.monitor.snapshot()
    }

    pub fn progress(&self) -> RunProgress {
        self.monitor.progress()
    }

    pub fn is_finished(&self) -> bool {
        self.monitor.is_finished()
    }

    pub fn cancel(&self) {
        self.monitor.cancel();
    }

    /// Next resolved URL, in completion order. `None` once the run is over.
    pub async fn next_outcome(&mut self) -> Option<(String, ScrapeOutcome)> {
        self.outcomes.recv().await
    }

    pub async fn wait(&self) -> JobRun {
        self.monitor.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutcomeKind, ProductFields, Snapshot};
    use crate::repository::InMemoryStore;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Scraper double recording concurrency and start times.
    #[derive(Default)]
    struct FakeScraper {
        delay: Duration,
        blocked: HashSet<String>,
        current: AtomicUsize,
        high_water: AtomicUsize,
        block_seen: AtomicBool,
        after_block_high_water: AtomicUsize,
        block_at: Mutex<Option<Instant>>,
        starts: Mutex<Vec<(String, Instant)>>,
        per_url: Mutex<HashMap<String, usize>>,
        per_url_high_water: AtomicUsize,
    }

    impl FakeScraper {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }

        fn blocking(mut self, url: &str) -> Self {
            self.blocked.insert(url.to_string());
            self
        }

        fn starts(&self) -> Vec<(String, Instant)> {
            lock(&self.starts).clone()
        }
    }

    #[async_trait]
    impl UrlScraper for FakeScraper {
        async fn scrape(&self, url: &str) -> ScrapeOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.high_water.fetch_max(now, Ordering::SeqCst);
            if self.block_seen.load(Ordering::SeqCst) {
                self.after_block_high_water.fetch_max(now, Ordering::SeqCst);
            }
            lock(&self.starts).push((url.to_string(), Instant::now()));
            {
                let mut per_url = lock(&self.per_url);
                let active = per_url.entry(url.to_string()).or_default();
                *active += 1;
                self.per_url_high_water.fetch_max(*active, Ordering::SeqCst);
            }

            let blocked = self.blocked.contains(url);
            let delay = if blocked { self.delay / 2 } else { self.delay };
            tokio::time::sleep(delay).await;

            *lock(&self.per_url).entry(url.to_string()).or_default() -= 1;
            if blocked {
                self.block_seen.store(true, Ordering::SeqCst);
                *lock(&self.block_at) = Some(Instant::now());
            }
            self.current.fetch_sub(1, Ordering::SeqCst);

            if blocked {
                ScrapeOutcome::Blocked {
                    evidence: "robot check".to_string(),
                    attempts: 1,
                }
            } else {
                let fields = ProductFields {
                    title: Some("Towel".to_string()),
                    ..Default::default()
                };
                ScrapeOutcome::Success(Snapshot::success(url, fields, 1))
            }
        }
    }

    fn urls(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://www.amazon.in/dp/B00000{:04}", i))
            .collect()
    }

    fn params(max_concurrency: usize, spacing_ms: u64, cooldown_ms: u64) -> RunParams {
        RunParams {
            max_concurrency,
            min_request_spacing: Duration::from_millis(spacing_ms),
            block_cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    fn runner(
        scraper: Arc<FakeScraper>,
        store: Arc<dyn ProductStore>,
        params: RunParams,
    ) -> Arc<JobRunner> {
        Arc::new(JobRunner::new(scraper, store, params))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_cap_respected() {
        let scraper = Arc::new(FakeScraper::new(Duration::from_millis(100)));
        let store = Arc::new(InMemoryStore::new());
        let runner = runner(scraper.clone(), store.clone(), params(3, 0, 0));

        let run = runner.start(urls(10), RunTrigger::Bulk).wait().await;

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress().done, 10);
        assert_eq!(run.progress().succeeded, 10);
        assert!(scraper.high_water.load(Ordering::SeqCst) <= 3);
        assert_eq!(scraper.high_water.load(Ordering::SeqCst), 3);
        assert_eq!(store.snapshot_count().await, 10);
        assert_eq!(store.list_product_urls().await.unwrap().len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_escalates_to_single_worker_with_cooldown() {
        let targets = urls(10);
        let scraper = Arc::new(FakeScraper::new(Duration::from_millis(100)).blocking(&targets[2]));
        let store = Arc::new(InMemoryStore::new());
        let runner = runner(scraper.clone(), store.clone(), params(3, 0, 500));

        let run = runner.start(targets.clone(), RunTrigger::Bulk).wait().await;

        assert!(run.escalated);
        assert_eq!(run.progress().blocked, 1);
        assert_eq!(run.progress().done, 10);
        assert_eq!(scraper.after_block_high_water.load(Ordering::SeqCst), 1);

        let block_at = lock(&scraper.block_at).expect("block recorded");
        let first_after = scraper
            .starts()
            .into_iter()
            .map(|(_, at)| at)
            .filter(|at| *at >= block_at)
            .min()
            .expect("dispatch resumed after block");
        assert!(first_after - block_at >= Duration::from_millis(500));

        let product = store.get_product(&targets[2]).await.unwrap().unwrap();
        assert_eq!(product.last_outcome, Some(OutcomeKind::Blocked));
        assert!(product.fields.title.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_holds_when_runs_overlap() {
        let all = urls(4);
        let (other, blocked, rest) = (all[0].clone(), all[1].clone(), &all[2..]);
        let scraper = Arc::new(FakeScraper::new(Duration::from_millis(100)).blocking(&blocked));
        let runner = runner(scraper.clone(), Arc::new(InMemoryStore::new()), params(2, 0, 500));

        // The other run keeps one pool permit busy past the block.
        let b = runner.start(vec![other.clone()], RunTrigger::Manual);
        let mut targets = vec![blocked.clone()];
        targets.extend_from_slice(rest);
        let a = runner.start(targets, RunTrigger::Bulk);
        let run = a.wait().await;
        b.wait().await;

        assert!(run.escalated);
        assert_eq!(run.progress().done, 3);

        let block_at = lock(&scraper.block_at).expect("block recorded");
        let first_after = scraper
            .starts()
            .into_iter()
            .filter(|(url, at)| rest.contains(url) && *at >= block_at)
            .map(|(_, at)| at)
            .min()
            .expect("dispatch resumed after block");
        assert!(first_after - block_at >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_spacing_between_requests() {
        let scraper = Arc::new(FakeScraper::new(Duration::from_millis(100)));
        let runner = runner(scraper.clone(), Arc::new(InMemoryStore::new()), params(1, 2000, 0));

        runner.start(urls(3), RunTrigger::Bulk).wait().await;

        let starts = scraper.starts();
        assert_eq!(starts.len(), 3);
        for pair in starts.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(2000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_dispatch_but_finishes_in_flight() {
        let scraper = Arc::new(FakeScraper::new(Duration::from_secs(1)));
        let runner = runner(scraper.clone(), Arc::new(InMemoryStore::new()), params(1, 0, 0));

        let mut handle = runner.start(urls(5), RunTrigger::Bulk);
        let first = handle.next_outcome().await.expect("first outcome");
        assert!(first.1.is_success());
        handle.cancel();

        let run = handle.wait().await;
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.progress().done < 5);
        // Everything that started was allowed to finish and was recorded.
        assert_eq!(scraper.starts().len(), run.progress().done);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_runs_share_the_pool() {
        let scraper = Arc::new(FakeScraper::new(Duration::from_millis(100)));
        let runner = runner(scraper.clone(), Arc::new(InMemoryStore::new()), params(3, 0, 0));

        let all = urls(12);
        let a = runner.start(all[..6].to_vec(), RunTrigger::Scheduled);
        let b = runner.start(all[6..].to_vec(), RunTrigger::Manual);
        a.wait().await;
        b.wait().await;

        assert!(scraper.high_water.load(Ordering::SeqCst) <= 3);
        assert_eq!(scraper.starts().len(), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_url_is_never_scraped_in_parallel() {
        let scraper = Arc::new(FakeScraper::new(Duration::from_millis(100)));
        let store = Arc::new(InMemoryStore::new());
        let runner = runner(scraper.clone(), store.clone(), params(3, 0, 0));

        let shared = urls(1).remove(0);
        let a = runner.start(vec![shared.clone()], RunTrigger::Bulk);
        let b = runner.start(vec![shared.clone()], RunTrigger::Bulk);
        a.wait().await;
        b.wait().await;

        assert_eq!(scraper.per_url_high_water.load(Ordering::SeqCst), 1);
        let history = store.get_history(&shared).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].scraped_at < history[1].scraped_at);
        assert!(runner.inflight().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_wait_does_not_hold_a_pool_permit() {
        let all = urls(2);
        let (shared, other) = (all[0].clone(), all[1].clone());
        let scraper = Arc::new(FakeScraper::new(Duration::from_millis(100)));
        let runner = runner(scraper.clone(), Arc::new(InMemoryStore::new()), params(2, 0, 0));

        let started = Instant::now();
        let a = runner.start(vec![shared.clone()], RunTrigger::Bulk);
        let b = runner.start(vec![shared.clone(), other.clone()], RunTrigger::Bulk);
        a.wait().await;
        b.wait().await;

        // The duplicate waits for its URL while the free permit goes to `other`.
        let other_start = scraper
            .starts()
            .into_iter()
            .find(|(url, _)| *url == other)
            .map(|(_, at)| at)
            .expect("other url scraped");
        assert!(other_start - started < Duration::from_millis(100));
        assert_eq!(scraper.per_url_high_water.load(Ordering::SeqCst), 1);
        assert_eq!(scraper.starts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_params_change_only_affects_next_run() {
        let scraper = Arc::new(FakeScraper::new(Duration::from_millis(100)));
        let runner = runner(scraper, Arc::new(InMemoryStore::new()), params(2, 0, 0));

        let handle = runner.start(urls(4), RunTrigger::Bulk);
        runner.set_params(params(5, 10, 0));
        let run = handle.wait().await;

        assert_eq!(run.params.max_concurrency, 2);
        assert_eq!(runner.params().max_concurrency, 5);
    }

    #[tokio::test]
    async fn test_empty_run_completes() {
        let scraper = Arc::new(FakeScraper::new(Duration::ZERO));
        let runner = runner(scraper, Arc::new(InMemoryStore::new()), params(3, 0, 0));
        let run = runner.start(Vec::new(), RunTrigger::Bulk).wait().await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress().total, 0);
    }

    /// Store whose writes always fail.
    struct BrokenStore;

    #[async_trait]
    impl ProductStore for BrokenStore {
        async fn upsert_product(&self, _: &Product) -> crate::repository::Result<()> {
            Err(StoreError::Unavailable("disk full".into()))
        }
        async fn get_product(&self, _: &str) -> crate::repository::Result<Option<Product>> {
            Ok(None)
        }
        async fn list_products(&self) -> crate::repository::Result<Vec<Product>> {
            Ok(Vec::new())
        }
        async fn list_product_urls(&self) -> crate::repository::Result<Vec<String>> {
            Ok(Vec::new())
        }
        async fn append_snapshot(&self, _: &Snapshot) -> crate::repository::Result<()> {
            Err(StoreError::Unavailable("disk full".into()))
        }
        async fn get_history(&self, _: &str) -> crate::repository::Result<Vec<Snapshot>> {
            Ok(Vec::new())
        }
        async fn delete_product(&self, _: &str) -> crate::repository::Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_persist_errors_are_counted_not_fatal() {
        let scraper = Arc::new(FakeScraper::new(Duration::from_millis(10)));
        let runner = runner(scraper, Arc::new(BrokenStore), params(2, 0, 0));

        let run = runner.start(urls(4), RunTrigger::Bulk).wait().await;
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.progress().done, 4);
        assert_eq!(run.persist_errors, 4);
    }
}
