//! Periodic full-catalog refresh.
//!
//! The scheduler is an owned value with an explicit lifecycle
//! (`start` / `set_interval` / `stop`), so several independent schedules can
//! coexist in one process.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::RunTrigger;
use crate::repository::ProductStore;
use crate::runner::{JobRunner, RunMonitor};

pub const MIN_INTERVAL: Duration = Duration::from_secs(30 * 60);
pub const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("interval {0:?} is outside the allowed range of 30 minutes to 24 hours")]
    IntervalOutOfRange(Duration),
}

/// Check that an interval lies in `[30 min, 24 h]`.
pub fn validate_interval(interval: Duration) -> Result<(), ScheduleError> {
    if (MIN_INTERVAL..=MAX_INTERVAL).contains(&interval) {
        Ok(())
    } else {
        Err(ScheduleError::IntervalOutOfRange(interval))
    }
}

/// Interval for a user-supplied number of minutes; huge values saturate.
pub fn interval_from_minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

/// Where the timer loop is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Waiting { next_fire: DateTime<Utc> },
    Running { run_id: Uuid },
}

/// Interval and next fire time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    interval: Duration,
    next_fire: Option<(Instant, DateTime<Utc>)>,
}

impl SchedulerConfig {
    pub fn new(interval: Duration) -> Result<Self, ScheduleError> {
        validate_interval(interval)?;
        Ok(Self {
            interval,
            next_fire: None,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_fire_time(&self) -> Option<DateTime<Utc>> {
        self.next_fire.map(|(_, wall)| wall)
    }

    /// Schedule the next fire one interval from now.
    fn arm(&mut self) -> DateTime<Utc> {
        let wall = Utc::now()
            + chrono::Duration::from_std(self.interval).unwrap_or(chrono::Duration::zero());
        self.next_fire = Some((Instant::now() + self.interval, wall));
        wall
    }
}

/// Answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub interval: Duration,
    /// `None` while idle or while a scheduled run is in progress.
    pub next_fire_time: Option<DateTime<Utc>>,
    pub is_running: bool,
}

struct Inner {
    config: SchedulerConfig,
    state: SchedulerState,
    current: Option<RunMonitor>,
}

/// Timer loop firing scheduled refresh runs.
pub struct Scheduler {
    runner: Arc<JobRunner>,
    store: Arc<dyn ProductStore>,
    inner: Mutex<Inner>,
    reconfigured: Notify,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        runner: Arc<JobRunner>,
        store: Arc<dyn ProductStore>,
        interval: Duration,
    ) -> Result<Self, ScheduleError> {
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            runner,
            store,
            inner: Mutex::new(Inner {
                config: SchedulerConfig::new(interval)?,
                state: SchedulerState::Idle,
                current: None,
            }),
            reconfigured: Notify::new(),
            shutdown,
            task: Mutex::new(None),
        })
    }

    fn inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> SchedulerState {
        self.inner().state.clone()
    }

    pub fn status(&self) -> SchedulerStatus {
        let inner = self.inner();
        SchedulerStatus {
            interval: inner.config.interval(),
            next_fire_time: match inner.state {
                SchedulerState::Waiting { next_fire } => Some(next_fire),
                _ => None,
            },
            is_running: matches!(inner.state, SchedulerState::Running { .. }),
        }
    }

    /// Change the interval.
    ///
    /// While waiting, the next fire moves to now + `interval` without firing.
    /// While a run is in progress only the following cycle is affected.
    pub fn set_interval(&self, interval: Duration) -> Result<(), ScheduleError> {
        validate_interval(interval)?;
        let mut inner = self.inner();
        inner.config.interval = interval;
        if let SchedulerState::Waiting { .. } = inner.state {
            let next_fire = inner.config.arm();
            inner.state = SchedulerState::Waiting { next_fire };
            info!(
                "Scheduler interval set to {:?}; next refresh at {}",
                interval, next_fire
            );
            drop(inner);
            self.reconfigured.notify_one();
        } else {
            info!("Scheduler interval set to {:?}", interval);
        }
        Ok(())
    }

    /// Enter `Waiting` and spawn the timer loop. No-op if already started.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        self.shutdown.send_replace(false);
        {
            let mut inner = self.inner();
            let next_fire = inner.config.arm();
            inner.state = SchedulerState::Waiting { next_fire };
            info!("Scheduler started; first refresh at {}", next_fire);
        }

        let scheduler = self.clone();
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(async move {
            scheduler.run_loop(shutdown).await;
        }));
    }

    /// Stop the loop, cancelling any scheduled run in progress, and go idle.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Scheduler loop ended abnormally: {}", e);
            }
        }
        let mut inner = self.inner();
        inner.state = SchedulerState::Idle;
        inner.config.next_fire = None;
        inner.current = None;
        info!("Scheduler stopped");
    }

    /// The scheduled run in progress, if any.
    pub fn current_run(&self) -> Option<RunMonitor> {
        self.inner().current.clone()
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let deadline = match self.inner().config.next_fire {
                Some((at, _)) => at,
                None => return,
            };

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {}
                _ = self.reconfigured.notified() => continue,
                _ = shutdown_requested(&mut shutdown) => return,
            }

            // A reconfiguration may have moved the deadline while we slept.
            let due = matches!(self.inner().config.next_fire, Some((at, _)) if at <= Instant::now());
            if !due {
                continue;
            }

            if !self.fire(&mut shutdown).await {
                return;
            }
        }
    }

    /// Run one scheduled refresh. Returns false if shutdown was requested.
    async fn fire(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let urls = match self.store.list_product_urls().await {
            Ok(urls) => urls,
            Err(e) => {
                error!("Could not list catalog for scheduled refresh: {}", e);
                Vec::new()
            }
        };
        info!("Scheduled refresh firing over {} products", urls.len());

        let handle = self.runner.start(urls, RunTrigger::Scheduled);
        {
            let mut inner = self.inner();
            inner.state = SchedulerState::Running {
                run_id: handle.id(),
            };
            inner.current = Some(handle.monitor());
        }

        let keep_going = tokio::select! {
            _ = handle.wait() => true,
            _ = shutdown_requested(shutdown) => {
                handle.cancel();
                handle.wait().await;
                false
            }
        };

        let mut inner = self.inner();
        inner.current = None;
        if keep_going {
            let next_fire = inner.config.arm();
            inner.state = SchedulerState::Waiting { next_fire };
            debug!("Next scheduled refresh at {}", next_fire);
        }
        keep_going
    }
}

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
