//! Trigger interface over the runner, scheduler and store.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::config::Config;
use crate::extract::Extractor;
use crate::models::{CatalogStats, Product, RunParams, RunTrigger, ScrapeOutcome, Snapshot};
use crate::repository::{InMemoryStore, ProductStore, SqliteStore, StoreError};
use crate::retry::{ProductScraper, UrlScraper};
use crate::runner::{JobHandle, JobRunner};
use crate::scheduler::{ScheduleError, Scheduler, SchedulerStatus};
use crate::scrapers::{BrowserPageSource, Fetcher, PageClassifier};

#[derive(Debug, Error)]
pub enum EngineError {
    /// Rejected input. Nothing was changed.
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ScheduleError> for EngineError {
    fn from(e: ScheduleError) -> Self {
        Self::Validation(e.to_string())
    }
}

/// Trim, drop empty entries and duplicates, keep first-seen order.
pub fn clean_urls<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    urls.into_iter()
        .map(|u| u.as_ref().trim().to_string())
        .filter(|u| !u.is_empty())
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

/// Monitoring engine: one runner shared by every trigger plus the refresh schedule.
pub struct MonitorEngine {
    runner: Arc<JobRunner>,
    store: Arc<dyn ProductStore>,
    scheduler: Arc<Scheduler>,
    browser: Option<Arc<BrowserPageSource>>,
}

impl MonitorEngine {
    pub fn new(
        scraper: Arc<dyn UrlScraper>,
        store: Arc<dyn ProductStore>,
        params: RunParams,
        interval: Duration,
    ) -> Result<Self, EngineError> {
        let runner = Arc::new(JobRunner::new(scraper, store.clone(), params));
        let scheduler = Arc::new(Scheduler::new(runner.clone(), store.clone(), interval)?);
        Ok(Self {
            runner,
            store,
            scheduler,
            browser: None,
        })
    }

    /// Wire the browser-backed scraper and the configured store.
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let interval = config.scheduler_interval()?;

        let store: Arc<dyn ProductStore> = match &config.database {
            Some(path) => {
                info!("Using catalog database at {}", path.display());
                Arc::new(SqliteStore::new(path)?)
            }
            None => {
                warn!("No database configured; catalog and history are kept in memory");
                Arc::new(InMemoryStore::new())
            }
        };

        let browser = Arc::new(BrowserPageSource::new(config.browser.clone()));
        let fetcher = Fetcher::new(
            browser.clone(),
            config.session_shaping(),
            PageClassifier::new(&config.detection),
            config.attempt_timeout(),
        );
        let scraper = ProductScraper::new(Arc::new(fetcher), Extractor::new(), config.retry_policy());

        let mut engine = Self::new(Arc::new(scraper), store, config.run_params(), interval)?;
        engine.browser = Some(browser);
        Ok(engine)
    }

    /// Begin the scheduled refresh cycle.
    pub fn start(&self) {
        self.scheduler.start();
    }

    /// Stop scheduling, cancel a scheduled run in progress and release the browser.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        if let Some(browser) = &self.browser {
            browser.close().await;
        }
    }

    /// Scrape a single URL and wait for its outcome.
    pub async fn scrape_one(&self, url: &str) -> ScrapeOutcome {
        let url = url.trim().to_string();
        let handle = self.runner.start(vec![url.clone()], RunTrigger::Manual);
        let run = handle.wait().await;
        match run.outcomes.into_iter().find(|(u, _)| *u == url) {
            Some((_, outcome)) => outcome,
            None => ScrapeOutcome::HardFailure {
                reason: "run ended without an outcome".to_string(),
                attempts: 0,
            },
        }
    }

    /// Start a run over `urls` and return its handle immediately.
    pub fn scrape_bulk<I, S>(&self, urls: I) -> JobHandle
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls = clean_urls(urls);
        info!("Bulk scrape requested for {} URLs", urls.len());
        self.runner.start(urls, RunTrigger::Bulk)
    }

    /// Start a run over the whole catalog.
    pub async fn refresh_all(&self) -> Result<JobHandle, EngineError> {
        let urls = self.store.list_product_urls().await?;
        info!("Manual refresh of {} products", urls.len());
        Ok(self.runner.start(urls, RunTrigger::Manual))
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }

    /// Rejects intervals outside 30 minutes to 24 hours without side effect.
    pub fn set_scheduler_interval(&self, interval: Duration) -> Result<(), EngineError> {
        self.scheduler.set_interval(interval)?;
        Ok(())
    }

    /// Snapshots for `url`, oldest first.
    pub async fn history(&self, url: &str) -> Result<Vec<Snapshot>, EngineError> {
        Ok(self.store.get_history(url.trim()).await?)
    }

    pub async fn product(&self, url: &str) -> Result<Option<Product>, EngineError> {
        Ok(self.store.get_product(url.trim()).await?)
    }

    pub async fn products(&self) -> Result<Vec<Product>, EngineError> {
        Ok(self.store.list_products().await?)
    }

    pub async fn stats(&self) -> Result<CatalogStats, EngineError> {
        let products = self.store.list_products().await?;
        Ok(CatalogStats::from_products(&products))
    }

    /// Tunables for subsequent runs.
    pub fn set_run_params(&self, params: RunParams) {
        self.runner.set_params(params);
    }

    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_urls() {
        let urls = clean_urls([
            "  https://www.amazon.in/dp/B000000001 ",
            "",
            "   ",
            "https://www.amazon.in/dp/B000000002",
            "https://www.amazon.in/dp/B000000001",
        ]);
        assert_eq!(
            urls,
            vec![
                "https://www.amazon.in/dp/B000000001".to_string(),
                "https://www.amazon.in/dp/B000000002".to_string(),
            ]
        );
    }

    #[test]
    fn test_schedule_error_is_validation() {
        let err: EngineError = ScheduleError::IntervalOutOfRange(Duration::from_secs(600)).into();
        assert!(matches!(err, EngineError::Validation(_)));
    }
}
