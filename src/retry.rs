//! Bounded retries that turn fetch and parse errors into a [`ScrapeOutcome`].
//!
//! | error            | action                                   |
//! |------------------|------------------------------------------|
//! | network, timeout | back off and retry                       |
//! | blocked page     | stop, `Blocked`                          |
//! | missing fields   | retry once; `HardFailure` if it recurs   |
//! | not found        | stop, `HardFailure`                      |
//!
//! Running out of attempts on transient errors yields `SoftFailure`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::extract::{ExtractError, Extractor};
use crate::models::{ScrapeOutcome, Snapshot};
use crate::scrapers::{FetchError, Fetcher};

/// Hard ceiling on fetch attempts per scrape.
pub const MAX_ATTEMPTS: u32 = 3;

/// Retry budget and backoff shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fractional spread applied to each delay, e.g. `0.25` for ±25%.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl RetryPolicy {
    /// Build a policy; `max_attempts` is clamped to `1..=3`.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter: f64) -> Self {
        Self {
            max_attempts: max_attempts.clamp(1, MAX_ATTEMPTS),
            base_delay,
            max_delay: max_delay.max(base_delay),
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// No waiting between attempts.
    pub fn immediate() -> Self {
        Self::new(MAX_ATTEMPTS, Duration::ZERO, Duration::ZERO, 0.0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Undithered delay after failed attempt `attempt` (1-based): base doubling, capped.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Delay after failed attempt `attempt`, with jitter applied.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let nominal = self.nominal_delay(attempt);
        if self.jitter <= 0.0 || nominal.is_zero() {
            return nominal;
        }
        let factor = rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        nominal.mul_f64(factor)
    }
}

/// Scrapes one URL to a final outcome.
#[async_trait]
pub trait UrlScraper: Send + Sync {
    async fn scrape(&self, url: &str) -> ScrapeOutcome;
}

/// Absolute http(s) URLs only.
pub fn validate_url(raw: &str) -> Result<url::Url, FetchError> {
    let parsed =
        url::Url::parse(raw).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some_and(|h| !h.is_empty()) => Ok(parsed),
        _ => Err(FetchError::InvalidUrl(format!("{}: not an http(s) URL", raw))),
    }
}

/// Fetcher + extractor under a retry policy.
pub struct ProductScraper {
    fetcher: Arc<Fetcher>,
    extractor: Extractor,
    policy: RetryPolicy,
}

impl ProductScraper {
    pub fn new(fetcher: Arc<Fetcher>, extractor: Extractor, policy: RetryPolicy) -> Self {
        Self {
            fetcher,
            extractor,
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }
}

#[async_trait]
impl UrlScraper for ProductScraper {
    async fn scrape(&self, url: &str) -> ScrapeOutcome {
        if let Err(e) = validate_url(url) {
            return ScrapeOutcome::HardFailure {
                reason: e.to_string(),
                attempts: 0,
            };
        }

        let max_attempts = self.policy.max_attempts();
        let mut last_reason = String::new();
        let mut missing_seen = false;

        for attempt in 1..=max_attempts {
            match self.fetcher.fetch(url, attempt).await {
                Ok(page) => match self.extractor.extract(&page.content, url) {
                    Ok(fields) => {
                        info!("Scraped {} on attempt {}", url, attempt);
                        return ScrapeOutcome::Success(Snapshot::success(url, fields, attempt));
                    }
                    Err(e @ ExtractError::MissingFields(_)) => {
                        let reason = e.to_string();
                        if missing_seen {
                            warn!("{} on {} again, giving up", reason, url);
                            return ScrapeOutcome::HardFailure {
                                reason,
                                attempts: attempt,
                            };
                        }
                        debug!("{} on {} (attempt {})", reason, url, attempt);
                        missing_seen = true;
                        last_reason = reason;
                    }
                },
                Err(FetchError::BlockedPage(evidence)) => {
                    return ScrapeOutcome::Blocked {
                        evidence,
                        attempts: attempt,
                    };
                }
                Err(e @ (FetchError::NotFound(_) | FetchError::InvalidUrl(_))) => {
                    return ScrapeOutcome::HardFailure {
                        reason: e.to_string(),
                        attempts: attempt,
                    };
                }
                Err(e) => {
                    debug!("Transient failure on {} (attempt {}): {}", url, attempt, e);
                    last_reason = e.to_string();
                }
            }

            if attempt < max_attempts {
                let delay = self.policy.delay_for(attempt);
                debug!("Retrying {} in {:?}", url, delay);
                tokio::time::sleep(delay).await;
            }
        }

        warn!("All {} attempts failed for {}: {}", max_attempts, url, last_reason);
        ScrapeOutcome::SoftFailure {
            reason: last_reason,
            attempts: max_attempts,
        }
    }
}
