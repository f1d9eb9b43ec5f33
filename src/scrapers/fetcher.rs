//! Fetch one listing through a page source, with shaping and classification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use super::detection::{PageClassifier, PageVerdict};
use super::session::{SessionPlan, SessionShaping};

/// Classified fetch failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("blocked page: {0}")]
    BlockedPage(String),
    #[error("page not found: {0}")]
    NotFound(String),
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl FetchError {
    /// Worth another attempt after a backoff.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

/// Rendered page content as returned by a page source.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub content: String,
}

/// Something that can render a URL with a given session identity.
///
/// The browser driver implements this; tests substitute scripted doubles.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn render(&self, url: &str, plan: &SessionPlan) -> Result<RenderedPage, FetchError>;
}

/// Shaped, time-bounded, classified page fetches.
pub struct Fetcher {
    source: Arc<dyn PageSource>,
    shaping: SessionShaping,
    classifier: PageClassifier,
    attempt_timeout: Duration,
}

impl Fetcher {
    pub fn new(
        source: Arc<dyn PageSource>,
        shaping: SessionShaping,
        classifier: PageClassifier,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            source,
            shaping,
            classifier,
            attempt_timeout,
        }
    }

    /// Fetch `url` as attempt number `attempt` (1-based).
    ///
    /// Only content classified as a product page is returned.
    pub async fn fetch(&self, url: &str, attempt: u32) -> Result<RenderedPage, FetchError> {
        let plan = self.shaping.plan(attempt);
        debug!(
            "Attempt {} for {} (warm-up: {})",
            attempt,
            url,
            plan.warmup_url.is_some()
        );

        let page = match tokio::time::timeout(self.attempt_timeout, self.source.render(url, &plan))
            .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!("Timed out after {:?} rendering {}", self.attempt_timeout, url);
                return Err(FetchError::Timeout(self.attempt_timeout));
            }
        };

        if page.status >= 500 && page.status != 503 {
            return Err(FetchError::Network(format!("HTTP {}", page.status)));
        }

        match self.classifier.classify(page.status, &page.content) {
            PageVerdict::Product => Ok(page),
            PageVerdict::Blocked(evidence) => {
                warn!("Block detected on {}: {}", url, evidence);
                Err(FetchError::BlockedPage(evidence))
            }
            PageVerdict::NotFound(reason) => Err(FetchError::NotFound(reason)),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted page source for unit tests.

    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub enum Step {
        Page(u16, String),
        Fail(FetchError),
        Hang,
    }

    /// Replays steps in order; repeats the last one once exhausted.
    pub struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        last: Mutex<Option<(u16, String)>>,
        pub plans: Mutex<Vec<SessionPlan>>,
    }

    impl ScriptedSource {
        pub fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: Mutex::new(steps.into()),
                last: Mutex::new(None),
                plans: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.plans.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PageSource for ScriptedSource {
        async fn render(&self, url: &str, plan: &SessionPlan) -> Result<RenderedPage, FetchError> {
            self.plans.lock().unwrap().push(plan.clone());
            let step = self.steps.lock().unwrap().pop_front();
            let (status, content) = match step {
                Some(Step::Page(status, content)) => {
                    *self.last.lock().unwrap() = Some((status, content.clone()));
                    (status, content)
                }
                Some(Step::Fail(err)) => return Err(err),
                Some(Step::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    return Err(FetchError::Network("hung".to_string()));
                }
                None => match self.last.lock().unwrap().clone() {
                    Some(last) => last,
                    None => return Err(FetchError::Network("no scripted response".to_string())),
                },
            };
            Ok(RenderedPage {
                url: url.to_string(),
                final_url: url.to_string(),
                status,
                content,
            })
        }
    }
}
