//! Per-URL exclusion: at most one scrape of a given URL at a time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Registry = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// Registry of URLs currently being scraped.
///
/// A second request for a URL already in flight queues behind the first
/// instead of running in parallel. Unrelated URLs never contend.
#[derive(Clone, Default)]
pub struct InFlightUrls {
    inner: Registry,
}

impl InFlightUrls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `url`.
    pub async fn acquire(&self, url: &str) -> UrlLease {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            map.entry(url.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.clone().lock_owned().await;
        UrlLease {
            url: url.to_string(),
            registry: self.inner.clone(),
            lock,
            guard: Some(guard),
        }
    }

    pub fn is_in_flight(&self, url: &str) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(url)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive hold on one URL; released on drop.
pub struct UrlLease {
    url: String,
    registry: Registry,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl UrlLease {
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Drop for UrlLease {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        // Only the registry and this lease still reference the lock: nobody is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            map.remove(&self.url);
        }
    }
}
