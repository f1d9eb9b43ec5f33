//! Process-local store for tests and database-less runs.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ProductStore, Result};
use crate::models::{Product, Snapshot};

#[derive(Default)]
struct Inner {
    products: HashMap<String, Product>,
    history: HashMap<String, Vec<Snapshot>>,
}

/// In-memory [`ProductStore`].
#[derive(Default)]
pub struct InMemoryStore {
    inner: RwLock<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total snapshots across all URLs.
    pub async fn snapshot_count(&self) -> usize {
        self.inner.read().await.history.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl ProductStore for InMemoryStore {
    async fn upsert_product(&self, product: &Product) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.products.insert(product.url.clone(), product.clone());
        Ok(())
    }

    async fn get_product(&self, url: &str) -> Result<Option<Product>> {
        Ok(self.inner.read().await.products.get(url).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let inner = self.inner.read().await;
        let mut products: Vec<Product> = inner.products.values().cloned().collect();
        products.sort_by(|a, b| b.added_at.cmp(&a.added_at).then_with(|| a.url.cmp(&b.url)));
        Ok(products)
    }

    async fn list_product_urls(&self) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let mut products: Vec<&Product> = inner.products.values().collect();
        products.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.url.cmp(&b.url)));
        Ok(products.into_iter().map(|p| p.url.clone()).collect())
    }

    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .history
            .entry(snapshot.url.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn get_history(&self, url: &str) -> Result<Vec<Snapshot>> {
        let inner = self.inner.read().await;
        let mut history = inner.history.get(url).cloned().unwrap_or_default();
        // Stable: equal timestamps keep write order.
        history.sort_by_key(|s| s.scraped_at);
        Ok(history)
    }

    async fn delete_product(&self, url: &str) -> Result<bool> {
        let mut inner = self.inner.write().await;
        inner.history.remove(url);
        Ok(inner.products.remove(url).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OutcomeKind, ProductFields};
    use chrono::Duration;

    const URL: &str = "https://www.amazon.in/dp/B000000001";

    #[tokio::test]
    async fn test_history_sorted_by_timestamp() {
        let store = InMemoryStore::new();
        let later = Snapshot::success(URL, ProductFields::default(), 1);
        let mut earlier = Snapshot::failure(URL, OutcomeKind::Blocked, "captcha", 1);
        earlier.scraped_at = later.scraped_at - Duration::seconds(10);

        store.append_snapshot(&later).await.unwrap();
        store.append_snapshot(&earlier).await.unwrap();

        let history = store.get_history(URL).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].outcome, OutcomeKind::Blocked);
        assert_eq!(store.snapshot_count().await, 2);
    }

    #[tokio::test]
    async fn test_product_ordering_and_delete() {
        let store = InMemoryStore::new();
        let mut first = Product::new("https://www.amazon.in/dp/B000000001");
        first.added_at -= Duration::minutes(5);
        let second = Product::new("https://www.amazon.in/dp/B000000002");
        store.upsert_product(&first).await.unwrap();
        store.upsert_product(&second).await.unwrap();

        let urls = store.list_product_urls().await.unwrap();
        assert_eq!(urls, vec![first.url.clone(), second.url.clone()]);
        let newest = store.list_products().await.unwrap();
        assert_eq!(newest[0].url, second.url);

        assert!(store.delete_product(&first.url).await.unwrap());
        assert!(!store.delete_product(&first.url).await.unwrap());
        assert_eq!(store.list_product_urls().await.unwrap().len(), 1);
    }
}
