//! Snapshot sink and product catalog persistence.
//!
//! The engine writes through [`ProductStore`]: an append-only snapshot history
//! plus a latest-state product table keyed by URL.

mod memory;
mod sqlite;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::models::{Product, Snapshot};

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Catalog and history storage used by the engine.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Insert or replace the latest state of a product.
    async fn upsert_product(&self, product: &Product) -> Result<()>;

    async fn get_product(&self, url: &str) -> Result<Option<Product>>;

    /// All products, most recently added first.
    async fn list_products(&self) -> Result<Vec<Product>>;

    /// Catalog URLs in the order they were added.
    async fn list_product_urls(&self) -> Result<Vec<String>>;

    /// Append one history record. Records are never updated.
    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// History for a URL, oldest first.
    async fn get_history(&self, url: &str) -> Result<Vec<Snapshot>>;

    /// Remove a product and its history. Returns whether it existed.
    async fn delete_product(&self, url: &str) -> Result<bool>;
}

/// Fixed-width RFC 3339 so stored timestamps sort lexically.
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}
