//! Product catalog models.
//!
//! A product is identified solely by its canonical URL. Its measurable
//! attributes are replaced in place on every successful scrape; failed
//! scrapes only touch the bookkeeping columns.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{OutcomeKind, Snapshot};
use crate::extract::extract_asin;

/// Stock availability as shown on the listing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StockStatus {
    InStock,
    OutOfStock,
    #[default]
    Unknown,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InStock => "in_stock",
            Self::OutOfStock => "out_of_stock",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "in_stock" => Some(Self::InStock),
            "out_of_stock" => Some(Self::OutOfStock),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

/// Measurable attributes of a listing at one instant.
///
/// Everything is optional so failed attempts can be recorded with the same
/// shape. A successful extraction always carries `title` and `price`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductFields {
    pub title: Option<String>,
    pub price: Option<Decimal>,
    /// Strike-through list price (MRP), stored as observed.
    pub list_price: Option<Decimal>,
    /// ISO currency code derived from the price symbol.
    pub currency: Option<String>,
    /// Star rating in `[0, 5]`.
    pub rating: Option<f32>,
    pub review_count: Option<u64>,
    /// Best-seller rank in the listing's top category.
    pub rank: Option<u64>,
    #[serde(default)]
    pub stock: StockStatus,
    pub image_url: Option<String>,
    pub category: Option<String>,
}

/// A monitored product listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Canonical URL, the unique key.
    pub url: String,
    /// Amazon standard identification number parsed from the URL.
    pub asin: Option<String>,
    pub fields: ProductFields,
    pub added_at: DateTime<Utc>,
    pub last_scraped: Option<DateTime<Utc>>,
    pub last_outcome: Option<OutcomeKind>,
}

impl Product {
    /// Create an empty product record for a URL that has never been scraped.
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            asin: extract_asin(&url),
            url,
            fields: ProductFields::default(),
            added_at: Utc::now(),
            last_scraped: None,
            last_outcome: None,
        }
    }

    /// Build a product from its first snapshot.
    pub fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut product = Self::new(snapshot.url.clone());
        product.added_at = snapshot.scraped_at;
        product.apply_snapshot(snapshot);
        product
    }

    /// Fold a snapshot into the latest state.
    ///
    /// Snapshots older than the last recorded scrape are ignored so the
    /// product always reflects the newest observation.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) {
        if let Some(last) = self.last_scraped {
            if snapshot.scraped_at < last {
                return;
            }
        }

        if snapshot.is_success() {
            self.fields = snapshot.fields.clone();
        }
        self.last_scraped = Some(snapshot.scraped_at);
        self.last_outcome = Some(snapshot.outcome);
    }

    pub fn is_in_stock(&self) -> bool {
        self.fields.stock == StockStatus::InStock
    }
}
