//! Immutable point-in-time observations of a product.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{OutcomeKind, ProductFields};

/// One scrape attempt's record. Append-only; never mutated after write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub url: String,
    /// Completion time of the scrape that produced this record.
    pub scraped_at: DateTime<Utc>,
    /// Measurable fields; empty for failed attempts.
    pub fields: ProductFields,
    pub outcome: OutcomeKind,
    /// Failure reason or block evidence.
    pub detail: Option<String>,
    /// Fetch attempts spent on this scrape.
    pub attempts: u32,
}

impl Snapshot {
    /// Record a successful extraction stamped with the current time.
    pub fn success(url: impl Into<String>, fields: ProductFields, attempts: u32) -> Self {
        Self {
            url: url.into(),
            scraped_at: Utc::now(),
            fields,
            outcome: OutcomeKind::Success,
            detail: None,
            attempts,
        }
    }

    /// Record a failed attempt with no measurable fields.
    pub fn failure(
        url: impl Into<String>,
        outcome: OutcomeKind,
        detail: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self {
            url: url.into(),
            scraped_at: Utc::now(),
            fields: ProductFields::default(),
            outcome,
            detail: Some(detail.into()),
            attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == OutcomeKind::Success
    }
}
