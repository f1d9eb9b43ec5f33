//! Data models for pricewatch.

mod job;
mod outcome;
mod product;
mod snapshot;
mod stats;

pub use job::{JobRun, RunParams, RunProgress, RunStatus, RunTrigger};
pub use outcome::{OutcomeKind, ScrapeOutcome};
pub use product::{Product, ProductFields, StockStatus};
pub use snapshot::Snapshot;
pub use stats::{CatalogStats, LOW_RATING_THRESHOLD};
