//! Page acquisition for product listings.
//!
//! [`Fetcher`] combines a [`PageSource`] (normally the headless browser) with
//! per-attempt session shaping and block / not-found classification.

pub mod browser;
pub mod detection;
pub mod fetcher;
pub mod session;

pub use browser::{BrowserPageSource, BrowserSettings};
pub use detection::{DetectionConfig, PageClassifier, PageVerdict};
pub use fetcher::{FetchError, Fetcher, PageSource, RenderedPage};
pub use session::{DelayRange, HeaderProfile, SessionPlan, SessionShaping};
