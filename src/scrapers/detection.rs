//! CAPTCHA, interstitial and not-found page classification.

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Text fragments shown on robot-check and throttling interstitials.
pub const DEFAULT_BLOCK_MARKERS: &[&str] = &[
    "Type the characters you see in this image",
    "Enter the characters you see below",
    "/errors/validateCaptcha",
    "Robot Check",
    "api-services-support@amazon.com",
    "To discuss automated access to Amazon data",
];

pub const DEFAULT_NOT_FOUND_MARKERS: &[&str] =
    &["we couldn't find that page", "Looking for something?"];

/// At least one of these must be present on a genuine listing.
pub const DEFAULT_STRUCTURAL_SELECTORS: &[&str] = &[
    "#dp",
    "#dp-container",
    "#ppd",
    "#centerCol",
    "#productTitle",
    "#title_feature_div",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_block_markers")]
    pub block_markers: Vec<String>,
    #[serde(default = "default_not_found_markers")]
    pub not_found_markers: Vec<String>,
    #[serde(default = "default_structural_selectors")]
    pub structural_selectors: Vec<String>,
}

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_block_markers() -> Vec<String> {
    owned(DEFAULT_BLOCK_MARKERS)
}

fn default_not_found_markers() -> Vec<String> {
    owned(DEFAULT_NOT_FOUND_MARKERS)
}

fn default_structural_selectors() -> Vec<String> {
    owned(DEFAULT_STRUCTURAL_SELECTORS)
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            block_markers: default_block_markers(),
            not_found_markers: default_not_found_markers(),
            structural_selectors: default_structural_selectors(),
        }
    }
}

/// How a fetched page should be treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageVerdict {
    Product,
    /// Anti-bot page, with the evidence that identified it.
    Blocked(String),
    NotFound(String),
}

/// Compiled form of [`DetectionConfig`].
#[derive(Debug, Clone)]
pub struct PageClassifier {
    block_markers: Vec<(String, String)>,
    not_found_markers: Vec<(String, String)>,
    structural: Vec<Selector>,
}

impl Default for PageClassifier {
    fn default() -> Self {
        Self::new(&DetectionConfig::default())
    }
}

impl PageClassifier {
    pub fn new(config: &DetectionConfig) -> Self {
        let lowered = |list: &[String]| -> Vec<(String, String)> {
            list.iter()
                .filter(|m| !m.is_empty())
                .map(|m| (m.clone(), m.to_lowercase()))
                .collect()
        };

        let structural = config
            .structural_selectors
            .iter()
            .filter_map(|s| match Selector::parse(s) {
                Ok(sel) => Some(sel),
                Err(e) => {
                    warn!("Ignoring invalid structural selector {:?}: {:?}", s, e);
                    None
                }
            })
            .collect();

        Self {
            block_markers: lowered(&config.block_markers),
            not_found_markers: lowered(&config.not_found_markers),
            structural,
        }
    }

    /// Classify a rendered page by status code and content.
    ///
    /// Checked in order: removal status, not-found text, throttling status or
    /// block text, then the absence of every expected structural element on an
    /// otherwise successful response.
    pub fn classify(&self, status: u16, content: &str) -> PageVerdict {
        if matches!(status, 404 | 410) {
            return PageVerdict::NotFound(format!("HTTP {}", status));
        }

        let lower = content.to_lowercase();

        if let Some((marker, _)) = self.not_found_markers.iter().find(|(_, m)| lower.contains(m)) {
            return PageVerdict::NotFound(format!("page text matched {:?}", marker));
        }

        if status == 429 || status == 503 {
            return PageVerdict::Blocked(format!("HTTP {}", status));
        }

        if let Some((marker, _)) = self.block_markers.iter().find(|(_, m)| lower.contains(m)) {
            return PageVerdict::Blocked(format!("page text matched {:?}", marker));
        }

        if !self.structural.is_empty() {
            let doc = Html::parse_document(content);
            let has_structure = self
                .structural
                .iter()
                .any(|sel| doc.select(sel).next().is_some());
            if !has_structure {
                return PageVerdict::Blocked(
                    "no expected product elements on the page".to_string(),
                );
            }
        }

        PageVerdict::Product
    }
}
