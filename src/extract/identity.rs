//! Listing identity helpers: ASIN parsing, category guessing, image fallback.

use std::sync::LazyLock;

use regex::Regex;

static ASIN_IN_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/(?:dp|gp/product)/([A-Z0-9]{10})(?:[/?#]|$)").unwrap());

/// Fallback category when nothing else matches.
pub const DEFAULT_CATEGORY: &str = "Home Textile";

/// Title keywords checked in order; the first hit wins.
const CATEGORY_KEYWORDS: &[(&[&str], &str)] = &[
    (&["bath towel"], "Bath Towel"),
    (&["hand towel"], "Hand Towel"),
    (&["face towel"], "Face Towel"),
    (&["towel"], "Towel"),
    (&["bedsheet", "bed sheet"], "Bedsheet"),
    (&["pillow cover"], "Pillow Cover"),
    (&["pillow"], "Pillow"),
    (&["blanket", "duvet", "comforter"], "Blanket"),
    (&["curtain"], "Curtain"),
    (&["bath mat", "rug"], "Bath Mat"),
];

/// Extract the ASIN from a product URL, upper-cased.
pub fn extract_asin(url: &str) -> Option<String> {
    ASIN_IN_PATH
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_ascii_uppercase())
}

/// Guess a category from the product title when no breadcrumb is present.
pub fn guess_category(title: Option<&str>) -> String {
    let Some(title) = title else {
        return DEFAULT_CATEGORY.to_string();
    };
    let lower = title.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, category)| category.to_string())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string())
}

/// Standard CDN image location for an ASIN.
pub fn cdn_image_url(asin: &str) -> String {
    format!(
        "https://images-na.ssl-images-amazon.com/images/P/{}.01._SCLZZZZZZZ_.jpg",
        asin
    )
}
