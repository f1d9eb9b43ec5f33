//! Listing page extraction.
//!
//! Turns rendered product HTML into [`ProductFields`]. Title and price are
//! required; everything else is best-effort and recorded as absent when it
//! cannot be found or parsed.

mod identity;
mod numeric;

pub use identity::{cdn_image_url, extract_asin, guess_category, DEFAULT_CATEGORY};
pub use numeric::{detect_currency, parse_count, parse_decimal, parse_rating, NumberError};

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::debug;

use crate::models::{ProductFields, StockStatus};

/// Extraction failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

fn selectors(list: &[&str]) -> Vec<Selector> {
    list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
}

static TITLE: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&["#productTitle", "h1.a-size-large", "h1"]));

static PRICE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        ".priceToPay .a-offscreen",
        ".apexPriceToPay .a-offscreen",
        "#corePrice_feature_div .a-offscreen",
        "#corePriceDisplay_desktop_feature_div .a-price .a-offscreen",
        "#priceblock_ourprice",
        "#priceblock_dealprice",
    ])
});

static PRICE_WHOLE: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&[".a-price-whole"]));
static PRICE_FRACTION: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&[".a-price-fraction"]));
static PRICE_SYMBOL: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&[".a-price-symbol"]));

static LIST_PRICE: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        ".basisPrice .a-offscreen",
        ".a-price.a-text-price .a-offscreen",
        "#listPrice",
    ])
});

static RATING: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "#acrPopover",
        ".a-icon-star .a-icon-alt",
        "#averageCustomerReviews .a-icon-alt",
    ])
});

static REVIEWS: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&["#acrCustomerReviewText", "#acrCustomerReviewLink span"]));

static RANK_ROWS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "#detailBulletsWrapper_feature_div li",
        "#productDetails_detailBullets_sections1 tr",
        "#SalesRank",
    ])
});

static STOCK: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "#availability span",
        "#availability",
        "#outOfStock",
        "#almostGoneMessage",
    ])
});

static IMAGE: LazyLock<Vec<Selector>> =
    LazyLock::new(|| selectors(&["#imgBlkFront", "#landingImage", "#main-image"]));

static SCRIPT: LazyLock<Vec<Selector>> = LazyLock::new(|| selectors(&["script"]));

static BREADCRUMB: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    selectors(&[
        "#wayfinding-breadcrumbs_feature_div ul li a",
        ".a-breadcrumb li a",
    ])
});

static RANK_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"#\s*([\d,.]+)").unwrap());

static LARGE_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""large"\s*:\s*"(https://[^"]+)""#).unwrap());

/// Collapse whitespace runs in an element's text.
fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First non-empty text matched by any selector, in priority order.
fn first_text(doc: &Html, list: &[Selector]) -> Option<String> {
    list.iter()
        .flat_map(|sel| doc.select(sel))
        .map(|el| element_text(&el))
        .find(|text| !text.is_empty())
}

/// HTML to [`ProductFields`] extractor.
#[derive(Debug, Clone, Default)]
pub struct Extractor;

impl Extractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract the measurable fields from a rendered listing.
    ///
    /// Fails with [`ExtractError::MissingFields`] when the title or a
    /// parseable price is absent. A price token that cannot be normalized is
    /// reported as missing rather than recorded as zero.
    pub fn extract(&self, html: &str, url: &str) -> Result<ProductFields, ExtractError> {
        let doc = Html::parse_document(html);
        let mut missing = Vec::new();

        let title = first_text(&doc, &TITLE);
        if title.is_none() {
            missing.push("title");
        }

        let (price_text, price) = self.price(&doc);
        if price.is_none() {
            if let Some(text) = &price_text {
                debug!("Unparseable price text {:?} on {}", text, url);
            }
            missing.push("price");
        }

        if !missing.is_empty() {
            return Err(ExtractError::MissingFields(missing));
        }

        let currency = price_text
            .as_deref()
            .and_then(detect_currency)
            .or_else(|| first_text(&doc, &PRICE_SYMBOL).as_deref().and_then(detect_currency))
            .map(str::to_string);

        let asin = extract_asin(url);
        let category = self
            .breadcrumb(&doc)
            .or_else(|| Some(guess_category(title.as_deref())));

        Ok(ProductFields {
            price,
            list_price: first_text(&doc, &LIST_PRICE).and_then(|t| parse_decimal(&t).ok()),
            currency,
            rating: self.rating(&doc),
            review_count: first_text(&doc, &REVIEWS).and_then(|t| parse_count(&t).ok()),
            rank: self.rank(&doc),
            stock: self.stock(&doc),
            image_url: self.image(&doc, asin.as_deref()),
            category,
            title,
        })
    }

    fn price(&self, doc: &Html) -> (Option<String>, Option<rust_decimal::Decimal>) {
        if let Some(text) = first_text(doc, &PRICE) {
            let price = parse_decimal(&text).ok();
            return (Some(text), price);
        }

        // Split widget: whole part and fraction in separate spans.
        let Some(whole) = first_text(doc, &PRICE_WHOLE) else {
            return (None, None);
        };
        let whole = whole.trim_end_matches(['.', ',']).to_string();
        let text = match first_text(doc, &PRICE_FRACTION) {
            Some(fraction) => format!("{}.{}", whole.replace(['.', ','], ""), fraction),
            None => whole,
        };
        let price = parse_decimal(&text).ok();
        (Some(text), price)
    }

    fn rating(&self, doc: &Html) -> Option<f32> {
        RATING
            .iter()
            .flat_map(|sel| doc.select(sel))
            .flat_map(|el| {
                let title = el.value().attr("title").map(str::to_string);
                [title, Some(element_text(&el))]
            })
            .flatten()
            .find_map(|text| parse_rating(&text).ok())
    }

    fn rank(&self, doc: &Html) -> Option<u64> {
        RANK_ROWS
            .iter()
            .flat_map(|sel| doc.select(sel))
            .map(|el| element_text(&el))
            .filter(|text| text.contains("Best Seller"))
            .find_map(|text| {
                RANK_NUMBER
                    .captures(&text)
                    .and_then(|c| c.get(1))
                    .and_then(|m| parse_count(m.as_str()).ok())
            })
    }

    fn stock(&self, doc: &Html) -> StockStatus {
        let Some(text) = first_text(doc, &STOCK) else {
            return StockStatus::Unknown;
        };
        let lower = text.to_lowercase();
        if lower.contains("out of stock") || lower.contains("unavailable") {
            StockStatus::OutOfStock
        } else if lower.contains("in stock") || lower.contains("available") {
            StockStatus::InStock
        } else {
            StockStatus::Unknown
        }
    }

    fn image(&self, doc: &Html, asin: Option<&str>) -> Option<String> {
        let from_img = IMAGE
            .iter()
            .flat_map(|sel| doc.select(sel))
            .find_map(|el| {
                let value = el.value();
                value
                    .attr("data-old-hires")
                    .filter(|s| !s.is_empty())
                    .or_else(|| value.attr("src").filter(|s| s.starts_with("http")))
                    .map(str::to_string)
            });
        if from_img.is_some() {
            return from_img;
        }

        let from_script = SCRIPT
            .iter()
            .flat_map(|sel| doc.select(sel))
            .find_map(|el| {
                let body: String = el.text().collect();
                LARGE_IMAGE
                    .captures(&body)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().to_string())
            });
        if from_script.is_some() {
            return from_script;
        }

        asin.map(cdn_image_url)
    }

    fn breadcrumb(&self, doc: &Html) -> Option<String> {
        for sel in BREADCRUMB.iter() {
            let crumbs: Vec<String> = doc
                .select(sel)
                .map(|el| element_text(&el))
                .filter(|t| !t.is_empty())
                .collect();
            if crumbs.len() > 1 {
                return crumbs.last().cloned();
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const URL: &str = "https://www.amazon.in/Cotton-Bath-Towel/dp/B0C1234567";

    fn page(price: &str) -> String {
        format!(
            r#"<html><body>
            <div id="wayfinding-breadcrumbs_feature_div"><ul>
              <li><a>Home &amp; Kitchen</a></li><li><a>Bath</a></li><li><a>Towels</a></li>
            </ul></div>
            <span id="productTitle">  Cotton Bath Towel, 500 GSM  </span>
            <div class="priceToPay"><span class="a-offscreen">{}</span></div>
            <div class="basisPrice"><span class="a-offscreen">$1,999.00</span></div>
            <span id="acrPopover" title="4.3 out of 5 stars"></span>
            <span id="acrCustomerReviewText">12,345 ratings</span>
            <ul id="detailBulletsWrapper_feature_div">
              <li>Best Sellers Rank: #1,234 in Home &amp; Kitchen</li>
            </ul>
            <div id="availability"><span>In stock</span></div>
            <img id="landingImage" data-old-hires="https://m.media-amazon.com/images/I/big.jpg" src="https://m.media-amazon.com/images/I/small.jpg">
            </body></html>"#,
            price
        )
    }

    #[test]
    fn test_full_listing() {
        let fields = Extractor::new().extract(&page("$1,234.56"), URL).unwrap();
        assert_eq!(fields.title.as_deref(), Some("Cotton Bath Towel, 500 GSM"));
        assert_eq!(fields.price, Some(Decimal::from_str("1234.56").unwrap()));
        assert_eq!(fields.list_price, Some(Decimal::from_str("1999.00").unwrap()));
        assert_eq!(fields.currency.as_deref(), Some("USD"));
        assert_eq!(fields.rating, Some(4.3));
        assert_eq!(fields.review_count, Some(12345));
        assert_eq!(fields.rank, Some(1234));
        assert_eq!(fields.stock, StockStatus::InStock);
        assert_eq!(
            fields.image_url.as_deref(),
            Some("https://m.media-amazon.com/images/I/big.jpg")
        );
        assert_eq!(fields.category.as_deref(), Some("Towels"));
    }

    #[test]
    fn test_unparseable_price_is_missing_not_zero() {
        let err = Extractor::new()
            .extract(&page("Currently unavailable"), URL)
            .unwrap_err();
        assert_eq!(err, ExtractError::MissingFields(vec!["price"]));
    }

    #[test]
    fn test_missing_title_and_price() {
        let err = Extractor::new()
            .extract("<html><body><p>nothing here</p></body></html>", URL)
            .unwrap_err();
        assert_eq!(err, ExtractError::MissingFields(vec!["title", "price"]));
    }

    #[test]
    fn test_split_price_widget_and_fallbacks() {
        let html = r#"<html><body>
            <h1>Satin Pillow Cover</h1>
            <span class="a-price-symbol">₹</span>
            <span class="a-price-whole">1,299.</span><span class="a-price-fraction">00</span>
            <div id="availability"><span>Currently unavailable.</span></div>
            <script>var data = {"colorImages":{"initial":[{"large":"https://m.media-amazon.com/images/I/pillow.jpg"}]}};</script>
            </body></html>"#;
        let fields = Extractor::new().extract(html, URL).unwrap();
        assert_eq!(fields.price, Some(Decimal::from_str("1299.00").unwrap()));
        assert_eq!(fields.currency.as_deref(), Some("INR"));
        assert_eq!(fields.list_price, None);
        assert_eq!(fields.rating, None);
        assert_eq!(fields.stock, StockStatus::OutOfStock);
        assert_eq!(
            fields.image_url.as_deref(),
            Some("https://m.media-amazon.com/images/I/pillow.jpg")
        );
        assert_eq!(fields.category.as_deref(), Some("Pillow Cover"));
    }

    #[test]
    fn test_image_falls_back_to_cdn() {
        let html = r#"<span id="productTitle">Towel</span>
            <span id="priceblock_ourprice">₹499</span>"#;
        let fields = Extractor::new().extract(html, URL).unwrap();
        assert_eq!(fields.image_url, Some(cdn_image_url("B0C1234567")));
        assert_eq!(fields.stock, StockStatus::Unknown);
    }
}
