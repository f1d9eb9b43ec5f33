//! Locale-tolerant numeric parsing for listing text.
//!
//! Listing pages render numbers with currency symbols, thousand separators
//! in either convention (`1,234.56` / `1.234,56`), Indian lakh grouping
//! (`1,23,456`) and trailing punctuation from split price widgets (`1,299.`).
//! A token that cannot be normalized is an error, never zero.

use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use thiserror::Error;

static NUMBER_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.,]?\d[\d.,]*").unwrap());

static RATING_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:[.,]\d+)?)\s+out\s+of").unwrap());

/// Numeric parse failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NumberError {
    #[error("no numeric token in {0:?}")]
    NoDigits(String),
    #[error("cannot normalize numeric token {0:?}")]
    Malformed(String),
}

/// Find the first numeric token, ignoring narrow/no-break space grouping.
fn first_token(text: &str) -> Result<String, NumberError> {
    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(c, '\u{00A0}' | '\u{202F}' | '\u{2009}'))
        .collect();
    let m = NUMBER_TOKEN
        .find(&cleaned)
        .ok_or_else(|| NumberError::NoDigits(text.to_string()))?;
    let mut token = m.as_str();
    // "Rs.1,299": a separator glued to a word is punctuation, not a decimal point.
    if token.starts_with(['.', ','])
        && cleaned[..m.start()]
            .chars()
            .next_back()
            .is_some_and(char::is_alphanumeric)
    {
        token = &token[1..];
    }
    Ok(token.trim_end_matches(['.', ',']).to_string())
}

/// A lone separator followed by exactly three digits is grouping, not a decimal point.
fn is_lone_grouping(token: &str, sep: char) -> bool {
    let mut parts = token.split(sep);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(tail), None) => tail.len() == 3,
        _ => false,
    }
}

/// Groups after the leading one must be 2 or 3 digits and the last exactly 3.
fn valid_grouping(integer: &str, sep: char) -> bool {
    let groups: Vec<&str> = integer.split(sep).collect();
    if groups.len() == 1 {
        return true;
    }
    if groups[0].is_empty() || groups[0].len() > 3 {
        return false;
    }
    let tail = &groups[1..];
    tail.iter().all(|g| g.len() == 2 || g.len() == 3) && tail.last().is_some_and(|g| g.len() == 3)
}

fn normalize(token: &str) -> Result<String, NumberError> {
    let malformed = || NumberError::Malformed(token.to_string());

    // ".99" has no integer part.
    if let Some(fraction) = token.strip_prefix(['.', ',']) {
        if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        return Ok(format!("0.{}", fraction));
    }

    let decimal_sep = match (token.rfind('.'), token.rfind(',')) {
        (Some(dot), Some(comma)) => Some(if dot > comma { '.' } else { ',' }),
        (Some(_), None) if token.matches('.').count() == 1 && !is_lone_grouping(token, '.') => {
            Some('.')
        }
        (None, Some(_)) if token.matches(',').count() == 1 && !is_lone_grouping(token, ',') => {
            Some(',')
        }
        _ => None,
    };

    let (integer, fraction) = match decimal_sep {
        Some(sep) => {
            let (i, f) = token.rsplit_once(sep).ok_or_else(malformed)?;
            if f.is_empty() || !f.chars().all(|c| c.is_ascii_digit()) {
                return Err(malformed());
            }
            (i, Some(f))
        }
        None => (token, None),
    };

    let group_sep = match decimal_sep {
        Some('.') => ',',
        Some(_) => '.',
        None if integer.contains(',') && integer.contains('.') => return Err(malformed()),
        None if integer.contains('.') => '.',
        None => ',',
    };
    if integer.contains(decimal_sep.unwrap_or(group_sep)) && decimal_sep.is_some() {
        return Err(malformed());
    }
    if !valid_grouping(integer, group_sep) {
        return Err(malformed());
    }

    let digits: String = integer.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(malformed());
    }
    Ok(match fraction {
        Some(f) => format!("{}.{}", digits, f),
        None => digits,
    })
}

/// Parse a money amount such as `"$1,234.56"`, `"₹ 1,299.00"` or `"1.234,56 €"`.
pub fn parse_decimal(text: &str) -> Result<Decimal, NumberError> {
    let token = first_token(text)?;
    let normalized = normalize(&token)?;
    Decimal::from_str(&normalized).map_err(|_| NumberError::Malformed(token))
}

/// Parse a whole count such as `"12,345 ratings"` or `"#1,234 in Home"`.
pub fn parse_count(text: &str) -> Result<u64, NumberError> {
    let token = first_token(text)?;
    let normalized = normalize(&token)?;
    if normalized.contains('.') {
        return Err(NumberError::Malformed(token));
    }
    normalized
        .parse::<u64>()
        .map_err(|_| NumberError::Malformed(token))
}

/// Parse a star rating such as `"4.3 out of 5 stars"`; must lie in `[0, 5]`.
pub fn parse_rating(text: &str) -> Result<f32, NumberError> {
    let raw = RATING_PHRASE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().replace(',', "."))
        .ok_or_else(|| NumberError::NoDigits(text.to_string()))?;
    let value: f32 = raw
        .parse()
        .map_err(|_| NumberError::Malformed(raw.clone()))?;
    if (0.0..=5.0).contains(&value) {
        Ok(value)
    } else {
        Err(NumberError::Malformed(raw))
    }
}

/// ISO code for the currency symbol found in a price string.
pub fn detect_currency(text: &str) -> Option<&'static str> {
    if text.contains('₹') || text.contains("Rs") || text.contains("INR") {
        Some("INR")
    } else if text.contains('€') {
        Some("EUR")
    } else if text.contains('£') {
        Some("GBP")
    } else if text.contains('¥') {
        Some("JPY")
    } else if text.contains('$') {
        Some("USD")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_parse_decimal_us_format() {
        assert_eq!(parse_decimal("$1,234.56").unwrap(), dec("1234.56"));
    }

    #[test]
    fn test_parse_decimal_variants() {
        assert_eq!(parse_decimal("₹ 1,299.00").unwrap(), dec("1299.00"));
        assert_eq!(parse_decimal("1.234,56 €").unwrap(), dec("1234.56"));
        assert_eq!(parse_decimal("₹1,23,456").unwrap(), dec("123456"));
        assert_eq!(parse_decimal("1,299.").unwrap(), dec("1299"));
        assert_eq!(parse_decimal("12,50").unwrap(), dec("12.50"));
        assert_eq!(parse_decimal("499").unwrap(), dec("499"));
        assert_eq!(parse_decimal("1\u{00A0}234,56").unwrap(), dec("1234.56"));
    }

    #[test]
    fn test_parse_decimal_without_integer_part() {
        assert_eq!(parse_decimal("$.99").unwrap(), dec("0.99"));
        assert_eq!(parse_decimal(",50 €").unwrap(), dec("0.50"));
        assert_eq!(parse_decimal("Rs.1,299").unwrap(), dec("1299"));
        assert!(matches!(
            parse_decimal("$.9,99"),
            Err(NumberError::Malformed(_))
        ));
        assert!(parse_count(".5 ratings").is_err());
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        assert!(matches!(
            parse_decimal("Currently unavailable"),
            Err(NumberError::NoDigits(_))
        ));
        assert!(matches!(
            parse_decimal("1,2,3"),
            Err(NumberError::Malformed(_))
        ));
        assert!(matches!(
            parse_decimal("12.34.56,7.8"),
            Err(NumberError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("12,345 ratings").unwrap(), 12345);
        assert_eq!(parse_count("#1,234 in Home & Kitchen").unwrap(), 1234);
        assert_eq!(parse_count("7 global ratings").unwrap(), 7);
        assert!(parse_count("no reviews yet").is_err());
    }

    #[test]
    fn test_parse_rating() {
        assert_eq!(parse_rating("4.3 out of 5 stars").unwrap(), 4.3);
        assert_eq!(parse_rating("4,5 out of 5").unwrap(), 4.5);
        assert!(parse_rating("9.1 out of 10").is_err());
        assert!(parse_rating("great product").is_err());
    }

    #[test]
    fn test_detect_currency() {
        assert_eq!(detect_currency("₹1,299"), Some("INR"));
        assert_eq!(detect_currency("$5.00"), Some("USD"));
        assert_eq!(detect_currency("5,00 €"), Some("EUR"));
        assert_eq!(detect_currency("5.00"), None);
    }
}
