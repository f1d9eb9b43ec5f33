//! Catalog summary figures.

use serde::{Deserialize, Serialize};

use super::Product;

/// Ratings below this count as low.
pub const LOW_RATING_THRESHOLD: f32 = 4.0;

/// Dashboard-style summary of the monitored catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogStats {
    pub total: usize,
    pub in_stock: usize,
    /// Everything not positively in stock, including unknown.
    pub out_of_stock: usize,
    /// Mean rating over products that have one, rounded to two places.
    pub avg_rating: Option<f32>,
    pub low_rating_count: usize,
    pub active_alerts: usize,
}

impl CatalogStats {
    pub fn from_products(products: &[Product]) -> Self {
        let total = products.len();
        let in_stock = products.iter().filter(|p| p.is_in_stock()).count();
        let ratings: Vec<f32> = products.iter().filter_map(|p| p.fields.rating).collect();
        let avg_rating = if ratings.is_empty() {
            None
        } else {
            let mean = ratings.iter().sum::<f32>() / ratings.len() as f32;
            Some((mean * 100.0).round() / 100.0)
        };
        let low_rating_count = ratings
            .iter()
            .filter(|r| **r < LOW_RATING_THRESHOLD)
            .count();
        let out_of_stock = total - in_stock;

        Self {
            total,
            in_stock,
            out_of_stock,
            avg_rating,
            low_rating_count,
            active_alerts: out_of_stock + low_rating_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StockStatus;

    fn product(stock: StockStatus, rating: Option<f32>) -> Product {
        let mut p = Product::new("https://www.amazon.in/dp/B000000001");
        p.fields.stock = stock;
        p.fields.rating = rating;
        p
    }

    #[test]
    fn test_stats_from_products() {
        let products = vec![
            product(StockStatus::InStock, Some(4.5)),
            product(StockStatus::OutOfStock, Some(3.5)),
            product(StockStatus::Unknown, None),
        ];
        let stats = CatalogStats::from_products(&products);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.in_stock, 1);
        assert_eq!(stats.out_of_stock, 2);
        assert_eq!(stats.avg_rating, Some(4.0));
        assert_eq!(stats.low_rating_count, 1);
        assert_eq!(stats.active_alerts, 3);
    }

    #[test]
    fn test_stats_empty_catalog() {
        let stats = CatalogStats::from_products(&[]);
        assert_eq!(stats, CatalogStats::default());
    }
}
