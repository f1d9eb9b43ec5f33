//! SQLite-backed store.
//!
//! Each call opens its own connection on a blocking thread, so the store can
//! be shared across tasks without a pool.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;

use super::{format_datetime, parse_datetime, parse_datetime_opt, ProductStore, Result};
use crate::models::{OutcomeKind, Product, ProductFields, Snapshot, StockStatus};

/// SQLite [`ProductStore`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `db_path`.
    pub fn new(db_path: &Path) -> Result<Self> {
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS products (
                url TEXT PRIMARY KEY,
                asin TEXT,
                title TEXT,
                price TEXT,
                list_price TEXT,
                currency TEXT,
                rating REAL,
                review_count INTEGER,
                rank INTEGER,
                stock TEXT NOT NULL DEFAULT 'unknown',
                image_url TEXT,
                category TEXT,
                added_at TEXT NOT NULL,
                last_scraped TEXT,
                last_outcome TEXT
            );

            CREATE TABLE IF NOT EXISTS snapshots (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL,
                scraped_at TEXT NOT NULL,
                title TEXT,
                price TEXT,
                list_price TEXT,
                currency TEXT,
                rating REAL,
                review_count INTEGER,
                rank INTEGER,
                stock TEXT NOT NULL DEFAULT 'unknown',
                image_url TEXT,
                category TEXT,
                outcome TEXT NOT NULL,
                detail TEXT,
                attempts INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_url_time ON snapshots(url, scraped_at);
            CREATE INDEX IF NOT EXISTS idx_products_added_at ON products(added_at);
            "#,
        )?;
        Ok(())
    }

    /// Run a blocking closure with a fresh connection.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = store.connect()?;
            f(&conn)
        })
        .await?
    }
}

fn decimal_opt(s: Option<String>) -> Option<Decimal> {
    s.and_then(|s| Decimal::from_str(&s).ok())
}

fn u64_opt(v: Option<i64>) -> Option<u64> {
    v.and_then(|v| u64::try_from(v).ok())
}

fn i64_opt(v: Option<u64>) -> Option<i64> {
    v.and_then(|v| i64::try_from(v).ok())
}

fn fields_from_row(row: &Row<'_>) -> rusqlite::Result<ProductFields> {
    Ok(ProductFields {
        title: row.get("title")?,
        price: decimal_opt(row.get("price")?),
        list_price: decimal_opt(row.get("list_price")?),
        currency: row.get("currency")?,
        rating: row.get::<_, Option<f64>>("rating")?.map(|r| r as f32),
        review_count: u64_opt(row.get("review_count")?),
        rank: u64_opt(row.get("rank")?),
        stock: StockStatus::from_str(&row.get::<_, String>("stock")?).unwrap_or_default(),
        image_url: row.get("image_url")?,
        category: row.get("category")?,
    })
}

fn product_from_row(row: &Row<'_>) -> rusqlite::Result<Product> {
    Ok(Product {
        url: row.get("url")?,
        asin: row.get("asin")?,
        fields: fields_from_row(row)?,
        added_at: parse_datetime(&row.get::<_, String>("added_at")?),
        last_scraped: parse_datetime_opt(row.get("last_scraped")?),
        last_outcome: row
            .get::<_, Option<String>>("last_outcome")?
            .and_then(|s| OutcomeKind::from_str(&s)),
    })
}

fn snapshot_from_row(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        url: row.get("url")?,
        scraped_at: parse_datetime(&row.get::<_, String>("scraped_at")?),
        fields: fields_from_row(row)?,
        outcome: OutcomeKind::from_str(&row.get::<_, String>("outcome")?)
            .unwrap_or(OutcomeKind::HardFailure),
        detail: row.get("detail")?,
        attempts: row.get("attempts")?,
    })
}

#[async_trait]
impl ProductStore for SqliteStore {
    async fn upsert_product(&self, product: &Product) -> Result<()> {
        let p = product.clone();
        self.with_conn(move |conn| {
            let f = &p.fields;
            conn.execute(
                r#"
                INSERT INTO products (url, asin, title, price, list_price, currency, rating,
                    review_count, rank, stock, image_url, category, added_at, last_scraped, last_outcome)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                ON CONFLICT(url) DO UPDATE SET
                    asin = excluded.asin,
                    title = excluded.title,
                    price = excluded.price,
                    list_price = excluded.list_price,
                    currency = excluded.currency,
                    rating = excluded.rating,
                    review_count = excluded.review_count,
                    rank = excluded.rank,
                    stock = excluded.stock,
                    image_url = excluded.image_url,
                    category = excluded.category,
                    last_scraped = excluded.last_scraped,
                    last_outcome = excluded.last_outcome
                "#,
                params![
                    p.url,
                    p.asin,
                    f.title,
                    f.price.map(|d| d.to_string()),
                    f.list_price.map(|d| d.to_string()),
                    f.currency,
                    f.rating.map(f64::from),
                    i64_opt(f.review_count),
                    i64_opt(f.rank),
                    f.stock.as_str(),
                    f.image_url,
                    f.category,
                    format_datetime(&p.added_at),
                    p.last_scraped.as_ref().map(format_datetime),
                    p.last_outcome.map(|o| o.as_str()),
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_product(&self, url: &str) -> Result<Option<Product>> {
        let url = url.to_string();
        self.with_conn(move |conn| {
            let product = conn
                .query_row(
                    "SELECT * FROM products WHERE url = ?",
                    params![url],
                    product_from_row,
                )
                .optional()?;
            Ok(product)
        })
        .await
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM products ORDER BY added_at DESC, url")?;
            let products = stmt
                .query_map([], product_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(products)
        })
        .await
    }

    async fn list_product_urls(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT url FROM products ORDER BY added_at, url")?;
            let urls = stmt
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(urls)
        })
        .await
    }

    async fn append_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let s = snapshot.clone();
        self.with_conn(move |conn| {
            let f = &s.fields;
            conn.execute(
                r#"
                INSERT INTO snapshots (url, scraped_at, title, price, list_price, currency, rating,
                    review_count, rank, stock, image_url, category, outcome, detail, attempts)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
                params![
                    s.url,
                    format_datetime(&s.scraped_at),
                    f.title,
                    f.price.map(|d| d.to_string()),
                    f.list_price.map(|d| d.to_string()),
                    f.currency,
                    f.rating.map(f64::from),
                    i64_opt(f.review_count),
                    i64_opt(f.rank),
                    f.stock.as_str(),
                    f.image_url,
                    f.category,
                    s.outcome.as_str(),
                    s.detail,
                    s.attempts,
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn get_history(&self, url: &str) -> Result<Vec<Snapshot>> {
        let url = url.to_string();
        self.with_conn(move |conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM snapshots WHERE url = ? ORDER BY scraped_at, id")?;
            let history = stmt
                .query_map(params![url], snapshot_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(history)
        })
        .await
    }

    async fn delete_product(&self, url: &str) -> Result<bool> {
        let url = url.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM snapshots WHERE url = ?", params![url])?;
            let rows = conn.execute("DELETE FROM products WHERE url = ?", params![url])?;
            Ok(rows > 0)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    const URL: &str = "https://www.amazon.in/dp/B0C1234567";

    fn store() -> (SqliteStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(&dir.path().join("pricewatch.db")).unwrap();
        (store, dir)
    }

    fn fields() -> ProductFields {
        ProductFields {
            title: Some("Cotton Towel".to_string()),
            price: Some(Decimal::from_str("1234.56").unwrap()),
            list_price: Some(Decimal::from_str("999.00").unwrap()),
            currency: Some("INR".to_string()),
            rating: Some(4.5),
            review_count: Some(321),
            rank: Some(17),
            stock: StockStatus::InStock,
            image_url: Some("https://m.media-amazon.com/images/I/x.jpg".to_string()),
            category: Some("Towel".to_string()),
        }
    }

    #[tokio::test]
    async fn test_product_persists_all_fields() {
        let (store, _dir) = store();
        let snapshot = Snapshot::success(URL, fields(), 2);
        let product = Product::from_snapshot(&snapshot);
        store.upsert_product(&product).await.unwrap();

        let loaded = store.get_product(URL).await.unwrap().unwrap();
        assert_eq!(loaded.fields, product.fields);
        assert_eq!(loaded.asin.as_deref(), Some("B0C1234567"));
        assert_eq!(loaded.last_outcome, Some(OutcomeKind::Success));
        // Price above list price is kept as observed.
        assert!(loaded.fields.price > loaded.fields.list_price);
        assert!(store.get_product("https://missing.test/").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_latest_state() {
        let (store, _dir) = store();
        let mut product = Product::from_snapshot(&Snapshot::success(URL, fields(), 1));
        store.upsert_product(&product).await.unwrap();

        product.fields.price = Some(Decimal::from_str("1100.00").unwrap());
        store.upsert_product(&product).await.unwrap();

        let all = store.list_products().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].fields.price, Some(Decimal::from_str("1100.00").unwrap()));
    }

    #[tokio::test]
    async fn test_history_is_chronological() {
        let (store, _dir) = store();
        let now = chrono::Utc::now();
        let entries = [
            (20, OutcomeKind::Success),
            (0, OutcomeKind::Blocked),
            (10, OutcomeKind::SoftFailure),
        ];
        for (offset, kind) in entries {
            let mut s = Snapshot::failure(URL, kind, "x", 1);
            s.scraped_at = now + Duration::seconds(offset);
            store.append_snapshot(&s).await.unwrap();
        }

        let history = store.get_history(URL).await.unwrap();
        let kinds: Vec<_> = history.iter().map(|s| s.outcome).collect();
        assert_eq!(
            kinds,
            vec![OutcomeKind::Blocked, OutcomeKind::SoftFailure, OutcomeKind::Success]
        );
        assert_eq!(history[0].detail.as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_delete_removes_history() {
        let (store, _dir) = store();
        let snapshot = Snapshot::success(URL, fields(), 1);
        store.append_snapshot(&snapshot).await.unwrap();
        store.upsert_product(&Product::from_snapshot(&snapshot)).await.unwrap();

        assert!(store.delete_product(URL).await.unwrap());
        assert!(store.get_history(URL).await.unwrap().is_empty());
        assert!(store.list_product_urls().await.unwrap().is_empty());
    }
}
