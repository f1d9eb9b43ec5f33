//! pricewatch - product listing monitor.
//!
//! Periodically re-scrapes a catalog of JavaScript-rendered product listings
//! and records price, rating, rank and stock history per product, pacing
//! requests and backing off when the source starts challenging the session.

pub mod config;
pub mod engine;
pub mod extract;
pub mod models;
pub mod repository;
pub mod retry;
pub mod runner;
pub mod scheduler;
pub mod scrapers;

pub use config::Config;
pub use engine::{EngineError, MonitorEngine};
