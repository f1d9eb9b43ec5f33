//! CLI commands implementation.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use pricewatch::models::{ScrapeOutcome, Snapshot};
use pricewatch::runner::JobHandle;
use pricewatch::scheduler;
use pricewatch::{Config, MonitorEngine};

#[derive(Parser)]
#[command(name = "pricewatch")]
#[command(about = "Product listing monitor with price, rating and rank history")]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Run the refresh scheduler until interrupted
    Run {
        /// Override the refresh interval in minutes (30 to 1440)
        #[arg(short, long)]
        interval: Option<u64>,
        /// Refresh the whole catalog once at startup
        #[arg(long)]
        refresh_now: bool,
    },

    /// Scrape one or more listings now
    Scrape {
        /// Listing URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Re-scrape every product in the catalog
    Refresh,

    /// Show the recorded history of a listing
    History {
        url: String,
    },

    /// List monitored products
    Ls,

    /// Show catalog summary
    Stats,
}

pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from_path(path)
            .await
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::load().await,
    };
    let engine = MonitorEngine::from_config(&config)?;

    let result = match cli.command {
        Commands::Run {
            interval,
            refresh_now,
        } => cmd_run(&engine, interval, refresh_now).await,
        Commands::Scrape { urls } => cmd_scrape(&engine, urls).await,
        Commands::Refresh => {
            let handle = engine.refresh_all().await?;
            report_run(handle).await;
            Ok(())
        }
        Commands::History { url } => cmd_history(&engine, &url).await,
        Commands::Ls => cmd_ls(&engine).await,
        Commands::Stats => cmd_stats(&engine).await,
    };

    engine.shutdown().await;
    result
}

async fn cmd_run(engine: &MonitorEngine, interval: Option<u64>, refresh_now: bool) -> anyhow::Result<()> {
    if let Some(minutes) = interval {
        engine.set_scheduler_interval(scheduler::interval_from_minutes(minutes))?;
    }
    engine.start();

    let status = engine.scheduler_status();
    println!(
        "Refreshing every {} minutes; next run at {}",
        status.interval.as_secs() / 60,
        status
            .next_fire_time
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    );

    if refresh_now {
        let handle = engine.refresh_all().await?;
        tokio::select! {
            _ = report_run(handle) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }

    tokio::signal::ctrl_c().await?;
    println!("Shutting down");
    Ok(())
}

async fn cmd_scrape(engine: &MonitorEngine, urls: Vec<String>) -> anyhow::Result<()> {
    if let [url] = urls.as_slice() {
        let outcome = engine.scrape_one(url).await;
        print_outcome(url, &outcome);
        return Ok(());
    }
    report_run(engine.scrape_bulk(urls)).await;
    Ok(())
}

async fn report_run(mut handle: JobHandle) {
    let total = handle.progress().total;
    let mut done = 0;
    while let Some((url, outcome)) = handle.next_outcome().await {
        done += 1;
        print!("[{}/{}] ", done, total);
        print_outcome(&url, &outcome);
    }
    let run = handle.wait().await;
    let progress = run.progress();
    println!(
        "Run {} {}: {} ok, {} soft failures, {} blocked, {} hard failures{}",
        run.id,
        run.status.as_str(),
        progress.succeeded,
        progress.soft_failed,
        progress.blocked,
        progress.hard_failed,
        if run.escalated { " (cooldown engaged)" } else { "" }
    );
}

fn print_outcome(url: &str, outcome: &ScrapeOutcome) {
    match outcome {
        ScrapeOutcome::Success(snapshot) => {
            let fields = &snapshot.fields;
            println!(
                "{} {} {}{} rating {} rank {} [{}]",
                url,
                fields.title.as_deref().unwrap_or("?"),
                fields.currency.as_deref().unwrap_or(""),
                fields.price.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string()),
                fields.rating.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
                fields.rank.map(|r| format!("#{}", r)).unwrap_or_else(|| "-".to_string()),
                fields.stock.as_str(),
            );
        }
        other => println!(
            "{} {} after {} attempt(s): {}",
            url,
            other.kind().as_str(),
            other.attempts(),
            other.detail().unwrap_or_default()
        ),
    }
}

fn print_snapshot(snapshot: &Snapshot) {
    let fields = &snapshot.fields;
    println!(
        "{}  {:<12} {:>10} {:>6} {:>8}  {}",
        snapshot.scraped_at.format("%Y-%m-%d %H:%M:%S"),
        snapshot.outcome.as_str(),
        fields.price.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
        fields.rating.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string()),
        fields.rank.map(|r| format!("#{}", r)).unwrap_or_else(|| "-".to_string()),
        snapshot.detail.as_deref().unwrap_or(fields.stock.as_str()),
    );
}

async fn cmd_history(engine: &MonitorEngine, url: &str) -> anyhow::Result<()> {
    let history = engine.history(url).await?;
    if history.is_empty() {
        println!("No history for {}", url);
        return Ok(());
    }
    for snapshot in &history {
        print_snapshot(snapshot);
    }
    Ok(())
}

async fn cmd_ls(engine: &MonitorEngine) -> anyhow::Result<()> {
    for product in engine.products().await? {
        println!(
            "{:<12} {:<60} {:>10} {}",
            product.asin.as_deref().unwrap_or("-"),
            product.fields.title.as_deref().unwrap_or(&product.url),
            product
                .fields
                .price
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
            product
                .last_outcome
                .map(|o| o.as_str())
                .unwrap_or("never scraped"),
        );
    }
    Ok(())
}

async fn cmd_stats(engine: &MonitorEngine) -> anyhow::Result<()> {
    let stats = engine.stats().await?;
    println!("Products:      {}", stats.total);
    println!("In stock:      {}", stats.in_stock);
    println!("Out of stock:  {}", stats.out_of_stock);
    println!(
        "Avg rating:    {}",
        stats
            .avg_rating
            .map(|r| format!("{:.2}", r))
            .unwrap_or_else(|| "-".to_string())
    );
    println!("Low rated:     {}", stats.low_rating_count);
    println!("Active alerts: {}", stats.active_alerts);
    Ok(())
}
