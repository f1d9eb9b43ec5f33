//! Configuration management for pricewatch using the prefer crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::models::RunParams;
use crate::retry::RetryPolicy;
use crate::scheduler::{self, ScheduleError};
use crate::scrapers::session::{default_header_profiles, DEFAULT_USER_AGENTS, DEFAULT_WARMUP_URL};
use crate::scrapers::{BrowserSettings, DelayRange, DetectionConfig, HeaderProfile, SessionShaping};

/// Scheduled refresh settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    /// Minutes between full-catalog refreshes, 30 to 1440.
    pub interval_minutes: u64,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            interval_minutes: scheduler::DEFAULT_INTERVAL.as_secs() / 60,
        }
    }
}

/// Worker pool and pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    pub max_concurrency: usize,
    pub min_request_spacing_ms: u64,
    pub block_cooldown_secs: u64,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            min_request_spacing_ms: 2000,
            block_cooldown_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Capped at 3.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Fraction of the nominal delay added or removed at random.
    pub jitter: f64,
}

impl Default for RetrySection {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts(),
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            jitter: policy.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    /// Hard limit on a single fetch attempt.
    pub attempt_timeout_secs: u64,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: 45,
        }
    }
}

/// User-agent rotation, header profiles and warm-up behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Empty means the built-in pool.
    pub user_agents: Vec<String>,
    /// Empty means the built-in profiles.
    pub header_profiles: Vec<HeaderProfile>,
    /// Homepage visited before the target. Empty string disables warm-up.
    pub warmup_url: String,
    pub warm_up_first_attempt: bool,
    pub warmup_ratio: f64,
    pub randomize: bool,
    pub settle_delay_ms: DelayRange,
    pub warmup_pause_ms: DelayRange,
}

impl Default for SessionSection {
    fn default() -> Self {
        let shaping = SessionShaping::default();
        Self {
            user_agents: Vec::new(),
            header_profiles: Vec::new(),
            warmup_url: DEFAULT_WARMUP_URL.to_string(),
            warm_up_first_attempt: shaping.warm_up_first_attempt,
            warmup_ratio: shaping.warmup_ratio,
            randomize: shaping.randomize,
            settle_delay_ms: shaping.settle_delay,
            warmup_pause_ms: shaping.warmup_pause,
        }
    }
}

/// Configuration file model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database path. Without one the catalog lives in memory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<PathBuf>,
    pub scheduler: SchedulerSection,
    pub runner: RunnerSection,
    pub retry: RetrySection,
    pub fetch: FetchSection,
    pub session: SessionSection,
    pub detection: DetectionConfig,
    pub browser: BrowserSettings,

    /// Path the configuration was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer crate for discovery.
    /// Automatically discovers pricewatch config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("pricewatch").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            warn!("Ignoring config at {}: {}", path.display(), e);
                            Self::default_with_env()
                        }
                    }
                } else {
                    Self::default_with_env()
                }
            }
            Err(_) => Self::default_with_env(),
        }
    }

    /// Defaults with environment variable overrides applied.
    pub fn default_with_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file: {}", e))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(&contents, ext)?;
        config.source_path = Some(path.to_path_buf());
        if let (Some(db), Some(base)) = (config.database.as_ref(), config.base_dir()) {
            if db.is_relative() {
                config.database = Some(base.join(db));
            }
        }
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse file contents in the format named by `ext`.
    pub fn parse(contents: &str, ext: &str) -> Result<Self, String> {
        match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Directory of the config file, used to resolve a relative database path.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Apply `PRICEWATCH_*` environment variables over file values.
    pub fn apply_env_overrides(&mut self) {
        if let Some(db) = env_var("PRICEWATCH_DATABASE") {
            self.database = Some(PathBuf::from(db));
        }
        if let Some(minutes) = env_parse("PRICEWATCH_INTERVAL_MINUTES") {
            self.scheduler.interval_minutes = minutes;
        }
        if let Some(n) = env_parse("PRICEWATCH_MAX_CONCURRENCY") {
            self.runner.max_concurrency = n;
        }
        if let Some(url) = env_var("PRICEWATCH_BROWSER_URL") {
            self.browser.remote_url = Some(url);
        }
    }

    /// Scheduler interval, validated to the allowed range.
    pub fn scheduler_interval(&self) -> Result<Duration, ScheduleError> {
        let interval = scheduler::interval_from_minutes(self.scheduler.interval_minutes);
        scheduler::validate_interval(interval)?;
        Ok(interval)
    }

    pub fn run_params(&self) -> RunParams {
        RunParams {
            max_concurrency: self.runner.max_concurrency.max(1),
            min_request_spacing: Duration::from_millis(self.runner.min_request_spacing_ms),
            block_cooldown: Duration::from_secs(self.runner.block_cooldown_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
            self.retry.jitter,
        )
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.attempt_timeout_secs.max(1))
    }

    pub fn session_shaping(&self) -> SessionShaping {
        let session = &self.session;
        let user_agents = if session.user_agents.is_empty() {
            DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect()
        } else {
            session.user_agents.clone()
        };
        let header_profiles = if session.header_profiles.is_empty() {
            default_header_profiles()
        } else {
            session.header_profiles.clone()
        };
        let warmup_url = Some(session.warmup_url.trim())
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        SessionShaping {
            user_agents,
            header_profiles,
            warmup_url,
            warm_up_first_attempt: session.warm_up_first_attempt,
            warmup_ratio: session.warmup_ratio.clamp(0.0, 1.0),
            randomize: session.randomize,
            settle_delay: DelayRange::new(session.settle_delay_ms.min_ms, session.settle_delay_ms.max_ms),
            warmup_pause: DelayRange::new(session.warmup_pause_ms.min_ms, session.warmup_pause_ms.max_ms),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_var(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}
