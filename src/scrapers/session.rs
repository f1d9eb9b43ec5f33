//! Per-attempt session shaping: user-agent, header profile and warm-up.
//!
//! Every fetch attempt draws a fresh [`SessionPlan`] so consecutive attempts
//! against the same listing do not reuse a fingerprint. With `randomize`
//! turned off the plan is a pure function of the attempt number.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Real browser user agents rotated across attempts.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/122.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

pub const DEFAULT_WARMUP_URL: &str = "https://www.amazon.in";

/// A coherent set of request headers sent together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderProfile {
    pub accept_language: String,
    #[serde(default = "default_accept")]
    pub accept: String,
    /// Additional headers sent verbatim.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

fn default_accept() -> String {
    "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".to_string()
}

impl HeaderProfile {
    pub fn new(accept_language: impl Into<String>) -> Self {
        Self {
            accept_language: accept_language.into(),
            accept: default_accept(),
            extra: BTreeMap::new(),
        }
    }

    /// Language tags from `Accept-Language`, quality values stripped.
    pub fn languages(&self) -> Vec<String> {
        self.accept_language
            .split(',')
            .map(|part| part.split(';').next().unwrap_or_default().trim().to_string())
            .filter(|tag| !tag.is_empty())
            .collect()
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![
            ("Accept".to_string(), self.accept.clone()),
            ("Accept-Language".to_string(), self.accept_language.clone()),
        ];
        headers.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        headers
    }
}

pub fn default_header_profiles() -> Vec<HeaderProfile> {
    vec![
        HeaderProfile::new("en-IN,en;q=0.9"),
        HeaderProfile::new("en-IN,en-GB;q=0.9,en;q=0.8"),
        HeaderProfile::new("en-US,en;q=0.9,hi;q=0.7"),
    ]
}

/// Inclusive millisecond range for randomized pauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl DelayRange {
    pub const ZERO: DelayRange = DelayRange { min_ms: 0, max_ms: 0 };

    pub fn new(min_ms: u64, max_ms: u64) -> Self {
        Self {
            min_ms: min_ms.min(max_ms),
            max_ms: max_ms.max(min_ms),
        }
    }

    pub fn sample(&self) -> Duration {
        if self.max_ms <= self.min_ms {
            return Duration::from_millis(self.min_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(self.min_ms..=self.max_ms))
    }
}

/// Session-shaping inputs for the fetcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionShaping {
    pub user_agents: Vec<String>,
    pub header_profiles: Vec<HeaderProfile>,
    /// Homepage loaded before the target to seed cookies. `None` disables warm-up.
    pub warmup_url: Option<String>,
    /// Always warm up on the first attempt of a scrape.
    pub warm_up_first_attempt: bool,
    /// Probability of warming up on any other attempt.
    pub warmup_ratio: f64,
    pub randomize: bool,
    /// Pause after the target page has loaded.
    pub settle_delay: DelayRange,
    /// Pause after the warm-up page has loaded.
    pub warmup_pause: DelayRange,
}

impl Default for SessionShaping {
    fn default() -> Self {
        Self {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            header_profiles: default_header_profiles(),
            warmup_url: Some(DEFAULT_WARMUP_URL.to_string()),
            warm_up_first_attempt: true,
            warmup_ratio: 0.3,
            randomize: true,
            settle_delay: DelayRange::new(2000, 4000),
            warmup_pause: DelayRange::new(500, 1500),
        }
    }
}

/// Everything one attempt needs to present itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub languages: Vec<String>,
    pub warmup_url: Option<String>,
    pub warmup_pause: Duration,
    pub settle_delay: Duration,
}

impl SessionShaping {
    /// Deterministic shaping with a single identity and no warm-up or pauses.
    pub fn fixed(user_agent: impl Into<String>) -> Self {
        Self {
            user_agents: vec![user_agent.into()],
            header_profiles: vec![HeaderProfile::new("en-IN,en;q=0.9")],
            warmup_url: None,
            warm_up_first_attempt: false,
            warmup_ratio: 0.0,
            randomize: false,
            settle_delay: DelayRange::ZERO,
            warmup_pause: DelayRange::ZERO,
        }
    }

    /// Choose the identity for attempt `attempt` (1-based).
    pub fn plan(&self, attempt: u32) -> SessionPlan {
        let slot = attempt.saturating_sub(1) as usize;

        let user_agent = self
            .pick(&self.user_agents, slot)
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_AGENTS[0].to_string());
        let profile = self
            .pick(&self.header_profiles, slot)
            .cloned()
            .unwrap_or_else(|| HeaderProfile::new("en-IN,en;q=0.9"));

        let warm_up = self.warmup_url.is_some()
            && ((attempt <= 1 && self.warm_up_first_attempt) || self.roll(self.warmup_ratio));

        let (warmup_pause, settle_delay) = if self.randomize {
            (self.warmup_pause.sample(), self.settle_delay.sample())
        } else {
            (
                Duration::from_millis(self.warmup_pause.min_ms),
                Duration::from_millis(self.settle_delay.min_ms),
            )
        };

        SessionPlan {
            user_agent,
            headers: profile.headers(),
            languages: profile.languages(),
            warmup_url: if warm_up { self.warmup_url.clone() } else { None },
            warmup_pause,
            settle_delay,
        }
    }

    fn pick<'a, T>(&self, pool: &'a [T], slot: usize) -> Option<&'a T> {
        if pool.is_empty() {
            return None;
        }
        let index = if self.randomize {
            rand::thread_rng().gen_range(0..pool.len())
        } else {
            slot % pool.len()
        };
        pool.get(index)
    }

    fn roll(&self, ratio: f64) -> bool {
        if ratio <= 0.0 {
            return false;
        }
        if ratio >= 1.0 {
            return true;
        }
        self.randomize && rand::thread_rng().gen_bool(ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_plan_is_deterministic() {
        let shaping = SessionShaping::fixed("TestAgent/1.0");
        let a = shaping.plan(1);
        let b = shaping.plan(2);
        assert_eq!(a.user_agent, "TestAgent/1.0");
        assert_eq!(a, b);
        assert!(a.warmup_url.is_none());
        assert_eq!(a.settle_delay, Duration::ZERO);
    }

    #[test]
    fn test_deterministic_rotation_by_attempt() {
        let shaping = SessionShaping {
            randomize: false,
            user_agents: vec!["ua-1".into(), "ua-2".into()],
            ..SessionShaping::default()
        };
        assert_eq!(shaping.plan(1).user_agent, "ua-1");
        assert_eq!(shaping.plan(2).user_agent, "ua-2");
        assert_eq!(shaping.plan(3).user_agent, "ua-1");
    }

    #[test]
    fn test_warm_up_first_attempt_only_when_not_random() {
        let shaping = SessionShaping {
            randomize: false,
            ..SessionShaping::default()
        };
        assert_eq!(shaping.plan(1).warmup_url.as_deref(), Some(DEFAULT_WARMUP_URL));
        assert_eq!(shaping.plan(2).warmup_url, None);
        assert_eq!(shaping.plan(1).settle_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_random_plan_stays_in_pool_and_range() {
        let shaping = SessionShaping::default();
        for attempt in 1..=20 {
            let plan = shaping.plan(attempt);
            assert!(shaping.user_agents.contains(&plan.user_agent));
            assert!(plan.settle_delay >= Duration::from_millis(2000));
            assert!(plan.settle_delay <= Duration::from_millis(4000));
            assert!(plan.headers.iter().any(|(k, _)| k == "Accept-Language"));
        }
    }

    #[test]
    fn test_header_profile_languages() {
        let profile = HeaderProfile::new("en-IN,en-GB;q=0.9,en;q=0.8");
        assert_eq!(profile.languages(), vec!["en-IN", "en-GB", "en"]);
    }
}
