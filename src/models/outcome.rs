//! Tagged results of a single product scrape.

use serde::{Deserialize, Serialize};

use super::Snapshot;

/// Outcome tag stored alongside every snapshot and product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    SoftFailure,
    Blocked,
    HardFailure,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SoftFailure => "soft_failure",
            Self::Blocked => "blocked",
            Self::HardFailure => "hard_failure",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "soft_failure" => Some(Self::SoftFailure),
            "blocked" => Some(Self::Blocked),
            "hard_failure" => Some(Self::HardFailure),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one retry-wrapped scrape of one URL.
///
/// Fetch and parse errors never leave the retry layer; this closed set is
/// all callers above it ever see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScrapeOutcome {
    /// Page fetched and required fields extracted.
    Success(Snapshot),
    /// Transient errors persisted until the attempt budget ran out.
    SoftFailure { reason: String, attempts: u32 },
    /// Anti-bot challenge detected; the URL was not retried.
    Blocked { evidence: String, attempts: u32 },
    /// Permanent failure: malformed URL, removed listing, fields never rendered.
    HardFailure { reason: String, attempts: u32 },
}

impl ScrapeOutcome {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            Self::Success(_) => OutcomeKind::Success,
            Self::SoftFailure { .. } => OutcomeKind::SoftFailure,
            Self::Blocked { .. } => OutcomeKind::Blocked,
            Self::HardFailure { .. } => OutcomeKind::HardFailure,
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success(snapshot) => snapshot.attempts,
            Self::SoftFailure { attempts, .. }
            | Self::Blocked { attempts, .. }
            | Self::HardFailure { attempts, .. } => *attempts,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Failure reason or block evidence, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::SoftFailure { reason, .. } | Self::HardFailure { reason, .. } => Some(reason),
            Self::Blocked { evidence, .. } => Some(evidence),
        }
    }

    /// The history record for this outcome.
    ///
    /// Failures are stamped with the current time, which is their completion time.
    pub fn to_snapshot(&self, url: &str) -> Snapshot {
        match self {
            Self::Success(snapshot) => snapshot.clone(),
            other => Snapshot::failure(
                url,
                other.kind(),
                other.detail().unwrap_or_default(),
                other.attempts(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_snapshot_carries_tag_and_detail() {
        let outcome = ScrapeOutcome::Blocked {
            evidence: "robot check".to_string(),
            attempts: 1,
        };
        let snapshot = outcome.to_snapshot("https://example.com/dp/B000000001");

        assert_eq!(snapshot.outcome, OutcomeKind::Blocked);
        assert_eq!(snapshot.detail.as_deref(), Some("robot check"));
        assert_eq!(snapshot.attempts, 1);
        assert!(snapshot.fields.title.is_none());
    }

    #[test]
    fn test_outcome_kind_names() {
        assert_eq!(OutcomeKind::from_str("soft_failure"), Some(OutcomeKind::SoftFailure));
        assert_eq!(OutcomeKind::HardFailure.to_string(), "hard_failure");
        assert_eq!(OutcomeKind::from_str("other"), None);
    }
}
