//! Batch execution records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{OutcomeKind, ScrapeOutcome};

/// What started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    /// Timer-driven full-catalog refresh.
    Scheduled,
    /// Caller-supplied list of URLs.
    Bulk,
    /// On-demand full-catalog refresh.
    Manual,
}

impl RunTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Bulk => "bulk",
            Self::Manual => "manual",
        }
    }
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Concurrency and pacing tunables for one run.
///
/// Snapshotted when a run starts; changing the runner's params never
/// affects a run already in progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunParams {
    /// Upper bound on scrapes in flight for this run.
    pub max_concurrency: usize,
    /// Minimum spacing between one worker's consecutive requests.
    pub min_request_spacing: Duration,
    /// Extra delay injected before the next request after a block.
    pub block_cooldown: Duration,
}

impl Default for RunParams {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            min_request_spacing: Duration::from_secs(2),
            block_cooldown: Duration::from_secs(60),
        }
    }
}

/// Outcome tallies for progress polling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunProgress {
    pub total: usize,
    pub done: usize,
    pub succeeded: usize,
    pub soft_failed: usize,
    pub blocked: usize,
    pub hard_failed: usize,
}

impl RunProgress {
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.done)
    }
}

/// One batch execution over a set of URLs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRun {
    pub id: Uuid,
    pub trigger: RunTrigger,
    pub targets: Vec<String>,
    pub params: RunParams,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Resolved URLs in completion order.
    pub outcomes: Vec<(String, ScrapeOutcome)>,
    /// Whether a block switched the run into cooldown mode.
    pub escalated: bool,
    /// Outcomes that could not be written to the store.
    pub persist_errors: usize,
}

impl JobRun {
    pub fn new(trigger: RunTrigger, targets: Vec<String>, params: RunParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            trigger,
            targets,
            params,
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Running,
            outcomes: Vec::new(),
            escalated: false,
            persist_errors: 0,
        }
    }

    pub fn record(&mut self, url: String, outcome: ScrapeOutcome) {
        self.outcomes.push((url, outcome));
    }

    /// Close the run. A finished run is never modified again.
    pub fn finish(&mut self, status: RunStatus) {
        if self.finished_at.is_none() {
            self.status = status;
            self.finished_at = Some(Utc::now());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }

    pub fn progress(&self) -> RunProgress {
        let mut progress = RunProgress {
            total: self.targets.len(),
            done: self.outcomes.len(),
            ..Default::default()
        };
        for (_, outcome) in &self.outcomes {
            match outcome.kind() {
                OutcomeKind::Success => progress.succeeded += 1,
                OutcomeKind::SoftFailure => progress.soft_failed += 1,
                OutcomeKind::Blocked => progress.blocked += 1,
                OutcomeKind::HardFailure => progress.hard_failed += 1,
            }
        }
        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tallies_by_kind() {
        let mut run = JobRun::new(
            RunTrigger::Bulk,
            vec!["a".into(), "b".into(), "c".into()],
            RunParams::default(),
        );
        run.record(
            "a".into(),
            ScrapeOutcome::Blocked {
                evidence: "captcha".into(),
                attempts: 1,
            },
        );
        run.record(
            "b".into(),
            ScrapeOutcome::HardFailure {
                reason: "gone".into(),
                attempts: 1,
            },
        );

        let progress = run.progress();
        assert_eq!(progress.total, 3);
        assert_eq!(progress.done, 2);
        assert_eq!(progress.blocked, 1);
        assert_eq!(progress.hard_failed, 1);
        assert_eq!(progress.remaining(), 1);
    }

    #[test]
    fn test_finish_is_final() {
        let mut run = JobRun::new(RunTrigger::Manual, Vec::new(), RunParams::default());
        run.finish(RunStatus::Cancelled);
        let finished_at = run.finished_at;
        run.finish(RunStatus::Completed);
        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.finished_at, finished_at);
    }
}
