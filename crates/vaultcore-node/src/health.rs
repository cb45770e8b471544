//! Scheduled job health.
//!
//! Every unit of work the scheduler runs is keyed by job and deployment.
//! The handle is cheap to clone and shared between the scheduler tasks and
//! whatever exposes the health check.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use vaultcore_types::DeploymentId;

/// The off-chain jobs a node runs on fixed intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum JobKind {
    /// Derive the share price from chain totals and push it to the oracle.
    Metrics,
    /// Overwrite collateral balances with chain readings.
    Collateral,
    /// Settle the head of the redemption queue.
    Redemption,
}

impl JobKind {
    pub const ALL: [Self; 3] = [Self::Metrics, Self::Collateral, Self::Redemption];
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metrics => write!(f, "metrics"),
            Self::Collateral => write!(f, "collateral"),
            Self::Redemption => write!(f, "redemption"),
        }
    }
}

/// Last known state of one job for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Running { since: DateTime<Utc> },
    Succeeded { at: DateTime<Utc> },
    Failed { at: DateTime<Utc>, error: String },
    TimedOut { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// At least one job has been running past the stuck threshold.
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHealth {
    pub job: JobKind,
    pub deployment: DeploymentId,
    pub state: JobState,
    pub last_success: Option<DateTime<Utc>>,
    /// Failures and timeouts since the last success.
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checked_at: DateTime<Utc>,
    pub jobs: Vec<JobHealth>,
    /// One line per stuck job.
    pub stuck: Vec<String>,
}

type JobKey = (JobKind, DeploymentId);

/// Shared, clonable job health table.
#[derive(Debug, Clone, Default)]
pub struct HealthHandle {
    inner: Arc<RwLock<BTreeMap<JobKey, JobHealth>>>,
}

impl HealthHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, job: JobKind, deployment: &DeploymentId, mutator: impl FnOnce(&mut JobHealth)) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entry = guard
            .entry((job, deployment.clone()))
            .or_insert_with(|| JobHealth {
                job,
                deployment: deployment.clone(),
                state: JobState::Running { since: DateTime::<Utc>::MIN_UTC },
                last_success: None,
                consecutive_failures: 0,
            });
        mutator(entry);
    }

    pub fn start(&self, job: JobKind, deployment: &DeploymentId, now: DateTime<Utc>) {
        self.update(job, deployment, |h| h.state = JobState::Running { since: now });
    }

    pub fn succeed(&self, job: JobKind, deployment: &DeploymentId, now: DateTime<Utc>) {
        self.update(job, deployment, |h| {
            h.state = JobState::Succeeded { at: now };
            h.last_success = Some(now);
            h.consecutive_failures = 0;
        });
    }

    pub fn fail(&self, job: JobKind, deployment: &DeploymentId, now: DateTime<Utc>, error: String) {
        self.update(job, deployment, |h| {
            h.state = JobState::Failed { at: now, error };
            h.consecutive_failures = h.consecutive_failures.saturating_add(1);
        });
    }

    pub fn timed_out(&self, job: JobKind, deployment: &DeploymentId, now: DateTime<Utc>) {
        self.update(job, deployment, |h| {
            h.state = JobState::TimedOut { at: now };
            h.consecutive_failures = h.consecutive_failures.saturating_add(1);
        });
    }

    #[must_use]
    pub fn job(&self, job: JobKind, deployment: &DeploymentId) -> Option<JobHealth> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(job, deployment.clone()))
            .cloned()
    }

    /// Snapshot every job and flag the ones running longer than
    /// `stuck_threshold`.
    #[must_use]
    pub fn report(&self, now: DateTime<Utc>, stuck_threshold: Duration) -> HealthReport {
        let jobs: Vec<JobHealth> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let stuck: Vec<String> = jobs
            .iter()
            .filter_map(|h| match h.state {
                JobState::Running { since } if now - since > stuck_threshold => Some(format!(
                    "{} job for {} running since {since}",
                    h.job, h.deployment
                )),
                _ => None,
            })
            .collect();
        let status = if stuck.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };
        HealthReport {
            status,
            checked_at: now,
            jobs,
            stuck,
        }
    }
}
