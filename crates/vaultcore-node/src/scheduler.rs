//! Fixed-interval off-chain jobs.
//!
//! Each [`JobKind`] gets its own ticker. A tick fans out one unit of work
//! per deployment into a `JoinSet`, bounds each unit with
//! `tokio::time::timeout`, and waits for all of them. A failing or hanging
//! deployment never affects the others, and no job error stops the loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use vaultcore_types::{Clock, Result, SchedulerConfig, VaultError};

use crate::chain::ChainReader;
use crate::health::{HealthHandle, HealthReport, JobKind};
use crate::vault::Vault;

/// How the units of one tick ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

enum UnitOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

pub struct Scheduler<R: ChainReader> {
    config: SchedulerConfig,
    deployments: Vec<Arc<Vault>>,
    reader: Arc<R>,
    clock: Arc<dyn Clock>,
    health: HealthHandle,
}

impl<R: ChainReader> Scheduler<R> {
    #[must_use]
    pub fn new(config: SchedulerConfig, reader: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            deployments: Vec::new(),
            reader,
            clock,
            health: HealthHandle::new(),
        }
    }

    #[must_use]
    pub fn with_deployment(mut self, vault: Arc<Vault>) -> Self {
        self.deployments.push(vault);
        self
    }

    #[must_use]
    pub fn health(&self) -> HealthHandle {
        self.health.clone()
    }

    /// Health check against the configured stuck threshold.
    #[must_use]
    pub fn report(&self) -> HealthReport {
        let threshold = chrono::Duration::from_std(self.config.stuck_threshold())
            .unwrap_or(chrono::Duration::MAX);
        self.health.report(self.clock.now(), threshold)
    }

    #[must_use]
    pub fn interval(&self, job: JobKind) -> Duration {
        let secs = match job {
            JobKind::Metrics => self.config.metrics_interval_secs,
            JobKind::Collateral => self.config.collateral_interval_secs,
            JobKind::Redemption => self.config.redemption_interval_secs,
        };
        Duration::from_secs(secs)
    }

    /// Run `job` once for every deployment and wait for all units.
    pub async fn run_tick(&self, job: JobKind) -> TickSummary {
        let timeout = self.config.job_timeout();
        let mut units = JoinSet::new();
        for vault in &self.deployments {
            let vault = Arc::clone(vault);
            let reader = Arc::clone(&self.reader);
            let clock = Arc::clone(&self.clock);
            let health = self.health.clone();
            health.start(job, vault.id(), clock.now());
            units.spawn(async move {
                let outcome = tokio::time::timeout(timeout, run_unit(job, &vault, reader.as_ref())).await;
                let now = clock.now();
                match outcome {
                    Ok(Ok(())) => {
                        health.succeed(job, vault.id(), now);
                        UnitOutcome::Succeeded
                    }
                    Ok(Err(e)) => {
                        if e.kind().retried_by_scheduler() {
                            tracing::warn!(job = %job, deployment = %vault.id(), error = %e, "Job failed, retrying next tick");
                        } else {
                            tracing::error!(job = %job, deployment = %vault.id(), error = %e, kind = %e.kind(), "Job failed");
                        }
                        health.fail(job, vault.id(), now, e.to_string());
                        UnitOutcome::Failed
                    }
                    Err(_) => {
                        let e = VaultError::JobTimeout {
                            job: job.to_string(),
                            deployment: vault.id().to_string(),
                        };
                        tracing::error!(timeout_secs = timeout.as_secs(), error = %e, "Job timed out");
                        health.timed_out(job, vault.id(), now);
                        UnitOutcome::TimedOut
                    }
                }
            });
        }

        let mut summary = TickSummary::default();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(UnitOutcome::Succeeded) => summary.succeeded += 1,
                Ok(UnitOutcome::Failed) => summary.failed += 1,
                Ok(UnitOutcome::TimedOut) => summary.timed_out += 1,
                Err(e) => {
                    tracing::error!(job = %job, error = %e, "Job unit aborted");
                    summary.failed += 1;
                }
            }
        }
        tracing::debug!(
            job = %job,
            succeeded = summary.succeeded,
            failed = summary.failed,
            timed_out = summary.timed_out,
            "Job tick finished"
        );
        summary
    }

    /// Start one ticker task per job. Each runs immediately, then every
    /// interval; missed ticks are skipped. Tasks exit once `shutdown`
    /// turns true or its sender is dropped.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        JobKind::ALL
            .into_iter()
            .map(|job| {
                let scheduler = Arc::clone(&self);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(scheduler.interval(job));
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    tracing::info!(job = %job, every_secs = scheduler.interval(job).as_secs(), "Job loop started");
                    loop {
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() || *shutdown.borrow() {
                                    break;
                                }
                            }
                            _ = ticker.tick() => {
                                scheduler.run_tick(job).await;
                            }
                        }
                    }
                    tracing::info!(job = %job, "Job loop stopped");
                })
            })
            .collect()
    }
}

async fn run_unit<R: ChainReader>(job: JobKind, vault: &Vault, reader: &R) -> Result<()> {
    match job {
        JobKind::Metrics => {
            let snapshot = reader.snapshot(vault.id()).await?;
            if let Some(update) = vault.refresh_price(&snapshot).await? {
                tracing::info!(
                    deployment = %vault.id(),
                    target = update.new_target,
                    round = update.round,
                    "Share price refreshed from chain"
                );
            }
        }
        JobKind::Collateral => {
            let snapshot = reader.snapshot(vault.id()).await?;
            let synced = vault.sync_collateral(&snapshot).await?;
            tracing::debug!(deployment = %vault.id(), synced, "Collateral synced");
        }
        JobKind::Redemption => {
            if let Some(report) = vault.settle_next().await? {
                tracing::info!(
                    deployment = %vault.id(),
                    settlement = %report.settlement_id,
                    settled = report.settled_count(),
                    total_assets = report.total_assets,
                    "Queued redemptions settled"
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemoryChainReader;
    use vaultcore_types::SystemClock;

    #[test]
    fn intervals_follow_config() {
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(MemoryChainReader::new()),
            Arc::new(SystemClock),
        );
        assert_eq!(scheduler.interval(JobKind::Metrics), Duration::from_secs(300));
        assert_eq!(scheduler.interval(JobKind::Collateral), Duration::from_secs(3_600));
        assert_eq!(scheduler.interval(JobKind::Redemption), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn empty_tick_is_a_no_op() {
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            Arc::new(MemoryChainReader::new()),
            Arc::new(SystemClock),
        );
        assert_eq!(scheduler.run_tick(JobKind::Redemption).await, TickSummary::default());
    }
}
