//! Configuration types for VaultCore deployments and the scheduler.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{Result, VaultError, constants};

/// Configuration for one vault deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Price oracle parameters.
    pub oracle: OracleConfig,
    /// Redemption queue limits.
    pub queue: QueueConfig,
    /// Settlement engine parameters.
    pub settlement: SettlementConfig,
    /// Off-chain job scheduling.
    pub scheduler: SchedulerConfig,
}

/// Price oracle parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Price per share at deployment (8-decimal fixed point).
    pub initial_price: u128,
    /// Maximum change per period, in basis points.
    pub max_deviation_bps: u32,
    /// Length of one deviation period.
    pub deviation_period_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            initial_price: constants::DEFAULT_INITIAL_PRICE,
            max_deviation_bps: constants::DEFAULT_MAX_DEVIATION_BPS,
            deviation_period_secs: constants::DEFAULT_DEVIATION_PERIOD_SECS,
        }
    }
}

/// Redemption queue limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Largest accepted submit/approve/settle batch.
    pub max_batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_batch_size: constants::MAX_REQUESTS_PER_BATCH,
        }
    }
}

/// Settlement engine parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// How many settled request IDs the idempotency guard remembers.
    pub idempotency_cache_size: usize,
    /// Requests pulled per automatic settlement tick.
    pub auto_settle_batch: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            idempotency_cache_size: constants::SETTLEMENT_IDEMPOTENCY_CACHE_SIZE,
            auto_settle_batch: constants::DEFAULT_AUTO_SETTLE_BATCH,
        }
    }
}

/// Off-chain job scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub metrics_interval_secs: u64,
    pub collateral_interval_secs: u64,
    pub redemption_interval_secs: u64,
    /// Bound on one unit of work (one deployment, one tick).
    pub job_timeout_secs: u64,
    /// A job running longer than this makes health report degraded.
    pub stuck_threshold_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            metrics_interval_secs: constants::DEFAULT_METRICS_INTERVAL_SECS,
            collateral_interval_secs: constants::DEFAULT_COLLATERAL_INTERVAL_SECS,
            redemption_interval_secs: constants::DEFAULT_REDEMPTION_INTERVAL_SECS,
            job_timeout_secs: constants::DEFAULT_JOB_TIMEOUT_SECS,
            stuck_threshold_secs: constants::DEFAULT_STUCK_THRESHOLD_SECS,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    #[must_use]
    pub fn stuck_threshold(&self) -> Duration {
        Duration::from_secs(self.stuck_threshold_secs)
    }
}

impl VaultConfig {
    /// Parse and validate a JSON config. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| VaultError::Configuration(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Reject values the components would refuse at runtime anyway.
    pub fn validate(&self) -> Result<()> {
        if self.oracle.initial_price == 0 {
            return Err(VaultError::Configuration(
                "oracle.initial_price must be greater than zero".into(),
            ));
        }
        if self.oracle.max_deviation_bps == 0 {
            return Err(VaultError::Configuration(
                "oracle.max_deviation_bps must be greater than zero".into(),
            ));
        }
        if self.oracle.deviation_period_secs == 0 {
            return Err(VaultError::Configuration(
                "oracle.deviation_period_secs must be greater than zero".into(),
            ));
        }
        if self.queue.max_batch_size == 0 {
            return Err(VaultError::Configuration(
                "queue.max_batch_size must be greater than zero".into(),
            ));
        }
        if self.settlement.idempotency_cache_size == 0 {
            return Err(VaultError::Configuration(
                "settlement.idempotency_cache_size must be greater than zero".into(),
            ));
        }
        let s = &self.scheduler;
        if s.metrics_interval_secs == 0
            || s.collateral_interval_secs == 0
            || s.redemption_interval_secs == 0
            || s.job_timeout_secs == 0
        {
            return Err(VaultError::Configuration(
                "scheduler intervals and timeout must be greater than zero".into(),
            ));
        }
        // A unit is cut off at the timeout, so it can only be seen running
        // past the stuck threshold when the threshold comes first.
        if s.stuck_threshold_secs == 0 || s.stuck_threshold_secs >= s.job_timeout_secs {
            return Err(VaultError::Configuration(format!(
                "scheduler.stuck_threshold_secs ({}) must be between 1 and job_timeout_secs ({})",
                s.stuck_threshold_secs, s.job_timeout_secs
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = VaultConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.oracle.initial_price, 100_000_000);
        assert_eq!(cfg.oracle.max_deviation_bps, 100);
        assert_eq!(cfg.scheduler.metrics_interval_secs, 300);
        assert_eq!(cfg.scheduler.collateral_interval_secs, 3600);
        assert!(cfg.scheduler.stuck_threshold() < cfg.scheduler.job_timeout());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg = VaultConfig::from_json_str(
            r#"{ "oracle": { "max_deviation_bps": 250 }, "scheduler": { "job_timeout_secs": 5, "stuck_threshold_secs": 3 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.oracle.max_deviation_bps, 250);
        assert_eq!(cfg.oracle.deviation_period_secs, 300);
        assert_eq!(cfg.scheduler.job_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.queue.max_batch_size, constants::MAX_REQUESTS_PER_BATCH);
    }

    #[test]
    fn zero_period_rejected() {
        let err = VaultConfig::from_json_str(r#"{ "oracle": { "deviation_period_secs": 0 } }"#)
            .unwrap_err();
        assert!(matches!(err, VaultError::Configuration(_)));
    }

    #[test]
    fn stuck_threshold_must_precede_timeout() {
        for json in [
            r#"{ "scheduler": { "job_timeout_secs": 60, "stuck_threshold_secs": 60 } }"#,
            r#"{ "scheduler": { "job_timeout_secs": 60, "stuck_threshold_secs": 600 } }"#,
            r#"{ "scheduler": { "stuck_threshold_secs": 0 } }"#,
        ] {
            let err = VaultConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, VaultError::Configuration(ref m) if m.contains("stuck_threshold_secs")));
        }
        // Raising the timeout alone keeps the default threshold valid.
        assert!(VaultConfig::from_json_str(r#"{ "scheduler": { "job_timeout_secs": 600 } }"#).is_ok());
    }

    #[test]
    fn malformed_json_rejected() {
        assert!(VaultConfig::from_json_str("{ not json").is_err());
    }
}
