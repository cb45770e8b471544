//! Error types for the VaultCore settlement core.
//!
//! All errors use the `VC_ERR_` prefix convention for easy grepping in logs.
//! Error codes are grouped by taxonomy:
//! - 1xx: Validation errors (bad input; safe to retry after correcting it)
//! - 2xx: Authorization errors (never retried automatically)
//! - 3xx: Admission errors (no round, capacity reached, round expired)
//! - 4xx: Liquidity errors (batch-level settlement failure)
//! - 5xx: Slippage errors (per-request settlement failure)
//! - 6xx: Infrastructure errors (chain reads, payouts, job timeouts)
//! - 7xx: Invariant violations (illegal transitions, double settlement)
//! - 9xx: General / internal errors

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Address, RequestId, RequestStatus, RoundId};

/// Central error enum for all VaultCore operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VaultError {
    // =================================================================
    // Validation Errors (1xx)
    // =================================================================
    /// An amount was zero, negative in intent, or otherwise malformed.
    #[error("VC_ERR_100: Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// The request deadline is not in the future.
    #[error("VC_ERR_101: Deadline {deadline} has already passed")]
    DeadlineExpired { deadline: DateTime<Utc> },

    /// Batch collection was empty or exceeded the batch limit.
    #[error("VC_ERR_102: Invalid batch length: {len} (max {max})")]
    InvalidArrayLengths { len: usize, max: usize },

    /// The redemption signature does not verify against the owner address.
    #[error("VC_ERR_103: Signature proof does not verify for owner {0}")]
    InvalidSignature(Address),

    /// The owner already used this nonce.
    #[error("VC_ERR_104: Nonce {nonce} already used by {owner}")]
    NonceReplay { owner: Address, nonce: u64 },

    /// A price was zero or otherwise unusable.
    #[error("VC_ERR_105: Invalid price: {reason}")]
    InvalidPrice { reason: String },

    /// A price update carried no source tag.
    #[error("VC_ERR_106: Price update source must not be empty")]
    EmptySource,

    /// Max deviation must be non-zero.
    #[error("VC_ERR_107: Max deviation must be greater than zero")]
    InvalidMaxDeviation,

    /// Deviation period must be non-zero.
    #[error("VC_ERR_108: Deviation period must be greater than zero")]
    InvalidTimePeriod,

    /// Round start must precede its end.
    #[error("VC_ERR_109: Invalid time range: start {start} >= end {end}")]
    InvalidTimeRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Round capacity must be non-zero.
    #[error("VC_ERR_110: Round capacity must be greater than zero")]
    InvalidCapacity,

    /// Collateral must use the 8-decimal BTC convention.
    #[error("VC_ERR_111: Asset {symbol} has {decimals} decimals, expected 8")]
    InvalidDecimals { symbol: String, decimals: u8 },

    /// The asset is not registered.
    #[error("VC_ERR_112: Unknown collateral asset: {0}")]
    UnknownAsset(String),

    /// The asset is already registered.
    #[error("VC_ERR_113: Collateral asset already registered: {0}")]
    DuplicateAsset(String),

    /// The owner does not hold enough unreserved shares.
    #[error("VC_ERR_114: Insufficient shares: need {needed}, have {available}")]
    InsufficientShares { needed: u128, available: u128 },

    /// No request with this ID exists.
    #[error("VC_ERR_115: Redemption request not found: {0}")]
    RequestNotFound(RequestId),

    /// The asset is registered but not accepting movements.
    #[error("VC_ERR_116: Collateral asset inactive: {0}")]
    AssetInactive(String),

    // =================================================================
    // Authorization Errors (2xx)
    // =================================================================
    /// The caller lacks the role required for the action.
    #[error("VC_ERR_200: {principal} is not authorized to {action}")]
    Unauthorized { principal: Address, action: String },

    // =================================================================
    // Admission Errors (3xx)
    // =================================================================
    /// Another round is still active.
    #[error("VC_ERR_300: Round {0} is already active")]
    RoundAlreadyActive(RoundId),

    /// There is no active round to close.
    #[error("VC_ERR_301: No active subscription round")]
    NoActiveRound,

    /// The round exists but is not admitting deposits.
    #[error("VC_ERR_302: Round {round} not admitting: {reason}")]
    RoundNotAdmitting { round: RoundId, reason: String },

    /// No round with this ID exists.
    #[error("VC_ERR_303: Subscription round not found: {0}")]
    RoundNotFound(RoundId),

    // =================================================================
    // Liquidity Errors (4xx)
    // =================================================================
    /// The batch needs more liquidity than is available.
    #[error("VC_ERR_400: Insufficient liquidity: need {needed}, have {available}")]
    InsufficientLiquidity { needed: u128, available: u128 },

    // =================================================================
    // Slippage Errors (5xx)
    // =================================================================
    /// The settled amount is below the requester's stated minimum.
    #[error("VC_ERR_500: Insufficient output for {request}: {assets} < minimum {minimum}")]
    InsufficientOutputAssets {
        request: RequestId,
        assets: u128,
        minimum: u128,
    },

    // =================================================================
    // Infrastructure Errors (6xx)
    // =================================================================
    /// Reading chain state failed.
    #[error("VC_ERR_600: Chain read failed: {reason}")]
    ChainRead { reason: String },

    /// The payout executor rejected the transfer batch.
    #[error("VC_ERR_601: Payout rejected: {reason}")]
    PayoutRejected { reason: String },

    /// A scheduled unit of work exceeded its timeout.
    #[error("VC_ERR_602: Job {job} timed out for deployment {deployment}")]
    JobTimeout { job: String, deployment: String },

    /// The node does not manage this deployment.
    #[error("VC_ERR_603: Deployment not found: {0}")]
    DeploymentNotFound(String),

    // =================================================================
    // Invariant Violations (7xx)
    // =================================================================
    /// The requested state transition is not in the transition table.
    #[error("VC_ERR_700: Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    /// The request was already settled (idempotency guard).
    #[error("VC_ERR_701: Request already settled: {0}")]
    AlreadySettled(RequestId),

    /// Share supply no longer matches mints minus burns.
    #[error("VC_ERR_702: Supply invariant violation: {reason}")]
    SupplyInvariantViolation { reason: String },

    /// Releasing or burning more shares than are reserved.
    #[error("VC_ERR_703: Insufficient reserved shares: need {needed}, have {reserved}")]
    InsufficientReserved { needed: u128, reserved: u128 },

    /// The request can no longer be re-prioritised in its current state.
    #[error("VC_ERR_704: Request {id} is {status}; priority is fixed")]
    RequestLocked { id: RequestId, status: RequestStatus },

    // =================================================================
    // General / Internal (9xx)
    // =================================================================
    /// Unrecoverable internal error.
    #[error("VC_ERR_900: Internal error: {0}")]
    Internal(String),

    /// Serialization / deserialization error.
    #[error("VC_ERR_901: Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config file, missing fields, etc.).
    #[error("VC_ERR_902: Configuration error: {0}")]
    Configuration(String),

    /// I/O error (disk, network).
    #[error("VC_ERR_903: I/O error: {0}")]
    Io(String),
}

/// Crate-wide `Result` alias.
pub type Result<T> = std::result::Result<T, VaultError>;

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Machine-readable error class, one per taxonomy group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Authorization,
    Admission,
    Liquidity,
    Slippage,
    Infrastructure,
    Invariant,
    Internal,
}

impl ErrorKind {
    /// Stable wire name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::Authorization => "AUTHORIZATION",
            Self::Admission => "ADMISSION",
            Self::Liquidity => "LIQUIDITY",
            Self::Slippage => "SLIPPAGE",
            Self::Infrastructure => "INFRASTRUCTURE",
            Self::Invariant => "INVARIANT",
            Self::Internal => "INTERNAL",
        }
    }

    /// Whether the scheduler retries on its next tick. Everything else
    /// needs a caller or operator to act first.
    #[must_use]
    pub fn retried_by_scheduler(&self) -> bool {
        matches!(self, Self::Infrastructure)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl VaultError {
    /// Classify this error into its taxonomy group.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. }
            | Self::DeadlineExpired { .. }
            | Self::InvalidArrayLengths { .. }
            | Self::InvalidSignature(_)
            | Self::NonceReplay { .. }
            | Self::InvalidPrice { .. }
            | Self::EmptySource
            | Self::InvalidMaxDeviation
            | Self::InvalidTimePeriod
            | Self::InvalidTimeRange { .. }
            | Self::InvalidCapacity
            | Self::InvalidDecimals { .. }
            | Self::UnknownAsset(_)
            | Self::DuplicateAsset(_)
            | Self::InsufficientShares { .. }
            | Self::RequestNotFound(_)
            | Self::AssetInactive(_) => ErrorKind::Validation,
            Self::Unauthorized { .. } => ErrorKind::Authorization,
            Self::RoundAlreadyActive(_)
            | Self::NoActiveRound
            | Self::RoundNotAdmitting { .. }
            | Self::RoundNotFound(_) => ErrorKind::Admission,
            Self::InsufficientLiquidity { .. } => ErrorKind::Liquidity,
            Self::InsufficientOutputAssets { .. } => ErrorKind::Slippage,
            Self::ChainRead { .. }
            | Self::PayoutRejected { .. }
            | Self::JobTimeout { .. }
            | Self::DeploymentNotFound(_)
            | Self::Io(_) => ErrorKind::Infrastructure,
            Self::InvalidTransition { .. }
            | Self::AlreadySettled(_)
            | Self::SupplyInvariantViolation { .. }
            | Self::InsufficientReserved { .. }
            | Self::RequestLocked { .. } => ErrorKind::Invariant,
            Self::Internal(_) | Self::Serialization(_) | Self::Configuration(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// The `VC_ERR_nnn` code of this error.
    #[must_use]
    pub fn code(&self) -> String {
        let msg = self.to_string();
        msg.split(':').next().unwrap_or_default().to_string()
    }
}

/// Serializable rejection handed back to callers: machine-readable kind
/// and code plus the human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: ErrorKind,
    pub code: String,
    pub reason: String,
}

impl From<&VaultError> for Rejection {
    fn from(err: &VaultError) -> Self {
        Self {
            kind: err.kind(),
            code: err.code(),
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_contains_prefix() {
        let err = VaultError::RequestNotFound(RequestId::new());
        let msg = format!("{err}");
        assert!(msg.starts_with("VC_ERR_115"), "Got: {msg}");
    }

    #[test]
    fn insufficient_liquidity_display() {
        let err = VaultError::InsufficientLiquidity {
            needed: 50_000_000,
            available: 40_000_000,
        };
        let msg = format!("{err}");
        assert!(msg.contains("VC_ERR_400"));
        assert!(msg.contains("50000000"));
        assert!(msg.contains("40000000"));
        assert_eq!(err.code(), "VC_ERR_400");
    }

    #[test]
    fn invalid_transition_display() {
        let err = VaultError::InvalidTransition {
            id: RequestId::new(),
            from: RequestStatus::Completed,
            to: RequestStatus::Pending,
        };
        let msg = format!("{err}");
        assert!(msg.contains("COMPLETED -> PENDING"), "Got: {msg}");
        assert_eq!(err.kind(), ErrorKind::Invariant);
    }

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(VaultError::EmptySource.kind(), ErrorKind::Validation);
        assert_eq!(VaultError::NoActiveRound.kind(), ErrorKind::Admission);
        assert_eq!(
            VaultError::ChainRead { reason: "rpc down".into() }.kind(),
            ErrorKind::Infrastructure
        );
        assert!(ErrorKind::Infrastructure.retried_by_scheduler());
        assert!(!ErrorKind::Liquidity.retried_by_scheduler());
        assert!(!ErrorKind::Authorization.retried_by_scheduler());
    }

    #[test]
    fn rejection_carries_kind_and_reason() {
        let err = VaultError::InvalidCapacity;
        let rejection = Rejection::from(&err);
        assert_eq!(rejection.kind, ErrorKind::Validation);
        assert_eq!(rejection.code, "VC_ERR_110");
        assert!(rejection.reason.contains("capacity"));
    }

    #[test]
    fn all_errors_have_vc_err_prefix() {
        let errors: Vec<Box<dyn std::error::Error>> = vec![
            Box::new(VaultError::InvalidMaxDeviation),
            Box::new(VaultError::NoActiveRound),
            Box::new(VaultError::EmptySource),
            Box::new(VaultError::Internal("test".into())),
            Box::new(VaultError::PayoutRejected { reason: "x".into() }),
        ];
        for err in errors {
            let msg = format!("{err}");
            assert!(
                msg.starts_with("VC_ERR_"),
                "Error missing VC_ERR_ prefix: {msg}"
            );
        }
    }
}
