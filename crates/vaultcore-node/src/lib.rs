//! # vaultcore-node
//!
//! Runtime wiring for **VaultCore** deployments.
//!
//! - [`Vault`]: one deployment's components behind a single `RwLock`, with
//!   lazy expiry on every mutation and activity forwarding
//! - [`Scheduler`]: fixed-interval metrics, collateral and redemption jobs
//!   with per-deployment timeouts and failure isolation
//! - [`HealthHandle`]: job health and the stuck-job check
//! - [`ChainReader`]: async chain state boundary, with [`MemoryChainReader`]
//! - [`TracingActivityLog`]: activity events as structured tracing records
//! - [`telemetry`]: subscriber setup

pub mod activity;
pub mod chain;
pub mod health;
pub mod scheduler;
pub mod telemetry;
pub mod vault;

pub use activity::{FanoutActivityLog, TracingActivityLog};
pub use chain::{ChainReader, ChainSnapshot, MemoryChainReader};
pub use health::{HealthHandle, HealthReport, HealthStatus, JobHealth, JobKind, JobState};
pub use scheduler::{Scheduler, TickSummary};
pub use vault::{DepositReceipt, Vault};
