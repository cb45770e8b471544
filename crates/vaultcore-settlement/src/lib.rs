//! # vaultcore-settlement
//!
//! **Finality for redemptions**: turns a batch of approved requests into
//! payouts.
//!
//! The [`SettlementEngine`]:
//! 1. Prices the whole batch once from the oracle
//! 2. Fails individual requests that fall under their minimum output
//! 3. Rejects the whole batch if liquidity cannot cover it
//! 4. Claims requests, debits collateral and executes payouts through a
//!    [`PayoutExecutor`]
//! 5. Burns escrowed shares, records a SHA-256 settlement reference, and
//!    checks share supply conservation
//!
//! An [`IdempotencyGuard`] records which settlement paid each request and
//! refuses to pay it again.

pub mod engine;
pub mod idempotency;
pub mod payout;

pub use engine::{
    RecordingError, SettledItem, SettlementContext, SettlementEngine, SettlementReport,
};
pub use idempotency::IdempotencyGuard;
pub use payout::{MemoryPayoutExecutor, Payout, PayoutBatch, PayoutExecutor};
