//! # vaultcore-types
//!
//! Shared types, errors, and configuration for the **VaultCore** settlement
//! core.
//!
//! This crate is the leaf dependency of the workspace; every other crate
//! depends on it. It defines:
//!
//! - **Identifiers**: [`Address`], [`RequestId`], [`SettlementId`], [`RoundId`], [`DeploymentId`]
//! - **Redemption model**: [`RedemptionRequest`], [`RedemptionIntent`], [`RequestStatus`], [`SettlementItem`]
//! - **Subscription model**: [`SubscriptionRound`], [`Eligibility`], [`CloseReason`]
//! - **Collateral model**: [`CollateralAsset`], [`AssetBalance`], [`LiquiditySnapshot`]
//! - **Share model**: [`ShareBalance`]
//! - **Audit trail**: [`ActivityEvent`], [`ActivityKind`], [`ActivitySink`]
//! - **Authorization**: [`AuthorizationTable`], [`Role`]
//! - **Time**: [`Clock`], [`SystemClock`], [`ManualClock`]
//! - **Configuration**: [`VaultConfig`] and its sections
//! - **Errors**: [`VaultError`] with `VC_ERR_` prefix codes and [`ErrorKind`]
//! - **Math**: saturating fixed-point helpers in [`math`]
//! - **Constants**: system-wide limits and defaults

pub mod activity;
pub mod auth;
pub mod balance;
pub mod clock;
pub mod collateral;
pub mod config;
pub mod constants;
pub mod error;
pub mod ids;
pub mod math;
pub mod request;
pub mod round;

// Re-export all primary types at crate root for ergonomic imports:
//   use vaultcore_types::{RedemptionRequest, RequestStatus, VaultError, ...};

pub use activity::*;
pub use auth::*;
pub use balance::*;
pub use clock::*;
pub use collateral::*;
pub use config::*;
pub use error::*;
pub use ids::*;
pub use request::*;
pub use round::*;

// Constants and math helpers are accessed via their modules
// (not re-exported to avoid name collisions).
