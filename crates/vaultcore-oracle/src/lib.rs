//! # vaultcore-oracle
//!
//! **Bounded-drift price oracle for VaultCore.**
//!
//! The oracle is the pricing plane -- it holds the price per share used to
//! value redemptions and mint subscription shares. It has:
//!
//! - **Bounded slew**: the price moves at most `max_deviation_bps` of the
//!   transition start price per `deviation_period_secs`
//! - **No overshoot**: every path clamps exactly at its target
//! - **Snap for small moves**: targets within one period's allowance apply at once
//! - **Pure reads**: `current_price(now)` is a function of state and time only

pub mod oracle;
pub mod slew;

pub use oracle::{OracleSnapshot, PriceOracle, PriceUpdate};
pub use slew::{Transition, within_one_period};
