//! # vaultcore-ingress
//!
//! **Deposit side of VaultCore.**
//!
//! Everything that decides what the vault holds and who owns it:
//!
//! - [`CollateralLedger`]: per-asset `held` / `redeemable` balances, with
//!   utilization derived on read
//! - [`ShareLedger`]: per-owner `available` / `reserved` share balances;
//!   redemption shares are escrowed here between approval and settlement
//! - [`SupplyConservation`]: Σ balances == minted − burned
//! - [`SubscriptionWindow`]: time- and capacity-bounded admission rounds
//!
//! ## Deposit flow
//!
//! ```text
//! validate (read-only) → collateral credited → shares minted → confirm_deposit
//! ```

pub mod collateral_ledger;
pub mod share_ledger;
pub mod subscription;
pub mod supply_conservation;

pub use collateral_ledger::{CollateralLedger, LiquidityLeg};
pub use share_ledger::ShareLedger;
pub use subscription::SubscriptionWindow;
pub use supply_conservation::SupplyConservation;
