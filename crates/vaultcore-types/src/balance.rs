//! Share balance tracking for the redemption escrow model.
//!
//! Every owner has an `available` share balance (transferable, redeemable)
//! and a `reserved` balance (earmarked by approved redemption requests).

use serde::{Deserialize, Serialize};

/// A single owner's share balance.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ShareBalance {
    /// Free shares.
    pub available: u128,
    /// Shares earmarked by redemption requests awaiting settlement.
    pub reserved: u128,
}

impl ShareBalance {
    /// Total balance (available + reserved).
    #[must_use]
    pub fn total(&self) -> u128 {
        self.available.saturating_add(self.reserved)
    }

    /// Whether this entry has no balance at all.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.available == 0 && self.reserved == 0
    }
}

/// Balance of one collateral asset held by the vault, in canonical units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AssetBalance {
    /// Everything the vault holds of this asset.
    pub held: u128,
    /// The part of `held` designated as redeemable liquidity.
    pub redeemable: u128,
}

impl AssetBalance {
    /// Collateral held but deployed elsewhere (not available for payouts).
    #[must_use]
    pub fn deployed(&self) -> u128 {
        self.held.saturating_sub(self.redeemable)
    }
}
