//! Collateral ledger.
//!
//! Tracks per-asset balances held by the vault and the subset designated
//! as redeemable liquidity. All collateral is BTC-denominated with 8
//! decimals, so amounts of different assets sum directly.
//!
//! Assets are kept in a `BTreeMap` keyed by symbol: liquidity is drawn
//! in symbol order, which keeps debits deterministic.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vaultcore_types::{
    ActivityEvent, ActivityKind, AssetBalance, CollateralAsset, Result, VaultError,
    constants::BPS_DENOMINATOR, math::mul_div,
};

/// The part of a liquidity debit drawn from one asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityLeg {
    pub symbol: String,
    pub amount: u128,
}

/// Registry and balances of collateral assets.
#[derive(Debug, Clone, Default)]
pub struct CollateralLedger {
    assets: BTreeMap<String, CollateralAsset>,
    events: Vec<ActivityEvent>,
}

impl CollateralLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new collateral asset.
    ///
    /// # Errors
    /// `InvalidDecimals` unless the asset uses 8 decimals;
    /// `DuplicateAsset` if the symbol is taken.
    pub fn register(&mut self, asset: CollateralAsset, now: DateTime<Utc>) -> Result<()> {
        asset.validate()?;
        if self.assets.contains_key(&asset.symbol) {
            return Err(VaultError::DuplicateAsset(asset.symbol));
        }
        tracing::info!(symbol = %asset.symbol, address = %asset.address, "Collateral registered");
        self.events.push(
            ActivityEvent::new(
                ActivityKind::CollateralRegistered,
                format!("registered {}", asset.symbol),
                now,
            )
            .with_metadata(serde_json::json!({
                "symbol": asset.symbol,
                "address": asset.address,
            })),
        );
        self.assets.insert(asset.symbol.clone(), asset);
        Ok(())
    }

    fn asset_mut(&mut self, symbol: &str) -> Result<&mut CollateralAsset> {
        self.assets
            .get_mut(symbol)
            .ok_or_else(|| VaultError::UnknownAsset(symbol.to_string()))
    }

    fn active_asset_mut(&mut self, symbol: &str) -> Result<&mut CollateralAsset> {
        let asset = self.asset_mut(symbol)?;
        if !asset.is_active {
            return Err(VaultError::AssetInactive(symbol.to_string()));
        }
        Ok(asset)
    }

    /// Credit a deposit. New collateral is immediately redeemable.
    pub fn deposit(&mut self, symbol: &str, amount: u128) -> Result<()> {
        if amount == 0 {
            return Err(VaultError::InvalidAmount {
                reason: "deposit amount must be greater than zero".into(),
            });
        }
        let asset = self.active_asset_mut(symbol)?;
        asset.balance.held = asset.balance.held.saturating_add(amount);
        asset.balance.redeemable = asset.balance.redeemable.saturating_add(amount);
        Ok(())
    }

    /// Move redeemable collateral out to the strategy (held, not payable).
    ///
    /// # Errors
    /// `InsufficientLiquidity` if the asset's redeemable balance is short.
    pub fn deploy(&mut self, symbol: &str, amount: u128) -> Result<()> {
        let asset = self.asset_mut(symbol)?;
        if asset.balance.redeemable < amount {
            return Err(VaultError::InsufficientLiquidity {
                needed: amount,
                available: asset.balance.redeemable,
            });
        }
        asset.balance.redeemable -= amount;
        Ok(())
    }

    /// Bring deployed collateral back into the redeemable pool.
    ///
    /// # Errors
    /// `InvalidAmount` if more is recalled than is deployed.
    pub fn recall(&mut self, symbol: &str, amount: u128) -> Result<()> {
        let asset = self.asset_mut(symbol)?;
        let deployed = asset.balance.deployed();
        if deployed < amount {
            return Err(VaultError::InvalidAmount {
                reason: format!("cannot recall {amount} of {symbol}: only {deployed} deployed"),
            });
        }
        asset.balance.redeemable += amount;
        Ok(())
    }

    /// Draw `amount` of redeemable liquidity across active assets.
    ///
    /// All-or-nothing: if the pool is short, nothing is debited.
    ///
    /// # Errors
    /// `InsufficientLiquidity` if `amount > available_liquidity()`.
    pub fn debit_liquidity(&mut self, amount: u128) -> Result<Vec<LiquidityLeg>> {
        let available = self.available_liquidity();
        if amount > available {
            return Err(VaultError::InsufficientLiquidity {
                needed: amount,
                available,
            });
        }
        let mut remaining = amount;
        let mut legs = Vec::new();
        for asset in self.assets.values_mut().filter(|a| a.is_active) {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(asset.balance.redeemable);
            if take == 0 {
                continue;
            }
            asset.balance.redeemable -= take;
            asset.balance.held -= take;
            remaining -= take;
            legs.push(LiquidityLeg {
                symbol: asset.symbol.clone(),
                amount: take,
            });
        }
        Ok(legs)
    }

    /// Undo a debit (payout rejected).
    pub fn restore_liquidity(&mut self, legs: &[LiquidityLeg]) {
        for leg in legs {
            if let Some(asset) = self.assets.get_mut(&leg.symbol) {
                asset.balance.held = asset.balance.held.saturating_add(leg.amount);
                asset.balance.redeemable = asset.balance.redeemable.saturating_add(leg.amount);
            }
        }
    }

    /// Overwrite an asset's held balance with a chain reading. Redeemable
    /// is clamped so it never exceeds what is held.
    pub fn sync_balance(&mut self, symbol: &str, chain_held: u128, now: DateTime<Utc>) -> Result<()> {
        let asset = self.asset_mut(symbol)?;
        let before = asset.balance;
        asset.balance.held = chain_held;
        asset.balance.redeemable = asset.balance.redeemable.min(chain_held);
        let after = asset.balance;
        if before != after {
            tracing::debug!(
                symbol,
                held_before = before.held,
                held_after = after.held,
                "Collateral balance synced"
            );
            self.events.push(
                ActivityEvent::new(ActivityKind::CollateralSynced, format!("synced {symbol}"), now)
                    .with_metadata(serde_json::json!({
                        "symbol": symbol,
                        "held_before": before.held.to_string(),
                        "held_after": after.held.to_string(),
                        "redeemable": after.redeemable.to_string(),
                    })),
            );
        }
        Ok(())
    }

    pub fn set_active(&mut self, symbol: &str, active: bool) -> Result<()> {
        self.asset_mut(symbol)?.is_active = active;
        Ok(())
    }

    pub fn set_verified(&mut self, symbol: &str, verified: bool) -> Result<()> {
        self.asset_mut(symbol)?.is_verified = verified;
        Ok(())
    }

    /// Redeemable liquidity across active assets.
    #[must_use]
    pub fn available_liquidity(&self) -> u128 {
        self.assets
            .values()
            .filter(|a| a.is_active)
            .fold(0u128, |acc, a| acc.saturating_add(a.balance.redeemable))
    }

    /// Everything held across all assets.
    #[must_use]
    pub fn total_held(&self) -> u128 {
        self.assets
            .values()
            .fold(0u128, |acc, a| acc.saturating_add(a.balance.held))
    }

    /// Share of held collateral not available for payouts, in bps.
    /// Recomputed on every call.
    #[must_use]
    pub fn utilization_bps(&self) -> u32 {
        let held = self.total_held();
        if held == 0 {
            return 0;
        }
        let unavailable = held.saturating_sub(self.available_liquidity());
        u32::try_from(mul_div(unavailable, BPS_DENOMINATOR, held)).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn balance(&self, symbol: &str) -> Option<AssetBalance> {
        self.assets.get(symbol).map(|a| a.balance)
    }

    #[must_use]
    pub fn asset(&self, symbol: &str) -> Option<&CollateralAsset> {
        self.assets.get(symbol)
    }

    pub fn assets(&self) -> impl Iterator<Item = &CollateralAsset> {
        self.assets.values()
    }

    /// Drain activity events produced since the last call.
    pub fn take_events(&mut self) -> Vec<ActivityEvent> {
        std::mem::take(&mut self.events)
    }
}
