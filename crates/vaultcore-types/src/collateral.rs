//! Collateral asset registry types.

use serde::{Deserialize, Serialize};

use crate::{AssetBalance, Result, VaultError, constants::CANONICAL_DECIMALS};

/// A supported BTC-denominated collateral asset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollateralAsset {
    /// Token contract address on its chain (opaque to the core).
    pub address: String,
    /// Ticker, e.g. "WBTC". Used as the registry key.
    pub symbol: String,
    pub decimals: u8,
    pub is_active: bool,
    pub is_verified: bool,
    pub balance: AssetBalance,
}

impl CollateralAsset {
    /// A new, active, unverified asset with zero balance.
    #[must_use]
    pub fn new(address: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address: address.into(),
            symbol: symbol.into(),
            decimals,
            is_active: true,
            is_verified: false,
            balance: AssetBalance::default(),
        }
    }

    /// Reject assets that do not follow the 8-decimal BTC convention.
    ///
    /// # Errors
    /// Returns [`VaultError::InvalidDecimals`] or [`VaultError::InvalidAmount`]
    /// for an empty symbol.
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(VaultError::InvalidAmount {
                reason: "collateral symbol must not be empty".to_string(),
            });
        }
        if self.decimals != CANONICAL_DECIMALS {
            return Err(VaultError::InvalidDecimals {
                symbol: self.symbol.clone(),
                decimals: self.decimals,
            });
        }
        Ok(())
    }
}

/// Vault-wide liquidity and price read model. Derived on every read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LiquiditySnapshot {
    /// Interpolated price per share at snapshot time.
    pub price: u128,
    /// Target the oracle is slewing toward.
    pub target_price: u128,
    pub oracle_round: u64,
    pub available_liquidity: u128,
    pub total_held: u128,
    /// Share of held collateral not available for payouts, in bps.
    pub utilization_bps: u32,
    pub total_share_supply: u128,
    /// Shares earmarked by open redemption requests.
    pub reserved_shares: u128,
    /// Price rendered as a decimal for display, e.g. "1.02000000".
    pub price_display: rust_decimal::Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eight_decimals_accepted() {
        let asset = CollateralAsset::new("0xwbtc", "WBTC", 8);
        assert!(asset.validate().is_ok());
        assert!(asset.is_active);
        assert!(!asset.is_verified);
    }

    #[test]
    fn non_btc_decimals_rejected() {
        let asset = CollateralAsset::new("0xweth", "WETH", 18);
        assert!(matches!(
            asset.validate(),
            Err(VaultError::InvalidDecimals { decimals: 18, .. })
        ));
    }

    #[test]
    fn empty_symbol_rejected() {
        let asset = CollateralAsset::new("0x0", " ", 8);
        assert!(asset.validate().is_err());
    }
}
