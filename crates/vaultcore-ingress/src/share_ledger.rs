//! Share ledger with available/reserved accounting.
//!
//! Tracks per-owner share balances. Redemption approval reserves shares
//! (available → reserved); settlement burns reserved shares; cancellation
//! and expiry release them. All mutations are atomic: either the full
//! operation succeeds or the balance is unchanged. Balances never go
//! negative, including on plain transfers.

use std::collections::HashMap;

use vaultcore_types::{Address, Result, ShareBalance, VaultError};

use crate::supply_conservation::SupplyConservation;

/// Source of truth for share balances.
#[derive(Debug, Clone, Default)]
pub struct ShareLedger {
    balances: HashMap<Address, ShareBalance>,
    supply: SupplyConservation,
}

impl ShareLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue new shares to `owner` (subscription).
    pub fn mint(&mut self, owner: Address, amount: u128) {
        let entry = self.balances.entry(owner).or_default();
        entry.available = entry.available.saturating_add(amount);
        self.supply.record_mint(amount);
    }

    /// Earmark shares for a redemption (available → reserved).
    ///
    /// # Errors
    /// Returns `InsufficientShares` if available < amount.
    pub fn reserve(&mut self, owner: Address, amount: u128) -> Result<()> {
        let entry = self.balances.get_mut(&owner).ok_or(VaultError::InsufficientShares {
            needed: amount,
            available: 0,
        })?;
        if entry.available < amount {
            return Err(VaultError::InsufficientShares {
                needed: amount,
                available: entry.available,
            });
        }
        entry.available -= amount;
        entry.reserved += amount;
        Ok(())
    }

    /// Return earmarked shares (reserved → available).
    ///
    /// # Errors
    /// Returns `InsufficientReserved` if reserved < amount.
    pub fn release(&mut self, owner: Address, amount: u128) -> Result<()> {
        let entry = self.reserved_entry(owner, amount)?;
        entry.reserved -= amount;
        entry.available += amount;
        Ok(())
    }

    /// Destroy earmarked shares (settlement).
    ///
    /// # Errors
    /// Returns `InsufficientReserved` if reserved < amount.
    pub fn burn_reserved(&mut self, owner: Address, amount: u128) -> Result<()> {
        let entry = self.reserved_entry(owner, amount)?;
        entry.reserved -= amount;
        self.supply.record_burn(amount);
        Ok(())
    }

    fn reserved_entry(&mut self, owner: Address, amount: u128) -> Result<&mut ShareBalance> {
        let entry = self
            .balances
            .get_mut(&owner)
            .ok_or(VaultError::InsufficientReserved {
                needed: amount,
                reserved: 0,
            })?;
        if entry.reserved < amount {
            return Err(VaultError::InsufficientReserved {
                needed: amount,
                reserved: entry.reserved,
            });
        }
        Ok(entry)
    }

    /// Move available shares between owners.
    ///
    /// # Errors
    /// Returns `InsufficientShares` if the sender's available balance is short.
    pub fn transfer(&mut self, from: Address, to: Address, amount: u128) -> Result<()> {
        let available = self.balance(from).available;
        if available < amount {
            return Err(VaultError::InsufficientShares {
                needed: amount,
                available,
            });
        }
        if from == to || amount == 0 {
            return Ok(());
        }
        if let Some(sender) = self.balances.get_mut(&from) {
            sender.available -= amount;
        }
        let receiver = self.balances.entry(to).or_default();
        receiver.available = receiver.available.saturating_add(amount);
        Ok(())
    }

    /// Balance for `owner`; zero if unknown.
    #[must_use]
    pub fn balance(&self, owner: Address) -> ShareBalance {
        self.balances.get(&owner).copied().unwrap_or_default()
    }

    /// Sum of every owner's available + reserved shares.
    #[must_use]
    pub fn total_supply(&self) -> u128 {
        self.balances
            .values()
            .fold(0u128, |acc, b| acc.saturating_add(b.total()))
    }

    /// Shares earmarked by open redemptions.
    #[must_use]
    pub fn total_reserved(&self) -> u128 {
        self.balances
            .values()
            .fold(0u128, |acc, b| acc.saturating_add(b.reserved))
    }

    /// Check Σ balances == minted - burned.
    pub fn verify_supply(&self) -> Result<()> {
        self.supply.verify(self.total_supply())
    }

    #[must_use]
    pub fn supply(&self) -> &SupplyConservation {
        &self.supply
    }
}
