//! Share supply conservation invariant checker.
//!
//! Mathematical invariant enforced after every mint and settlement:
//! ```text
//! Σ(available + reserved) == Σ(minted) - Σ(burned)
//! ```
//!
//! Transfers and reservations move shares between owners and buckets;
//! only mints and burns change supply.

use vaultcore_types::{Result, VaultError};

/// Tracks cumulative mints and burns.
#[derive(Debug, Clone, Default)]
pub struct SupplyConservation {
    minted: u128,
    burned: u128,
}

impl SupplyConservation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_mint(&mut self, amount: u128) {
        self.minted = self.minted.saturating_add(amount);
    }

    pub fn record_burn(&mut self, amount: u128) {
        self.burned = self.burned.saturating_add(amount);
    }

    /// Expected supply: minted - burned.
    #[must_use]
    pub fn expected_supply(&self) -> u128 {
        self.minted.saturating_sub(self.burned)
    }

    #[must_use]
    pub fn total_minted(&self) -> u128 {
        self.minted
    }

    #[must_use]
    pub fn total_burned(&self) -> u128 {
        self.burned
    }

    /// Verify that the sum of all owner balances matches minted - burned.
    ///
    /// # Errors
    /// Returns [`VaultError::SupplyInvariantViolation`] if actual ≠ expected.
    pub fn verify(&self, actual_supply: u128) -> Result<()> {
        let expected = self.expected_supply();
        if actual_supply != expected {
            return Err(VaultError::SupplyInvariantViolation {
                reason: format!(
                    "actual share supply {actual_supply} != expected {expected} \
                     (minted={}, burned={})",
                    self.minted, self.burned
                ),
            });
        }
        Ok(())
    }
}
