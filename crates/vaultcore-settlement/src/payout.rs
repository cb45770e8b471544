//! Payout execution boundary.
//!
//! The engine hands a fully-priced [`PayoutBatch`] to a [`PayoutExecutor`]
//! and treats any error as a rejection of the whole batch.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vaultcore_ingress::LiquidityLeg;
use vaultcore_types::{Address, RequestId, Result, SettlementId, VaultError};

/// One transfer to a redemption recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub request_id: RequestId,
    pub recipient: Address,
    /// Canonical 8-decimal units.
    pub amount: u128,
}

/// Everything an executor needs to move assets for one settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutBatch {
    pub settlement_id: SettlementId,
    /// The single price every payout in the batch was valued at.
    pub price: u128,
    pub payouts: Vec<Payout>,
    /// Which collateral assets fund the batch.
    pub legs: Vec<LiquidityLeg>,
}

impl PayoutBatch {
    #[must_use]
    pub fn total(&self) -> u128 {
        self.payouts
            .iter()
            .fold(0u128, |acc, p| acc.saturating_add(p.amount))
    }

    /// Settlement reference: SHA-256 over the settlement id, the price and
    /// every payout in order, hex encoded.
    #[must_use]
    pub fn reference(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"vaultcore:settlement:v1:");
        hasher.update(self.settlement_id.0.as_bytes());
        hasher.update(self.price.to_le_bytes());
        for payout in &self.payouts {
            hasher.update(payout.request_id.0.as_bytes());
            hasher.update(payout.recipient.as_bytes());
            hasher.update(payout.amount.to_le_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Moves assets to recipients. Returns an external transaction reference.
pub trait PayoutExecutor: Send + Sync {
    /// Execute every transfer in `batch`, or none of them.
    ///
    /// # Errors
    /// Any error rejects the whole batch; the engine restores liquidity
    /// and marks every claimed request FAILED.
    fn execute(&self, batch: &PayoutBatch) -> Result<String>;
}

/// Executor that records batches in memory. Used by nodes without an
/// external transfer backend and by tests; can be switched to reject.
#[derive(Debug, Default)]
pub struct MemoryPayoutExecutor {
    executed: Mutex<Vec<PayoutBatch>>,
    reject_with: Mutex<Option<String>>,
}

impl MemoryPayoutExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every following batch with `reason`; `None` accepts again.
    pub fn set_rejection(&self, reason: Option<&str>) {
        if let Ok(mut guard) = self.reject_with.lock() {
            *guard = reason.map(str::to_string);
        }
    }

    /// Batches accepted so far.
    #[must_use]
    pub fn executed(&self) -> Vec<PayoutBatch> {
        self.executed.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Sum paid to `recipient` across accepted batches.
    #[must_use]
    pub fn paid_to(&self, recipient: &Address) -> u128 {
        self.executed()
            .iter()
            .flat_map(|b| b.payouts.iter())
            .filter(|p| p.recipient == *recipient)
            .fold(0u128, |acc, p| acc.saturating_add(p.amount))
    }
}

impl PayoutExecutor for MemoryPayoutExecutor {
    fn execute(&self, batch: &PayoutBatch) -> Result<String> {
        let rejection = self
            .reject_with
            .lock()
            .map_err(|_| VaultError::Internal("payout executor lock poisoned".into()))?
            .clone();
        if let Some(reason) = rejection {
            return Err(VaultError::PayoutRejected { reason });
        }
        let mut executed = self
            .executed
            .lock()
            .map_err(|_| VaultError::Internal("payout executor lock poisoned".into()))?;
        executed.push(batch.clone());
        Ok(format!("mem:{}:{}", batch.settlement_id, executed.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(amounts: &[u128]) -> PayoutBatch {
        PayoutBatch {
            settlement_id: SettlementId::new(),
            price: 100_000_000,
            payouts: amounts
                .iter()
                .map(|a| Payout {
                    request_id: RequestId::new(),
                    recipient: Address::random(),
                    amount: *a,
                })
                .collect(),
            legs: Vec::new(),
        }
    }

    #[test]
    fn reference_is_stable_hex_sha256() {
        let b = batch(&[1, 2]);
        let r1 = b.reference();
        assert_eq!(r1.len(), 64);
        assert_eq!(r1, b.reference());
        let mut other = b.clone();
        other.payouts[1].amount = 3;
        assert_ne!(r1, other.reference());
    }

    #[test]
    fn memory_executor_records_and_rejects() {
        let exec = MemoryPayoutExecutor::new();
        let b = batch(&[5, 7]);
        assert_eq!(b.total(), 12);
        assert!(exec.execute(&b).unwrap().starts_with("mem:stl:"));
        assert_eq!(exec.paid_to(&b.payouts[0].recipient), 5);

        exec.set_rejection(Some("bridge down"));
        assert!(matches!(
            exec.execute(&b),
            Err(VaultError::PayoutRejected { .. })
        ));
        assert_eq!(exec.executed().len(), 1);
    }
}
