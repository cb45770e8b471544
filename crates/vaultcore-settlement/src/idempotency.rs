//! Payout ledger: which settlement paid which request.
//!
//! The queue's status machine already refuses to claim a COMPLETED
//! request. This ledger is keyed independently of request status, so a
//! request restored from an older snapshot, or a FAILED request whose
//! payout actually went through, is still refused with
//! [`VaultError::AlreadySettled`] and the paying settlement can be named.
//!
//! Memory is bounded: once `max_size` requests are recorded, the oldest
//! record is evicted.

use std::collections::{HashMap, VecDeque};

use vaultcore_types::{RequestId, Result, SettlementId, VaultError};

/// Bounded map from paid request to the settlement that paid it.
#[derive(Debug, Clone)]
pub struct IdempotencyGuard {
    paid_by: HashMap<RequestId, SettlementId>,
    /// Recording order for eviction (front = oldest).
    order: VecDeque<RequestId>,
    max_size: usize,
}

impl IdempotencyGuard {
    /// A guard remembering at most `max_size` requests (minimum one).
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            paid_by: HashMap::with_capacity(max_size.min(4_096)),
            order: VecDeque::with_capacity(max_size.min(4_096)),
            max_size,
        }
    }

    /// Record that `settlement` paid `id`.
    ///
    /// # Errors
    /// [`VaultError::AlreadySettled`] if `id` was recorded before; the
    /// first record is kept.
    pub fn mark_settled(&mut self, id: RequestId, settlement: SettlementId) -> Result<()> {
        if let Some(previous) = self.paid_by.get(&id) {
            tracing::error!(
                request = %id,
                paid_by = %previous,
                settlement = %settlement,
                "Request recorded as paid twice"
            );
            return Err(VaultError::AlreadySettled(id));
        }
        if self.paid_by.len() >= self.max_size {
            if let Some(oldest) = self.order.pop_front() {
                self.paid_by.remove(&oldest);
            }
        }
        self.paid_by.insert(id, settlement);
        self.order.push_back(id);
        Ok(())
    }

    #[must_use]
    pub fn is_settled(&self, id: &RequestId) -> bool {
        self.paid_by.contains_key(id)
    }

    /// The settlement that paid `id`, while the record is retained.
    #[must_use]
    pub fn settled_by(&self, id: &RequestId) -> Option<SettlementId> {
        self.paid_by.get(id).copied()
    }

    /// Requests paid by `settlement` that are still retained, oldest first.
    #[must_use]
    pub fn paid_in(&self, settlement: SettlementId) -> Vec<RequestId> {
        self.order
            .iter()
            .filter(|id| self.paid_by.get(*id) == Some(&settlement))
            .copied()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.paid_by.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.paid_by.is_empty()
    }
}
