//! Redemption queue: request lifecycle and settlement ordering.
//!
//! The queue owns every [`RedemptionRequest`] ever submitted and drives it
//! through the transition table in [`RequestStatus::can_transition_to`].
//! Share escrow lives in the [`ShareLedger`]: approval reserves, terminal
//! cancellation or expiry releases, and settlement (outside the queue)
//! burns.
//!
//! Queue positions are never stored on the request. They are read from a
//! [`PositionIndex`] keyed by approval sequence, which keeps the APPROVED
//! set densely ranked `1..=N` through any mix of approvals, cancellations,
//! expiries and claims.
//!
//! Expiry and batch selection only look at open requests: a deadline
//! index holds PENDING and APPROVED ids, and a candidate set holds
//! APPROVED and FAILED ids. Terminal requests stay readable but are never
//! scanned again.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use vaultcore_ingress::ShareLedger;
use vaultcore_types::{
    ActivityEvent, ActivityKind, Address, AuthorizationTable, DeploymentId, ItemResult, QueueConfig,
    RedemptionIntent, RedemptionRequest, RequestId, RequestStatus, Result, Role, VaultError,
    math::shares_to_assets,
};

use crate::position_index::PositionIndex;

/// Queue-wide counters for the stats read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Request count per status; every status is present.
    pub by_status: BTreeMap<RequestStatus, u64>,
    pub total: u64,
    /// Number of APPROVED requests waiting for settlement.
    pub queue_length: u64,
    /// Mean seconds from submission to completion over completed requests.
    pub average_processing_secs: Option<Decimal>,
    /// Shares escrowed by requests that still hold a reservation.
    pub reserved_shares: u128,
}

/// Request store and ordering engine for one deployment.
#[derive(Debug, Clone)]
pub struct RedemptionQueue {
    /// Intents must be signed for this deployment.
    deployment: DeploymentId,
    requests: HashMap<RequestId, RedemptionRequest>,
    /// Submission order, for deterministic scans.
    order: Vec<RequestId>,
    positions: PositionIndex,
    approval_seq: HashMap<RequestId, usize>,
    /// PENDING and APPROVED requests, earliest deadline first.
    deadlines: BTreeSet<(DateTime<Utc>, RequestId)>,
    /// APPROVED and FAILED requests.
    settleable: HashSet<RequestId>,
    used_nonces: HashSet<(Address, u64)>,
    max_batch_size: usize,
    events: Vec<ActivityEvent>,
}

impl RedemptionQueue {
    #[must_use]
    pub fn new(deployment: DeploymentId, max_batch_size: usize) -> Self {
        Self {
            deployment,
            requests: HashMap::new(),
            order: Vec::new(),
            positions: PositionIndex::new(),
            approval_seq: HashMap::new(),
            deadlines: BTreeSet::new(),
            settleable: HashSet::new(),
            used_nonces: HashSet::new(),
            max_batch_size,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(deployment: DeploymentId, config: &QueueConfig) -> Self {
        Self::new(deployment, config.max_batch_size)
    }

    #[must_use]
    pub fn deployment(&self) -> &DeploymentId {
        &self.deployment
    }

    /// Reject empty or oversized batches before touching any item.
    ///
    /// # Errors
    /// `InvalidArrayLengths`.
    pub fn check_batch_len(&self, len: usize) -> Result<()> {
        if len == 0 || len > self.max_batch_size {
            return Err(VaultError::InvalidArrayLengths {
                len,
                max: self.max_batch_size,
            });
        }
        Ok(())
    }

    // -----------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------

    /// Submit a batch of signed intents. Each item succeeds or fails on
    /// its own; successful items become PENDING with no queue position.
    ///
    /// `price` is the current price per share, used for the expected
    /// asset amount recorded on each request.
    pub fn submit(
        &mut self,
        intents: Vec<RedemptionIntent>,
        price: u128,
        shares: &ShareLedger,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemResult<RequestId>>> {
        self.check_batch_len(intents.len())?;
        let results = intents
            .into_iter()
            .enumerate()
            .map(|(index, intent)| ItemResult {
                index,
                outcome: self.submit_one(intent, price, shares, now),
            })
            .collect();
        Ok(results)
    }

    fn submit_one(
        &mut self,
        intent: RedemptionIntent,
        price: u128,
        shares: &ShareLedger,
        now: DateTime<Utc>,
    ) -> Result<RequestId> {
        if intent.deadline <= now {
            return Err(VaultError::DeadlineExpired {
                deadline: intent.deadline,
            });
        }
        if intent.share_amount == 0 {
            return Err(VaultError::InvalidAmount {
                reason: "share amount must be greater than zero".into(),
            });
        }
        intent.verify_signature(&self.deployment)?;
        if self.used_nonces.contains(&(intent.owner, intent.nonce)) {
            return Err(VaultError::NonceReplay {
                owner: intent.owner,
                nonce: intent.nonce,
            });
        }
        let available = shares.balance(intent.owner).available;
        if available < intent.share_amount {
            return Err(VaultError::InsufficientShares {
                needed: intent.share_amount,
                available,
            });
        }

        self.used_nonces.insert((intent.owner, intent.nonce));
        let expected = shares_to_assets(intent.share_amount, price);
        let request = RedemptionRequest::from_intent(intent, expected, now);
        let id = request.id;
        tracing::info!(
            request = %id,
            owner = %request.owner.short(),
            shares = request.share_amount,
            expected_assets = expected,
            "Redemption submitted"
        );
        self.events.push(
            ActivityEvent::new(ActivityKind::RedemptionSubmitted, "redemption submitted", now)
                .with_request(id)
                .with_metadata(serde_json::json!({
                    "owner": request.owner,
                    "recipient": request.recipient,
                    "share_amount": request.share_amount.to_string(),
                    "expected_asset_amount": expected.to_string(),
                    "min_acceptable_asset_amount": request.min_acceptable_asset_amount.to_string(),
                    "deadline": request.deadline,
                })),
        );
        self.deadlines.insert((request.deadline, id));
        self.requests.insert(id, request);
        self.order.push(id);
        Ok(id)
    }

    // -----------------------------------------------------------------
    // Review
    // -----------------------------------------------------------------

    /// Approve PENDING requests in input order. Each approved request
    /// reserves its shares and takes the next queue position.
    ///
    /// # Errors
    /// Batch-level `Unauthorized` or `InvalidArrayLengths`; item-level
    /// errors are reported per item.
    pub fn approve(
        &mut self,
        auth: &AuthorizationTable,
        caller: &Address,
        ids: &[RequestId],
        shares: &mut ShareLedger,
        now: DateTime<Utc>,
    ) -> Result<Vec<ItemResult<u64>>> {
        auth.require(Role::Admin, caller, "approve redemptions")?;
        self.check_batch_len(ids.len())?;
        self.expire_stale(shares, now);
        let results = ids
            .iter()
            .enumerate()
            .map(|(index, id)| ItemResult {
                index,
                outcome: self.approve_one(*id, shares, now),
            })
            .collect();
        Ok(results)
    }

    fn approve_one(
        &mut self,
        id: RequestId,
        shares: &mut ShareLedger,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(VaultError::RequestNotFound(id))?;
        if !request.status.can_transition_to(RequestStatus::Approved) {
            return Err(VaultError::InvalidTransition {
                id,
                from: request.status,
                to: RequestStatus::Approved,
            });
        }
        shares.reserve(request.owner, request.share_amount)?;
        request.transition(RequestStatus::Approved)?;
        let seq = self.positions.push();
        self.approval_seq.insert(id, seq);
        self.settleable.insert(id);
        let position = self.positions.len() as u64;
        tracing::info!(request = %id, position, "Redemption approved");
        self.events.push(
            ActivityEvent::new(ActivityKind::RedemptionApproved, "redemption approved", now)
                .with_request(id)
                .with_metadata(serde_json::json!({ "queue_position": position })),
        );
        Ok(position)
    }

    /// Refuse a PENDING request.
    pub fn reject(
        &mut self,
        auth: &AuthorizationTable,
        caller: &Address,
        id: RequestId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        auth.require(Role::Admin, caller, "reject redemption")?;
        let reason = reason.into();
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(VaultError::RequestNotFound(id))?;
        request.transition(RequestStatus::Rejected)?;
        request.rejection_reason = Some(reason.clone());
        let deadline = request.deadline;
        self.untrack(id, deadline);
        tracing::info!(request = %id, %reason, "Redemption rejected");
        self.events.push(
            ActivityEvent::new(ActivityKind::RedemptionRejected, "redemption rejected", now)
                .with_request(id)
                .with_metadata(serde_json::json!({ "reason": reason })),
        );
        Ok(())
    }

    /// Cancel a PENDING, APPROVED or FAILED request. Owners may cancel
    /// their own requests; anyone else needs the admin role.
    ///
    /// Cancelling an APPROVED request moves every later request up one
    /// position. Reserved shares go back to the owner.
    pub fn cancel(
        &mut self,
        auth: &AuthorizationTable,
        caller: &Address,
        id: RequestId,
        reason: impl Into<String>,
        shares: &mut ShareLedger,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let reason = reason.into();
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(VaultError::RequestNotFound(id))?;
        if *caller != request.owner {
            auth.require(Role::Admin, caller, "cancel redemption")?;
        }
        let from = request.status;
        if !from.can_transition_to(RequestStatus::Cancelled) {
            return Err(VaultError::InvalidTransition {
                id,
                from,
                to: RequestStatus::Cancelled,
            });
        }
        if from.holds_reservation() {
            shares.release(request.owner, request.share_amount)?;
        }
        request.transition(RequestStatus::Cancelled)?;
        request.rejection_reason = Some(reason.clone());
        let deadline = request.deadline;
        let vacated = self.untrack(id, deadline);
        tracing::info!(request = %id, %from, ?vacated, %reason, "Redemption cancelled");
        self.events.push(
            ActivityEvent::new(ActivityKind::RedemptionCancelled, "redemption cancelled", now)
                .with_request(id)
                .with_metadata(serde_json::json!({
                    "from": from.to_string(),
                    "reason": reason,
                    "vacated_position": vacated,
                })),
        );
        Ok(())
    }

    /// Change the settlement priority of a PENDING or APPROVED request.
    pub fn set_priority(
        &mut self,
        auth: &AuthorizationTable,
        caller: &Address,
        id: RequestId,
        priority: u32,
        now: DateTime<Utc>,
    ) -> Result<()> {
        auth.require(Role::Admin, caller, "set redemption priority")?;
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(VaultError::RequestNotFound(id))?;
        if !matches!(request.status, RequestStatus::Pending | RequestStatus::Approved) {
            return Err(VaultError::RequestLocked {
                id,
                status: request.status,
            });
        }
        let previous = std::mem::replace(&mut request.priority, priority);
        tracing::debug!(request = %id, previous, priority, "Redemption priority changed");
        self.events.push(
            ActivityEvent::new(ActivityKind::PriorityChanged, "priority changed", now)
                .with_request(id)
                .with_metadata(serde_json::json!({
                    "previous": previous,
                    "priority": priority,
                })),
        );
        Ok(())
    }

    /// Attach an operator note. Allowed in any state.
    pub fn annotate(
        &mut self,
        auth: &AuthorizationTable,
        caller: &Address,
        id: RequestId,
        note: impl Into<String>,
    ) -> Result<()> {
        auth.require(Role::Admin, caller, "annotate redemption")?;
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(VaultError::RequestNotFound(id))?;
        request.admin_notes = Some(note.into());
        Ok(())
    }

    /// Expire every PENDING or APPROVED request whose deadline has passed,
    /// releasing reservations and closing position gaps. Only the expired
    /// prefix of the deadline index is visited.
    pub fn expire_stale(&mut self, shares: &mut ShareLedger, now: DateTime<Utc>) -> Vec<RequestId> {
        let stale: Vec<RequestId> = self
            .deadlines
            .iter()
            .take_while(|(deadline, _)| now >= *deadline)
            .map(|(_, id)| *id)
            .collect();

        let mut expired = Vec::with_capacity(stale.len());
        for id in stale {
            let Some(request) = self.requests.get_mut(&id) else {
                continue;
            };
            let from = request.status;
            if from.holds_reservation() {
                if let Err(e) = shares.release(request.owner, request.share_amount) {
                    tracing::error!(request = %id, error = %e, "Reservation missing on expiry");
                    continue;
                }
            }
            if request.transition(RequestStatus::Expired).is_err() {
                continue;
            }
            let deadline = request.deadline;
            let vacated = self.untrack(id, deadline);
            tracing::info!(request = %id, %from, ?vacated, "Redemption expired");
            self.events.push(
                ActivityEvent::new(ActivityKind::RedemptionExpired, "redemption expired", now)
                    .with_request(id)
                    .with_metadata(serde_json::json!({
                        "from": from.to_string(),
                        "vacated_position": vacated,
                    })),
            );
            expired.push(id);
        }
        expired
    }

    // -----------------------------------------------------------------
    // Settlement hooks
    // -----------------------------------------------------------------

    /// Claim a request into an in-flight batch. The status is re-checked
    /// here, immediately before the PROCESSING transition.
    pub fn claim(&mut self, id: RequestId, now: DateTime<Utc>) -> Result<RedemptionRequest> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(VaultError::RequestNotFound(id))?;
        request.transition(RequestStatus::Processing)?;
        request.attempts += 1;
        let claimed = request.clone();
        self.untrack(id, claimed.deadline);
        self.events.push(
            ActivityEvent::new(ActivityKind::RedemptionProcessing, "redemption processing", now)
                .with_request(id)
                .with_metadata(serde_json::json!({ "attempt": claimed.attempts })),
        );
        Ok(claimed)
    }

    /// Mark a claimed request paid.
    pub fn complete(
        &mut self,
        id: RequestId,
        actual_asset_amount: u128,
        settlement_ref: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(VaultError::RequestNotFound(id))?;
        request.transition(RequestStatus::Completed)?;
        request.actual_asset_amount = Some(actual_asset_amount);
        request.settlement_ref = Some(settlement_ref.to_string());
        request.processed_at = Some(now);
        self.events.push(
            ActivityEvent::new(ActivityKind::RedemptionCompleted, "redemption completed", now)
                .with_request(id)
                .with_tx_ref(settlement_ref)
                .with_metadata(serde_json::json!({
                    "actual_asset_amount": actual_asset_amount.to_string(),
                })),
        );
        Ok(())
    }

    /// Mark a claimed request failed. It stays reserved and may be retried
    /// or cancelled.
    pub fn fail(&mut self, id: RequestId, reason: &str, now: DateTime<Utc>) -> Result<()> {
        let request = self
            .requests
            .get_mut(&id)
            .ok_or(VaultError::RequestNotFound(id))?;
        request.transition(RequestStatus::Failed)?;
        tracing::warn!(request = %id, attempts = request.attempts, reason, "Redemption failed");
        self.settleable.insert(id);
        self.events.push(
            ActivityEvent::new(ActivityKind::RedemptionFailed, "redemption failed", now)
                .with_request(id)
                .with_metadata(serde_json::json!({ "reason": reason })),
        );
        Ok(())
    }

    /// Drop `id` from the open-request indexes. Returns the queue position
    /// it held, if it was APPROVED.
    fn untrack(&mut self, id: RequestId, deadline: DateTime<Utc>) -> Option<u64> {
        self.deadlines.remove(&(deadline, id));
        self.settleable.remove(&id);
        let seq = self.approval_seq.remove(&id)?;
        let vacated = self.positions.remove(seq);
        if self.positions.is_sparse() {
            let renumbered: HashMap<usize, usize> = self.positions.compact().into_iter().collect();
            for seq in self.approval_seq.values_mut() {
                if let Some(new) = renumbered.get(seq) {
                    *seq = *new;
                }
            }
        }
        vacated
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Settlement candidates: APPROVED and FAILED requests ordered by
    /// priority (desc), queue position (asc), then submission time (asc).
    /// FAILED requests hold no position and sort after approved ones of
    /// equal priority.
    #[must_use]
    pub fn next_batch(&self, limit: usize) -> Vec<RedemptionRequest> {
        let mut candidates: Vec<RedemptionRequest> = self
            .settleable
            .iter()
            .filter_map(|id| self.get(*id))
            .collect();
        candidates.sort_by_key(|r| {
            (
                Reverse(r.priority),
                r.queue_position.unwrap_or(u64::MAX),
                r.created_at,
                r.id,
            )
        });
        candidates.truncate(limit);
        candidates
    }

    /// A copy of the request with its current queue position filled in.
    #[must_use]
    pub fn get(&self, id: RequestId) -> Option<RedemptionRequest> {
        let mut request = self.requests.get(&id)?.clone();
        request.queue_position = self.position(id);
        Some(request)
    }

    /// Current dense queue position; `Some` iff the request is APPROVED.
    #[must_use]
    pub fn position(&self, id: RequestId) -> Option<u64> {
        let seq = self.approval_seq.get(&id)?;
        self.positions.position(*seq)
    }

    /// All requests in `status`, in submission order.
    #[must_use]
    pub fn with_status(&self, status: RequestStatus) -> Vec<RedemptionRequest> {
        self.order
            .iter()
            .filter_map(|id| self.get(*id))
            .filter(|r| r.status == status)
            .collect()
    }

    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.positions.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    #[must_use]
    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let mut by_status: BTreeMap<RequestStatus, u64> =
            RequestStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut reserved_shares = 0u128;
        let mut completed = 0i64;
        let mut latency_ms = 0i64;
        for request in self.requests.values() {
            *by_status.entry(request.status).or_default() += 1;
            if request.status.holds_reservation() {
                reserved_shares = reserved_shares.saturating_add(request.share_amount);
            }
            if let (RequestStatus::Completed, Some(processed)) = (request.status, request.processed_at) {
                completed += 1;
                latency_ms += (processed - request.created_at).num_milliseconds().max(0);
            }
        }
        let average_processing_secs = (completed > 0).then(|| {
            (Decimal::from(latency_ms) / Decimal::from(1_000) / Decimal::from(completed)).round_dp(3)
        });
        QueueStats {
            by_status,
            total: self.requests.len() as u64,
            queue_length: self.positions.len() as u64,
            average_processing_secs,
            reserved_shares,
        }
    }

    /// Drain activity events produced since the last call.
    pub fn take_events(&mut self) -> Vec<ActivityEvent> {
        std::mem::take(&mut self.events)
    }
}
