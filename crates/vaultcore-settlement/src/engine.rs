//! Batch settlement of approved redemption requests.
//!
//! One call settles one batch, atomically at the liquidity level:
//! 1. Read the price once for the whole batch
//! 2. Value each request; requests under their minimum fail individually
//! 3. If the remaining total exceeds available liquidity, fail the whole
//!    batch and touch nothing
//! 4. Claim each request (its status is re-checked at claim time), debit
//!    liquidity, execute payouts
//! 5. Complete requests, burn escrowed shares, verify share supply
//!
//! A payout rejection restores the debited liquidity and leaves every
//! claimed request FAILED so operators can tell "tried" from "not yet tried".
//!
//! Once the executor has paid, the batch is never abandoned: every paid
//! request is completed, and any bookkeeping step that fails is logged
//! and listed in [`SettlementReport::recording_errors`] instead of
//! aborting the remaining requests.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vaultcore_ingress::{CollateralLedger, ShareLedger};
use vaultcore_oracle::PriceOracle;
use vaultcore_queue::RedemptionQueue;
use vaultcore_types::{
    ActivityEvent, ActivityKind, Address, ItemResult, RequestId, RequestStatus, Result,
    SettlementConfig,
    SettlementId, SettlementItem, VaultError, math::shares_to_assets,
};

use crate::idempotency::IdempotencyGuard;
use crate::payout::{Payout, PayoutBatch, PayoutExecutor};

/// Mutable view of one deployment's state, borrowed for a settlement.
pub struct SettlementContext<'a> {
    pub oracle: &'a PriceOracle,
    pub queue: &'a mut RedemptionQueue,
    pub collateral: &'a mut CollateralLedger,
    pub shares: &'a mut ShareLedger,
}

/// A request paid out by a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettledItem {
    pub request_id: RequestId,
    pub assets: u128,
}

/// A bookkeeping step that failed after the payout was executed. The
/// payout stands; the record needs operator repair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingError {
    /// `None` for the batch-level supply check.
    pub request_id: Option<RequestId>,
    pub error: VaultError,
}

/// Outcome of one settlement batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReport {
    pub settlement_id: SettlementId,
    /// The single price used for every item.
    pub price: u128,
    /// Hex SHA-256 reference recorded on every completed request.
    pub settlement_ref: String,
    /// Executor transaction reference; `None` if nothing was paid.
    pub tx_ref: Option<String>,
    pub total_assets: u128,
    pub items: Vec<ItemResult<SettledItem>>,
    /// Empty unless post-payout bookkeeping failed.
    pub recording_errors: Vec<RecordingError>,
}

impl SettlementReport {
    #[must_use]
    pub fn settled_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_ok()).count()
    }
}

/// A request that passed pre-checks, with its valuation.
struct Candidate {
    index: usize,
    id: RequestId,
    owner: Address,
    share_amount: u128,
    assets: u128,
    /// `Some` if the request is under its minimum and must fail.
    slippage: Option<VaultError>,
}

/// Settles redemption batches for one deployment.
#[derive(Debug, Clone)]
pub struct SettlementEngine {
    idempotency: IdempotencyGuard,
    auto_batch: usize,
    events: Vec<ActivityEvent>,
}

impl Default for SettlementEngine {
    fn default() -> Self {
        Self::from_config(&SettlementConfig::default())
    }
}

impl SettlementEngine {
    #[must_use]
    pub fn new(idempotency_cache_size: usize, auto_batch: usize) -> Self {
        Self {
            idempotency: IdempotencyGuard::new(idempotency_cache_size),
            auto_batch,
            events: Vec::new(),
        }
    }

    #[must_use]
    pub fn from_config(config: &SettlementConfig) -> Self {
        Self::new(config.idempotency_cache_size, config.auto_settle_batch)
    }

    /// Settle `items`.
    ///
    /// Items that fail pre-checks (unknown, wrong status, already settled,
    /// duplicated within the batch) are reported per item and left as they
    /// are. Slippage failures are reported per item and go FAILED if the
    /// batch proceeds.
    ///
    /// # Errors
    /// - `InvalidArrayLengths` for an empty or oversized batch
    /// - `InsufficientLiquidity` if the batch cannot be funded; nothing is
    ///   mutated
    /// - `PayoutRejected` (or the executor's error) if payouts failed;
    ///   liquidity is restored and claimed requests are FAILED
    pub fn settle(
        &mut self,
        ctx: SettlementContext<'_>,
        items: &[SettlementItem],
        executor: &dyn PayoutExecutor,
        now: DateTime<Utc>,
    ) -> Result<SettlementReport> {
        let SettlementContext {
            oracle,
            queue,
            collateral,
            shares,
        } = ctx;
        queue.check_batch_len(items.len())?;
        queue.expire_stale(shares, now);

        // 1. One price for the whole batch.
        let price = oracle.current_price(now);
        let settlement_id = SettlementId::new();

        // 2. Pre-checks and valuation. Nothing is mutated here.
        let mut results: Vec<Option<ItemResult<SettledItem>>> = vec![None; items.len()];
        let mut candidates = Vec::with_capacity(items.len());
        let mut seen = HashSet::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match self.precheck(queue, &mut seen, item, price) {
                Ok(candidate) => candidates.push(Candidate { index, ..candidate }),
                Err(e) => {
                    results[index] = Some(ItemResult {
                        index,
                        outcome: Err(e),
                    });
                }
            }
        }

        // 3. All-or-nothing liquidity check over the payable requests.
        let required = candidates
            .iter()
            .filter(|c| c.slippage.is_none())
            .fold(0u128, |acc, c| acc.saturating_add(c.assets));
        let available = collateral.available_liquidity();
        if required > available {
            tracing::warn!(
                settlement = %settlement_id,
                required,
                available,
                requests = candidates.len(),
                "Settlement rejected: insufficient liquidity"
            );
            self.events.push(
                ActivityEvent::new(
                    ActivityKind::SettlementFailed,
                    "insufficient liquidity",
                    now,
                )
                .with_metadata(serde_json::json!({
                    "settlement_id": settlement_id,
                    "required": required.to_string(),
                    "available": available.to_string(),
                })),
            );
            return Err(VaultError::InsufficientLiquidity {
                needed: required,
                available,
            });
        }

        // 4. Claim. Slippage failures are claimed and failed right away.
        let mut claimed = Vec::with_capacity(candidates.len());
        for mut candidate in candidates {
            let index = candidate.index;
            if let Err(e) = queue.claim(candidate.id, now) {
                results[index] = Some(ItemResult { index, outcome: Err(e) });
                continue;
            }
            if let Some(err) = candidate.slippage.take() {
                queue.fail(candidate.id, &err.to_string(), now)?;
                results[index] = Some(ItemResult { index, outcome: Err(err) });
                continue;
            }
            claimed.push(candidate);
        }

        let total = claimed
            .iter()
            .fold(0u128, |acc, c| acc.saturating_add(c.assets));
        let mut batch = PayoutBatch {
            settlement_id,
            price,
            payouts: Vec::with_capacity(claimed.len()),
            legs: Vec::new(),
        };
        for candidate in &claimed {
            if let Some(request) = queue.get(candidate.id) {
                batch.payouts.push(Payout {
                    request_id: candidate.id,
                    recipient: request.recipient,
                    amount: candidate.assets,
                });
            }
        }
        let settlement_ref = batch.reference();

        let tx_ref = if claimed.is_empty() {
            None
        } else {
            batch.legs = match collateral.debit_liquidity(total) {
                Ok(legs) => legs,
                Err(e) => {
                    self.fail_claimed(queue, &claimed, &e, settlement_id, now)?;
                    return Err(e);
                }
            };
            match executor.execute(&batch) {
                Ok(tx_ref) => Some(tx_ref),
                Err(e) => {
                    collateral.restore_liquidity(&batch.legs);
                    self.fail_claimed(queue, &claimed, &e, settlement_id, now)?;
                    return Err(e);
                }
            }
        };

        // 5. Record every paid request. Each step runs even if an earlier
        // one failed, so nothing paid is left PROCESSING.
        let mut recording_errors = Vec::new();
        for candidate in &claimed {
            let steps = [
                queue.complete(candidate.id, candidate.assets, &settlement_ref, now),
                self.idempotency.mark_settled(candidate.id, settlement_id),
                shares.burn_reserved(candidate.owner, candidate.share_amount),
            ];
            for error in steps.into_iter().filter_map(|step| step.err()) {
                tracing::error!(
                    settlement = %settlement_id,
                    request = %candidate.id,
                    error = %error,
                    "Paid request could not be fully recorded"
                );
                recording_errors.push(RecordingError {
                    request_id: Some(candidate.id),
                    error,
                });
            }
            results[candidate.index] = Some(ItemResult {
                index: candidate.index,
                outcome: Ok(SettledItem {
                    request_id: candidate.id,
                    assets: candidate.assets,
                }),
            });
        }
        if let Err(error) = shares.verify_supply() {
            tracing::error!(settlement = %settlement_id, error = %error, "Share supply check failed after settlement");
            recording_errors.push(RecordingError {
                request_id: None,
                error,
            });
        }

        let report = SettlementReport {
            settlement_id,
            price,
            settlement_ref,
            tx_ref,
            total_assets: total,
            items: results
                .into_iter()
                .enumerate()
                .map(|(index, r)| {
                    r.unwrap_or_else(|| ItemResult {
                        index,
                        outcome: Err(VaultError::Internal("item left unresolved".into())),
                    })
                })
                .collect(),
            recording_errors,
        };

        tracing::info!(
            settlement = %settlement_id,
            price,
            settled = report.settled_count(),
            failed = report.items.len() - report.settled_count(),
            total_assets = total,
            settlement_ref = %report.settlement_ref,
            "Settlement completed"
        );
        let mut event = ActivityEvent::new(
            ActivityKind::SettlementCompleted,
            format!("settled {} requests", report.settled_count()),
            now,
        )
        .with_metadata(serde_json::json!({
            "settlement_id": settlement_id,
            "price": price.to_string(),
            "total_assets": total.to_string(),
            "settled": report.settled_count(),
            "items": items.len(),
            "settlement_ref": report.settlement_ref,
            "recording_errors": report
                .recording_errors
                .iter()
                .map(|r| serde_json::json!({ "request_id": r.request_id, "error_code": r.error.code() }))
                .collect::<Vec<_>>(),
        }));
        if let Some(tx) = &report.tx_ref {
            event = event.with_tx_ref(tx.clone());
        }
        self.events.push(event);
        Ok(report)
    }

    /// Settle up to the configured number of APPROVED requests in queue
    /// order, with no caller-side minimum. Returns `None` when the queue
    /// is empty.
    pub fn settle_next(
        &mut self,
        ctx: SettlementContext<'_>,
        executor: &dyn PayoutExecutor,
        now: DateTime<Utc>,
    ) -> Result<Option<SettlementReport>> {
        let limit = self.auto_batch.min(ctx.queue.max_batch_size());
        let items: Vec<SettlementItem> = ctx
            .queue
            .next_batch(usize::MAX)
            .into_iter()
            .filter(|r| r.status == RequestStatus::Approved)
            .take(limit)
            .map(|r| SettlementItem {
                request_id: r.id,
                min_output: 0,
            })
            .collect();
        if items.is_empty() {
            return Ok(None);
        }
        self.settle(ctx, &items, executor, now).map(Some)
    }

    fn precheck(
        &self,
        queue: &RedemptionQueue,
        seen: &mut HashSet<RequestId>,
        item: &SettlementItem,
        price: u128,
    ) -> Result<Candidate> {
        let id = item.request_id;
        if let Some(paid_by) = self.idempotency.settled_by(&id) {
            tracing::warn!(request = %id, paid_by = %paid_by, "Settlement of a paid request refused");
            return Err(VaultError::AlreadySettled(id));
        }
        if !seen.insert(id) {
            return Err(VaultError::AlreadySettled(id));
        }
        let request = queue.get(id).ok_or(VaultError::RequestNotFound(id))?;
        if !matches!(request.status, RequestStatus::Approved | RequestStatus::Failed) {
            return Err(VaultError::InvalidTransition {
                id,
                from: request.status,
                to: RequestStatus::Processing,
            });
        }
        let assets = shares_to_assets(request.share_amount, price);
        let minimum = item.min_output.max(request.min_acceptable_asset_amount);
        let slippage = (assets < minimum).then_some(VaultError::InsufficientOutputAssets {
            request: id,
            assets,
            minimum,
        });
        Ok(Candidate {
            index: 0,
            id,
            owner: request.owner,
            share_amount: request.share_amount,
            assets,
            slippage,
        })
    }

    fn fail_claimed(
        &mut self,
        queue: &mut RedemptionQueue,
        claimed: &[Candidate],
        cause: &VaultError,
        settlement_id: SettlementId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        tracing::error!(
            settlement = %settlement_id,
            requests = claimed.len(),
            error = %cause,
            "Settlement payout failed; requests marked FAILED"
        );
        let reason = cause.to_string();
        for candidate in claimed {
            queue.fail(candidate.id, &reason, now)?;
        }
        self.events.push(
            ActivityEvent::new(ActivityKind::SettlementFailed, reason.clone(), now).with_metadata(
                serde_json::json!({
                    "settlement_id": settlement_id,
                    "requests": claimed.iter().map(|c| c.id).collect::<Vec<_>>(),
                    "error_code": cause.code(),
                }),
            ),
        );
        Ok(())
    }

    #[must_use]
    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.idempotency
    }

    /// Drain activity events produced since the last call.
    pub fn take_events(&mut self) -> Vec<ActivityEvent> {
        std::mem::take(&mut self.events)
    }
}
