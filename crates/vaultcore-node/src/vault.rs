//! One vault deployment behind a single lock.
//!
//! [`Vault`] wires the oracle, ledgers, subscription window, redemption
//! queue and settlement engine together. Every mutating call takes the
//! write lock, sweeps expired rounds and requests, runs, and then drains
//! component events into the activity sink, whether or not the call
//! succeeded. Queries take the read lock.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use vaultcore_ingress::{CollateralLedger, ShareLedger, SubscriptionWindow};
use vaultcore_oracle::{OracleSnapshot, PriceOracle, PriceUpdate};
use vaultcore_queue::{QueueStats, RedemptionQueue};
use vaultcore_settlement::{
    MemoryPayoutExecutor, PayoutExecutor, SettlementContext, SettlementEngine, SettlementReport,
};
use vaultcore_types::{
    ActivitySink, Address, AuthorizationTable, Clock, CollateralAsset, DeploymentId,
    Eligibility, ItemResult, LiquiditySnapshot, RedemptionIntent, RedemptionRequest, RequestId,
    Result, Role, RoundId, SettlementItem, ShareBalance, SubscriptionRound, VaultConfig,
    VaultError, constants, math,
};

use crate::activity::TracingActivityLog;
use crate::chain::ChainSnapshot;

/// Result of an admitted deposit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositReceipt {
    pub round_id: RoundId,
    pub assets: u128,
    pub shares_minted: u128,
    /// Price per share the shares were minted at.
    pub price: u128,
    /// Deposits admitted into the round so far, this one included.
    pub admitted_count: u64,
}

/// Everything one deployment owns.
struct VaultState {
    auth: AuthorizationTable,
    oracle: PriceOracle,
    collateral: CollateralLedger,
    shares: ShareLedger,
    subscriptions: SubscriptionWindow,
    queue: RedemptionQueue,
    engine: SettlementEngine,
}

impl VaultState {
    /// Lazy expiry, applied before every mutation.
    fn sweep(&mut self, now: DateTime<Utc>) {
        self.subscriptions.sweep_expired(now);
        self.queue.expire_stale(&mut self.shares, now);
    }

    fn flush(&mut self, sink: &dyn ActivitySink) {
        let events = self
            .oracle
            .take_events()
            .into_iter()
            .chain(self.collateral.take_events())
            .chain(self.subscriptions.take_events())
            .chain(self.queue.take_events())
            .chain(self.engine.take_events());
        for event in events {
            sink.record(event);
        }
    }
}

/// A single vault deployment.
pub struct Vault {
    id: DeploymentId,
    config: VaultConfig,
    /// Principal the scheduler acts as for price refreshes.
    operator: Address,
    state: RwLock<VaultState>,
    clock: Arc<dyn Clock>,
    activity: Arc<dyn ActivitySink>,
    payouts: Arc<dyn PayoutExecutor>,
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("id", &self.id)
            .field("operator", &self.operator)
            .finish_non_exhaustive()
    }
}

impl Vault {
    /// Build a deployment from `config`. Activity goes to tracing and
    /// payouts to an in-memory executor until replaced.
    ///
    /// # Errors
    /// `Configuration` if `config` does not validate, or the oracle's
    /// own validation errors.
    pub fn new(
        id: DeploymentId,
        config: VaultConfig,
        auth: AuthorizationTable,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let now = clock.now();
        let state = VaultState {
            oracle: PriceOracle::from_config(&config.oracle, now)?,
            collateral: CollateralLedger::new(),
            shares: ShareLedger::new(),
            subscriptions: SubscriptionWindow::new(),
            queue: RedemptionQueue::from_config(id.clone(), &config.queue),
            engine: SettlementEngine::from_config(&config.settlement),
            auth,
        };
        tracing::info!(
            deployment = %id,
            initial_price = config.oracle.initial_price,
            max_deviation_bps = config.oracle.max_deviation_bps,
            "Vault deployment created"
        );
        Ok(Self {
            operator: state.auth.owner(),
            activity: Arc::new(TracingActivityLog::new(id.clone())),
            payouts: Arc::new(MemoryPayoutExecutor::new()),
            state: RwLock::new(state),
            id,
            config,
            clock,
        })
    }

    #[must_use]
    pub fn with_activity(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.activity = sink;
        self
    }

    #[must_use]
    pub fn with_payouts(mut self, executor: Arc<dyn PayoutExecutor>) -> Self {
        self.payouts = executor;
        self
    }

    /// Set the principal scheduled price refreshes are attributed to. It
    /// must hold the price-updater role.
    #[must_use]
    pub fn with_operator(mut self, operator: Address) -> Self {
        self.operator = operator;
        self
    }

    #[must_use]
    pub fn id(&self) -> &DeploymentId {
        &self.id
    }

    #[must_use]
    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    async fn mutate<T>(
        &self,
        op: impl FnOnce(&mut VaultState, DateTime<Utc>) -> Result<T>,
    ) -> Result<T> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.sweep(now);
        let result = op(&mut *state, now);
        state.flush(self.activity.as_ref());
        result
    }

    // -----------------------------------------------------------------
    // Redemptions
    // -----------------------------------------------------------------

    /// Submit signed redemption intents, valued at the current price.
    pub async fn submit_redemptions(
        &self,
        intents: Vec<RedemptionIntent>,
    ) -> Result<Vec<ItemResult<RequestId>>> {
        self.mutate(|s, now| {
            let price = s.oracle.current_price(now);
            s.queue.submit(intents, price, &s.shares, now)
        })
        .await
    }

    pub async fn approve_redemptions(
        &self,
        caller: &Address,
        ids: &[RequestId],
    ) -> Result<Vec<ItemResult<u64>>> {
        self.mutate(|s, now| s.queue.approve(&s.auth, caller, ids, &mut s.shares, now))
            .await
    }

    pub async fn reject_redemption(
        &self,
        caller: &Address,
        id: RequestId,
        reason: &str,
    ) -> Result<()> {
        self.mutate(|s, now| s.queue.reject(&s.auth, caller, id, reason, now))
            .await
    }

    pub async fn cancel_redemption(
        &self,
        caller: &Address,
        id: RequestId,
        reason: &str,
    ) -> Result<()> {
        self.mutate(|s, now| s.queue.cancel(&s.auth, caller, id, reason, &mut s.shares, now))
            .await
    }

    pub async fn set_priority(&self, caller: &Address, id: RequestId, priority: u32) -> Result<()> {
        self.mutate(|s, now| s.queue.set_priority(&s.auth, caller, id, priority, now))
            .await
    }

    pub async fn annotate(&self, caller: &Address, id: RequestId, note: &str) -> Result<()> {
        self.mutate(|s, _| s.queue.annotate(&s.auth, caller, id, note))
            .await
    }

    /// Settle `items` at one price. See [`SettlementEngine::settle`].
    pub async fn settle_redemptions(&self, items: &[SettlementItem]) -> Result<SettlementReport> {
        let payouts = Arc::clone(&self.payouts);
        self.mutate(|s, now| {
            let VaultState {
                oracle,
                collateral,
                shares,
                queue,
                engine,
                ..
            } = s;
            engine.settle(
                SettlementContext {
                    oracle,
                    queue,
                    collateral,
                    shares,
                },
                items,
                payouts.as_ref(),
                now,
            )
        })
        .await
    }

    /// Settle the head of the queue. `None` when nothing is approved.
    pub async fn settle_next(&self) -> Result<Option<SettlementReport>> {
        let payouts = Arc::clone(&self.payouts);
        self.mutate(|s, now| {
            let VaultState {
                oracle,
                collateral,
                shares,
                queue,
                engine,
                ..
            } = s;
            engine.settle_next(
                SettlementContext {
                    oracle,
                    queue,
                    collateral,
                    shares,
                },
                payouts.as_ref(),
                now,
            )
        })
        .await
    }

    pub async fn request(&self, id: RequestId) -> Option<RedemptionRequest> {
        self.state.read().await.queue.get(id)
    }

    pub async fn queue_stats(&self) -> QueueStats {
        self.state.read().await.queue.stats()
    }

    // -----------------------------------------------------------------
    // Subscription rounds and deposits
    // -----------------------------------------------------------------

    pub async fn open_round(
        &self,
        caller: &Address,
        name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        capacity: u64,
    ) -> Result<RoundId> {
        self.mutate(|s, now| s.subscriptions.open(&s.auth, caller, name, start, end, capacity, now))
            .await
    }

    pub async fn close_round(&self, caller: &Address) -> Result<RoundId> {
        self.mutate(|s, now| s.subscriptions.close(&s.auth, caller, now))
            .await
    }

    /// Read-only pre-check; calling it any number of times changes nothing.
    pub async fn validate_deposit(&self, amount: u128) -> Eligibility {
        let now = self.clock.now();
        self.state.read().await.subscriptions.validate(amount, now)
    }

    /// Admit a deposit: check the round, credit collateral, mint shares at
    /// the current price and count the deposit against the round. Nothing
    /// changes unless every step succeeds.
    pub async fn deposit(
        &self,
        depositor: Address,
        symbol: &str,
        amount: u128,
    ) -> Result<DepositReceipt> {
        self.mutate(|s, now| {
            let eligibility = s.subscriptions.validate(amount, now);
            let Some(round_id) = eligibility.round_id else {
                return Err(VaultError::NoActiveRound);
            };
            if !eligibility.eligible {
                return Err(VaultError::RoundNotAdmitting {
                    round: round_id,
                    reason: eligibility.reason.unwrap_or_default(),
                });
            }
            let price = s.oracle.current_price(now);
            let shares_minted = math::assets_to_shares(amount, price);
            if shares_minted == 0 {
                return Err(VaultError::InvalidAmount {
                    reason: format!("deposit of {amount} mints no shares at price {price}"),
                });
            }
            s.collateral.deposit(symbol, amount)?;
            s.shares.mint(depositor, shares_minted);
            let admitted_count = s.subscriptions.confirm_deposit(round_id, depositor, amount, now)?;
            tracing::info!(
                deployment = %self.id,
                round = %round_id,
                depositor = %depositor.short(),
                symbol,
                amount,
                shares_minted,
                "Deposit accepted"
            );
            Ok(DepositReceipt {
                round_id,
                assets: amount,
                shares_minted,
                price,
                admitted_count,
            })
        })
        .await
    }

    pub async fn active_round(&self) -> Option<SubscriptionRound> {
        let now = self.clock.now();
        self.state
            .read()
            .await
            .subscriptions
            .active_round(now)
            .cloned()
    }

    pub async fn share_balance(&self, owner: Address) -> ShareBalance {
        self.state.read().await.shares.balance(owner)
    }

    /// Move `amount` of the caller's available shares to `to`. Shares
    /// escrowed by a redemption cannot move.
    pub async fn transfer_shares(&self, caller: &Address, to: Address, amount: u128) -> Result<()> {
        self.mutate(|s, _| {
            s.shares.transfer(*caller, to, amount)?;
            tracing::info!(from = %caller.short(), to = %to.short(), amount, "Shares transferred");
            Ok(())
        })
        .await
    }

    // -----------------------------------------------------------------
    // Price oracle
    // -----------------------------------------------------------------

    pub async fn update_price(
        &self,
        caller: &Address,
        target: u128,
        source: &str,
    ) -> Result<PriceUpdate> {
        self.mutate(|s, now| s.oracle.update(&s.auth, caller, target, source, now))
            .await
    }

    pub async fn set_max_deviation(
        &self,
        caller: &Address,
        max_deviation_bps: u32,
        deviation_period_secs: u64,
    ) -> Result<()> {
        self.mutate(|s, now| {
            s.oracle
                .set_max_deviation(&s.auth, caller, max_deviation_bps, deviation_period_secs, now)
        })
        .await
    }

    pub async fn current_price(&self) -> u128 {
        let now = self.clock.now();
        self.state.read().await.oracle.current_price(now)
    }

    pub async fn oracle_snapshot(&self) -> OracleSnapshot {
        let now = self.clock.now();
        self.state.read().await.oracle.snapshot(now)
    }

    /// Push the share price implied by chain totals into the oracle as the
    /// operator. Returns `None` when the oracle already targets that price.
    pub async fn refresh_price(&self, snapshot: &ChainSnapshot) -> Result<Option<PriceUpdate>> {
        let target = snapshot.share_price();
        let operator = self.operator;
        self.mutate(|s, now| {
            if s.oracle.target_price() == target {
                return Ok(None);
            }
            s.oracle
                .update(&s.auth, &operator, target, constants::CHAIN_PRICE_SOURCE, now)
                .map(Some)
        })
        .await
    }

    // -----------------------------------------------------------------
    // Collateral
    // -----------------------------------------------------------------

    pub async fn register_asset(&self, caller: &Address, asset: CollateralAsset) -> Result<()> {
        self.mutate(|s, now| {
            s.auth.require(Role::Admin, caller, "register collateral")?;
            s.collateral.register(asset, now)
        })
        .await
    }

    pub async fn set_asset_active(&self, caller: &Address, symbol: &str, active: bool) -> Result<()> {
        self.mutate(|s, _| {
            s.auth.require(Role::Admin, caller, "toggle collateral")?;
            s.collateral.set_active(symbol, active)
        })
        .await
    }

    /// Record whether an asset's contract has been verified by operators.
    pub async fn set_asset_verified(&self, caller: &Address, symbol: &str, verified: bool) -> Result<()> {
        self.mutate(|s, _| {
            s.auth.require(Role::Admin, caller, "verify collateral")?;
            s.collateral.set_verified(symbol, verified)?;
            tracing::info!(symbol, verified, "Collateral verification changed");
            Ok(())
        })
        .await
    }

    pub async fn collateral_asset(&self, symbol: &str) -> Option<CollateralAsset> {
        self.state.read().await.collateral.asset(symbol).cloned()
    }

    /// Move redeemable collateral out to the strategy.
    pub async fn deploy_collateral(&self, caller: &Address, symbol: &str, amount: u128) -> Result<()> {
        self.mutate(|s, _| {
            s.auth.require(Role::Admin, caller, "deploy collateral")?;
            s.collateral.deploy(symbol, amount)
        })
        .await
    }

    /// Bring deployed collateral back into the redeemable pool.
    pub async fn recall_collateral(&self, caller: &Address, symbol: &str, amount: u128) -> Result<()> {
        self.mutate(|s, _| {
            s.auth.require(Role::Admin, caller, "recall collateral")?;
            s.collateral.recall(symbol, amount)
        })
        .await
    }

    /// Overwrite held balances with a chain reading. Symbols the ledger
    /// does not know are skipped. Returns how many assets were synced.
    pub async fn sync_collateral(&self, snapshot: &ChainSnapshot) -> Result<usize> {
        self.mutate(|s, now| {
            let mut synced = 0;
            for (symbol, held) in &snapshot.balances {
                if s.collateral.asset(symbol).is_none() {
                    tracing::warn!(deployment = %self.id, symbol, "Chain reports unregistered collateral");
                    continue;
                }
                s.collateral.sync_balance(symbol, *held, now)?;
                synced += 1;
            }
            Ok(synced)
        })
        .await
    }

    /// Price and liquidity, derived at read time.
    pub async fn liquidity_snapshot(&self) -> LiquiditySnapshot {
        let now = self.clock.now();
        let state = self.state.read().await;
        let price = state.oracle.current_price(now);
        let price_display = i128::try_from(price)
            .ok()
            .and_then(|p| {
                Decimal::try_from_i128_with_scale(p, u32::from(constants::CANONICAL_DECIMALS)).ok()
            })
            .unwrap_or(Decimal::MAX);
        LiquiditySnapshot {
            price,
            target_price: state.oracle.target_price(),
            oracle_round: state.oracle.round_number(),
            available_liquidity: state.collateral.available_liquidity(),
            total_held: state.collateral.total_held(),
            utilization_bps: state.collateral.utilization_bps(),
            total_share_supply: state.shares.total_supply(),
            reserved_shares: state.shares.total_reserved(),
            price_display,
        }
    }

    /// Check share supply against minted minus burned.
    pub async fn verify_supply(&self) -> Result<()> {
        self.state.read().await.shares.verify_supply()
    }
}
