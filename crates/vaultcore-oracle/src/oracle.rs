//! The bounded-drift price oracle.
//!
//! Holds one price per share and moves it toward updater-supplied targets
//! no faster than `max_deviation_bps` per `deviation_period_secs`. Callers
//! always see a price bounded by a known slew rate, so an updater cannot
//! open an instantaneous arbitrage window between old and new prices.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vaultcore_types::{
    ActivityEvent, ActivityKind, Address, AuthorizationTable, OracleConfig, Result, Role,
    VaultError,
};

use crate::slew::{Transition, elapsed_secs, within_one_period};

/// Domain event emitted by every successful [`PriceOracle::update`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub round: u64,
    pub new_target: u128,
    /// Interpolated price at the moment of the call.
    pub price_at_call: u128,
    pub source: String,
    /// The target was within one period's allowance and applied at once.
    pub snapped: bool,
}

/// Persistable view of the oracle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleSnapshot {
    pub current_price: u128,
    pub interpolated_price: u128,
    pub target_price: u128,
    pub transition_start_price: u128,
    pub transition_start_time: DateTime<Utc>,
    pub max_deviation_bps: u32,
    pub deviation_period_secs: u64,
    pub round_number: u64,
    pub in_transition: bool,
}

/// Slew-rate limited price per share.
#[derive(Debug, Clone)]
pub struct PriceOracle {
    /// Price frozen at the last mutation. Queries interpolate from the
    /// transition fields instead.
    current_price: u128,
    target_price: u128,
    transition_start_price: u128,
    transition_start_time: DateTime<Utc>,
    max_deviation_bps: u32,
    deviation_period_secs: u64,
    round_number: u64,
    events: Vec<ActivityEvent>,
}

impl PriceOracle {
    /// Create an oracle resting at `initial_price`.
    ///
    /// # Errors
    /// `InvalidPrice` for a zero price, `InvalidMaxDeviation` /
    /// `InvalidTimePeriod` for zero parameters.
    pub fn new(
        initial_price: u128,
        max_deviation_bps: u32,
        deviation_period_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if initial_price == 0 {
            return Err(VaultError::InvalidPrice {
                reason: "initial price must be greater than zero".into(),
            });
        }
        Self::check_params(max_deviation_bps, deviation_period_secs)?;
        Ok(Self {
            current_price: initial_price,
            target_price: initial_price,
            transition_start_price: initial_price,
            transition_start_time: now,
            max_deviation_bps,
            deviation_period_secs,
            round_number: 0,
            events: Vec::new(),
        })
    }

    /// Create an oracle from a config section.
    pub fn from_config(cfg: &OracleConfig, now: DateTime<Utc>) -> Result<Self> {
        Self::new(
            cfg.initial_price,
            cfg.max_deviation_bps,
            cfg.deviation_period_secs,
            now,
        )
    }

    fn check_params(max_deviation_bps: u32, deviation_period_secs: u64) -> Result<()> {
        if max_deviation_bps == 0 {
            return Err(VaultError::InvalidMaxDeviation);
        }
        if deviation_period_secs == 0 {
            return Err(VaultError::InvalidTimePeriod);
        }
        Ok(())
    }

    fn transition(&self) -> Transition {
        Transition {
            start_price: self.transition_start_price,
            target: self.target_price,
            start_time: self.transition_start_time,
            max_bps: self.max_deviation_bps,
            period_secs: self.deviation_period_secs,
        }
    }

    /// Interpolated price per share at `now`.
    #[must_use]
    pub fn current_price(&self, now: DateTime<Utc>) -> u128 {
        self.transition().price_at(now)
    }

    /// Push a new target price.
    ///
    /// Freezes the in-flight transition at its current point, bumps the
    /// round, and either snaps to `new_target` (if within one period's
    /// allowance) or starts a new transition toward it.
    ///
    /// # Errors
    /// - `Unauthorized` if `caller` is not a price updater
    /// - `EmptySource` if `source` is blank
    /// - `InvalidPrice` if `new_target` is zero
    pub fn update(
        &mut self,
        auth: &AuthorizationTable,
        caller: &Address,
        new_target: u128,
        source: &str,
        now: DateTime<Utc>,
    ) -> Result<PriceUpdate> {
        auth.require(Role::PriceUpdater, caller, "update price")?;
        if source.trim().is_empty() {
            return Err(VaultError::EmptySource);
        }
        if new_target == 0 {
            return Err(VaultError::InvalidPrice {
                reason: "target price must be greater than zero".into(),
            });
        }

        let current = self.current_price(now);
        self.current_price = current;
        self.round_number = self.round_number.saturating_add(1);

        let snapped = within_one_period(current, new_target, self.max_deviation_bps);
        self.transition_start_time = now;
        self.target_price = new_target;
        if snapped {
            self.current_price = new_target;
            self.transition_start_price = new_target;
        } else {
            self.transition_start_price = current;
        }

        let update = PriceUpdate {
            round: self.round_number,
            new_target,
            price_at_call: current,
            source: source.to_string(),
            snapped,
        };

        tracing::info!(
            round = update.round,
            target = new_target,
            price_at_call = current,
            snapped,
            source,
            "Price target updated"
        );
        self.events.push(
            ActivityEvent::new(
                ActivityKind::PriceUpdated,
                format!("round {} target {new_target} from {source}", update.round),
                now,
            )
            .with_metadata(serde_json::json!({
                "round": update.round,
                "new_target": new_target.to_string(),
                "price_at_call": current.to_string(),
                "snapped": snapped,
                "source": source,
            })),
        );
        Ok(update)
    }

    /// Change the slew-rate parameters.
    ///
    /// The interpolated price is snapshotted first and the transition
    /// restarts from it, so the path does not jump when the rate changes.
    ///
    /// # Errors
    /// - `Unauthorized` if `caller` is not the owner
    /// - `InvalidMaxDeviation` / `InvalidTimePeriod` on zero values
    pub fn set_max_deviation(
        &mut self,
        auth: &AuthorizationTable,
        caller: &Address,
        max_deviation_bps: u32,
        deviation_period_secs: u64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        auth.require(Role::Owner, caller, "set max deviation")?;
        Self::check_params(max_deviation_bps, deviation_period_secs)?;

        let current = self.current_price(now);
        self.current_price = current;
        self.transition_start_price = current;
        self.transition_start_time = now;
        self.max_deviation_bps = max_deviation_bps;
        self.deviation_period_secs = deviation_period_secs;

        tracing::info!(
            max_deviation_bps,
            deviation_period_secs,
            price = current,
            "Oracle slew rate changed"
        );
        self.events.push(
            ActivityEvent::new(
                ActivityKind::DeviationChanged,
                format!("max deviation {max_deviation_bps} bps per {deviation_period_secs}s"),
                now,
            )
            .with_metadata(serde_json::json!({
                "max_deviation_bps": max_deviation_bps,
                "deviation_period_secs": deviation_period_secs,
                "price": current.to_string(),
            })),
        );
        Ok(())
    }

    /// Seconds until the path reaches the target, zero if already there.
    #[must_use]
    pub fn time_to_target(&self, now: DateTime<Utc>) -> u128 {
        let total = self.transition().duration_secs();
        total.saturating_sub(elapsed_secs(self.transition_start_time, now))
    }

    /// Full state plus the interpolated price at `now`.
    #[must_use]
    pub fn snapshot(&self, now: DateTime<Utc>) -> OracleSnapshot {
        let interpolated = self.current_price(now);
        OracleSnapshot {
            current_price: self.current_price,
            interpolated_price: interpolated,
            target_price: self.target_price,
            transition_start_price: self.transition_start_price,
            transition_start_time: self.transition_start_time,
            max_deviation_bps: self.max_deviation_bps,
            deviation_period_secs: self.deviation_period_secs,
            round_number: self.round_number,
            in_transition: interpolated != self.target_price,
        }
    }

    #[must_use]
    pub fn target_price(&self) -> u128 {
        self.target_price
    }

    #[must_use]
    pub fn round_number(&self) -> u64 {
        self.round_number
    }

    #[must_use]
    pub fn max_deviation_bps(&self) -> u32 {
        self.max_deviation_bps
    }

    #[must_use]
    pub fn deviation_period_secs(&self) -> u64 {
        self.deviation_period_secs
    }

    /// Drain activity events produced since the last call.
    pub fn take_events(&mut self) -> Vec<ActivityEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rand::Rng;

    const START: u128 = 100_000_000;

    struct Fixture {
        oracle: PriceOracle,
        auth: AuthorizationTable,
        owner: Address,
        updater: Address,
        t0: DateTime<Utc>,
    }

    fn setup() -> Fixture {
        let owner = Address::random();
        let updater = Address::random();
        let t0 = Utc::now();
        Fixture {
            oracle: PriceOracle::new(START, 100, 300, t0).unwrap(),
            auth: AuthorizationTable::new(owner).with_updater(updater),
            owner,
            updater,
            t0,
        }
    }

    #[test]
    fn scenario_two_percent_target_slews_over_two_periods() {
        let mut f = setup();
        let up = f
            .oracle
            .update(&f.auth, &f.updater, 102_000_000, "oracle", f.t0)
            .unwrap();
        assert!(!up.snapped);
        assert_eq!(up.round, 1);
        assert_eq!(up.price_at_call, START);
        assert_eq!(f.oracle.current_price(f.t0 + Duration::seconds(300)), 101_000_000);
        assert_eq!(f.oracle.current_price(f.t0 + Duration::seconds(600)), 102_000_000);
        assert_eq!(f.oracle.current_price(f.t0 + Duration::seconds(6_000)), 102_000_000);
    }

    #[test]
    fn target_within_one_period_snaps() {
        let mut f = setup();
        let up = f
            .oracle
            .update(&f.auth, &f.updater, 100_900_000, "oracle", f.t0)
            .unwrap();
        assert!(up.snapped);
        assert_eq!(f.oracle.current_price(f.t0), 100_900_000);
        assert_eq!(f.oracle.time_to_target(f.t0), 0);
        assert!(!f.oracle.snapshot(f.t0).in_transition);
    }

    #[test]
    fn update_freezes_in_flight_transition() {
        let mut f = setup();
        f.oracle
            .update(&f.auth, &f.updater, 110_000_000, "oracle", f.t0)
            .unwrap();
        let mid = f.t0 + Duration::seconds(300);
        assert_eq!(f.oracle.current_price(mid), 101_000_000);

        // Reverse direction mid-flight: the new path starts at 101.
        let up = f
            .oracle
            .update(&f.auth, &f.updater, 95_000_000, "oracle", mid)
            .unwrap();
        assert_eq!(up.price_at_call, 101_000_000);
        assert_eq!(up.round, 2);
        assert_eq!(f.oracle.current_price(mid), 101_000_000);
        // 1% of 101 per 300s downward
        assert_eq!(
            f.oracle.current_price(mid + Duration::seconds(300)),
            99_990_000
        );
    }

    #[test]
    fn unauthorized_updater_rejected() {
        let mut f = setup();
        let stranger = Address::random();
        let err = f
            .oracle
            .update(&f.auth, &stranger, 101_000_000, "oracle", f.t0)
            .unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized { .. }));
        assert_eq!(f.oracle.round_number(), 0);
    }

    #[test]
    fn empty_source_rejected() {
        let mut f = setup();
        let err = f
            .oracle
            .update(&f.auth, &f.updater, 101_000_000, "  ", f.t0)
            .unwrap_err();
        assert_eq!(err, VaultError::EmptySource);
        assert_eq!(f.oracle.round_number(), 0);
    }

    #[test]
    fn zero_target_rejected() {
        let mut f = setup();
        let err = f.oracle.update(&f.auth, &f.updater, 0, "oracle", f.t0).unwrap_err();
        assert!(matches!(err, VaultError::InvalidPrice { .. }));
    }

    #[test]
    fn set_max_deviation_requires_owner_and_nonzero() {
        let mut f = setup();
        let err = f
            .oracle
            .set_max_deviation(&f.auth, &f.updater, 200, 300, f.t0)
            .unwrap_err();
        assert!(matches!(err, VaultError::Unauthorized { .. }));
        assert_eq!(
            f.oracle.set_max_deviation(&f.auth, &f.owner, 0, 300, f.t0),
            Err(VaultError::InvalidMaxDeviation)
        );
        assert_eq!(
            f.oracle.set_max_deviation(&f.auth, &f.owner, 100, 0, f.t0),
            Err(VaultError::InvalidTimePeriod)
        );
    }

    #[test]
    fn set_max_deviation_does_not_jump() {
        let mut f = setup();
        f.oracle
            .update(&f.auth, &f.updater, 110_000_000, "oracle", f.t0)
            .unwrap();
        let t = f.t0 + Duration::seconds(600);
        let before = f.oracle.current_price(t);
        assert_eq!(before, 102_000_000);

        f.oracle.set_max_deviation(&f.auth, &f.owner, 500, 300, t).unwrap();
        assert_eq!(f.oracle.current_price(t), before);
        // 5% of 102 per period from the snapshot
        assert_eq!(
            f.oracle.current_price(t + Duration::seconds(300)),
            107_100_000
        );
        assert_eq!(f.oracle.target_price(), 110_000_000);
    }

    #[test]
    fn events_are_recorded_per_update() {
        let mut f = setup();
        f.oracle
            .update(&f.auth, &f.updater, 101_000_000, "feed-a", f.t0)
            .unwrap();
        f.oracle
            .update(&f.auth, &f.updater, 150_000_000, "feed-b", f.t0)
            .unwrap();
        let events = f.oracle.take_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == ActivityKind::PriceUpdated));
        assert_eq!(events[1].metadata["round"], 2);
        assert!(f.oracle.take_events().is_empty());
    }

    #[test]
    fn time_to_target_counts_down() {
        let mut f = setup();
        f.oracle
            .update(&f.auth, &f.updater, 103_000_000, "oracle", f.t0)
            .unwrap();
        assert_eq!(f.oracle.time_to_target(f.t0), 900);
        assert_eq!(f.oracle.time_to_target(f.t0 + Duration::seconds(600)), 300);
        assert_eq!(f.oracle.time_to_target(f.t0 + Duration::seconds(2_000)), 0);
    }

    /// Randomized check of the slew bound: between two queries inside the
    /// same transition the price moves at most `max_bps` of the transition
    /// start price per period, and never past the target.
    #[test]
    fn random_updates_respect_slew_bound() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let mut f = setup();
            let mut now = f.t0;
            for _ in 0..20 {
                let target = rng.gen_range(50_000_000u128..200_000_000);
                f.oracle
                    .update(&f.auth, &f.updater, target, "fuzz", now)
                    .unwrap();
                let snap = f.oracle.snapshot(now);
                let start = snap.transition_start_price;

                let mut prev_t = now;
                let mut prev_p = f.oracle.current_price(now);
                for _ in 0..5 {
                    let t = prev_t + Duration::seconds(rng.gen_range(0..400));
                    let p = f.oracle.current_price(t);
                    let dt = u128::try_from((t - prev_t).num_seconds()).unwrap();
                    // +1 absorbs integer truncation between the two samples
                    let bound = start * 100 * dt / (10_000 * 300) + 1;
                    assert!(p.abs_diff(prev_p) <= bound, "moved {} > {bound}", p.abs_diff(prev_p));
                    if target >= start {
                        assert!(p <= target && p >= prev_p);
                    } else {
                        assert!(p >= target && p <= prev_p);
                    }
                    prev_t = t;
                    prev_p = p;
                }
                now = prev_t;
            }
        }
    }
}
