//! Pure slew-rate arithmetic.
//!
//! A transition moves linearly from `start_price` toward `target` at no
//! more than `max_bps` of `start_price` per `period_secs`, and stops
//! exactly at the target.

use chrono::{DateTime, Utc};
use vaultcore_types::{
    constants::BPS_DENOMINATOR,
    math::{apply_bps, mul_div},
};

/// Parameters of one in-flight transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub start_price: u128,
    pub target: u128,
    pub start_time: DateTime<Utc>,
    pub max_bps: u32,
    pub period_secs: u64,
}

/// Whole seconds from `from` to `to`, zero if `to` is earlier.
#[must_use]
pub fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> u128 {
    u128::try_from((to - from).num_seconds()).unwrap_or(0)
}

impl Transition {
    /// Largest move allowed after `elapsed` seconds. Grows linearly and may
    /// exceed 100% of the start price; the clamp to target bounds the result.
    #[must_use]
    pub fn allowed_delta(&self, elapsed: u128) -> u128 {
        let numerator = u128::from(self.max_bps).saturating_mul(elapsed);
        let denominator = BPS_DENOMINATOR.saturating_mul(u128::from(self.period_secs));
        mul_div(self.start_price, numerator, denominator)
    }

    /// Price on the transition path at `now`.
    #[must_use]
    pub fn price_at(&self, now: DateTime<Utc>) -> u128 {
        let delta = self.allowed_delta(elapsed_secs(self.start_time, now));
        if self.target > self.start_price {
            self.start_price.saturating_add(delta).min(self.target)
        } else {
            self.start_price.saturating_sub(delta).max(self.target)
        }
    }

    /// Seconds from `start_time` until the path reaches the target.
    #[must_use]
    pub fn duration_secs(&self) -> u128 {
        let gap = self.target.abs_diff(self.start_price);
        if gap == 0 {
            return 0;
        }
        let per_period = u128::from(self.max_bps).saturating_mul(self.start_price);
        if per_period == 0 {
            return u128::MAX;
        }
        // ceil(gap * 10_000 * period / (start * max_bps))
        let numerator = gap
            .saturating_mul(BPS_DENOMINATOR)
            .saturating_mul(u128::from(self.period_secs));
        numerator.div_ceil(per_period)
    }
}

/// A move from `current` to `target` fits within one period's allowance.
#[must_use]
pub fn within_one_period(current: u128, target: u128, max_bps: u32) -> bool {
    current.abs_diff(target) <= apply_bps(current, u128::from(max_bps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn transition(start_price: u128, target: u128) -> Transition {
        Transition {
            start_price,
            target,
            start_time: Utc::now(),
            max_bps: 100,
            period_secs: 300,
        }
    }

    #[test]
    fn upward_path_clamps_at_target() {
        let t = transition(100_000_000, 102_000_000);
        assert_eq!(t.price_at(t.start_time), 100_000_000);
        assert_eq!(t.price_at(t.start_time + Duration::seconds(150)), 100_500_000);
        assert_eq!(t.price_at(t.start_time + Duration::seconds(300)), 101_000_000);
        assert_eq!(t.price_at(t.start_time + Duration::seconds(600)), 102_000_000);
        assert_eq!(t.price_at(t.start_time + Duration::days(30)), 102_000_000);
    }

    #[test]
    fn downward_path_clamps_at_target() {
        let t = transition(100_000_000, 97_000_000);
        assert_eq!(t.price_at(t.start_time + Duration::seconds(300)), 99_000_000);
        assert_eq!(t.price_at(t.start_time + Duration::seconds(900)), 97_000_000);
        assert_eq!(t.price_at(t.start_time + Duration::days(365)), 97_000_000);
    }

    #[test]
    fn time_before_start_is_start_price() {
        let t = transition(100_000_000, 150_000_000);
        assert_eq!(t.price_at(t.start_time - Duration::hours(1)), 100_000_000);
    }

    #[test]
    fn duration_matches_path() {
        let t = transition(100_000_000, 102_000_000);
        assert_eq!(t.duration_secs(), 600);
        let d = i64::try_from(t.duration_secs()).unwrap();
        assert_eq!(t.price_at(t.start_time + Duration::seconds(d)), t.target);
        assert!(t.price_at(t.start_time + Duration::seconds(d - 1)) < t.target);
    }

    #[test]
    fn allowed_delta_can_exceed_full_price() {
        let t = transition(100_000_000, 1);
        // 100 periods * 1% = 100%; beyond that the delta keeps growing
        assert_eq!(t.allowed_delta(300 * 200), 200_000_000);
        assert_eq!(t.price_at(t.start_time + Duration::seconds(300 * 200)), 1);
    }

    #[test]
    fn one_period_boundary() {
        assert!(within_one_period(100_000_000, 101_000_000, 100));
        assert!(within_one_period(100_000_000, 99_000_000, 100));
        assert!(!within_one_period(100_000_000, 101_000_001, 100));
        assert!(within_one_period(100_000_000, 100_000_000, 100));
    }
}
