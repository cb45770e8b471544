//! Saturating fixed-point helpers.
//!
//! Every price and amount computation in the core goes through these so
//! that overflow clamps instead of wrapping or panicking.

use crate::constants::{BPS_DENOMINATOR, PRICE_SCALE, SHARE_SCALE};

/// `a * b / c`, saturating at `u128::MAX`. Returns 0 when `c == 0`.
#[must_use]
pub fn mul_div(a: u128, b: u128, c: u128) -> u128 {
    if c == 0 {
        return 0;
    }
    match a.checked_mul(b) {
        Some(product) => product / c,
        // Split a = q*c + r so the intermediate stays in range where possible.
        None => (a / c)
            .saturating_mul(b)
            .saturating_add((a % c).saturating_mul(b) / c),
    }
}

/// Asset value of `shares` at `price` (canonical units per share).
#[must_use]
pub fn shares_to_assets(shares: u128, price: u128) -> u128 {
    mul_div(shares, price, SHARE_SCALE)
}

/// Shares minted for `assets` at `price`. Zero price mints nothing.
#[must_use]
pub fn assets_to_shares(assets: u128, price: u128) -> u128 {
    mul_div(assets, SHARE_SCALE, price)
}

/// `amount * bps / 10_000`.
#[must_use]
pub fn apply_bps(amount: u128, bps: u128) -> u128 {
    mul_div(amount, bps, BPS_DENOMINATOR)
}

/// Share price implied by vault totals. An empty vault prices at 1.0.
#[must_use]
pub fn price_from_totals(total_assets: u128, total_supply: u128) -> u128 {
    if total_supply == 0 {
        return PRICE_SCALE;
    }
    mul_div(total_assets, SHARE_SCALE, total_supply)
}
