//! Points conversion rules.
//!
//! Earning and redemption use independent, floor-rounded ratios. They are
//! deliberately not symmetric: spending NT$99 earns 99 points, but 39 points
//! buy only NT$1 of discount.

use thiserror::Error;

/// Points earned per TWD of paid order total.
pub const EARN_PER_TWD: i64 = 1;

/// Points that buy one TWD of discount.
pub const REDEEM_UNIT: i64 = 20;

/// Points earned for a paid amount (floor; negative amounts earn nothing).
pub fn earned_for_amount(amount: i64) -> i64 {
    if amount <= 0 { 0 } else { amount * EARN_PER_TWD }
}

/// TWD of discount a number of points buys (floor).
pub fn discount_for_points(points: i64) -> i64 {
    if points <= 0 { 0 } else { points / REDEEM_UNIT }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedeemError {
    #[error("points to redeem must be a positive multiple of {REDEEM_UNIT}")]
    NotAMultiple,
    #[error("insufficient points balance: have {balance}, want {requested}")]
    Insufficient { balance: i64, requested: i64 },
}

/// Validate a redemption request against the current balance and return the
/// TWD discount it buys. Callers must run this before touching the ledger.
pub fn validate_redemption(points: i64, balance: i64) -> Result<i64, RedeemError> {
    if points <= 0 || points % REDEEM_UNIT != 0 {
        return Err(RedeemError::NotAMultiple);
    }
    if points > balance {
        return Err(RedeemError::Insufficient { balance, requested: points });
    }
    Ok(discount_for_points(points))
}
