//! Coupon discount math.
//!
//! All amounts are integer minor-currency units (TWD). The computed discount
//! is always within `0..=subtotal`, so an order total can never go negative
//! from a coupon alone.

/// 100% in basis points.
pub const FULL_BPS: i64 = 10_000;

/// A coupon's discount rule, exactly one of the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discount {
    /// Percentage off, in basis points (0..=10000).
    Percent { bps: i64 },
    /// Fixed amount off, in TWD.
    Fixed { amount: i64 },
}

/// Compute the discount a rule yields on a subtotal.
///
/// Percent discounts round half-up; both variants clamp to the subtotal.
/// The subtotal must be the authoritative, server-computed one — never a
/// client-supplied figure.
pub fn discount_amount(discount: Discount, subtotal: i64) -> i64 {
    if subtotal <= 0 {
        return 0;
    }
    match discount {
        Discount::Percent { bps } => {
            let bps = bps.clamp(0, FULL_BPS);
            let raw = (i128::from(subtotal) * i128::from(bps) + i128::from(FULL_BPS) / 2)
                / i128::from(FULL_BPS);
            (raw as i64).min(subtotal)
        }
        Discount::Fixed { amount } => amount.clamp(0, subtotal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn percent_rounds_half_up() {
        // 2.5% of 99 = 2.475 -> 2; 2.5% of 100 = 2.5 -> 3
        assert_eq!(discount_amount(Discount::Percent { bps: 250 }, 99), 2);
        assert_eq!(discount_amount(Discount::Percent { bps: 250 }, 100), 3);
    }

    #[test]
    fn ten_percent_of_2000_is_200() {
        assert_eq!(discount_amount(Discount::Percent { bps: 1000 }, 2000), 200);
    }

    #[test]
    fn full_percent_is_exactly_subtotal() {
        assert_eq!(discount_amount(Discount::Percent { bps: FULL_BPS }, 12345), 12345);
    }

    #[test]
    fn fixed_clamps_to_subtotal() {
        assert_eq!(discount_amount(Discount::Fixed { amount: 500 }, 300), 300);
        assert_eq!(discount_amount(Discount::Fixed { amount: 500 }, 800), 500);
    }

    #[test]
    fn zero_subtotal_yields_zero() {
        assert_eq!(discount_amount(Discount::Percent { bps: 1000 }, 0), 0);
        assert_eq!(discount_amount(Discount::Fixed { amount: 100 }, 0), 0);
    }

    proptest! {
        #[test]
        fn percent_never_exceeds_subtotal(subtotal in 0i64..1_000_000_000, bps in 0i64..=10_000) {
            let d = discount_amount(Discount::Percent { bps }, subtotal);
            prop_assert!(d >= 0);
            prop_assert!(d <= subtotal);
        }

        #[test]
        fn fixed_is_min_of_amount_and_subtotal(subtotal in 0i64..1_000_000_000, amount in 0i64..1_000_000_000) {
            prop_assert_eq!(discount_amount(Discount::Fixed { amount }, subtotal), amount.min(subtotal));
        }
    }
}
