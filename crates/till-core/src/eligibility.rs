//! Coupon eligibility evaluation.
//!
//! Pure read-and-decide: the storage layer joins a grant with its code and
//! coupon into a [`GrantView`], and [`evaluate`] applies the business checks
//! in a fixed order, first failure winning. The same function runs when
//! listing a member's coupons (subtotal may still be 0) and again at order
//! commit against the authoritative subtotal.

use chrono::{DateTime, Utc};

/// A coupon grant joined with its code and coupon rows, as read at
/// evaluation time.
#[derive(Debug, Clone)]
pub struct GrantView {
    pub coupon_active: bool,
    pub code_active: bool,
    /// Coupon-level validity window.
    pub coupon_starts_at: Option<DateTime<Utc>>,
    pub coupon_ends_at: Option<DateTime<Utc>>,
    /// Code-level validity window; each unset bound falls back to the
    /// coupon's bound.
    pub code_starts_at: Option<DateTime<Utc>>,
    pub code_ends_at: Option<DateTime<Utc>>,
    pub allowed_uses: i32,
    pub used_count: i32,
    pub granted_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Minimum order subtotal, 0 when unrestricted.
    pub min_order_amount: i64,
}

/// Outcome of an eligibility check.
///
/// `NeedsConfirmation` covers the two-phase UI flow: a coupon with a minimum
/// order amount is shown as available-pending while the cart total is still
/// unknown (subtotal 0), and resolves to `Usable` or `Blocked` once the real
/// subtotal is in hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Usable,
    Blocked { reason: String },
    NeedsConfirmation { reason: String },
}

impl Eligibility {
    pub fn is_usable(&self) -> bool {
        matches!(self, Eligibility::Usable)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Eligibility::Usable => None,
            Eligibility::Blocked { reason } | Eligibility::NeedsConfirmation { reason } => {
                Some(reason)
            }
        }
    }
}

fn blocked(reason: impl Into<String>) -> Eligibility {
    Eligibility::Blocked { reason: reason.into() }
}

/// Apply the eligibility checks in order; the first failure wins.
///
/// Pass `subtotal = 0` when the order amount is not yet known.
pub fn evaluate(grant: &GrantView, subtotal: i64, now: DateTime<Utc>) -> Eligibility {
    if !grant.coupon_active {
        return blocked("coupon is no longer active");
    }
    if !grant.code_active {
        return blocked("coupon code is no longer active");
    }

    let starts_at = grant.code_starts_at.or(grant.coupon_starts_at);
    let ends_at = grant.code_ends_at.or(grant.coupon_ends_at);
    if let Some(starts_at) = starts_at {
        if now < starts_at {
            return blocked("coupon is not yet valid");
        }
    }
    if let Some(ends_at) = ends_at {
        if now > ends_at {
            return blocked("coupon has expired");
        }
    }

    if grant.allowed_uses - grant.used_count <= 0 {
        return blocked("coupon has no remaining uses");
    }
    if let Some(expires_at) = grant.expires_at {
        if expires_at < now {
            return blocked("coupon grant has expired");
        }
    }
    if let Some(granted_at) = grant.granted_at {
        if granted_at > now {
            return blocked("coupon grant is not active yet");
        }
    }

    if grant.min_order_amount > 0 {
        if subtotal == 0 {
            return Eligibility::NeedsConfirmation {
                reason: format!(
                    "requires an order of at least NT${}",
                    grant.min_order_amount
                ),
            };
        }
        if subtotal < grant.min_order_amount {
            return blocked(format!(
                "order subtotal is below the NT${} minimum",
                grant.min_order_amount
            ));
        }
    }

    Eligibility::Usable
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    fn usable_grant() -> GrantView {
        GrantView {
            coupon_active: true,
            code_active: true,
            coupon_starts_at: Some(now() - Duration::days(7)),
            coupon_ends_at: Some(now() + Duration::days(7)),
            code_starts_at: None,
            code_ends_at: None,
            allowed_uses: 3,
            used_count: 1,
            granted_at: Some(now() - Duration::days(1)),
            expires_at: Some(now() + Duration::days(30)),
            min_order_amount: 0,
        }
    }

    #[test]
    fn happy_path_is_usable() {
        assert_eq!(evaluate(&usable_grant(), 1000, now()), Eligibility::Usable);
    }

    #[test]
    fn inactive_coupon_wins_over_everything() {
        let mut grant = usable_grant();
        grant.coupon_active = false;
        grant.code_active = false;
        let out = evaluate(&grant, 1000, now());
        assert_eq!(out.reason(), Some("coupon is no longer active"));
    }

    #[test]
    fn inactive_code_is_blocked() {
        let mut grant = usable_grant();
        grant.code_active = false;
        assert_eq!(
            evaluate(&grant, 1000, now()).reason(),
            Some("coupon code is no longer active")
        );
    }

    #[test]
    fn code_window_overrides_coupon_window() {
        let mut grant = usable_grant();
        // Coupon window is open, but the code's own window ended yesterday.
        grant.code_ends_at = Some(now() - Duration::days(1));
        assert_eq!(evaluate(&grant, 1000, now()).reason(), Some("coupon has expired"));
    }

    #[test]
    fn not_yet_started_window_is_blocked() {
        let mut grant = usable_grant();
        grant.coupon_starts_at = Some(now() + Duration::days(1));
        assert_eq!(evaluate(&grant, 1000, now()).reason(), Some("coupon is not yet valid"));
    }

    #[test]
    fn exhausted_grant_is_blocked() {
        let mut grant = usable_grant();
        grant.used_count = grant.allowed_uses;
        assert_eq!(
            evaluate(&grant, 1000, now()).reason(),
            Some("coupon has no remaining uses")
        );
    }

    #[test]
    fn expired_grant_is_blocked() {
        let mut grant = usable_grant();
        grant.expires_at = Some(now() - Duration::seconds(1));
        assert_eq!(evaluate(&grant, 1000, now()).reason(), Some("coupon grant has expired"));
    }

    #[test]
    fn future_grant_is_blocked() {
        let mut grant = usable_grant();
        grant.granted_at = Some(now() + Duration::hours(1));
        assert_eq!(
            evaluate(&grant, 1000, now()).reason(),
            Some("coupon grant is not active yet")
        );
    }

    #[test]
    fn minimum_is_three_way() {
        let mut grant = usable_grant();
        grant.min_order_amount = 500;

        // Unknown subtotal: pending, not a hard failure.
        assert!(matches!(
            evaluate(&grant, 0, now()),
            Eligibility::NeedsConfirmation { .. }
        ));
        // Known but too small: blocked.
        assert!(matches!(evaluate(&grant, 499, now()), Eligibility::Blocked { .. }));
        // Known and sufficient: usable.
        assert_eq!(evaluate(&grant, 500, now()), Eligibility::Usable);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let grant = usable_grant();
        let first = evaluate(&grant, 250, now());
        let second = evaluate(&grant, 250, now());
        assert_eq!(first, second);
    }
}
