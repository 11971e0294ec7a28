//! Coupons, codes, grants and redemptions.
//!
//! A *grant* is one member's entitlement to redeem one code up to
//! `allowed_uses` times; a *redemption* is the audit row recording a single
//! use against one order. Eligibility is decided by `till_core::eligibility`
//! over a grant/code/coupon join read fresh from storage, both when listing
//! a member's coupons and again at order commit.

use chrono::{DateTime, Duration, Utc};
use tokio_postgres::{GenericClient, Row, Transaction};

use till_core::discount::{Discount, FULL_BPS};
use till_core::eligibility::{self, Eligibility, GrantView};

use crate::error::{is_unique_violation, Error, Result};
use crate::users;

#[derive(Debug, Clone)]
pub struct Coupon {
    pub id: i64,
    pub name: String,
    pub discount: Discount,
    pub min_order_amount: i64,
    pub max_uses_total: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct NewCoupon {
    pub name: String,
    pub discount: Discount,
    pub min_order_amount: i64,
    pub max_uses_total: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct NewCode {
    pub code: String,
    pub max_redemptions: Option<i64>,
    /// Each unset bound falls back to the coupon's bound at evaluation time.
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    /// Grant lifetime in days, measured from grant time.
    pub expires_after_days: Option<i32>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct CouponCode {
    pub id: i64,
    pub coupon_id: i64,
    pub code: String,
    pub max_redemptions: Option<i64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub expires_after_days: Option<i32>,
    pub active: bool,
}

/// A grant joined with its code and coupon, as read at evaluation time.
#[derive(Debug, Clone)]
pub struct GrantRow {
    pub grant_id: i64,
    pub user_id: i64,
    pub coupon_id: i64,
    pub coupon_code_id: i64,
    pub code: String,
    pub coupon_name: String,
    discount_type: String,
    percent_off_bps: Option<i64>,
    amount_off_twd: Option<i64>,
    pub min_order_amount: i64,
    pub max_uses_total: Option<i64>,
    pub max_redemptions: Option<i64>,
    pub coupon_active: bool,
    pub code_active: bool,
    pub coupon_starts_at: Option<DateTime<Utc>>,
    pub coupon_ends_at: Option<DateTime<Utc>>,
    pub code_starts_at: Option<DateTime<Utc>>,
    pub code_ends_at: Option<DateTime<Utc>>,
    pub allowed_uses: i32,
    pub used_count: i32,
    pub granted_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl GrantRow {
    fn from_row(row: &Row) -> Self {
        Self {
            grant_id: row.get("grant_id"),
            user_id: row.get("user_id"),
            coupon_id: row.get("coupon_id"),
            coupon_code_id: row.get("coupon_code_id"),
            code: row.get("code"),
            coupon_name: row.get("coupon_name"),
            discount_type: row.get("discount_type"),
            percent_off_bps: row.get("percent_off_bps"),
            amount_off_twd: row.get("amount_off_twd"),
            min_order_amount: row.get("min_order_amount"),
            max_uses_total: row.get("max_uses_total"),
            max_redemptions: row.get("max_redemptions"),
            coupon_active: row.get("coupon_active"),
            code_active: row.get("code_active"),
            coupon_starts_at: row.get("coupon_starts_at"),
            coupon_ends_at: row.get("coupon_ends_at"),
            code_starts_at: row.get("code_starts_at"),
            code_ends_at: row.get("code_ends_at"),
            allowed_uses: row.get("allowed_uses"),
            used_count: row.get("used_count"),
            granted_at: row.get("granted_at"),
            expires_at: row.get("expires_at"),
        }
    }

    /// Project this row into the pure eligibility input.
    pub fn view(&self) -> GrantView {
        GrantView {
            coupon_active: self.coupon_active,
            code_active: self.code_active,
            coupon_starts_at: self.coupon_starts_at,
            coupon_ends_at: self.coupon_ends_at,
            code_starts_at: self.code_starts_at,
            code_ends_at: self.code_ends_at,
            allowed_uses: self.allowed_uses,
            used_count: self.used_count,
            granted_at: Some(self.granted_at),
            expires_at: self.expires_at,
            min_order_amount: self.min_order_amount,
        }
    }

    /// The coupon's discount rule. The schema CHECK guarantees exactly one
    /// parameter is set; a row violating that is corrupt.
    pub fn discount(&self) -> Result<Discount> {
        match (self.discount_type.as_str(), self.percent_off_bps, self.amount_off_twd) {
            ("PERCENT", Some(bps), None) => Ok(Discount::Percent { bps }),
            ("FIXED", None, Some(amount)) => Ok(Discount::Fixed { amount }),
            _ => Err(Error::internal(format!(
                "coupon {} violates the one-discount-parameter invariant",
                self.coupon_id
            ))),
        }
    }
}

/// A member-facing view of one grant: what it is and whether it is usable
/// right now (possibly pending cart-total confirmation).
#[derive(Debug, Clone)]
pub struct CouponOffer {
    pub grant_id: i64,
    pub code: String,
    pub coupon_name: String,
    pub remaining_uses: i32,
    pub eligibility: Eligibility,
}

fn coupon_from_row(row: &Row) -> Result<Coupon> {
    let discount_type: String = row.get("discount_type");
    let percent_off_bps: Option<i64> = row.get("percent_off_bps");
    let amount_off_twd: Option<i64> = row.get("amount_off_twd");
    let id: i64 = row.get("id");
    let discount = match (discount_type.as_str(), percent_off_bps, amount_off_twd) {
        ("PERCENT", Some(bps), None) => Discount::Percent { bps },
        ("FIXED", None, Some(amount)) => Discount::Fixed { amount },
        _ => {
            return Err(Error::internal(format!(
                "coupon {id} violates the one-discount-parameter invariant"
            )));
        }
    };
    Ok(Coupon {
        id,
        name: row.get("name"),
        discount,
        min_order_amount: row.get("min_order_amount"),
        max_uses_total: row.get("max_uses_total"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        active: row.get("active"),
    })
}

pub async fn create_coupon<C: GenericClient>(client: &C, new: &NewCoupon) -> Result<Coupon> {
    let (discount_type, percent_off_bps, amount_off_twd) = match new.discount {
        Discount::Percent { bps } => {
            if !(0..=FULL_BPS).contains(&bps) {
                return Err(Error::validation("percent_off_bps must be between 0 and 10000"));
            }
            ("PERCENT", Some(bps), None)
        }
        Discount::Fixed { amount } => {
            if amount <= 0 {
                return Err(Error::validation("amount_off_twd must be positive"));
            }
            ("FIXED", None, Some(amount))
        }
    };
    if new.min_order_amount < 0 {
        return Err(Error::validation("min_order_amount must not be negative"));
    }

    let row = client
        .query_one(
            "INSERT INTO coupon
                 (name, discount_type, percent_off_bps, amount_off_twd,
                  min_order_amount, max_uses_total, starts_at, ends_at, active)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING id, name, discount_type, percent_off_bps, amount_off_twd,
                       min_order_amount, max_uses_total, starts_at, ends_at, active",
            &[
                &new.name,
                &discount_type,
                &percent_off_bps,
                &amount_off_twd,
                &new.min_order_amount,
                &new.max_uses_total,
                &new.starts_at,
                &new.ends_at,
                &new.active,
            ],
        )
        .await?;
    coupon_from_row(&row)
}

pub async fn add_code<C: GenericClient>(
    client: &C,
    coupon_id: i64,
    new: &NewCode,
) -> Result<CouponCode> {
    if new.code.trim().is_empty() {
        return Err(Error::validation("coupon code must not be empty"));
    }
    let exists = client
        .query_opt("SELECT 1 FROM coupon WHERE id = $1", &[&coupon_id])
        .await?;
    if exists.is_none() {
        return Err(Error::not_found(format!("coupon {coupon_id} not found")));
    }

    let row = client
        .query_one(
            "INSERT INTO coupon_code
                 (coupon_id, code, max_redemptions, starts_at, ends_at, expires_after_days, active)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id, coupon_id, code, max_redemptions, starts_at, ends_at,
                       expires_after_days, active",
            &[
                &coupon_id,
                &new.code,
                &new.max_redemptions,
                &new.starts_at,
                &new.ends_at,
                &new.expires_after_days,
                &new.active,
            ],
        )
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(format!("coupon code {} already exists", new.code))
            } else {
                e.into()
            }
        })?;

    Ok(CouponCode {
        id: row.get("id"),
        coupon_id: row.get("coupon_id"),
        code: row.get("code"),
        max_redemptions: row.get("max_redemptions"),
        starts_at: row.get("starts_at"),
        ends_at: row.get("ends_at"),
        expires_after_days: row.get("expires_after_days"),
        active: row.get("active"),
    })
}

/// Entitle a member to redeem a code up to `allowed_uses` times.
///
/// When the code carries `expires_after_days`, the grant expires that many
/// days after it is issued.
pub async fn grant_to_user<C: GenericClient>(
    client: &C,
    code: &str,
    user_id: i64,
    allowed_uses: i32,
) -> Result<i64> {
    if !users::is_member(user_id) {
        return Err(Error::validation("coupons can only be granted to members"));
    }
    if allowed_uses <= 0 {
        return Err(Error::validation("allowed_uses must be positive"));
    }
    if !users::user_exists(client, user_id).await? {
        return Err(Error::not_found(format!("user {user_id} not found")));
    }

    let code_row = client
        .query_opt(
            "SELECT id, expires_after_days FROM coupon_code WHERE code = $1",
            &[&code],
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("coupon code {code} not found")))?;
    let coupon_code_id: i64 = code_row.get("id");
    let expires_after_days: Option<i32> = code_row.get("expires_after_days");

    let granted_at = Utc::now();
    let expires_at = expires_after_days.map(|days| granted_at + Duration::days(i64::from(days)));

    let row = client
        .query_one(
            "INSERT INTO coupon_grant (coupon_code_id, user_id, allowed_uses, granted_at, expires_at)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
            &[&coupon_code_id, &user_id, &allowed_uses, &granted_at, &expires_at],
        )
        .await?;
    Ok(row.get(0))
}

const GRANT_JOIN: &str = "SELECT g.id AS grant_id,
            g.user_id,
            c.id AS coupon_id,
            cc.id AS coupon_code_id,
            cc.code,
            c.name AS coupon_name,
            c.discount_type,
            c.percent_off_bps,
            c.amount_off_twd,
            c.min_order_amount,
            c.max_uses_total,
            cc.max_redemptions,
            c.active AS coupon_active,
            cc.active AS code_active,
            c.starts_at AS coupon_starts_at,
            c.ends_at AS coupon_ends_at,
            cc.starts_at AS code_starts_at,
            cc.ends_at AS code_ends_at,
            g.allowed_uses,
            g.used_count,
            g.granted_at,
            g.expires_at
     FROM coupon_grant g
     JOIN coupon_code cc ON cc.id = g.coupon_code_id
     JOIN coupon c ON c.id = cc.coupon_id";

/// All of a member's grants, each evaluated against `subtotal` (pass 0 when
/// the cart total is not known yet; minimum-amount coupons then come back as
/// `NeedsConfirmation`).
pub async fn grants_for_user<C: GenericClient>(
    client: &C,
    user_id: i64,
    subtotal: i64,
    now: DateTime<Utc>,
) -> Result<Vec<CouponOffer>> {
    let rows = client
        .query(
            &format!("{GRANT_JOIN} WHERE g.user_id = $1 ORDER BY g.granted_at DESC"),
            &[&user_id],
        )
        .await?;

    Ok(rows
        .iter()
        .map(GrantRow::from_row)
        .map(|grant| CouponOffer {
            eligibility: eligibility::evaluate(&grant.view(), subtotal, now),
            remaining_uses: grant.allowed_uses - grant.used_count,
            grant_id: grant.grant_id,
            code: grant.code,
            coupon_name: grant.coupon_name,
        })
        .collect())
}

/// The single grant a member holds for a code, for commit-time evaluation.
pub async fn grant_for_redemption<C: GenericClient>(
    client: &C,
    user_id: i64,
    code: &str,
) -> Result<GrantRow> {
    let row = client
        .query_opt(
            &format!("{GRANT_JOIN} WHERE g.user_id = $1 AND cc.code = $2 ORDER BY g.granted_at DESC LIMIT 1"),
            &[&user_id, &code],
        )
        .await?;
    row.as_ref()
        .map(GrantRow::from_row)
        .ok_or_else(|| Error::not_found(format!("no coupon grant for code {code}")))
}

/// Spend one use of a grant, atomically.
///
/// The `used_count < allowed_uses` guard makes concurrent commits race
/// safely: the loser sees zero rows affected and the whole order aborts.
/// Global and per-code caps are counted inside the same transaction.
pub(crate) async fn consume_grant(tx: &Transaction<'_>, grant: &GrantRow) -> Result<()> {
    if let Some(cap) = grant.max_uses_total {
        let row = tx
            .query_one(
                "SELECT COUNT(*) FROM coupon_redemption WHERE coupon_id = $1",
                &[&grant.coupon_id],
            )
            .await?;
        let used: i64 = row.get(0);
        if used >= cap {
            return Err(Error::conflict("coupon has reached its total usage cap"));
        }
    }
    if let Some(cap) = grant.max_redemptions {
        let row = tx
            .query_one(
                "SELECT COUNT(*) FROM coupon_redemption WHERE coupon_code_id = $1",
                &[&grant.coupon_code_id],
            )
            .await?;
        let used: i64 = row.get(0);
        if used >= cap {
            return Err(Error::conflict("coupon code has reached its redemption cap"));
        }
    }

    let affected = tx
        .execute(
            "UPDATE coupon_grant
             SET used_count = used_count + 1
             WHERE id = $1 AND used_count < allowed_uses",
            &[&grant.grant_id],
        )
        .await?;
    if affected == 0 {
        return Err(Error::conflict("coupon grant has no remaining uses"));
    }
    Ok(())
}

/// One recorded coupon use against one order.
#[derive(Debug, Clone)]
pub struct CouponRedemption {
    pub id: i64,
    pub order_id: i64,
    pub coupon_id: i64,
    pub coupon_code_id: i64,
    pub user_id: i64,
    pub amount_applied: i64,
    pub redeemed_at: DateTime<Utc>,
}

impl CouponRedemption {
    pub(crate) fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            order_id: row.get("order_id"),
            coupon_id: row.get("coupon_id"),
            coupon_code_id: row.get("coupon_code_id"),
            user_id: row.get("user_id"),
            amount_applied: row.get("amount_applied"),
            redeemed_at: row.get("redeemed_at"),
        }
    }
}

pub(crate) async fn record_redemption(
    tx: &Transaction<'_>,
    order_id: i64,
    grant: &GrantRow,
    amount_applied: i64,
) -> Result<CouponRedemption> {
    let row = tx
        .query_one(
            "INSERT INTO coupon_redemption
                 (order_id, coupon_id, coupon_code_id, user_id, amount_applied)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, order_id, coupon_id, coupon_code_id, user_id, amount_applied, redeemed_at",
            &[&order_id, &grant.coupon_id, &grant.coupon_code_id, &grant.user_id, &amount_applied],
        )
        .await?;
    Ok(CouponRedemption::from_row(&row))
}

/// Redemption audit rows for one order.
pub async fn redemptions_for_order<C: GenericClient>(
    client: &C,
    order_id: i64,
) -> Result<Vec<CouponRedemption>> {
    let rows = client
        .query(
            "SELECT id, order_id, coupon_id, coupon_code_id, user_id, amount_applied, redeemed_at
             FROM coupon_redemption
             WHERE order_id = $1
             ORDER BY id",
            &[&order_id],
        )
        .await?;
    Ok(rows.iter().map(CouponRedemption::from_row).collect())
}
