//! The points ledger.
//!
//! `app_user.points` is the denormalized running balance;
//! `points_transaction` is the append-only log. Every balance mutation goes
//! through [`apply_delta`], which shifts the balance with an atomic guarded
//! update and appends the ledger row in the same transaction, so the column
//! and the log cannot drift and concurrent mutations cannot lose updates.

use chrono::{DateTime, Utc};
use tokio_postgres::{Client, GenericClient, Row, Transaction};

use crate::error::{Error, Result};
use crate::users;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Earn,
    Redeem,
}

impl TransactionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Earn => "EARN",
            TransactionKind::Redeem => "REDEEM",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EARN" => Ok(TransactionKind::Earn),
            "REDEEM" => Ok(TransactionKind::Redeem),
            other => Err(Error::internal(format!("unexpected ledger kind {other:?}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PointsTransaction {
    pub id: i64,
    pub user_id: i64,
    pub order_id: Option<i64>,
    /// Signed points delta; negative for redemptions.
    pub delta: i64,
    pub kind: TransactionKind,
    /// Balance snapshot after this row was applied.
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

impl PointsTransaction {
    fn from_row(row: &Row) -> Result<Self> {
        let kind: String = row.get("kind");
        Ok(Self {
            id: row.get("id"),
            user_id: row.get("user_id"),
            order_id: row.get("order_id"),
            delta: row.get("delta"),
            kind: TransactionKind::from_str(&kind)?,
            balance_after: row.get("balance_after"),
            created_at: row.get("created_at"),
        })
    }
}

/// Current balance for a user.
pub async fn balance<C: GenericClient>(client: &C, user_id: i64) -> Result<i64> {
    users::points_balance(client, user_id).await
}

/// Shift the user's balance and append the matching ledger row.
///
/// The guard (`points + delta >= 0`) makes the mutation atomic under
/// concurrency: two simultaneous redemptions cannot both read "enough
/// balance" and then both write, because the balance check and the write are
/// one statement. Zero rows affected means the guard failed (or the user row
/// is missing).
pub(crate) async fn apply_delta(
    tx: &Transaction<'_>,
    user_id: i64,
    delta: i64,
    kind: TransactionKind,
    order_id: Option<i64>,
) -> Result<i64> {
    let row = tx
        .query_opt(
            "UPDATE app_user
             SET points = points + $1
             WHERE id = $2 AND points + $1 >= 0
             RETURNING points",
            &[&delta, &user_id],
        )
        .await?;

    let balance_after: i64 = match row {
        Some(row) => row.get(0),
        None if delta >= 0 => {
            return Err(Error::not_found(format!("user {user_id} not found")));
        }
        None => {
            return Err(Error::validation("insufficient points balance"));
        }
    };

    tx.execute(
        "INSERT INTO points_transaction (user_id, order_id, delta, kind, balance_after)
         VALUES ($1, $2, $3, $4, $5)",
        &[&user_id, &order_id, &delta, &kind.as_str(), &balance_after],
    )
    .await?;

    Ok(balance_after)
}

/// Credit points to a member, e.g. on payment confirmation.
/// Returns the new balance.
pub async fn earn(
    client: &mut Client,
    user_id: i64,
    points: i64,
    order_id: Option<i64>,
) -> Result<i64> {
    if !users::is_member(user_id) {
        return Err(Error::validation("points are only tracked for members"));
    }
    if points <= 0 {
        return Err(Error::validation("earned points must be positive"));
    }

    let tx = client.transaction().await?;
    let balance_after = apply_delta(&tx, user_id, points, TransactionKind::Earn, order_id).await?;
    tx.commit().await?;

    tracing::debug!(user_id, points, balance_after, "points earned");
    Ok(balance_after)
}

/// Debit points from a member. The amount must be a positive multiple of
/// [`till_core::points::REDEEM_UNIT`] and within the current balance; the
/// check runs before any mutation. Returns the new balance.
pub async fn redeem(
    client: &mut Client,
    user_id: i64,
    points: i64,
    order_id: Option<i64>,
) -> Result<i64> {
    if !users::is_member(user_id) {
        return Err(Error::validation("points are only tracked for members"));
    }
    let current = users::points_balance(client, user_id).await?;
    till_core::points::validate_redemption(points, current)
        .map_err(|e| Error::validation(e.to_string()))?;

    let tx = client.transaction().await?;
    let balance_after =
        apply_delta(&tx, user_id, -points, TransactionKind::Redeem, order_id).await?;
    tx.commit().await?;

    tracing::debug!(user_id, points, balance_after, "points redeemed");
    Ok(balance_after)
}

/// The user's ledger, newest first.
pub async fn transactions_for_user<C: GenericClient>(
    client: &C,
    user_id: i64,
) -> Result<Vec<PointsTransaction>> {
    let rows = client
        .query(
            "SELECT id, user_id, order_id, delta, kind, balance_after, created_at
             FROM points_transaction
             WHERE user_id = $1
             ORDER BY id DESC",
            &[&user_id],
        )
        .await?;
    rows.iter().map(PointsTransaction::from_row).collect()
}
