//! Member lookups and the non-member sentinel.

use chrono::{DateTime, Utc};
use tokio_postgres::{GenericClient, Row};

use crate::error::{Error, Result};

/// Orders without an authenticated member attach to this fixed user row.
/// Coupons and points never apply to it.
pub const NON_MEMBER_USER_ID: i64 = 0;

/// True for any real member id (anything but the sentinel).
pub fn is_member(user_id: i64) -> bool {
    user_id != NON_MEMBER_USER_ID
}

#[derive(Debug, Clone)]
pub struct Member {
    pub id: i64,
    pub display_name: String,
    pub points: i64,
    pub created_at: DateTime<Utc>,
}

impl Member {
    fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            display_name: row.get("display_name"),
            points: row.get("points"),
            created_at: row.get("created_at"),
        }
    }
}

pub async fn create_member<C: GenericClient>(client: &C, display_name: &str) -> Result<Member> {
    let row = client
        .query_one(
            "INSERT INTO app_user (display_name)
             VALUES ($1)
             RETURNING id, display_name, points, created_at",
            &[&display_name],
        )
        .await?;
    Ok(Member::from_row(&row))
}

pub async fn member_by_id<C: GenericClient>(client: &C, id: i64) -> Result<Option<Member>> {
    let row = client
        .query_opt(
            "SELECT id, display_name, points, created_at FROM app_user WHERE id = $1",
            &[&id],
        )
        .await?;
    Ok(row.as_ref().map(Member::from_row))
}

pub async fn user_exists<C: GenericClient>(client: &C, id: i64) -> Result<bool> {
    let row = client
        .query_opt("SELECT 1 FROM app_user WHERE id = $1", &[&id])
        .await?;
    Ok(row.is_some())
}

/// Current points balance, read from the denormalized user column.
pub async fn points_balance<C: GenericClient>(client: &C, id: i64) -> Result<i64> {
    let row = client
        .query_opt("SELECT points FROM app_user WHERE id = $1", &[&id])
        .await?;
    match row {
        Some(row) => Ok(row.get(0)),
        None => Err(Error::not_found(format!("user {id} not found"))),
    }
}
