//! Order assembly and commit.
//!
//! `create_order` runs the whole pipeline — item validation, product
//! snapshots, coupon re-evaluation against the authoritative subtotal,
//! points validation — and then persists the order, its items, the
//! redemption audit row and the points ledger writes inside one transaction.
//! A failure at any step rolls the whole thing back; there is no partial
//! order, ever.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tokio_postgres::{Client, GenericClient, Row, Transaction};

use till_core::eligibility::{self, Eligibility};

use crate::coupons::{self, CouponRedemption, GrantRow};
use crate::error::{Error, Result};
use crate::points::{self, TransactionKind};
use crate::{preorder, users};

const ORDER_COLUMNS: &str = "id, order_number, user_id, subtotal, discount, points_discount, \
                             total, status, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Created,
    Confirmed,
    Paid,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "confirmed" => Ok(OrderStatus::Confirmed),
            "paid" => Ok(OrderStatus::Paid),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(Error::internal(format!("unexpected order status {other:?}"))),
        }
    }

    /// Legal transitions: created → confirmed → paid, and any live order can
    /// be cancelled. Cancelled is terminal.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Created, Confirmed)
                | (Created, Paid)
                | (Confirmed, Paid)
                | (Created, Cancelled)
                | (Confirmed, Cancelled)
                | (Paid, Cancelled)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub user_id: i64,
    pub subtotal: i64,
    pub discount: i64,
    pub points_discount: i64,
    pub total: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    fn from_row(row: &Row) -> Result<Self> {
        let status: String = row.get("status");
        Ok(Self {
            id: row.get("id"),
            order_number: row.get("order_number"),
            user_id: row.get("user_id"),
            subtotal: row.get("subtotal"),
            discount: row.get("discount"),
            points_discount: row.get("points_discount"),
            total: row.get("total"),
            status: OrderStatus::from_str(&status)?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub name_snapshot: String,
    pub quantity: i64,
    pub unit_price_snapshot: i64,
    pub line_total: i64,
}

impl OrderItem {
    fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            order_id: row.get("order_id"),
            product_id: row.get("product_id"),
            name_snapshot: row.get("name_snapshot"),
            quantity: row.get("quantity"),
            unit_price_snapshot: row.get("unit_price_snapshot"),
            line_total: row.get("line_total"),
        }
    }
}

/// A fully assembled order as returned to the caller.
#[derive(Debug, Clone)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
    pub redemption: Option<CouponRedemption>,
}

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    /// `None` attaches the order to the non-member sentinel.
    pub user_id: Option<i64>,
    pub items: Vec<OrderItemRequest>,
    pub coupon_code: Option<String>,
    /// Points to redeem; must be a positive multiple of the redeem unit.
    pub redeem_points: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct OrderItemRequest {
    pub product_id: i64,
    pub quantity: i64,
}

/// A validated line item waiting to be written, with its snapshot taken.
#[derive(Debug, Clone)]
pub(crate) struct PendingItem {
    pub product_id: i64,
    pub name: String,
    pub quantity: i64,
    pub unit_price: i64,
    pub line_total: i64,
}

/// Create and commit a direct-sale order.
///
/// Direct sales are settled at the counter, so the order is inserted with
/// status `paid`. Coupon eligibility and points sufficiency are evaluated
/// against the subtotal computed here from fresh product rows; amounts from
/// the client are never trusted.
pub async fn create_order(client: &mut Client, req: &CreateOrderRequest) -> Result<OrderDetail> {
    let now = Utc::now();
    let user_id = req.user_id.unwrap_or(users::NON_MEMBER_USER_ID);

    if req.items.is_empty() {
        return Err(Error::validation("an order needs at least one line item"));
    }
    let mut seen = HashSet::new();
    for item in &req.items {
        if item.quantity <= 0 {
            return Err(Error::validation("line item quantity must be positive"));
        }
        if !seen.insert(item.product_id) {
            return Err(Error::validation(format!(
                "product {} appears more than once in the order",
                item.product_id
            )));
        }
    }
    if !users::is_member(user_id) && (req.coupon_code.is_some() || req.redeem_points.is_some()) {
        return Err(Error::validation("coupons and points require a member account"));
    }
    if users::is_member(user_id) && !users::user_exists(client, user_id).await? {
        return Err(Error::not_found(format!("user {user_id} not found")));
    }

    let tx = client.transaction().await?;

    // Snapshot names and prices now; later product edits must not touch
    // this order.
    let mut pending = Vec::with_capacity(req.items.len());
    let mut subtotal: i64 = 0;
    for item in &req.items {
        let row = tx
            .query_opt(
                "SELECT name, unit_price, active FROM product WHERE id = $1",
                &[&item.product_id],
            )
            .await?
            .ok_or_else(|| Error::not_found(format!("product {} not found", item.product_id)))?;
        let active: bool = row.get("active");
        if !active {
            return Err(Error::validation(format!(
                "product {} is not for sale",
                item.product_id
            )));
        }
        let unit_price: i64 = row.get("unit_price");
        let line_total = unit_price * item.quantity;
        subtotal += line_total;
        pending.push(PendingItem {
            product_id: item.product_id,
            name: row.get("name"),
            quantity: item.quantity,
            unit_price,
            line_total,
        });
    }

    // Re-evaluate the coupon against the authoritative subtotal. The same
    // evaluation already ran when the coupon was listed; this one decides.
    let mut discount: i64 = 0;
    let mut grant: Option<GrantRow> = None;
    if let Some(code) = &req.coupon_code {
        let g = coupons::grant_for_redemption(&tx, user_id, code).await?;
        match eligibility::evaluate(&g.view(), subtotal, now) {
            Eligibility::Usable => {}
            Eligibility::Blocked { reason } | Eligibility::NeedsConfirmation { reason } => {
                return Err(Error::validation(reason));
            }
        }
        discount = till_core::discount::discount_amount(g.discount()?, subtotal);
        grant = Some(g);
    }

    let mut points_discount: i64 = 0;
    let mut redeem_points: i64 = 0;
    if let Some(requested) = req.redeem_points {
        let balance = users::points_balance(&tx, user_id).await?;
        points_discount = till_core::points::validate_redemption(requested, balance)
            .map_err(|e| Error::validation(e.to_string()))?;
        redeem_points = requested;
    }

    if discount + points_discount > subtotal {
        return Err(Error::validation("discounts exceed the order subtotal"));
    }

    let order = insert_order(
        &tx,
        user_id,
        subtotal,
        discount,
        points_discount,
        OrderStatus::Paid,
        now,
    )
    .await?;

    let mut items = Vec::with_capacity(pending.len());
    for item in &pending {
        items.push(insert_item(&tx, order.id, item).await?);
    }

    let mut redemption = None;
    if let Some(grant) = &grant {
        coupons::consume_grant(&tx, grant).await?;
        redemption = Some(coupons::record_redemption(&tx, order.id, grant, discount).await?);
    }

    if redeem_points > 0 {
        points::apply_delta(&tx, user_id, -redeem_points, TransactionKind::Redeem, Some(order.id))
            .await?;
    }

    tx.commit().await?;

    tracing::info!(
        order_number = %order.order_number,
        subtotal,
        discount,
        points_discount,
        total = order.total,
        "order created"
    );

    Ok(OrderDetail { order, items, redemption })
}

/// Insert the order row. Shared by the direct-sale and preorder paths.
pub(crate) async fn insert_order(
    tx: &Transaction<'_>,
    user_id: i64,
    subtotal: i64,
    discount: i64,
    points_discount: i64,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> Result<Order> {
    let total = subtotal - discount - points_discount;
    let order_number = till_core::orderno::generate(now);
    let row = tx
        .query_one(
            &format!(
                r#"INSERT INTO "order"
                       (order_number, user_id, subtotal, discount, points_discount, total, status)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)
                   RETURNING {ORDER_COLUMNS}"#
            ),
            &[
                &order_number,
                &user_id,
                &subtotal,
                &discount,
                &points_discount,
                &total,
                &status.as_str(),
            ],
        )
        .await?;
    Order::from_row(&row)
}

pub(crate) async fn insert_item(
    tx: &Transaction<'_>,
    order_id: i64,
    item: &PendingItem,
) -> Result<OrderItem> {
    let row = tx
        .query_one(
            "INSERT INTO order_item
                 (order_id, product_id, name_snapshot, quantity, unit_price_snapshot, line_total)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, order_id, product_id, name_snapshot, quantity, unit_price_snapshot,
                       line_total",
            &[
                &order_id,
                &item.product_id,
                &item.name,
                &item.quantity,
                &item.unit_price,
                &item.line_total,
            ],
        )
        .await?;
    Ok(OrderItem::from_row(&row))
}

/// Move an order along its lifecycle.
///
/// Entering `paid` credits earn points to the member (one point per TWD of
/// total). Entering `cancelled` releases any preorder reservation the order
/// holds.
pub async fn update_status(
    client: &mut Client,
    order_id: i64,
    new_status: OrderStatus,
) -> Result<Order> {
    let tx = client.transaction().await?;

    let row = tx
        .query_opt(
            &format!(r#"SELECT {ORDER_COLUMNS} FROM "order" WHERE id = $1 FOR UPDATE"#),
            &[&order_id],
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("order {order_id} not found")))?;
    let order = Order::from_row(&row)?;

    if order.status == new_status {
        return Err(Error::validation(format!(
            "order is already {}",
            new_status.as_str()
        )));
    }
    if !order.status.can_transition(new_status) {
        return Err(Error::validation(format!(
            "cannot move order from {} to {}",
            order.status.as_str(),
            new_status.as_str()
        )));
    }

    let row = tx
        .query_one(
            &format!(
                r#"UPDATE "order" SET status = $2, updated_at = NOW()
                   WHERE id = $1
                   RETURNING {ORDER_COLUMNS}"#
            ),
            &[&order_id, &new_status.as_str()],
        )
        .await?;
    let updated = Order::from_row(&row)?;

    if new_status == OrderStatus::Paid && users::is_member(updated.user_id) {
        let earned = till_core::points::earned_for_amount(updated.total);
        if earned > 0 {
            points::apply_delta(&tx, updated.user_id, earned, TransactionKind::Earn, Some(updated.id))
                .await?;
        }
    }
    if new_status == OrderStatus::Cancelled {
        preorder::release_for_order(&tx, order_id).await?;
    }

    tx.commit().await?;

    tracing::info!(
        order_id,
        from = order.status.as_str(),
        to = new_status.as_str(),
        "order status updated"
    );
    Ok(updated)
}

pub async fn order_by_number<C: GenericClient>(
    client: &C,
    order_number: &str,
) -> Result<Option<Order>> {
    let row = client
        .query_opt(
            &format!(
                r#"SELECT {ORDER_COLUMNS} FROM "order"
                   WHERE order_number = $1
                   ORDER BY id DESC LIMIT 1"#
            ),
            &[&order_number],
        )
        .await?;
    row.as_ref().map(Order::from_row).transpose()
}

/// The full order with its items and redemption, or NotFound.
pub async fn order_detail<C: GenericClient>(client: &C, order_id: i64) -> Result<OrderDetail> {
    let row = client
        .query_opt(
            &format!(r#"SELECT {ORDER_COLUMNS} FROM "order" WHERE id = $1"#),
            &[&order_id],
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("order {order_id} not found")))?;
    let order = Order::from_row(&row)?;

    let item_rows = client
        .query(
            "SELECT id, order_id, product_id, name_snapshot, quantity, unit_price_snapshot,
                    line_total
             FROM order_item
             WHERE order_id = $1
             ORDER BY id",
            &[&order_id],
        )
        .await?;
    let items = item_rows.iter().map(OrderItem::from_row).collect();

    let redemption = coupons::redemptions_for_order(client, order_id)
        .await?
        .into_iter()
        .next();

    Ok(OrderDetail { order, items, redemption })
}
