//! Preorder campaigns and quantity reservation.
//!
//! The reservation is the one place true concurrency hazards arise: many
//! stateless instances may take preorders for the same campaign product at
//! once. The guard lives in a single conditional UPDATE — never a read
//! followed by a write — so two racing reservations can never both fit into
//! the last slot.

use chrono::{DateTime, Utc};
use tokio_postgres::{Client, GenericClient, Row, Transaction};

use crate::error::{Error, Result};
use crate::orders::{self, OrderStatus, PendingItem};
use crate::users;

#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub active: bool,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Campaign {
    fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            name: row.get("name"),
            description: row.get("description"),
            active: row.get("active"),
            starts_at: row.get("starts_at"),
            ends_at: row.get("ends_at"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CampaignProduct {
    pub id: i64,
    pub campaign_id: i64,
    pub product_id: i64,
    pub supply_quantity: i64,
    pub reserved_quantity: i64,
}

impl CampaignProduct {
    fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            campaign_id: row.get("campaign_id"),
            product_id: row.get("product_id"),
            supply_quantity: row.get("supply_quantity"),
            reserved_quantity: row.get("reserved_quantity"),
        }
    }

    pub fn remaining(&self) -> i64 {
        self.supply_quantity - self.reserved_quantity
    }
}

#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub name: String,
    pub description: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub products: Vec<NewCampaignProduct>,
}

#[derive(Debug, Clone)]
pub struct NewCampaignProduct {
    pub product_id: i64,
    pub supply_quantity: i64,
}

#[derive(Debug, Clone)]
pub struct PreorderRequest {
    pub campaign_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    /// `None` attaches the order to the non-member sentinel.
    pub user_id: Option<i64>,
    pub customer_name: String,
    pub customer_phone: String,
}

/// What the caller gets back from a successful preorder.
#[derive(Debug, Clone)]
pub struct PreorderReceipt {
    pub order_number: String,
    pub remaining_quantity: i64,
    pub total_amount: i64,
}

/// Create a campaign (inactive) with its per-product supply rows.
pub async fn create_campaign(client: &mut Client, new: &NewCampaign) -> Result<Campaign> {
    if new.products.is_empty() {
        return Err(Error::validation("a campaign needs at least one product"));
    }
    if new.ends_at <= new.starts_at {
        return Err(Error::validation("campaign window must end after it starts"));
    }
    for product in &new.products {
        if product.supply_quantity <= 0 {
            return Err(Error::validation("supply quantity must be positive"));
        }
    }

    let tx = client.transaction().await?;
    let row = tx
        .query_one(
            "INSERT INTO preorder_campaign (name, description, starts_at, ends_at)
             VALUES ($1, $2, $3, $4)
             RETURNING id, name, description, active, starts_at, ends_at",
            &[&new.name, &new.description, &new.starts_at, &new.ends_at],
        )
        .await?;
    let campaign = Campaign::from_row(&row);

    for product in &new.products {
        let exists = tx
            .query_opt("SELECT 1 FROM product WHERE id = $1", &[&product.product_id])
            .await?;
        if exists.is_none() {
            return Err(Error::not_found(format!(
                "product {} not found",
                product.product_id
            )));
        }
        tx.execute(
            "INSERT INTO preorder_campaign_product (campaign_id, product_id, supply_quantity)
             VALUES ($1, $2, $3)",
            &[&campaign.id, &product.product_id, &product.supply_quantity],
        )
        .await?;
    }

    tx.commit().await?;
    Ok(campaign)
}

/// Make one campaign the active one.
///
/// At most one campaign is active by convention; both updates run in one
/// transaction so no moment observes two active campaigns.
pub async fn activate_campaign(client: &mut Client, campaign_id: i64) -> Result<()> {
    let tx = client.transaction().await?;
    tx.execute(
        "UPDATE preorder_campaign SET active = FALSE WHERE active",
        &[],
    )
    .await?;
    let affected = tx
        .execute(
            "UPDATE preorder_campaign SET active = TRUE WHERE id = $1",
            &[&campaign_id],
        )
        .await?;
    if affected == 0 {
        return Err(Error::not_found(format!("campaign {campaign_id} not found")));
    }
    tx.commit().await?;

    tracing::info!(campaign_id, "campaign activated");
    Ok(())
}

/// The active campaign with its products, if any.
pub async fn active_campaign<C: GenericClient>(
    client: &C,
) -> Result<Option<(Campaign, Vec<CampaignProduct>)>> {
    let row = client
        .query_opt(
            "SELECT id, name, description, active, starts_at, ends_at
             FROM preorder_campaign
             WHERE active
             ORDER BY id DESC LIMIT 1",
            &[],
        )
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let campaign = Campaign::from_row(&row);

    let product_rows = client
        .query(
            "SELECT id, campaign_id, product_id, supply_quantity, reserved_quantity
             FROM preorder_campaign_product
             WHERE campaign_id = $1
             ORDER BY id",
            &[&campaign.id],
        )
        .await?;
    let products = product_rows.iter().map(CampaignProduct::from_row).collect();

    Ok(Some((campaign, products)))
}

/// Reserve `quantity` units of a campaign product, atomically.
///
/// The quantity check and the increment are one statement; zero rows
/// affected means the quota is exceeded and the whole order must abort.
/// Returns the remaining quantity after this reservation.
pub(crate) async fn reserve(
    tx: &Transaction<'_>,
    campaign_id: i64,
    product_id: i64,
    quantity: i64,
) -> Result<i64> {
    let row = tx
        .query_opt(
            "UPDATE preorder_campaign_product
             SET reserved_quantity = reserved_quantity + $3
             WHERE campaign_id = $1 AND product_id = $2
               AND reserved_quantity + $3 <= supply_quantity
             RETURNING supply_quantity - reserved_quantity",
            &[&campaign_id, &product_id, &quantity],
        )
        .await?;
    match row {
        Some(row) => Ok(row.get(0)),
        None => Err(Error::conflict("preorder quantity is sold out")),
    }
}

/// Take a preorder: reserve quota, then create the order and the preorder
/// record, all in one transaction.
pub async fn create_preorder_order(
    client: &mut Client,
    req: &PreorderRequest,
) -> Result<PreorderReceipt> {
    if req.quantity <= 0 {
        return Err(Error::validation("preorder quantity must be positive"));
    }
    if req.customer_name.trim().is_empty() {
        return Err(Error::validation("customer name is required"));
    }
    if req.customer_phone.trim().is_empty() {
        return Err(Error::validation("customer phone is required"));
    }

    let now = Utc::now();
    let user_id = req.user_id.unwrap_or(users::NON_MEMBER_USER_ID);
    if users::is_member(user_id) && !users::user_exists(client, user_id).await? {
        return Err(Error::not_found(format!("user {user_id} not found")));
    }

    let tx = client.transaction().await?;

    let campaign = tx
        .query_opt(
            "SELECT id, name, description, active, starts_at, ends_at
             FROM preorder_campaign
             WHERE id = $1",
            &[&req.campaign_id],
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("campaign {} not found", req.campaign_id)))?;
    let campaign = Campaign::from_row(&campaign);
    if !campaign.active {
        return Err(Error::validation("campaign is not open"));
    }
    if now < campaign.starts_at {
        return Err(Error::validation("campaign has not started yet"));
    }
    if now > campaign.ends_at {
        return Err(Error::validation("campaign has ended"));
    }

    let in_campaign = tx
        .query_opt(
            "SELECT 1 FROM preorder_campaign_product
             WHERE campaign_id = $1 AND product_id = $2",
            &[&req.campaign_id, &req.product_id],
        )
        .await?;
    if in_campaign.is_none() {
        return Err(Error::not_found(format!(
            "product {} is not part of campaign {}",
            req.product_id, req.campaign_id
        )));
    }

    let product = tx
        .query_opt(
            "SELECT name, unit_price, active FROM product WHERE id = $1",
            &[&req.product_id],
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("product {} not found", req.product_id)))?;
    let active: bool = product.get("active");
    if !active {
        return Err(Error::validation(format!("product {} is not for sale", req.product_id)));
    }
    let unit_price: i64 = product.get("unit_price");
    let name: String = product.get("name");

    // The guarded increment; losing the quota race aborts everything below.
    let remaining = reserve(&tx, req.campaign_id, req.product_id, req.quantity).await?;

    let subtotal = unit_price * req.quantity;
    // Preorders await external payment confirmation.
    let order =
        orders::insert_order(&tx, user_id, subtotal, 0, 0, OrderStatus::Created, now).await?;
    orders::insert_item(
        &tx,
        order.id,
        &PendingItem {
            product_id: req.product_id,
            name,
            quantity: req.quantity,
            unit_price,
            line_total: subtotal,
        },
    )
    .await?;

    tx.execute(
        "INSERT INTO preorder_order
             (campaign_id, product_id, quantity, order_id, customer_name, customer_phone)
         VALUES ($1, $2, $3, $4, $5, $6)",
        &[
            &req.campaign_id,
            &req.product_id,
            &req.quantity,
            &order.id,
            &req.customer_name,
            &req.customer_phone,
        ],
    )
    .await?;

    tx.commit().await?;

    tracing::info!(
        order_number = %order.order_number,
        campaign_id = req.campaign_id,
        product_id = req.product_id,
        quantity = req.quantity,
        remaining,
        "preorder taken"
    );

    Ok(PreorderReceipt {
        order_number: order.order_number,
        remaining_quantity: remaining,
        total_amount: order.total,
    })
}

/// Cancel a preorder: the linked order moves to `cancelled` and the reserved
/// quantity flows back into the quota.
pub async fn cancel_preorder(client: &mut Client, preorder_order_id: i64) -> Result<()> {
    let row = client
        .query_opt(
            "SELECT order_id FROM preorder_order WHERE id = $1",
            &[&preorder_order_id],
        )
        .await?
        .ok_or_else(|| Error::not_found(format!("preorder {preorder_order_id} not found")))?;
    let order_id: i64 = row.get(0);

    orders::update_status(client, order_id, OrderStatus::Cancelled).await?;
    Ok(())
}

/// Give an order's reservation back to the campaign quota, if it has one.
/// Runs inside the cancellation transaction.
pub(crate) async fn release_for_order(tx: &Transaction<'_>, order_id: i64) -> Result<()> {
    let row = tx
        .query_opt(
            "SELECT campaign_id, product_id, quantity FROM preorder_order WHERE order_id = $1",
            &[&order_id],
        )
        .await?;
    let Some(row) = row else {
        return Ok(());
    };
    let campaign_id: i64 = row.get("campaign_id");
    let product_id: i64 = row.get("product_id");
    let quantity: i64 = row.get("quantity");

    let affected = tx
        .execute(
            "UPDATE preorder_campaign_product
             SET reserved_quantity = reserved_quantity - $3
             WHERE campaign_id = $1 AND product_id = $2
               AND reserved_quantity - $3 >= 0",
            &[&campaign_id, &product_id, &quantity],
        )
        .await?;
    if affected == 0 {
        return Err(Error::internal(format!(
            "reservation bookkeeping out of sync for campaign {campaign_id} product {product_id}"
        )));
    }

    tracing::info!(order_id, campaign_id, product_id, quantity, "reservation released");
    Ok(())
}
