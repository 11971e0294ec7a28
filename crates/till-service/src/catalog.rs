//! Product catalog.
//!
//! Orders reference products through name/price snapshots taken at order
//! time, so edits here never rewrite historical orders.

use chrono::{DateTime, Utc};
use tokio_postgres::{GenericClient, Row};

use crate::error::{is_unique_violation, Error, Result};

const PRODUCT_COLUMNS: &str = "id, sku, name, unit_price, active, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    /// Unit price in TWD.
    pub unit_price: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Product {
    fn from_row(row: &Row) -> Self {
        Self {
            id: row.get("id"),
            sku: row.get("sku"),
            name: row.get("name"),
            unit_price: row.get("unit_price"),
            active: row.get("active"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub unit_price: i64,
    pub active: bool,
}

/// Fields of an existing product to change; `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub unit_price: Option<i64>,
    pub active: Option<bool>,
}

pub async fn create_product<C: GenericClient>(client: &C, new: &NewProduct) -> Result<Product> {
    if new.sku.trim().is_empty() {
        return Err(Error::validation("product sku must not be empty"));
    }
    if new.unit_price < 0 {
        return Err(Error::validation("product unit price must not be negative"));
    }
    let row = client
        .query_one(
            &format!(
                "INSERT INTO product (sku, name, unit_price, active)
                 VALUES ($1, $2, $3, $4)
                 RETURNING {PRODUCT_COLUMNS}"
            ),
            &[&new.sku, &new.name, &new.unit_price, &new.active],
        )
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::conflict(format!("a product with sku {} already exists", new.sku))
            } else {
                e.into()
            }
        })?;
    Ok(Product::from_row(&row))
}

pub async fn update_product<C: GenericClient>(
    client: &C,
    id: i64,
    changes: &ProductChanges,
) -> Result<Product> {
    let row = client
        .query_opt(
            &format!(
                "UPDATE product
                 SET name = COALESCE($2, name),
                     unit_price = COALESCE($3, unit_price),
                     active = COALESCE($4, active),
                     updated_at = NOW()
                 WHERE id = $1
                 RETURNING {PRODUCT_COLUMNS}"
            ),
            &[&id, &changes.name, &changes.unit_price, &changes.active],
        )
        .await?;
    row.as_ref()
        .map(Product::from_row)
        .ok_or_else(|| Error::not_found(format!("product {id} not found")))
}

pub async fn product_by_id<C: GenericClient>(client: &C, id: i64) -> Result<Option<Product>> {
    let row = client
        .query_opt(
            &format!("SELECT {PRODUCT_COLUMNS} FROM product WHERE id = $1"),
            &[&id],
        )
        .await?;
    Ok(row.as_ref().map(Product::from_row))
}

pub async fn list_products<C: GenericClient>(client: &C, active_only: bool) -> Result<Vec<Product>> {
    let rows = client
        .query(
            &format!(
                "SELECT {PRODUCT_COLUMNS} FROM product
                 WHERE active OR NOT $1
                 ORDER BY id"
            ),
            &[&active_only],
        )
        .await?;
    Ok(rows.iter().map(Product::from_row).collect())
}
