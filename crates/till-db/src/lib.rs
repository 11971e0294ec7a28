//! Schema migrations and storage plumbing for the till POS.
//!
//! # Naming convention
//!
//! Table names use singular form (`product`, `coupon`, `order_item`): each
//! table defines what a single record is. The order table collides with a
//! reserved word and is written `"order"` (quoted) everywhere.
//!
//! # Migrations
//!
//! A migration is an ordered list of SQL statements registered with
//! [`inventory::submit!`] and applied by [`MigrationRunner`], one
//! transaction per migration, tracked in `_till_migrations`:
//!
//! ```ignore
//! let mut runner = MigrationRunner::new(&mut client);
//! runner.migrate().await?;
//! ```

mod error;
mod migrate;
pub mod migrations;

pub use error::Error;
pub use migrate::{Migration, MigrationRunner, MigrationStatus};

/// Result type for till-db operations.
pub type Result<T> = std::result::Result<T, Error>;

inventory::collect!(Migration);
