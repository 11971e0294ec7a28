//! Order, coupon, points and preorder services for the till POS.
//!
//! Every service talks straight to Postgres through `tokio_postgres` with
//! parameterized SQL. Read paths accept anything implementing
//! [`tokio_postgres::GenericClient`] so they run equally inside or outside a
//! transaction; write paths take `&mut Client` and wrap all of their
//! statements in a single transaction, so a failure at any step leaves no
//! partial rows behind.
//!
//! The two concurrency-sensitive spots — preorder quota and the points
//! balance — are guarded with atomic conditional updates
//! (`UPDATE ... WHERE <guard>`), never read-then-write, because the system
//! may run as multiple stateless instances and in-process locks would not
//! hold.

pub mod catalog;
pub mod coupons;
mod error;
pub mod orders;
pub mod points;
pub mod preorder;
pub mod users;

pub use error::{Error, ErrorKind, Result};
