//! Pure domain rules for the till POS.
//!
//! Everything in this crate is IO-free and deterministic (apart from the
//! random order-number suffix): timezone normalization, coupon eligibility,
//! discount math and points conversions. The storage-backed services in
//! `till-service` call into these functions with freshly read rows, so the
//! same rule is applied identically at listing time and at commit time.

pub mod discount;
pub mod eligibility;
pub mod orderno;
pub mod points;
pub mod time;
