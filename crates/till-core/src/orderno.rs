//! Order number generation.
//!
//! Local-time `YYYYMMDDHHMMSS` plus a four-digit random suffix. Practically
//! unique at this system's volume; the schema deliberately does not enforce
//! global uniqueness.

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::time::local_offset;

pub fn generate(now: DateTime<Utc>) -> String {
    let stamp = now.with_timezone(&local_offset()).format("%Y%m%d%H%M%S");
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("{stamp}{suffix:04}")
}
