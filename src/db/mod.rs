//! Database module for pingwatch.
//!
//! SQLite storage for raw samples, hourly aggregates and derived outage queries.

mod models;
mod outages;
mod store;

pub use models::*;
pub use outages::*;
pub use store::*;
