//! Use-case services over the repository contracts.
//!
//! # Responsibility
//! - Orchestrate the pure domain engine with storage round-trips.
//! - Map layered errors into caller-facing service errors.
//!
//! # Invariants
//! - Services never write observation state directly; every mutation goes
//!   through the model's state machine and the repository write path.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod observation_service;
pub mod view_service;

/// Wall-clock epoch milliseconds for revision/audit timestamps.
pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
