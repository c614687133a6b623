//! # Guestflow Testing
//!
//! Ergonomic testing utilities for Guestflow reducers: a fluent
//! Given-When-Then fixture plus assertion helpers for effects.


pub use reducer_test::{ReducerTest, assertions};

use chrono::{TimeZone, Utc};
use guestflow_core::environment::FixedClock;
use std::sync::Arc;

/// A deterministic clock pinned at a well-known instant.
///
/// Every test in the workspace that needs "now" uses this so timestamps in
/// assertions are stable.
///
/// # Panics
///
/// Never panics; the pinned instant is a valid calendar date.
#[must_use]
#[allow(clippy::unwrap_used)] // the pinned instant is statically valid
pub fn test_clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
    ))
}
