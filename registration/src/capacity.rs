//! Admission control against an event's capacity limit.
//!
//! The pure check lives here; the **atomic** admission path is
//! [`crate::stores::RegistrationStore::admit`], which runs this check and the
//! row upsert inside one critical section (a mutex for the in-memory store, a
//! row lock on the event for Postgres). Counting and inserting in two
//! separate round trips would admit over the limit under concurrency, so no
//! call site outside `admit` may pair [`ensure_capacity`] with a write.

use crate::error::{Error, Result};
use crate::types::{Capacity, RegistrationStatus};

/// Whether a registration in `status` occupies a capacity slot.
///
/// Rejected and cancelled rows never count, so a rejected guest's slot is
/// immediately reusable.
#[must_use]
pub const fn counts_against_capacity(status: RegistrationStatus) -> bool {
    status.is_active()
}

/// Check `active_count` existing registrations against the event's capacity.
///
/// `active_count` must already exclude the caller's own prior row, so a
/// re-submission by the same guest does not self-block.
///
/// # Errors
///
/// Returns [`Error::SoldOut`] when a limited event is full.
pub const fn ensure_capacity(capacity: Capacity, active_count: u32) -> Result<()> {
    match capacity {
        Capacity::Unlimited => Ok(()),
        Capacity::Limited { limit } => {
            if active_count < limit {
                Ok(())
            } else {
                Err(Error::SoldOut)
            }
        }
    }
}
