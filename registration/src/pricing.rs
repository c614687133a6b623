//! Fee breakdown calculation for paid registrations.
//!
//! All arithmetic is integer cents. Percentage components are expressed in
//! basis points and rounded half-up per component, matching what the gateway
//! is ultimately charged in minor units.

use crate::error::{Error, Result};
use crate::types::{FeeBreakdown, Money};

/// Percentage-of-ticket (+ fixed) fee rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Platform fee on the ticket price, in basis points.
    ///
    /// Default: 500 (5%)
    pub platform_fee_bps: u32,

    /// Percentage part of the processing fee, in basis points.
    ///
    /// Default: 200 (2%)
    pub processing_fee_bps: u32,

    /// Fixed part of the processing fee.
    ///
    /// Default: 30 cents
    pub processing_fee_fixed: Money,
}

impl FeeSchedule {
    /// Compute the itemized breakdown for a ticket price.
    ///
    /// Each component is rounded half-up to whole cents before summing, so
    /// the total equals the sum of the displayed parts exactly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for a zero ticket price; free events
    /// never reach the payment coordinator.
    pub fn breakdown(&self, ticket: Money) -> Result<FeeBreakdown> {
        if ticket.is_zero() {
            return Err(Error::validation("ticket price must be positive"));
        }

        let platform_fee = ticket.percentage_half_up(self.platform_fee_bps);
        let processing_fee = self
            .processing_fee_fixed
            .saturating_add(ticket.percentage_half_up(self.processing_fee_bps));
        let total = ticket
            .saturating_add(platform_fee)
            .saturating_add(processing_fee);

        Ok(FeeBreakdown {
            ticket,
            platform_fee,
            processing_fee,
            total,
        })
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            platform_fee_bps: 500,
            processing_fee_bps: 200,
            processing_fee_fixed: Money::from_cents(30),
        }
    }
}
