//! HTTP handlers and API view types.

pub mod checkins;
pub mod payments;
pub mod registrations;
pub mod tickets;
pub mod webhooks;

use chrono::{DateTime, Utc};
use guestflow_registration::types::{
    Payment, PaymentState, Registration, RegistrationPaymentStatus, RegistrationStatus,
};
use serde::Serialize;
use uuid::Uuid;

/// API shape of a registration row.
#[derive(Clone, Debug, Serialize)]
pub struct RegistrationView {
    /// Registration id
    pub id: Uuid,
    /// Owning event id
    pub event_id: Uuid,
    /// Normalized contact email
    pub email: String,
    /// Attendee name
    pub name: String,
    /// Lifecycle status
    pub status: RegistrationStatus,
    /// Whether the email was verified
    pub email_verified: bool,
    /// Payment state on the registration
    pub payment_status: RegistrationPaymentStatus,
    /// Whether the attendee was checked in
    pub checked_in: bool,
    /// When the attendee was checked in
    pub checked_in_at: Option<DateTime<Utc>>,
}

impl From<Registration> for RegistrationView {
    fn from(registration: Registration) -> Self {
        Self {
            id: *registration.id.as_uuid(),
            event_id: *registration.event_id.as_uuid(),
            email: registration.email.to_string(),
            name: registration.name,
            status: registration.status,
            email_verified: registration.email_verified,
            payment_status: registration.payment_status,
            checked_in: registration.checked_in,
            checked_in_at: registration.checked_in_at,
        }
    }
}

/// API shape of a payment row.
#[derive(Clone, Debug, Serialize)]
pub struct PaymentView {
    /// Payment id
    pub id: Uuid,
    /// Owning registration id
    pub registration_id: Uuid,
    /// Charged amount in minor units
    pub amount_cents: u64,
    /// ISO currency code
    pub currency: String,
    /// Itemized fee breakdown in minor units
    pub breakdown: BreakdownView,
    /// Attempt status
    pub status: PaymentState,
    /// Gateway refund id, once refunded
    pub refund_id: Option<String>,
}

/// Fee breakdown in minor units.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct BreakdownView {
    /// Ticket face value
    pub ticket_cents: u64,
    /// Platform fee
    pub platform_fee_cents: u64,
    /// Processing fee
    pub processing_fee_cents: u64,
    /// Total charged
    pub total_cents: u64,
}

impl From<Payment> for PaymentView {
    fn from(payment: Payment) -> Self {
        Self {
            id: *payment.id.as_uuid(),
            registration_id: *payment.registration_id.as_uuid(),
            amount_cents: payment.amount.cents(),
            currency: payment.currency,
            breakdown: BreakdownView {
                ticket_cents: payment.breakdown.ticket.cents(),
                platform_fee_cents: payment.breakdown.platform_fee.cents(),
                processing_fee_cents: payment.breakdown.processing_fee.cents(),
                total_cents: payment.breakdown.total.cents(),
            },
            status: payment.state,
            refund_id: payment.refund_id,
        }
    }
}
