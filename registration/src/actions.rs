//! Actions processed by the lifecycle reducer.
//!
//! The imperative shell performs its async work first (store reads, OTP
//! checks, gateway calls) and then dispatches one of these to apply the
//! resulting transition. The reducer is the only code that writes
//! registration or payment status.

use crate::lifecycle::GatewayPaymentStatus;
use crate::types::{Event, PaymentId, Registration, RegistrationId};
use chrono::{DateTime, Utc};

/// Inputs to the lifecycle reducer.
#[derive(Clone, Debug)]
pub enum LifecycleAction {
    /// A registration row was admitted and upserted.
    RegistrationSubmitted {
        /// The stored row
        registration: Registration,
    },

    /// A verification code was issued for a registration; triggers the code
    /// email.
    OtpIssued {
        /// Registration the code belongs to
        registration_id: RegistrationId,
        /// Owning event, for email copy
        event: Event,
        /// The 6-digit code
        code: String,
    },

    /// The registrant proved control of their email; apply the
    /// post-verification transition table.
    EmailVerified {
        /// Verified registration
        registration_id: RegistrationId,
        /// Owning event
        event: Event,
        /// Verification instant
        at: DateTime<Utc>,
    },

    /// Fold a gateway-reported payment status into the local rows. Shared by
    /// the polling confirmation path and the webhook path.
    ApplyGatewayStatus {
        /// Payment row to reconcile
        payment_id: PaymentId,
        /// Owning event
        event: Event,
        /// What the gateway said
        status: GatewayPaymentStatus,
        /// Gateway payment id, when the report carries one
        gateway_payment_id: Option<String>,
        /// Reconciliation instant
        at: DateTime<Utc>,
    },

    /// Fold a refund result into the local rows.
    RefundApplied {
        /// Refunded payment row
        payment_id: PaymentId,
        /// Gateway refund id
        refund_id: String,
        /// Whether the gateway reported immediate success
        succeeded: bool,
        /// Refund instant
        at: DateTime<Utc>,
    },

    /// Host approves a pending registration.
    Approved {
        /// Registration to approve
        registration_id: RegistrationId,
        /// Owning event
        event: Event,
        /// Approval instant
        at: DateTime<Utc>,
    },

    /// Host rejects a registration. Any required refund is applied via
    /// [`LifecycleAction::RefundApplied`] before this is dispatched.
    Rejected {
        /// Registration to reject
        registration_id: RegistrationId,
        /// Rejection instant
        at: DateTime<Utc>,
    },

    /// Guest or host cancels a registration.
    Cancelled {
        /// Registration to cancel
        registration_id: RegistrationId,
        /// Cancellation instant
        at: DateTime<Utc>,
    },
}
