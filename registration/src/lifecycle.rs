//! The registration state machine, as pure functions.
//!
//! Every status decision in the engine funnels through this module: the
//! post-verification transition table, the payment reconciliation fold, and
//! the host-action guards. Call sites (the reducer and the services) never
//! compare statuses ad hoc.
//!
//! States: `pending → approved → registered` (or `pending → registered`
//! directly when no approval is required), with `rejected` and `cancelled`
//! reachable from any non-terminal state.

use crate::error::{Error, Result};
use crate::types::{Event, PaymentState, Registration, RegistrationStatus};
use serde::{Deserialize, Serialize};

/// Gateway-reported status of a payment or checkout session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    /// Funds captured
    Succeeded,
    /// Attempt failed; the guest may retry
    Failed,
    /// Still in flight; pass-through
    Processing,
}

/// Target status after a successful email verification.
///
/// | paid | payment done | approval required | target |
/// |------|--------------|-------------------|--------|
/// | no   | –            | no                | registered |
/// | no   | –            | yes               | pending (stays approved) |
/// | yes  | no           | any               | pending (held for payment) |
/// | yes  | yes          | no                | registered |
/// | yes  | yes          | yes               | pending (stays approved) |
///
/// Host approval is never regressed: an `approved` registration stays
/// `approved` whatever the other inputs say.
#[must_use]
pub const fn verification_target(
    paid: bool,
    payment_completed: bool,
    approval_required: bool,
    current: RegistrationStatus,
) -> RegistrationStatus {
    if matches!(current, RegistrationStatus::Approved) {
        return RegistrationStatus::Approved;
    }
    if paid && !payment_completed {
        return RegistrationStatus::Pending;
    }
    if approval_required {
        RegistrationStatus::Pending
    } else {
        RegistrationStatus::Registered
    }
}

/// Registration status after a payment settles.
///
/// Never regresses `approved` or `registered`; never resurrects a rejected
/// or cancelled row (the refund path handles those).
#[must_use]
pub const fn registration_after_payment(
    current: RegistrationStatus,
    approval_required: bool,
) -> RegistrationStatus {
    match current {
        RegistrationStatus::Pending => {
            if approval_required {
                RegistrationStatus::Pending
            } else {
                RegistrationStatus::Registered
            }
        }
        RegistrationStatus::Approved
        | RegistrationStatus::Registered
        | RegistrationStatus::Rejected
        | RegistrationStatus::Cancelled => current,
    }
}

/// Result of folding one gateway status into a payment row.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PaymentReconciliation {
    /// The payment row's next state
    pub next: PaymentState,
    /// `true` exactly when this fold moved the payment into `completed`.
    /// Replays and duplicate webhooks see `false`.
    pub newly_completed: bool,
}

/// The shared reconciliation fold: `(current, gateway status) → next`.
///
/// Both the polling confirmation path and the webhook path call this one
/// function, so applying the same terminal gateway state twice is a no-op
/// rather than an unconditional flip. A `succeeded` replay after a refund
/// does not resurrect the payment.
#[must_use]
pub const fn reconcile(
    current: PaymentState,
    gateway: GatewayPaymentStatus,
) -> PaymentReconciliation {
    match (current, gateway) {
        (PaymentState::Pending | PaymentState::Failed, GatewayPaymentStatus::Succeeded) => {
            PaymentReconciliation {
                next: PaymentState::Completed,
                newly_completed: true,
            }
        }
        (PaymentState::Pending, GatewayPaymentStatus::Failed) => PaymentReconciliation {
            next: PaymentState::Failed,
            newly_completed: false,
        },
        // Idempotent re-applications and pass-throughs
        (current, _) => PaymentReconciliation {
            next: current,
            newly_completed: false,
        },
    }
}

/// Outcome of a host approval request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Already approved; report success without touching the row
    AlreadyApproved,
    /// Proceed with `pending → approved`
    Approve,
}

/// Guard for `pending → approved`.
///
/// # Errors
///
/// Returns [`Error::Conflict`] when the email is unverified, a paid event's
/// payment is outstanding, or the registration is not currently pending.
pub fn can_approve(registration: &Registration, event: &Event) -> Result<ApprovalDecision> {
    if registration.status == RegistrationStatus::Approved {
        return Ok(ApprovalDecision::AlreadyApproved);
    }
    if !registration.email_verified {
        return Err(Error::conflict("email is not verified"));
    }
    if event.is_paid() && !registration.payment_completed() {
        return Err(Error::conflict("payment has not completed"));
    }
    if registration.status != RegistrationStatus::Pending {
        return Err(Error::conflict(format!(
            "cannot approve a {} registration",
            registration.status.as_str()
        )));
    }
    Ok(ApprovalDecision::Approve)
}

/// Outcome of a host rejection request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionDecision {
    /// Already rejected; report success without touching the row
    AlreadyRejected,
    /// Proceed with the rejection
    Reject {
        /// A completed payment exists and must be refunded first
        refund_required: bool,
    },
}

/// Guard for `{pending, approved} → rejected`.
///
/// # Errors
///
/// Returns [`Error::Conflict`] for registered or cancelled rows.
pub fn can_reject(registration: &Registration) -> Result<RejectionDecision> {
    match registration.status {
        RegistrationStatus::Rejected => Ok(RejectionDecision::AlreadyRejected),
        RegistrationStatus::Pending | RegistrationStatus::Approved => {
            Ok(RejectionDecision::Reject {
                refund_required: registration.payment_completed(),
            })
        }
        RegistrationStatus::Registered | RegistrationStatus::Cancelled => Err(Error::conflict(
            format!(
                "cannot reject a {} registration",
                registration.status.as_str()
            ),
        )),
    }
}

/// Outcome of a cancellation request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancellationDecision {
    /// Already cancelled; report success without touching the row
    AlreadyCancelled,
    /// Proceed with the cancellation
    Cancel,
}

/// Guard for `{pending, approved} → cancelled`.
///
/// # Errors
///
/// Returns [`Error::Conflict`] for registered or rejected rows.
pub fn can_cancel(registration: &Registration) -> Result<CancellationDecision> {
    match registration.status {
        RegistrationStatus::Cancelled => Ok(CancellationDecision::AlreadyCancelled),
        RegistrationStatus::Pending | RegistrationStatus::Approved => {
            Ok(CancellationDecision::Cancel)
        }
        RegistrationStatus::Registered | RegistrationStatus::Rejected => Err(Error::conflict(
            format!(
                "cannot cancel a {} registration",
                registration.status.as_str()
            ),
        )),
    }
}
