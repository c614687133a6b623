//! The lifecycle reducer: the only writer of registration and payment
//! status.
//!
//! Services do their async work (store reads, OTP checks, gateway calls)
//! first and then dispatch a [`LifecycleAction`]; this reducer applies the
//! transition through the pure functions in [`crate::lifecycle`] and returns
//! email effects for the shell to execute. Guard violations are recorded on
//! the state, never panicked on.

use crate::actions::LifecycleAction;
use crate::emails;
use crate::lifecycle::{self, ApprovalDecision, CancellationDecision, RejectionDecision};
use crate::providers::{EmailAttachment, EmailMessage, EmailSender, TicketRenderer};
use crate::state::LifecycleState;
use crate::ticket::{TicketDocument, TicketIssuer, is_ticket_eligible};
use crate::types::{Event, PaymentState, Registration, RegistrationPaymentStatus};
use guestflow_core::environment::Clock;
use guestflow_core::{SmallVec, effect::Effect, reducer::Reducer, smallvec};
use std::sync::Arc;

/// Dependencies the lifecycle reducer needs.
#[derive(Clone)]
pub struct LifecycleEnvironment {
    /// Clock for transition timestamps inside effects
    pub clock: Arc<dyn Clock>,
    /// Email delivery; failures are logged and swallowed
    pub email: Arc<dyn EmailSender>,
    /// Ticket document renderer for email attachments
    pub renderer: Arc<dyn TicketRenderer>,
    /// QR payload issuer
    pub issuer: TicketIssuer,
}

impl LifecycleEnvironment {
    /// Create an environment.
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        email: Arc<dyn EmailSender>,
        renderer: Arc<dyn TicketRenderer>,
        issuer: TicketIssuer,
    ) -> Self {
        Self {
            clock,
            email,
            renderer,
            issuer,
        }
    }
}

/// Reducer for the registration lifecycle and payment reconciliation.
#[derive(Clone, Copy, Debug, Default)]
pub struct LifecycleReducer;

impl LifecycleReducer {
    /// Creates a new `LifecycleReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Email effect that logs and swallows delivery failures: an email must
    /// never roll back a state change that already happened.
    fn email_effect(
        sender: Arc<dyn EmailSender>,
        to: String,
        content: emails::EmailContent,
        attachments: Vec<EmailAttachment>,
    ) -> Effect<LifecycleAction> {
        Effect::future(async move {
            let subject = content.subject.clone();
            let result = sender
                .send(EmailMessage {
                    to,
                    subject: content.subject,
                    html: content.html,
                    attachments,
                })
                .await;
            if let Err(error) = result {
                tracing::warn!(%error, subject, "email send failed; continuing");
            }
            None
        })
    }

    /// Render the printable ticket for an eligible registration. Rendering
    /// failures only cost the attachment.
    fn ticket_attachment(
        env: &LifecycleEnvironment,
        event: &Event,
        registration: &Registration,
    ) -> Option<EmailAttachment> {
        if !is_ticket_eligible(registration) || event.venue.is_none() {
            return None;
        }
        let qr_code = registration.qr_code.clone()?;

        let document = TicketDocument {
            event_title: event.title.clone(),
            venue: event.venue.clone(),
            starts_at: event.starts_at,
            attendee_name: registration.name.clone(),
            attendee_email: registration.email.to_string(),
            qr_code,
        };
        match env.renderer.render_document(&document) {
            Ok(bytes) => Some(EmailAttachment {
                filename: "ticket.html".to_string(),
                content_type: "text/html".to_string(),
                bytes,
            }),
            Err(error) => {
                tracing::warn!(%error, "ticket render failed; sending without attachment");
                None
            }
        }
    }

    /// Refresh the stored QR payload after a status change.
    fn refresh_qr(env: &LifecycleEnvironment, registration: &mut Registration) {
        match env.issuer.ensure_qr_code(registration) {
            Ok((code, _)) => registration.qr_code = Some(code),
            Err(error) => {
                tracing::warn!(%error, registration_id = %registration.id, "QR refresh failed");
            }
        }
    }

    /// Status email for the registration's current state, with ticket
    /// attached when eligible.
    fn status_email(
        env: &LifecycleEnvironment,
        event: &Event,
        registration: &Registration,
    ) -> Effect<LifecycleAction> {
        let attachments = Self::ticket_attachment(env, event, registration)
            .into_iter()
            .collect();
        Self::email_effect(
            Arc::clone(&env.email),
            registration.email.to_string(),
            emails::registration_status(event, registration),
            attachments,
        )
    }
}

impl Reducer for LifecycleReducer {
    type State = LifecycleState;
    type Action = LifecycleAction;
    type Environment = LifecycleEnvironment;

    #[allow(clippy::too_many_lines)] // one arm per lifecycle transition
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]> {
        match action {
            // ========== Admission ==========
            LifecycleAction::RegistrationSubmitted { registration } => {
                state.insert_registration(registration);
                smallvec![Effect::None]
            }

            // ========== OTP email ==========
            LifecycleAction::OtpIssued {
                registration_id,
                event,
                code,
            } => {
                let Some(registration) = state.registration_or_flag(&registration_id) else {
                    return smallvec![Effect::None];
                };
                smallvec![Self::email_effect(
                    Arc::clone(&env.email),
                    registration.email.to_string(),
                    emails::verification_code(&event, &code),
                    Vec::new(),
                )]
            }

            // ========== Email verified: transition table ==========
            LifecycleAction::EmailVerified {
                registration_id,
                event,
                at,
            } => {
                let Some(registration) = state.registration_mut_or_flag(&registration_id)
                else {
                    return smallvec![Effect::None];
                };

                registration.email_verified = true;
                registration.email_verified_at = Some(at);
                registration.status = lifecycle::verification_target(
                    event.is_paid(),
                    registration.payment_completed(),
                    event.require_approval,
                    registration.status,
                );
                registration.updated_at = at;
                Self::refresh_qr(env, registration);

                // Payment still outstanding: hold the confirmation email
                // until the gateway settles.
                if event.is_paid() && !registration.payment_completed() {
                    return smallvec![Effect::None];
                }

                let registration = registration.clone();
                smallvec![Self::status_email(env, &event, &registration)]
            }

            // ========== Shared payment reconciliation ==========
            LifecycleAction::ApplyGatewayStatus {
                payment_id,
                event,
                status,
                gateway_payment_id,
                at,
            } => {
                let Some(payment) = state.payment_mut_or_flag(&payment_id) else {
                    return smallvec![Effect::None];
                };

                // Pass-throughs still capture the latest gateway payment id.
                if let Some(id) = gateway_payment_id {
                    payment.gateway_payment_id = Some(id);
                }

                let reconciliation = lifecycle::reconcile(payment.state, status);
                payment.state = reconciliation.next;
                payment.updated_at = at;

                if !reconciliation.newly_completed {
                    // `failed` marks only the payment so the guest can retry
                    // checkout; replays of `succeeded` are observable as
                    // "still completed" with no further effects.
                    return smallvec![Effect::None];
                }

                let emit_receipt = payment.receipt_sent_at.is_none();
                if emit_receipt {
                    payment.receipt_sent_at = Some(at);
                }
                let payment = payment.clone();

                let Some(registration) =
                    state.registration_mut_or_flag(&payment.registration_id)
                else {
                    return smallvec![Effect::None];
                };

                registration.payment_status = RegistrationPaymentStatus::Completed;
                registration.status = lifecycle::registration_after_payment(
                    registration.status,
                    event.require_approval,
                );
                registration.updated_at = at;
                Self::refresh_qr(env, registration);
                let registration = registration.clone();

                let mut effects: SmallVec<[Effect<Self::Action>; 4]> = SmallVec::new();
                if emit_receipt {
                    effects.push(Self::email_effect(
                        Arc::clone(&env.email),
                        registration.email.to_string(),
                        emails::payment_receipt(&event, &payment),
                        Vec::new(),
                    ));
                }
                // Verification and approval already satisfied: send the
                // confirmation/ticket email now that payment settled.
                if registration.email_verified
                    && matches!(
                        registration.status,
                        crate::types::RegistrationStatus::Registered
                            | crate::types::RegistrationStatus::Approved
                    )
                {
                    effects.push(Self::status_email(env, &event, &registration));
                }
                if effects.is_empty() {
                    effects.push(Effect::None);
                }
                effects
            }

            // ========== Refund ==========
            LifecycleAction::RefundApplied {
                payment_id,
                refund_id,
                succeeded,
                at,
            } => {
                let Some(payment) = state.payment_mut_or_flag(&payment_id) else {
                    return smallvec![Effect::None];
                };

                payment.refund_id = Some(refund_id);
                payment.updated_at = at;
                if !succeeded {
                    // Pending or failed refunds leave payment status
                    // unchanged so hosts can retry.
                    return smallvec![Effect::None];
                }

                payment.state = PaymentState::Refunded;
                let registration_id = payment.registration_id;

                if let Some(registration) = state.registration_mut(&registration_id) {
                    registration.payment_status = RegistrationPaymentStatus::Refunded;
                    registration.updated_at = at;
                }
                smallvec![Effect::None]
            }

            // ========== Host approval ==========
            LifecycleAction::Approved {
                registration_id,
                event,
                at,
            } => {
                let Some(registration) = state.registration_or_flag(&registration_id) else {
                    return smallvec![Effect::None];
                };

                match lifecycle::can_approve(registration, &event) {
                    Err(error) => {
                        state.record_error(error);
                        smallvec![Effect::None]
                    }
                    Ok(ApprovalDecision::AlreadyApproved) => smallvec![Effect::None],
                    Ok(ApprovalDecision::Approve) => {
                        // Guard passed, so the row is present and pending.
                        let Some(registration) = state.registration_mut(&registration_id)
                        else {
                            return smallvec![Effect::None];
                        };
                        registration.status = crate::types::RegistrationStatus::Approved;
                        registration.updated_at = at;
                        Self::refresh_qr(env, registration);
                        let registration = registration.clone();
                        smallvec![Self::status_email(env, &event, &registration)]
                    }
                }
            }

            // ========== Host rejection ==========
            LifecycleAction::Rejected { registration_id, at } => {
                let Some(registration) = state.registration_or_flag(&registration_id) else {
                    return smallvec![Effect::None];
                };

                match lifecycle::can_reject(registration) {
                    Err(error) => {
                        state.record_error(error);
                        smallvec![Effect::None]
                    }
                    Ok(RejectionDecision::AlreadyRejected) => smallvec![Effect::None],
                    Ok(RejectionDecision::Reject { .. }) => {
                        if let Some(registration) = state.registration_mut(&registration_id) {
                            registration.status = crate::types::RegistrationStatus::Rejected;
                            registration.updated_at = at;
                        }
                        smallvec![Effect::None]
                    }
                }
            }

            // ========== Cancellation ==========
            LifecycleAction::Cancelled { registration_id, at } => {
                let Some(registration) = state.registration_or_flag(&registration_id) else {
                    return smallvec![Effect::None];
                };

                match lifecycle::can_cancel(registration) {
                    Err(error) => {
                        state.record_error(error);
                        smallvec![Effect::None]
                    }
                    Ok(CancellationDecision::AlreadyCancelled) => smallvec![Effect::None],
                    Ok(CancellationDecision::Cancel) => {
                        if let Some(registration) = state.registration_mut(&registration_id) {
                            registration.status = crate::types::RegistrationStatus::Cancelled;
                            registration.updated_at = at;
                        }
                        smallvec![Effect::None]
                    }
                }
            }
        }
    }
}
