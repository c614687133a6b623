//! Payment coordination: checkout creation, the polling confirmation path,
//! the webhook push path, and host refunds.
//!
//! Both confirmation transports fold gateway state through the same
//! [`LifecycleAction::ApplyGatewayStatus`] dispatch, so a webhook and a
//! client poll racing to apply `succeeded` both land on "completed exactly
//! once".

use crate::actions::LifecycleAction;
use crate::error::{Error, Result};
use crate::lifecycle::GatewayPaymentStatus;
use crate::providers::{
    CheckoutRequest, RefundOutcome, WebhookEventType, WebhookHeaders,
};
use crate::retry::{RetryPolicy, with_retry};
use crate::service::{ServiceEnvironment, dispatch, persist_payment, persist_registration};
use crate::state::LifecycleState;
use crate::types::{
    Event, Payment, PaymentId, PaymentState, Registration, RegistrationId,
    RegistrationPaymentStatus, RegistrationStatus, UserId, Viewer,
};

/// Result of opening (or re-opening) a checkout.
#[derive(Clone, Debug)]
pub struct CheckoutOutcome {
    /// The open or completed payment row
    pub payment: Payment,
    /// Hosted checkout URL; `None` when already paid
    pub checkout_url: Option<String>,
    /// Whether a completed payment was returned idempotently
    pub already_paid: bool,
}

/// Result of a confirmation poll.
#[derive(Clone, Debug)]
pub struct ConfirmationOutcome {
    /// The payment row after reconciliation
    pub payment: Payment,
    /// The registration after reconciliation
    pub registration: Registration,
}

/// Result of processing one webhook delivery.
#[derive(Clone, Debug)]
pub struct WebhookOutcome {
    /// Whether the event matched a local payment and was applied
    pub handled: bool,
}

/// Result of a host-initiated refund.
#[derive(Clone, Debug)]
pub struct RefundReport {
    /// The payment row after the attempt
    pub payment: Payment,
    /// What the gateway said; pending and failed are reported distinctly so
    /// hosts can retry
    pub outcome: RefundOutcome,
}

/// Orchestrates checkout and reconciliation.
#[derive(Clone)]
pub struct PaymentService {
    env: ServiceEnvironment,
    retry: RetryPolicy,
}

impl PaymentService {
    /// Create a service over the given environment.
    #[must_use]
    pub fn new(env: ServiceEnvironment) -> Self {
        Self {
            env,
            retry: RetryPolicy::default(),
        }
    }

    /// Open a checkout session for a registration.
    ///
    /// Idempotent along both axes: a completed payment is returned with
    /// `already_paid = true`, and concurrent double-submits collapse onto one
    /// open payment row via the store constraint.
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] when the viewer does not own the registration,
    /// [`Error::Validation`] for free events, [`Error::Conflict`] for
    /// unverified or terminal registrations, [`Error::Gateway`] when the
    /// provider is unreachable.
    pub async fn create_payment(
        &self,
        registration_id: RegistrationId,
        viewer: &Viewer,
    ) -> Result<CheckoutOutcome> {
        let registration = self.registration(registration_id).await?;
        let event = self.event_for(&registration).await?;

        if !viewer.owns(&registration) {
            return Err(Error::forbidden("not your registration"));
        }
        let Some(ticket_price) = event.ticket_price else {
            return Err(Error::validation("event is free; nothing to pay"));
        };
        if !registration.email_verified {
            return Err(Error::conflict("verify your email before paying"));
        }
        if matches!(
            registration.status,
            RegistrationStatus::Cancelled | RegistrationStatus::Rejected
        ) {
            return Err(Error::conflict(format!(
                "cannot pay for a {} registration",
                registration.status.as_str()
            )));
        }

        if let Some(completed) = self
            .env
            .payments
            .completed_for_registration(registration_id)
            .await?
        {
            return Ok(CheckoutOutcome {
                payment: completed,
                checkout_url: None,
                already_paid: true,
            });
        }

        let breakdown = self.env.config.fees.breakdown(ticket_price)?;
        let currency = event.currency.clone();

        let product_id = self
            .gateway_call(|| self.env.gateway.ensure_product(&currency, breakdown.total))
            .await?;

        let session = self
            .gateway_call(|| {
                self.env.gateway.create_checkout_session(CheckoutRequest {
                    registration_id,
                    product_id: product_id.clone(),
                    amount: breakdown.total,
                    currency: currency.clone(),
                    customer_email: registration.email.to_string(),
                    success_url: format!(
                        "{}/events/{}/registration",
                        self.env.config.base_url, event.short_id
                    ),
                    cancel_url: format!(
                        "{}/events/{}",
                        self.env.config.base_url, event.short_id
                    ),
                })
            })
            .await?;

        let now = self.env.clock.now();
        let candidate = Payment {
            id: PaymentId::new(),
            registration_id,
            amount: breakdown.total,
            currency,
            breakdown,
            checkout_session_id: Some(session.id.clone()),
            gateway_payment_id: session.gateway_payment_id.clone(),
            state: PaymentState::Pending,
            refund_id: None,
            receipt_sent_at: None,
            created_at: now,
            updated_at: now,
        };

        let outcome = self.env.payments.create_open(candidate).await?;
        let checkout_url = if outcome.created {
            Some(session.url)
        } else {
            // Another submit won the race; hand back its session's URL.
            self.session_url(&outcome.payment).await
        };

        if registration.payment_status != RegistrationPaymentStatus::Pending {
            let mut updated = registration;
            updated.payment_status = RegistrationPaymentStatus::Pending;
            updated.updated_at = now;
            self.env.registrations.update(&updated).await?;
        }

        metrics::counter!("guestflow_checkouts_opened_total").increment(1);
        Ok(CheckoutOutcome {
            payment: outcome.payment,
            checkout_url,
            already_paid: false,
        })
    }

    /// Polling confirmation path: ask the gateway and reconcile.
    ///
    /// Gateway failures during this read-only path degrade to "status
    /// unchanged, report current state" rather than failing the request.
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] for strangers, [`Error::NotFound`] when no
    /// payment exists to confirm.
    pub async fn confirm_payment(
        &self,
        registration_id: RegistrationId,
        payment_id: Option<PaymentId>,
        checkout_session_id: Option<&str>,
        viewer: &Viewer,
    ) -> Result<ConfirmationOutcome> {
        let registration = self.registration(registration_id).await?;
        let event = self.event_for(&registration).await?;
        if !viewer.owns(&registration) {
            return Err(Error::forbidden("not your registration"));
        }

        let payment = self
            .resolve_payment(registration_id, payment_id, checkout_session_id)
            .await?;

        let gateway_view = self.gateway_view(&payment).await;
        let Some((status, gateway_payment_id)) = gateway_view else {
            // Provider unreachable: leave the row pending, report as-is.
            return Ok(ConfirmationOutcome {
                payment,
                registration,
            });
        };

        self.apply(&event, &registration, &payment, status, gateway_payment_id)
            .await
    }

    /// Webhook push path: verify the signature over the raw bytes, then fold
    /// the event through the same reconciliation as the polling path.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSignature`] when verification fails,
    /// [`Error::Validation`] for unparseable bodies.
    pub async fn process_webhook(
        &self,
        raw_body: &[u8],
        headers: &WebhookHeaders,
    ) -> Result<WebhookOutcome> {
        let webhook = self.env.gateway.unwrap_webhook(
            raw_body,
            headers,
            &self.env.config.webhook_secret,
        )?;

        let payment = self
            .env
            .payments
            .find_by_gateway_refs(
                webhook.gateway_payment_id.as_deref(),
                webhook.checkout_session_id.as_deref(),
            )
            .await?;
        let Some(payment) = payment else {
            tracing::info!(event_type = ?webhook.event_type, "webhook for unknown payment; ignoring");
            return Ok(WebhookOutcome { handled: false });
        };

        let registration = self.registration(payment.registration_id).await?;
        let event = self.event_for(&registration).await?;

        if let Some(status) = webhook.event_type.as_payment_status() {
            self.apply(
                &event,
                &registration,
                &payment,
                status,
                webhook.gateway_payment_id.clone(),
            )
            .await?;
            return Ok(WebhookOutcome { handled: true });
        }

        // Refund settlement arriving asynchronously.
        let succeeded = webhook.event_type == WebhookEventType::RefundSucceeded;
        let mut state = LifecycleState::new();
        state.insert_registration(registration);
        state.insert_payment(payment.clone());
        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::RefundApplied {
                payment_id: payment.id,
                refund_id: webhook.refund_id.unwrap_or_default(),
                succeeded,
                at: self.env.clock.now(),
            },
        )
        .await?;
        persist_payment(&self.env, &state, payment.id).await?;
        persist_registration(&self.env, &state, payment.registration_id).await?;
        Ok(WebhookOutcome { handled: true })
    }

    /// Host-initiated refund of a completed payment.
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] for non-hosts, [`Error::Conflict`] when the
    /// payment is not completed, [`Error::Gateway`] when the provider
    /// rejects the call outright.
    pub async fn refund_payment(
        &self,
        payment_id: PaymentId,
        host: UserId,
        reason: &str,
    ) -> Result<RefundReport> {
        let payment = self
            .env
            .payments
            .get(payment_id)
            .await?
            .ok_or(Error::NotFound { resource: "payment" })?;
        let registration = self.registration(payment.registration_id).await?;
        let event = self.event_for(&registration).await?;
        if !self.env.events.is_host(event.id, host).await? {
            return Err(Error::forbidden("host access required"));
        }

        if payment.state != PaymentState::Completed {
            return Err(Error::conflict("only completed payments can be refunded"));
        }
        let Some(gateway_payment_id) = payment.gateway_payment_id.clone() else {
            return Err(Error::conflict("payment has no gateway reference"));
        };

        let refund = self
            .gateway_call(|| {
                self.env
                    .gateway
                    .create_refund(&gateway_payment_id, payment.amount, reason)
            })
            .await?;

        let mut state = LifecycleState::new();
        state.insert_registration(registration);
        state.insert_payment(payment.clone());
        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::RefundApplied {
                payment_id,
                refund_id: refund.id,
                succeeded: refund.outcome == RefundOutcome::Succeeded,
                at: self.env.clock.now(),
            },
        )
        .await?;
        persist_payment(&self.env, &state, payment_id).await?;
        persist_registration(&self.env, &state, payment.registration_id).await?;

        let payment = state
            .payment(&payment_id)
            .cloned()
            .ok_or(Error::NotFound { resource: "payment" })?;
        metrics::counter!("guestflow_refunds_requested_total").increment(1);
        Ok(RefundReport {
            payment,
            outcome: refund.outcome,
        })
    }

    // ════════════════════════════════════════════════════════════════════
    // Shared reconciliation plumbing
    // ════════════════════════════════════════════════════════════════════

    /// Apply one gateway status through the reducer and persist both rows.
    async fn apply(
        &self,
        event: &Event,
        registration: &Registration,
        payment: &Payment,
        status: GatewayPaymentStatus,
        gateway_payment_id: Option<String>,
    ) -> Result<ConfirmationOutcome> {
        let mut state = LifecycleState::new();
        state.insert_registration(registration.clone());
        state.insert_payment(payment.clone());

        dispatch(
            &self.env,
            &mut state,
            LifecycleAction::ApplyGatewayStatus {
                payment_id: payment.id,
                event: event.clone(),
                status,
                gateway_payment_id,
                at: self.env.clock.now(),
            },
        )
        .await?;

        persist_payment(&self.env, &state, payment.id).await?;
        persist_registration(&self.env, &state, registration.id).await?;
        metrics::counter!("guestflow_payments_reconciled_total").increment(1);

        Ok(ConfirmationOutcome {
            payment: state
                .payment(&payment.id)
                .cloned()
                .ok_or(Error::NotFound { resource: "payment" })?,
            registration: state
                .registration(&registration.id)
                .cloned()
                .ok_or(Error::NotFound {
                    resource: "registration",
                })?,
        })
    }

    /// Most relevant payment row: explicit id, session id, or most recent.
    async fn resolve_payment(
        &self,
        registration_id: RegistrationId,
        payment_id: Option<PaymentId>,
        checkout_session_id: Option<&str>,
    ) -> Result<Payment> {
        if let Some(payment_id) = payment_id {
            let payment = self
                .env
                .payments
                .get(payment_id)
                .await?
                .ok_or(Error::NotFound { resource: "payment" })?;
            if payment.registration_id != registration_id {
                return Err(Error::forbidden("payment belongs to another registration"));
            }
            return Ok(payment);
        }

        if let Some(session_id) = checkout_session_id {
            if let Some(payment) = self
                .env
                .payments
                .find_by_gateway_refs(None, Some(session_id))
                .await?
            {
                if payment.registration_id != registration_id {
                    return Err(Error::forbidden("payment belongs to another registration"));
                }
                return Ok(payment);
            }
        }

        self.env
            .payments
            .latest_for_registration(registration_id)
            .await?
            .ok_or(Error::NotFound { resource: "payment" })
    }

    /// Current gateway status for a payment, `None` when the provider is
    /// unreachable.
    async fn gateway_view(
        &self,
        payment: &Payment,
    ) -> Option<(GatewayPaymentStatus, Option<String>)> {
        if let Some(gateway_payment_id) = payment.gateway_payment_id.clone() {
            let result = self
                .gateway_call(|| self.env.gateway.retrieve_payment(&gateway_payment_id))
                .await;
            return match result {
                Ok(gateway_payment) => Some((gateway_payment.status, Some(gateway_payment.id))),
                Err(error) => {
                    tracing::warn!(%error, "gateway unreachable during confirmation");
                    None
                }
            };
        }

        let session_id = payment.checkout_session_id.clone()?;
        let result = self
            .gateway_call(|| self.env.gateway.retrieve_checkout_session(&session_id))
            .await;
        match result {
            Ok(session) => Some((session.status, session.gateway_payment_id)),
            Err(error) => {
                tracing::warn!(%error, "gateway unreachable during confirmation");
                None
            }
        }
    }

    async fn session_url(&self, payment: &Payment) -> Option<String> {
        let session_id = payment.checkout_session_id.clone()?;
        self.gateway_call(|| self.env.gateway.retrieve_checkout_session(&session_id))
            .await
            .map(|session| session.url)
            .ok()
    }

    async fn gateway_call<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        with_retry(&self.retry, self.env.config.gateway_timeout, op).await
    }

    async fn registration(&self, id: RegistrationId) -> Result<Registration> {
        self.env
            .registrations
            .get(id)
            .await?
            .ok_or(Error::NotFound {
                resource: "registration",
            })
    }

    async fn event_for(&self, registration: &Registration) -> Result<Event> {
        self.env
            .events
            .by_id(registration.event_id)
            .await?
            .ok_or(Error::NotFound { resource: "event" })
    }
}
