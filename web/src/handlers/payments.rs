//! Payment endpoints: checkout creation, polling confirmation, host refunds.

use crate::error::AppError;
use crate::extractors::{MaybeUser, RequiredUser};
use crate::handlers::{PaymentView, RegistrationView, registrations::build_viewer};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::{Json, http::StatusCode};
use guestflow_registration::types::{PaymentId, RegistrationId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request for `POST /payments/create`.
#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    /// Registration being paid for
    pub registration_id: Uuid,
    /// Guest email, when the caller is anonymous
    #[serde(default)]
    pub email: Option<String>,
}

/// Response for `POST /payments/create`.
#[derive(Debug, Serialize)]
pub struct CreatePaymentResponse {
    /// The open or completed payment
    pub payment: PaymentView,
    /// Hosted checkout URL; absent when already paid
    pub checkout_url: Option<String>,
    /// Whether a completed payment was returned idempotently
    pub already_paid: bool,
}

/// Open a checkout session.
///
/// # Errors
///
/// `403` for strangers, `400` for free events, `409` for unverified or
/// terminal registrations, `502` when the gateway is unreachable.
pub async fn create(
    State(state): State<AppState>,
    MaybeUser(user_id): MaybeUser,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentResponse>), AppError> {
    let viewer = build_viewer(user_id, request.email.as_deref())?;
    let outcome = state
        .payments
        .create_payment(RegistrationId::from_uuid(request.registration_id), &viewer)
        .await?;

    let status = if outcome.already_paid {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(CreatePaymentResponse {
            payment: outcome.payment.into(),
            checkout_url: outcome.checkout_url,
            already_paid: outcome.already_paid,
        }),
    ))
}

/// Request for `POST /payments/confirm`.
#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    /// Registration the payment belongs to
    pub registration_id: Uuid,
    /// Explicit payment id, when the client knows it
    #[serde(default)]
    pub payment_id: Option<Uuid>,
    /// Checkout-session id from the gateway redirect
    #[serde(default)]
    pub checkout_session_id: Option<String>,
    /// Guest email, when the caller is anonymous
    #[serde(default)]
    pub email: Option<String>,
}

/// Response for `POST /payments/confirm`.
#[derive(Debug, Serialize)]
pub struct ConfirmPaymentResponse {
    /// The payment after reconciliation
    pub payment: PaymentView,
    /// The registration after reconciliation
    pub registration: RegistrationView,
}

/// Polling confirmation path. Gateway outages degrade to "still pending"
/// rather than an error.
///
/// # Errors
///
/// `403` for strangers, `404` when no payment exists.
pub async fn confirm(
    State(state): State<AppState>,
    MaybeUser(user_id): MaybeUser,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>, AppError> {
    let viewer = build_viewer(user_id, request.email.as_deref())?;
    let outcome = state
        .payments
        .confirm_payment(
            RegistrationId::from_uuid(request.registration_id),
            request.payment_id.map(PaymentId::from_uuid),
            request.checkout_session_id.as_deref(),
            &viewer,
        )
        .await?;
    Ok(Json(ConfirmPaymentResponse {
        payment: outcome.payment.into(),
        registration: outcome.registration.into(),
    }))
}

/// Request for `POST /payments/:id/refund`.
#[derive(Debug, Deserialize, Default)]
pub struct RefundRequest {
    /// Reason forwarded to the gateway
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response for `POST /payments/:id/refund`.
#[derive(Debug, Serialize)]
pub struct RefundResponse {
    /// The payment after the attempt
    pub payment: PaymentView,
    /// `refunded`, `pending`, or `failed` - reported distinctly so hosts can
    /// retry
    pub outcome: String,
}

/// Refund a completed payment (host).
///
/// # Errors
///
/// `401`/`403` without host access, `409` for non-completed payments, `502`
/// when the gateway rejects the call.
pub async fn refund(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequiredUser(host): RequiredUser,
    Json(request): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, AppError> {
    let reason = request
        .reason
        .unwrap_or_else(|| "requested by host".to_string());
    let report = state
        .payments
        .refund_payment(PaymentId::from_uuid(id), host, &reason)
        .await?;

    use guestflow_registration::providers::RefundOutcome;
    let outcome = match report.outcome {
        RefundOutcome::Succeeded => "refunded",
        RefundOutcome::Pending => "pending",
        RefundOutcome::Failed => "failed",
    };
    Ok(Json(RefundResponse {
        payment: report.payment.into(),
        outcome: outcome.to_string(),
    }))
}
