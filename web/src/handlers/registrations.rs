//! Registration endpoints: submit, verify, resend, host actions.

use crate::error::AppError;
use crate::extractors::{MaybeUser, RequiredUser};
use crate::handlers::RegistrationView;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::{Json, http::StatusCode};
use guestflow_registration::service::registrations::RegistrationRequest;
use guestflow_registration::types::{Email, RegistrationId, Viewer};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Response for `POST /events/:short_id/register`.
#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    /// The stored registration
    pub registration: RegistrationView,
    /// Whether the guest still has to verify their email
    pub verification_required: bool,
    /// Whether an existing verified registration was returned
    pub already_registered: bool,
}

/// Register for an event.
///
/// # Errors
///
/// `404` unknown event, `400` invalid input or closed event, `409` sold out,
/// `429` code issue rate limit.
pub async fn register(
    State(state): State<AppState>,
    Path(short_id): Path<String>,
    MaybeUser(user_id): MaybeUser,
    Json(request): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), AppError> {
    let viewer = user_id.map(Viewer::user);
    let outcome = state
        .registrations
        .register_for_event(&short_id, request, viewer.as_ref())
        .await?;

    let status = if outcome.already_registered {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((
        status,
        Json(RegisterResponse {
            registration: outcome.registration.into(),
            verification_required: outcome.verification_required,
            already_registered: outcome.already_registered,
        }),
    ))
}

/// Request for `POST /auth/verify-email`.
#[derive(Debug, Deserialize)]
pub struct VerifyEmailRequest {
    /// What the code proves; only `event_registration` is served here
    pub purpose: String,
    /// Event the registration belongs to
    pub event_short_id: String,
    /// Address the code was sent to
    pub email: String,
    /// The submitted 6-digit code
    pub code: String,
}

/// Response for `POST /auth/verify-email`.
#[derive(Debug, Serialize)]
pub struct VerifyEmailResponse {
    /// The registration after the transition table was applied
    pub registration: RegistrationView,
}

/// Verify a registration email with an OTP.
///
/// # Errors
///
/// `400` wrong/expired/missing code, `429` locked code.
pub async fn verify_email(
    State(state): State<AppState>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<Json<VerifyEmailResponse>, AppError> {
    if request.purpose != "event_registration" {
        // Account verification is handled by the account service, not this
        // engine.
        return Err(AppError::bad_request("unsupported verification purpose"));
    }

    let registration = state
        .registrations
        .verify_email_otp(&request.event_short_id, &request.email, &request.code)
        .await?;
    Ok(Json(VerifyEmailResponse {
        registration: registration.into(),
    }))
}

/// Request for `POST /auth/resend-code`.
#[derive(Debug, Deserialize)]
pub struct ResendCodeRequest {
    /// Event the registration belongs to
    pub event_short_id: String,
    /// Address to resend to
    pub email: String,
}

/// Re-send a verification code.
///
/// # Errors
///
/// `404` no unverified registration, `429` issue rate limit.
pub async fn resend_code(
    State(state): State<AppState>,
    Json(request): Json<ResendCodeRequest>,
) -> Result<StatusCode, AppError> {
    state
        .registrations
        .resend_verification(&request.event_short_id, &request.email)
        .await?;
    Ok(StatusCode::ACCEPTED)
}

/// Approve a pending registration (host).
///
/// # Errors
///
/// `401`/`403` without host access, `409` when not approvable.
pub async fn approve(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequiredUser(host): RequiredUser,
) -> Result<Json<RegistrationView>, AppError> {
    let registration = state
        .registrations
        .approve_registration(RegistrationId::from_uuid(id), host)
        .await?;
    Ok(Json(registration.into()))
}

/// Request for `POST /registrations/:id/reject`.
#[derive(Debug, Deserialize, Default)]
pub struct RejectRequest {
    /// Reason forwarded to the gateway with any automatic refund
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response for `POST /registrations/:id/reject`.
#[derive(Debug, Serialize)]
pub struct RejectResponse {
    /// The rejected registration
    pub registration: RegistrationView,
    /// What happened to a completed payment: `refunded`, `pending`,
    /// `failed`, or absent when there was nothing to refund
    pub refund: Option<String>,
}

/// Reject a registration (host), refunding a completed payment first.
///
/// # Errors
///
/// `401`/`403` without host access, `409` for terminal rows.
pub async fn reject(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequiredUser(host): RequiredUser,
    Json(request): Json<RejectRequest>,
) -> Result<Json<RejectResponse>, AppError> {
    let reason = request.reason.unwrap_or_else(|| "rejected by host".to_string());
    let outcome = state
        .registrations
        .reject_registration(RegistrationId::from_uuid(id), host, &reason)
        .await?;

    let refund = outcome.refund.map(|refund| {
        use guestflow_registration::providers::RefundOutcome;
        match refund {
            RefundOutcome::Succeeded => "refunded".to_string(),
            RefundOutcome::Pending => "pending".to_string(),
            RefundOutcome::Failed => "failed".to_string(),
        }
    });
    Ok(Json(RejectResponse {
        registration: outcome.registration.into(),
        refund,
    }))
}

/// Request for `POST /registrations/:id/cancel`.
#[derive(Debug, Deserialize, Default)]
pub struct CancelRequest {
    /// Guest email, when the caller is anonymous
    #[serde(default)]
    pub email: Option<String>,
}

/// Cancel a registration (guest or host).
///
/// # Errors
///
/// `403` for strangers, `409` for terminal rows.
pub async fn cancel(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    MaybeUser(user_id): MaybeUser,
    Json(request): Json<CancelRequest>,
) -> Result<Json<RegistrationView>, AppError> {
    let viewer = build_viewer(user_id, request.email.as_deref())?;
    let registration = state
        .registrations
        .cancel_registration(RegistrationId::from_uuid(id), &viewer)
        .await?;
    Ok(Json(registration.into()))
}

/// Viewer from the optional auth header plus an optional email claim.
pub(crate) fn build_viewer(
    user_id: Option<guestflow_registration::types::UserId>,
    email: Option<&str>,
) -> Result<Viewer, AppError> {
    let email = email.map(Email::parse).transpose()?;
    Ok(Viewer { user_id, email })
}
