//! The gateway webhook endpoint.
//!
//! Signature verification runs against the raw request bytes, so this
//! handler takes `Bytes` rather than a parsed JSON extractor; reserializing
//! a parsed body would make the check meaningless.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::{Json, body::Bytes};
use guestflow_registration::providers::{SIGNATURE_HEADER, WebhookHeaders};
use serde::Serialize;

/// Response for `POST /payments/webhook`.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the event matched a local payment and was applied. Unknown
    /// objects are acknowledged so the gateway stops retrying them.
    pub handled: bool,
}

/// Receive a gateway webhook.
///
/// # Errors
///
/// `401` invalid signature, `400` unparseable body.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let webhook_headers = WebhookHeaders {
        signature: headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(ToString::to_string),
    };

    let outcome = state
        .payments
        .process_webhook(&body, &webhook_headers)
        .await?;
    Ok(Json(WebhookResponse {
        handled: outcome.handled,
    }))
}
