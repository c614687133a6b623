//! Ticket retrieval endpoint.

use crate::error::AppError;
use crate::extractors::MaybeUser;
use crate::handlers::registrations::build_viewer;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use guestflow_registration::types::RegistrationId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Query parameters for `GET /registrations/:id/ticket`.
#[derive(Debug, Deserialize)]
pub struct TicketQuery {
    /// `json` (default) or `document` for the printable ticket
    #[serde(default)]
    pub format: Option<String>,
    /// Guest email, when the caller is anonymous
    #[serde(default)]
    pub email: Option<String>,
}

/// JSON shape of a ticket.
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    /// The canonical QR code string
    pub qr_code: String,
    /// The QR image, base64-free: an SVG string
    pub qr_image: String,
    /// Registration id the ticket belongs to
    pub registration_id: Uuid,
    /// Attendee name
    pub attendee_name: String,
}

/// Fetch the ticket for a registration, as JSON or a printable document.
///
/// # Errors
///
/// `403` for strangers, `409` when the registration is not ticket-eligible.
pub async fn ticket(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    MaybeUser(user_id): MaybeUser,
    Query(query): Query<TicketQuery>,
) -> Result<Response, AppError> {
    let viewer = build_viewer(user_id, query.email.as_deref())?;
    let wants_document = query.format.as_deref() == Some("document");

    let data = state
        .registrations
        .ticket_data(RegistrationId::from_uuid(id), &viewer, wants_document)
        .await?;

    if wants_document {
        let document = data
            .document
            .ok_or_else(|| AppError::conflict("no printable ticket for this event"))?;
        return Ok((
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            document,
        )
            .into_response());
    }

    Ok(Json(TicketResponse {
        qr_code: data.qr_code,
        qr_image: String::from_utf8_lossy(&data.qr_image).into_owned(),
        registration_id: *data.registration.id.as_uuid(),
        attendee_name: data.registration.name,
    })
    .into_response())
}
