//! Check-in endpoints: manual, QR-scan, and the live SSE stream.

use crate::error::AppError;
use crate::extractors::RequiredUser;
use crate::handlers::RegistrationView;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::Json;
use futures::Stream;
use futures::StreamExt;
use guestflow_registration::types::RegistrationId;
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Manually check in an attendee (host clicks the row).
///
/// # Errors
///
/// `401`/`403` without host access, `409` when already checked in or
/// ineligible.
pub async fn check_in(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    RequiredUser(host): RequiredUser,
) -> Result<Json<RegistrationView>, AppError> {
    let registration = state
        .checkins
        .check_in_manual(RegistrationId::from_uuid(id), host)
        .await?;
    Ok(Json(registration.into()))
}

/// Request for `POST /checkins/scan`.
#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    /// The scanned QR code string
    pub code: String,
}

/// Check in by scanning a QR ticket.
///
/// # Errors
///
/// `400` malformed or tampered codes, `401`/`403` without host access,
/// `409` when already checked in.
pub async fn scan(
    State(state): State<AppState>,
    RequiredUser(host): RequiredUser,
    Json(request): Json<ScanRequest>,
) -> Result<Json<RegistrationView>, AppError> {
    let registration = state.checkins.check_in_scan(&request.code, host).await?;
    Ok(Json(registration.into()))
}

/// Live check-in stream for an event's dashboard.
///
/// Emits a `connected` event on subscribe, a `checkin` event per check-in,
/// and periodic `ping` keep-alives.
///
/// # Errors
///
/// `404` unknown event, `401`/`403` without host access.
pub async fn stream(
    State(state): State<AppState>,
    Path(short_id): Path<String>,
    RequiredUser(host): RequiredUser,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, Infallible>>>, AppError> {
    let event = state
        .env
        .events
        .by_short_id(&short_id)
        .await
        .map_err(AppError::from)?
        .ok_or_else(|| AppError::not_found("event"))?;
    if !state
        .env
        .events
        .is_host(event.id, host)
        .await
        .map_err(AppError::from)?
    {
        return Err(AppError::forbidden("host access required"));
    }

    let event_id = event.id;
    let receiver = state.checkins.subscribe();
    let checkin_events = BroadcastStream::new(receiver).filter_map(move |message| {
        futures::future::ready(match message {
            Ok(notice) if notice.event_id == event_id => {
                let event = SseEvent::default()
                    .event("checkin")
                    .json_data(&notice)
                    .unwrap_or_else(|_| SseEvent::default().event("checkin"));
                Some(Ok(event))
            }
            // Other events' check-ins and lagged-receiver gaps are skipped.
            _ => None,
        })
    });

    let connected = futures::stream::once(futures::future::ready(Ok(SseEvent::default()
        .event("connected")
        .data("{}"))));

    Ok(Sse::new(connected.chain(checkin_events)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    ))
}
