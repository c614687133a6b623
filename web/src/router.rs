//! Route table for the registration engine's HTTP surface.

use crate::handlers::{checkins, payments, registrations, tickets, webhooks};
use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the engine's router over the given state.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        // Registration lifecycle
        .route("/events/:short_id/register", post(registrations::register))
        .route("/auth/verify-email", post(registrations::verify_email))
        .route("/auth/resend-code", post(registrations::resend_code))
        .route("/registrations/:id/approve", post(registrations::approve))
        .route("/registrations/:id/reject", post(registrations::reject))
        .route("/registrations/:id/cancel", post(registrations::cancel))
        // Payments
        .route("/payments/create", post(payments::create))
        .route("/payments/confirm", post(payments::confirm))
        .route("/payments/webhook", post(webhooks::receive))
        .route("/payments/:id/refund", post(payments::refund))
        // Tickets and check-in
        .route("/registrations/:id/ticket", get(tickets::ticket))
        .route("/registrations/:id/checkin", post(checkins::check_in))
        .route("/checkins/scan", post(checkins::scan))
        .route("/events/:short_id/checkins/stream", get(checkins::stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
