//! Error types for web handlers.
//!
//! Bridges the engine's error taxonomy to HTTP responses via Axum's
//! `IntoResponse`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use guestflow_registration::Error as DomainError;
use serde::Serialize;
use std::fmt;

/// Application error type for web handlers.
///
/// Wraps domain errors and produces JSON error responses with a stable
/// machine-readable code.
#[derive(Debug)]
pub struct AppError {
    /// HTTP status code
    status: StatusCode,
    /// Error message (user-facing)
    message: String,
    /// Error code (for client error handling)
    code: String,
    /// Internal error (for logging, not exposed to client)
    #[allow(dead_code)]
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create a new application error.
    #[must_use]
    pub const fn new(status: StatusCode, message: String, code: String) -> Self {
        Self {
            status,
            message,
            code,
            source: None,
        }
    }

    /// Create a 400 Bad Request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            message.into(),
            "BAD_REQUEST".to_string(),
        )
    }

    /// Create a 401 Unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            message.into(),
            "UNAUTHORIZED".to_string(),
        )
    }

    /// Create a 403 Forbidden error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            message.into(),
            "FORBIDDEN".to_string(),
        )
    }

    /// Create a 404 Not Found error.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            format!("{resource} not found"),
            "NOT_FOUND".to_string(),
        )
    }

    /// Create a 409 Conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::CONFLICT,
            message.into(),
            "CONFLICT".to_string(),
        )
    }

    /// Create a 429 Too Many Requests error.
    #[must_use]
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::TOO_MANY_REQUESTS,
            message.into(),
            "RATE_LIMITED".to_string(),
        )
    }

    /// Create a 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message.into(),
            "INTERNAL_SERVER_ERROR".to_string(),
        )
    }

    /// Create a 502 Bad Gateway error.
    #[must_use]
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_GATEWAY,
            message.into(),
            "BAD_GATEWAY".to_string(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    /// Error code (for client error handling).
    code: String,
    /// Human-readable error message.
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                "request failed"
            );
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Map the engine's taxonomy onto HTTP statuses.
impl From<DomainError> for AppError {
    fn from(error: DomainError) -> Self {
        match &error {
            DomainError::Validation(message) => Self::bad_request(message.clone()),
            DomainError::NotFound { resource } => Self::not_found(resource),
            DomainError::Forbidden(message) => Self::forbidden(message.clone()),
            DomainError::Conflict(message) => Self::conflict(message.clone()),
            DomainError::SoldOut => Self::new(
                StatusCode::CONFLICT,
                error.to_string(),
                "SOLD_OUT".to_string(),
            ),
            DomainError::OtpNotFound | DomainError::OtpExpired | DomainError::OtpMismatch => {
                Self::new(
                    StatusCode::BAD_REQUEST,
                    error.to_string(),
                    "INVALID_CODE".to_string(),
                )
            }
            DomainError::TooManyAttempts | DomainError::RateLimited { .. } => {
                Self::rate_limited(error.to_string())
            }
            DomainError::Gateway(message) => Self::bad_gateway(message.clone()),
            DomainError::InvalidSignature => Self::unauthorized(error.to_string()),
            DomainError::Database(_) | DomainError::Email(_) => {
                Self::internal("An internal error occurred")
                    .with_source(anyhow::Error::new(error))
            }
        }
    }
}

impl AppError {
    /// Attach a source error for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_code() {
        let err = AppError::bad_request("Invalid input");
        assert_eq!(err.to_string(), "[BAD_REQUEST] Invalid input");
    }

    #[test]
    fn domain_mapping() {
        let sold_out: AppError = DomainError::SoldOut.into();
        assert_eq!(sold_out.status, StatusCode::CONFLICT);
        assert_eq!(sold_out.code, "SOLD_OUT");

        let throttled: AppError = DomainError::TooManyAttempts.into();
        assert_eq!(throttled.status, StatusCode::TOO_MANY_REQUESTS);

        let signature: AppError = DomainError::InvalidSignature.into();
        assert_eq!(signature.status, StatusCode::UNAUTHORIZED);

        let gateway: AppError = DomainError::Gateway("down".to_string()).into();
        assert_eq!(gateway.status, StatusCode::BAD_GATEWAY);

        let database: AppError = DomainError::Database("oops".to_string()).into();
        assert_eq!(database.status, StatusCode::INTERNAL_SERVER_ERROR);
        // internals are not leaked
        assert!(!database.message.contains("oops"));
    }
}
