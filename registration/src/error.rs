//! Error taxonomy for registration and payment operations.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for registration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error taxonomy for the registration engine.
///
/// Variants are organized by who can fix them: client-fixable input errors,
/// authorization failures, state conflicts, abuse throttling, and upstream
/// failures. The web layer maps each category to an HTTP status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════
    // Client-fixable input
    // ═══════════════════════════════════════════════════════════

    /// Invalid input that the caller can correct.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("{resource} not found")]
    NotFound {
        /// What was looked up
        resource: &'static str,
    },

    // ═══════════════════════════════════════════════════════════
    // Authorization
    // ═══════════════════════════════════════════════════════════

    /// Caller is not allowed to perform this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    // ═══════════════════════════════════════════════════════════
    // State conflicts
    // ═══════════════════════════════════════════════════════════

    /// Operation conflicts with the record's current state.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Event has reached its capacity limit.
    #[error("Event is sold out")]
    SoldOut,

    // ═══════════════════════════════════════════════════════════
    // OTP verification outcomes
    // ═══════════════════════════════════════════════════════════

    /// No active verification code exists for this address.
    #[error("No verification code found")]
    OtpNotFound,

    /// The verification code has expired.
    #[error("Verification code has expired")]
    OtpExpired,

    /// The verification code does not match.
    #[error("Invalid verification code")]
    OtpMismatch,

    /// Too many wrong guesses; the code is locked.
    #[error("Too many verification attempts")]
    TooManyAttempts,

    // ═══════════════════════════════════════════════════════════
    // Abuse throttling
    // ═══════════════════════════════════════════════════════════

    /// Too many codes issued in the window.
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// How long to wait before retrying
        retry_after: Duration,
    },

    // ═══════════════════════════════════════════════════════════
    // Upstream failures
    // ═══════════════════════════════════════════════════════════

    /// Payment gateway is unreachable or misconfigured.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Webhook signature did not verify against the raw body.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(String),

    /// Email delivery failed.
    #[error("Email delivery failed: {0}")]
    Email(String),
}

impl Error {
    /// Returns `true` if this error is due to invalid caller input.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::NotFound { .. }
                | Self::OtpNotFound
                | Self::OtpExpired
                | Self::OtpMismatch
        )
    }

    /// Returns `true` if this error represents a state conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::SoldOut)
    }

    /// Returns `true` for throttling errors the caller should back off from.
    #[must_use]
    pub const fn is_throttled(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::TooManyAttempts)
    }

    /// Shorthand for a [`Error::Validation`].
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for a [`Error::Conflict`].
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Shorthand for a [`Error::Forbidden`].
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert!(Error::validation("bad email").is_client_error());
        assert!(Error::SoldOut.is_conflict());
        assert!(
            Error::RateLimited {
                retry_after: Duration::from_secs(60)
            }
            .is_throttled()
        );
        assert!(!Error::InvalidSignature.is_client_error());
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::NotFound {
                resource: "registration"
            }
            .to_string(),
            "registration not found"
        );
        assert_eq!(Error::SoldOut.to_string(), "Event is sold out");
    }
}
