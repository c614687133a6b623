//! Engine configuration.
//!
//! Configuration values are provided by the application, not hardcoded.
//! Defaults mirror production settings; every knob has a builder-style
//! setter for tests.

use crate::pricing::FeeSchedule;
use chrono::Duration;

/// OTP issuance and verification settings.
#[derive(Debug, Clone)]
pub struct OtpConfig {
    /// Code time-to-live.
    ///
    /// Default: 10 minutes
    pub code_ttl: Duration,

    /// Wrong guesses before the code locks.
    ///
    /// Default: 5
    pub max_attempts: u32,

    /// Codes that may be issued per (email, purpose, event) within
    /// [`OtpConfig::issue_window`].
    ///
    /// Default: 3
    pub issue_limit: u32,

    /// Sliding window for the issue limit.
    ///
    /// Default: 10 minutes
    pub issue_window: Duration,
}

impl OtpConfig {
    /// Set the code time-to-live.
    #[must_use]
    pub const fn with_code_ttl(mut self, ttl: Duration) -> Self {
        self.code_ttl = ttl;
        self
    }

    /// Set the wrong-guess cap.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the issue limit per window.
    #[must_use]
    pub const fn with_issue_limit(mut self, issue_limit: u32) -> Self {
        self.issue_limit = issue_limit;
        self
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            code_ttl: Duration::minutes(10),
            max_attempts: 5,
            issue_limit: 3,
            issue_window: Duration::minutes(10),
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Base URL for links embedded in emails (e.g. "https://guestflow.app").
    pub base_url: String,

    /// ISO currency code used for gateway amounts.
    pub currency: String,

    /// Secret mixed into QR checksums. Rotating it invalidates issued
    /// tickets, so treat it like a signing key.
    pub ticket_secret: String,

    /// Shared secret the gateway signs webhook bodies with.
    pub webhook_secret: String,

    /// Per-call deadline for gateway requests.
    pub gateway_timeout: std::time::Duration,

    /// OTP settings.
    pub otp: OtpConfig,

    /// Fee rates.
    pub fees: FeeSchedule,
}

impl PlatformConfig {
    /// Create a configuration with production defaults for the given secrets.
    #[must_use]
    pub fn new(base_url: String, ticket_secret: String, webhook_secret: String) -> Self {
        Self {
            base_url,
            currency: "usd".to_string(),
            ticket_secret,
            webhook_secret,
            gateway_timeout: std::time::Duration::from_secs(10),
            otp: OtpConfig::default(),
            fees: FeeSchedule::default(),
        }
    }

    /// Load configuration from `GUESTFLOW_*` environment variables.
    ///
    /// Missing optional variables fall back to defaults; missing secrets fall
    /// back to development placeholders so local runs work out of the box.
    #[must_use]
    pub fn from_env() -> Self {
        let read = |key: &str, default: &str| {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let mut config = Self::new(
            read("GUESTFLOW_BASE_URL", "http://localhost:3000"),
            read("GUESTFLOW_TICKET_SECRET", "dev-ticket-secret"),
            read("GUESTFLOW_WEBHOOK_SECRET", "dev-webhook-secret"),
        );
        config.currency = read("GUESTFLOW_CURRENCY", "usd");
        config
    }

    /// Set the currency.
    #[must_use]
    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    /// Set the fee schedule.
    #[must_use]
    pub const fn with_fees(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    /// Set the OTP settings.
    #[must_use]
    pub const fn with_otp(mut self, otp: OtpConfig) -> Self {
        self.otp = otp;
        self
    }
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self::new(
            "http://localhost:3000".to_string(),
            "dev-ticket-secret".to_string(),
            "dev-webhook-secret".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = PlatformConfig::default();
        assert_eq!(config.currency, "usd");
        assert_eq!(config.otp.max_attempts, 5);
        assert_eq!(config.otp.issue_limit, 3);
        assert_eq!(config.otp.code_ttl, Duration::minutes(10));
    }

    #[test]
    fn builder() {
        let config = PlatformConfig::default()
            .with_currency("eur")
            .with_otp(OtpConfig::default().with_max_attempts(3));
        assert_eq!(config.currency, "eur");
        assert_eq!(config.otp.max_attempts, 3);
    }
}
