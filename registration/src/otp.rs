//! One-time code issuance and verification.
//!
//! Codes are 6 random digits bound to (email, purpose, event), stored
//! server-side with a 10-minute expiry. Issuance is rate limited per key;
//! verification locks after the configured number of wrong guesses. The
//! attempt counter is incremented by the store atomically before the cap is
//! re-checked, so the locking guess itself is rejected and a later correct
//! code stays rejected.

use crate::config::OtpConfig;
use crate::error::{Error, Result};
use crate::stores::VerificationStore;
use crate::types::{
    Email, EmailVerification, EventId, RegistrationId, VerificationId, VerificationPurpose,
};
use guestflow_core::environment::Clock;
use rand::Rng;
use std::sync::Arc;

/// Issues, rate-limits, and checks one-time codes.
#[derive(Clone)]
pub struct OtpVerifier {
    store: Arc<dyn VerificationStore>,
    clock: Arc<dyn Clock>,
    config: OtpConfig,
}

impl OtpVerifier {
    /// Create a verifier over the given store and clock.
    #[must_use]
    pub fn new(
        store: Arc<dyn VerificationStore>,
        clock: Arc<dyn Clock>,
        config: OtpConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Generate a 6-digit code, zero-padded.
    fn generate_code() -> String {
        let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
        format!("{value:06}")
    }

    /// Issue a fresh code for (email, purpose, event).
    ///
    /// # Errors
    ///
    /// Returns [`Error::RateLimited`] when the issue limit for the sliding
    /// window is exhausted, or a store error.
    pub async fn issue(
        &self,
        email: &Email,
        purpose: VerificationPurpose,
        event_id: Option<EventId>,
        registration_id: Option<RegistrationId>,
    ) -> Result<EmailVerification> {
        let now = self.clock.now();
        let since = now - self.config.issue_window;

        let issued = self
            .store
            .count_issued_since(email, purpose, event_id, since)
            .await?;
        if issued >= self.config.issue_limit {
            metrics::counter!("guestflow_otp_rate_limited_total").increment(1);
            return Err(Error::RateLimited {
                retry_after: self
                    .config
                    .issue_window
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(600)),
            });
        }

        let verification = EmailVerification {
            id: VerificationId::new(),
            email: email.clone(),
            purpose,
            event_id,
            registration_id,
            code: Self::generate_code(),
            expires_at: now + self.config.code_ttl,
            verified: false,
            attempts: 0,
            created_at: now,
        };
        self.store.insert(verification.clone()).await?;

        tracing::debug!(
            email = %verification.email,
            purpose = verification.purpose.as_str(),
            "verification code issued"
        );
        Ok(verification)
    }

    /// Check a submitted code against the newest active one for the key.
    ///
    /// On success the row is marked verified (kept for audit) and returned.
    ///
    /// # Errors
    ///
    /// - [`Error::OtpNotFound`] - no active code for this key
    /// - [`Error::TooManyAttempts`] - the code is locked; this includes the
    ///   guess that crossed the cap
    /// - [`Error::OtpExpired`] - past the code's expiry
    /// - [`Error::OtpMismatch`] - wrong code, more guesses remain
    pub async fn verify(
        &self,
        email: &Email,
        purpose: VerificationPurpose,
        event_id: Option<EventId>,
        code: &str,
    ) -> Result<EmailVerification> {
        let verification = self
            .store
            .latest_active(email, purpose, event_id)
            .await?
            .ok_or(Error::OtpNotFound)?;

        // The lock dominates expiry: a locked code stays locked forever,
        // even for the right digits.
        if verification.attempts >= self.config.max_attempts {
            return Err(Error::TooManyAttempts);
        }

        if self.clock.now() > verification.expires_at {
            return Err(Error::OtpExpired);
        }

        if !constant_time_eq::constant_time_eq(
            code.trim().as_bytes(),
            verification.code.as_bytes(),
        ) {
            // Increment first, then re-check the cap, so the locking guess
            // itself reports the lock rather than leaving one more try.
            let attempts = self.store.increment_attempts(verification.id).await?;
            metrics::counter!("guestflow_otp_rejected_total").increment(1);
            if attempts >= self.config.max_attempts {
                return Err(Error::TooManyAttempts);
            }
            return Err(Error::OtpMismatch);
        }

        let now = self.clock.now();
        self.store.mark_verified(verification.id, now).await?;

        let mut verified = verification;
        verified.verified = true;
        Ok(verified)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::stores::InMemoryVerificationStore;
    use chrono::Duration;
    use guestflow_core::environment::FixedClock;
    use guestflow_testing::test_clock;

    fn verifier(
        store: Arc<InMemoryVerificationStore>,
        clock: Arc<FixedClock>,
    ) -> OtpVerifier {
        OtpVerifier::new(store, clock, OtpConfig::default())
    }

    fn email() -> Email {
        Email::parse("guest@example.com").unwrap()
    }

    #[tokio::test]
    async fn issue_generates_six_digits() {
        let store = Arc::new(InMemoryVerificationStore::new());
        let otp = verifier(Arc::clone(&store), test_clock());

        let verification = otp
            .issue(&email(), VerificationPurpose::EventRegistration, None, None)
            .await
            .unwrap();
        assert_eq!(verification.code.len(), 6);
        assert!(verification.code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn issue_rate_limits_per_key() {
        let store = Arc::new(InMemoryVerificationStore::new());
        let clock = test_clock();
        let otp = verifier(Arc::clone(&store), Arc::clone(&clock));
        let purpose = VerificationPurpose::EventRegistration;

        for _ in 0..3 {
            otp.issue(&email(), purpose, None, None).await.unwrap();
        }
        let fourth = otp.issue(&email(), purpose, None, None).await;
        assert!(matches!(fourth, Err(Error::RateLimited { .. })));

        // A different key is unaffected
        let other = Email::parse("other@example.com").unwrap();
        assert!(otp.issue(&other, purpose, None, None).await.is_ok());

        // Outside the window the limit resets
        clock.advance(Duration::minutes(11));
        assert!(otp.issue(&email(), purpose, None, None).await.is_ok());
    }

    #[tokio::test]
    async fn correct_code_verifies_and_is_single_use() {
        let store = Arc::new(InMemoryVerificationStore::new());
        let otp = verifier(Arc::clone(&store), test_clock());
        let purpose = VerificationPurpose::EventRegistration;

        let issued = otp.issue(&email(), purpose, None, None).await.unwrap();
        let verified = otp
            .verify(&email(), purpose, None, &issued.code)
            .await
            .unwrap();
        assert!(verified.verified);

        // The row is now marked verified, so there is no active code left.
        let replay = otp.verify(&email(), purpose, None, &issued.code).await;
        assert!(matches!(replay, Err(Error::OtpNotFound)));
    }

    #[tokio::test]
    async fn fifth_wrong_guess_locks_and_correct_code_stays_locked() {
        let store = Arc::new(InMemoryVerificationStore::new());
        let otp = verifier(Arc::clone(&store), test_clock());
        let purpose = VerificationPurpose::EventRegistration;

        let issued = otp.issue(&email(), purpose, None, None).await.unwrap();
        let wrong = if issued.code == "000000" { "000001" } else { "000000" };

        for guess in 1..=4 {
            let result = otp.verify(&email(), purpose, None, wrong).await;
            assert!(
                matches!(result, Err(Error::OtpMismatch)),
                "guess {guess} should report a mismatch"
            );
        }

        // The fifth wrong guess crosses the cap and reports the lock
        let fifth = otp.verify(&email(), purpose, None, wrong).await;
        assert!(matches!(fifth, Err(Error::TooManyAttempts)));

        // Even the correct code is rejected now
        let sixth = otp.verify(&email(), purpose, None, &issued.code).await;
        assert!(matches!(sixth, Err(Error::TooManyAttempts)));
    }

    #[tokio::test]
    async fn expired_code_is_rejected() {
        let store = Arc::new(InMemoryVerificationStore::new());
        let clock = test_clock();
        let otp = verifier(Arc::clone(&store), Arc::clone(&clock));
        let purpose = VerificationPurpose::EventRegistration;

        let issued = otp.issue(&email(), purpose, None, None).await.unwrap();
        clock.advance(Duration::minutes(11));

        let result = otp.verify(&email(), purpose, None, &issued.code).await;
        assert!(matches!(result, Err(Error::OtpExpired)));
    }

    #[tokio::test]
    async fn missing_code_reports_not_found() {
        let store = Arc::new(InMemoryVerificationStore::new());
        let otp = verifier(store, test_clock());
        let result = otp
            .verify(
                &email(),
                VerificationPurpose::EventRegistration,
                None,
                "123456",
            )
            .await;
        assert!(matches!(result, Err(Error::OtpNotFound)));
    }
}
