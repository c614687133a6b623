//! Checksum-signed QR ticket issuance.
//!
//! The QR payload is self-verifying: `checksum` is a truncated SHA-256 over
//! the identifying fields plus the server secret, so any party holding the
//! secret can validate a scanned payload by recomputing it, with no database
//! round trip. A registration row lookup is still needed to check current
//! status and check-in state.

use crate::error::{Error, Result};
use crate::types::{Email, QrPayload, Registration, RegistrationStatus};
use sha2::{Digest, Sha256};

/// Hex characters kept from the checksum and guest-id digests.
const DIGEST_PREFIX_LEN: usize = 16;

/// Derives and validates QR ticket payloads.
#[derive(Clone)]
pub struct TicketIssuer {
    secret: String,
}

impl TicketIssuer {
    /// Create an issuer signing with `secret`.
    #[must_use]
    pub const fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Stable pseudonymous attendee id for a registration.
    ///
    /// Authenticated users get their user id; anonymous guests get a
    /// truncated hash of the normalized email so the QR code never carries
    /// the address itself.
    #[must_use]
    pub fn guest_id(registration: &Registration) -> String {
        registration.user_id.map_or_else(
            || Self::hashed_guest_id(&registration.email),
            |user_id| user_id.to_string(),
        )
    }

    fn hashed_guest_id(email: &Email) -> String {
        let digest = Sha256::digest(email.as_str().as_bytes());
        hex::encode(digest)[..DIGEST_PREFIX_LEN].to_string()
    }

    fn checksum_for(&self, payload: &QrPayload) -> String {
        let input = format!(
            "{}:{}:{}:{}",
            payload.event_id, payload.registration_id, payload.guest_id, self.secret
        );
        let digest = Sha256::digest(input.as_bytes());
        hex::encode(digest)[..DIGEST_PREFIX_LEN].to_string()
    }

    /// Build a fresh, signed payload for a registration.
    #[must_use]
    pub fn payload_for(&self, registration: &Registration) -> QrPayload {
        let mut payload = QrPayload {
            event_id: registration.event_id,
            registration_id: registration.id,
            guest_id: Self::guest_id(registration),
            checksum: String::new(),
        };
        payload.checksum = self.checksum_for(&payload);
        payload
    }

    /// Canonical string form of a payload (compact JSON).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the payload cannot be serialized,
    /// which only happens for corrupted data.
    pub fn encode(payload: &QrPayload) -> Result<String> {
        serde_json::to_string(payload)
            .map_err(|e| Error::validation(format!("unencodable QR payload: {e}")))
    }

    /// Parse a scanned code back into a payload. Does **not** validate the
    /// checksum; pair with [`TicketIssuer::validate`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed codes.
    pub fn decode(code: &str) -> Result<QrPayload> {
        serde_json::from_str(code).map_err(|_| Error::validation("malformed QR code"))
    }

    /// Whether a payload's checksum verifies against the server secret.
    #[must_use]
    pub fn validate(&self, payload: &QrPayload) -> bool {
        constant_time_eq::constant_time_eq(
            self.checksum_for(payload).as_bytes(),
            payload.checksum.as_bytes(),
        )
    }

    /// Return the registration's canonical QR code, generating and signing a
    /// fresh one only when the stored code is missing, malformed, or no
    /// longer validates for this registration.
    ///
    /// The `bool` is `true` when a new code was generated and the row needs
    /// persisting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if a fresh payload cannot be encoded.
    pub fn ensure_qr_code(&self, registration: &Registration) -> Result<(String, bool)> {
        if let Some(existing) = &registration.qr_code {
            if let Ok(payload) = Self::decode(existing) {
                let belongs_here = payload.event_id == registration.event_id
                    && payload.registration_id == registration.id;
                if belongs_here && self.validate(&payload) {
                    return Ok((existing.clone(), false));
                }
            }
        }

        let fresh = Self::encode(&self.payload_for(registration))?;
        Ok((fresh, true))
    }

    /// Whether a scanned payload admits the given registration.
    ///
    /// Checks the checksum and that the payload points at this exact row.
    #[must_use]
    pub fn matches_registration(&self, payload: &QrPayload, registration: &Registration) -> bool {
        self.validate(payload)
            && payload.event_id == registration.event_id
            && payload.registration_id == registration.id
    }
}

/// Whether a registration may receive a ticket at all.
#[must_use]
pub const fn is_ticket_eligible(registration: &Registration) -> bool {
    registration.email_verified
        && matches!(
            registration.status,
            RegistrationStatus::Approved | RegistrationStatus::Registered
        )
}

/// Human-readable fields embedded in a printable ticket document.
#[derive(Clone, Debug, PartialEq)]
pub struct TicketDocument {
    /// Event title
    pub event_title: String,
    /// Venue line, when the event is physical
    pub venue: Option<String>,
    /// Event start, for display
    pub starts_at: chrono::DateTime<chrono::Utc>,
    /// Attendee name
    pub attendee_name: String,
    /// Attendee email
    pub attendee_email: String,
    /// The canonical QR code string
    pub qr_code: String,
}
