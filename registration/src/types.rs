//! Domain types for the registration engine.
//!
//! Value objects, entities, and status enums. Identifiers are UUID newtypes;
//! money is cents-based to avoid floating point errors; registration and
//! payment statuses are explicit tagged variants so illegal transitions are a
//! structural impossibility rather than a runtime convention.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a registration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(Uuid);

impl RegistrationId {
    /// Creates a new random `RegistrationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `RegistrationId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a payment attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentId(Uuid);

impl PaymentId {
    /// Creates a new random `PaymentId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `PaymentId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an email verification row
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VerificationId(Uuid);

impl VerificationId {
    /// Creates a new random `VerificationId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for VerificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for VerificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an authenticated user
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(Uuid);

impl UserId {
    /// Creates a new random `UserId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `UserId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in minor units (cents) of the platform currency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole major units (dollars, euros, ...).
    ///
    /// Saturates on overflow; amounts anywhere near that range are rejected
    /// by validation long before they reach arithmetic.
    #[must_use]
    pub const fn from_major(units: u64) -> Self {
        Self(units.saturating_mul(100))
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Adds two money amounts, saturating at `u64::MAX` cents.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Takes a percentage of the amount, expressed in basis points
    /// (1 bps = 0.01%), rounded **half-up** to whole cents.
    ///
    /// This is the rounding the payment gateway contract requires: fees are
    /// rounded to two decimals before conversion to integer minor units.
    #[must_use]
    pub const fn percentage_half_up(self, basis_points: u32) -> Self {
        // u128 intermediate so cents * bps cannot overflow
        let product = self.0 as u128 * basis_points as u128;
        // A percentage of a u64 amount always fits back into u64
        #[allow(clippy::cast_possible_truncation)]
        let rounded = ((product + 5_000) / 10_000) as u64;
        Self(rounded)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Email Value Object
// ============================================================================

/// A lowercase-normalized email address.
///
/// Construction goes through [`Email::parse`], which trims, lowercases, and
/// applies basic RFC 5322 shape validation. Uniqueness per event is enforced
/// on the normalized form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    /// Parse and normalize an email address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] if the address is not a plausible email:
    /// exactly one `@`, non-empty local and domain parts, a dot in the
    /// domain, and total length between 3 and 255 characters.
    pub fn parse(input: &str) -> Result<Self> {
        let normalized = input.trim().to_lowercase();

        if normalized.len() < 3 || normalized.len() > 255 {
            return Err(Error::validation("email must be 3-255 characters"));
        }

        let mut parts = normalized.splitn(2, '@');
        let local = parts.next().unwrap_or_default();
        let domain = parts.next().unwrap_or_default();

        if local.is_empty() || domain.is_empty() || domain.contains('@') || !domain.contains('.') {
            return Err(Error::validation("invalid email address"));
        }

        Ok(Self(normalized))
    }

    /// The normalized address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Event
// ============================================================================

/// Whether an event limits attendee count.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Capacity {
    /// No limit on attendees
    Unlimited,
    /// At most `limit` active registrations
    Limited {
        /// Maximum number of active registrations
        limit: u32,
    },
}

/// Event lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Not yet visible; registration closed
    Draft,
    /// Open for registration
    Published,
    /// Cancelled by the host
    Cancelled,
}

/// The kind of answer a custom question accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    /// Free text
    Text,
    /// Exactly one of the listed options
    SingleChoice,
    /// Any subset of the listed options
    MultiChoice,
}

/// A custom question the host asks at registration time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    /// Stable key the answer is stored under
    pub id: String,
    /// Prompt shown to the registrant
    pub label: String,
    /// Whether an answer is mandatory
    pub required: bool,
    /// Answer kind
    pub question_type: QuestionType,
    /// Valid options for choice questions (empty for free text)
    pub options: Vec<String>,
}

/// An event, read-mostly from this engine's perspective.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event id
    pub id: EventId,
    /// URL-friendly public identifier
    pub short_id: String,
    /// Display title
    pub title: String,
    /// Venue name, if the event is physical
    pub venue: Option<String>,
    /// Start of the event
    pub starts_at: DateTime<Utc>,
    /// End of the event; registration closes at this instant
    pub ends_at: DateTime<Utc>,
    /// Lifecycle status
    pub status: EventStatus,
    /// Attendee limit
    pub capacity: Capacity,
    /// Ticket price; `None` for free events
    pub ticket_price: Option<Money>,
    /// ISO currency code for paid events
    pub currency: String,
    /// Whether registrations wait for host approval
    pub require_approval: bool,
    /// Custom questions asked at registration
    pub questions: Vec<QuestionDefinition>,
    /// Event creator
    pub created_by: UserId,
}

impl Event {
    /// Whether registering requires payment.
    #[must_use]
    pub const fn is_paid(&self) -> bool {
        self.ticket_price.is_some()
    }

    /// Whether the event currently accepts registrations.
    #[must_use]
    pub fn accepts_registrations(&self, now: DateTime<Utc>) -> bool {
        self.status == EventStatus::Published && now < self.ends_at
    }
}

// ============================================================================
// Registration
// ============================================================================

/// Registration lifecycle status.
///
/// `pending → approved → registered` (or `pending → registered` directly when
/// no approval is required), with `rejected` and `cancelled` reachable from
/// any non-terminal state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    /// Awaiting verification, payment, or approval
    Pending,
    /// Approved by the host, not yet fully registered
    Approved,
    /// Fully registered attendee
    Registered,
    /// Rejected by the host
    Rejected,
    /// Cancelled by the guest or host
    Cancelled,
}

impl RegistrationStatus {
    /// Whether this registration occupies a capacity slot.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::Registered)
    }

    /// Whether the status can still move forward.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Registered | Self::Rejected | Self::Cancelled)
    }

    /// Wire name of the status.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Registered => "registered",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Payment state carried on the registration row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPaymentStatus {
    /// Free event; no payment involved
    NotRequired,
    /// Checkout opened, settlement outstanding
    Pending,
    /// A payment attempt completed
    Completed,
    /// The completed payment was refunded
    Refunded,
}

/// One answer to a custom question, ordered as submitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Answer {
    /// Question key this answers
    pub question_id: String,
    /// Selected or entered values; one element for text/single-choice
    pub values: Vec<String>,
}

/// How an attendee was checked in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckinMethod {
    /// Host clicked the attendee row
    Manual,
    /// Host scanned the attendee's QR ticket
    QrScan,
}

/// An attendance record for one (event, email) pair.
///
/// Invariant: at most one non-cancelled registration per (event, normalized
/// email). Re-submission before verification overwrites the same row;
/// verified active registrations are returned idempotently.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Registration id
    pub id: RegistrationId,
    /// Owning event
    pub event_id: EventId,
    /// Authenticated registrant, if any; `None` for anonymous guests
    pub user_id: Option<UserId>,
    /// Normalized contact address; unique per event among active rows
    pub email: Email,
    /// Attendee display name
    pub name: String,
    /// Optional phone number
    pub phone: Option<String>,
    /// Optional social profile link
    pub social_link: Option<String>,
    /// Ordered custom-question answers
    pub answers: Vec<Answer>,
    /// Lifecycle status
    pub status: RegistrationStatus,
    /// Whether the email was OTP-verified
    pub email_verified: bool,
    /// When the email was verified
    pub email_verified_at: Option<DateTime<Utc>>,
    /// Payment state for this registration
    pub payment_status: RegistrationPaymentStatus,
    /// Opaque QR ticket payload, once issued
    pub qr_code: Option<String>,
    /// Whether the attendee was checked in at the door
    pub checked_in: bool,
    /// When the attendee was checked in
    pub checked_in_at: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Registration {
    /// Whether a completed payment is recorded for this registration.
    #[must_use]
    pub const fn payment_completed(&self) -> bool {
        matches!(self.payment_status, RegistrationPaymentStatus::Completed)
    }
}

// ============================================================================
// Email verification
// ============================================================================

/// What an OTP code proves control of.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationPurpose {
    /// Account-level email verification
    Account,
    /// Verification of a specific event registration
    EventRegistration,
}

impl VerificationPurpose {
    /// Wire name of the purpose.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Account => "account",
            Self::EventRegistration => "event_registration",
        }
    }
}

/// A server-side OTP record. Kept (marked verified) after use, for audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailVerification {
    /// Row id
    pub id: VerificationId,
    /// Address the code was sent to
    pub email: Email,
    /// What the code proves
    pub purpose: VerificationPurpose,
    /// Event scope, for registration codes
    pub event_id: Option<EventId>,
    /// Registration the code belongs to, when known
    pub registration_id: Option<RegistrationId>,
    /// The 6-digit code
    pub code: String,
    /// Expiry instant
    pub expires_at: DateTime<Utc>,
    /// Whether the code was successfully used
    pub verified: bool,
    /// Failed comparison count
    pub attempts: u32,
    /// Issue time; drives the issue rate limit
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Payments
// ============================================================================

/// Itemized fee breakdown for one checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    /// Ticket face value
    pub ticket: Money,
    /// Platform fee (percentage of ticket)
    pub platform_fee: Money,
    /// Processing fee (fixed + percentage of ticket)
    pub processing_fee: Money,
    /// Sum of the above; what the guest is charged
    pub total: Money,
}

/// Status of one payment attempt row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    /// Checkout session opened, awaiting settlement
    Pending,
    /// Gateway reported success
    Completed,
    /// Gateway reported failure; the guest may retry checkout
    Failed,
    /// Refund completed
    Refunded,
}

/// One payment attempt. A registration may accumulate several; at most one
/// reaches `completed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Payment id
    pub id: PaymentId,
    /// Owning registration
    pub registration_id: RegistrationId,
    /// Charged amount (breakdown total)
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Itemized fees
    pub breakdown: FeeBreakdown,
    /// Gateway checkout-session id
    pub checkout_session_id: Option<String>,
    /// Gateway payment id, once known
    pub gateway_payment_id: Option<String>,
    /// Attempt status
    pub state: PaymentState,
    /// Gateway refund id, once refunded
    pub refund_id: Option<String>,
    /// When the receipt email went out; at-most-once guard
    pub receipt_sent_at: Option<DateTime<Utc>>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Payment {
    /// Whether this attempt is still open (may settle).
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self.state, PaymentState::Pending)
    }
}

// ============================================================================
// QR payload
// ============================================================================

/// The JSON structure encoded into a scannable ticket code.
///
/// Self-verifying: any holder of the server secret can validate a scanned
/// payload by recomputing the checksum, without a database read.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    /// Event the ticket admits to
    pub event_id: EventId,
    /// Registration the ticket belongs to
    pub registration_id: RegistrationId,
    /// Stable pseudonymous attendee id
    pub guest_id: String,
    /// Truncated SHA-256 over the other fields plus the server secret
    pub checksum: String,
}

// ============================================================================
// Viewer (authorization context)
// ============================================================================

/// Who is making a request. Anonymous guests carry only an email claim.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Viewer {
    /// Authenticated user id, if signed in
    pub user_id: Option<UserId>,
    /// Email the caller has demonstrated control of (or asserts, for reads
    /// that re-verify downstream)
    pub email: Option<Email>,
}

impl Viewer {
    /// A signed-in viewer.
    #[must_use]
    pub const fn user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            email: None,
        }
    }

    /// An anonymous viewer identified by email.
    #[must_use]
    pub const fn guest(email: Email) -> Self {
        Self {
            user_id: None,
            email: Some(email),
        }
    }

    /// Whether this viewer owns the given registration, by user id or by
    /// matching normalized email.
    #[must_use]
    pub fn owns(&self, registration: &Registration) -> bool {
        let same_user = match (self.user_id, registration.user_id) {
            (Some(viewer), Some(owner)) => viewer == owner,
            _ => false,
        };
        if same_user {
            return true;
        }
        self.email
            .as_ref()
            .is_some_and(|email| *email == registration.email)
    }
}
