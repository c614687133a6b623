//! Persistence traits and implementations.
//!
//! The engine talks to storage through these traits only. Two families ship
//! in-tree: in-memory stores ([`memory`]) used by tests and local wiring, and
//! PostgreSQL stores ([`postgres`]) for production.
//!
//! The concurrency-sensitive operations are part of the trait contract, not
//! an implementation detail:
//!
//! - [`RegistrationStore::admit`] runs the capacity check and the row upsert
//!   in one atomic step,
//! - [`PaymentStore::create_open`] keeps at most one open payment per
//!   registration and returns the existing one instead of duplicating,
//! - [`RegistrationStore::check_in_once`] is a compare-and-swap that stamps
//!   check-in exactly once,
//! - [`VerificationStore::increment_attempts`] increments and returns the new
//!   counter atomically.

pub mod memory;
pub mod postgres;

pub use memory::{
    InMemoryEventRepository, InMemoryPaymentStore, InMemoryRegistrationStore,
    InMemoryVerificationStore,
};
pub use postgres::{
    PostgresEventRepository, PostgresPaymentStore, PostgresRegistrationStore,
    PostgresVerificationStore,
};

use crate::error::Result;
use crate::types::{
    Capacity, Email, EmailVerification, Event, EventId, Payment, PaymentId, Registration,
    RegistrationId, UserId, VerificationId, VerificationPurpose,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Read access to events and host membership, for validation and
/// authorization. Event CRUD itself is out of scope for this engine.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Look up an event by its public short id.
    async fn by_short_id(&self, short_id: &str) -> Result<Option<Event>>;

    /// Look up an event by id.
    async fn by_id(&self, event_id: EventId) -> Result<Option<Event>>;

    /// Whether `user_id` is a host of `event_id`.
    async fn is_host(&self, event_id: EventId, user_id: UserId) -> Result<bool>;
}

/// Result of an atomic admission attempt.
#[derive(Clone, Debug)]
pub struct AdmitOutcome {
    /// The row now stored for this (event, email)
    pub registration: Registration,
    /// `true` when a verified active registration already existed and was
    /// returned instead of being overwritten
    pub already_registered: bool,
}

/// Result of opening a payment attempt.
#[derive(Clone, Debug)]
pub struct CreateOpenOutcome {
    /// The open payment row for this registration
    pub payment: Payment,
    /// `false` when an open attempt already existed and was reused
    pub created: bool,
}

/// Storage for registration rows.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Fetch a registration by id.
    async fn get(&self, id: RegistrationId) -> Result<Option<Registration>>;

    /// Fetch the registration for an (event, normalized email) pair, if any
    /// non-cancelled row exists.
    async fn find_by_event_and_email(
        &self,
        event_id: EventId,
        email: &Email,
    ) -> Result<Option<Registration>>;

    /// Count registrations occupying a capacity slot, optionally excluding
    /// one row (the caller's own prior registration).
    async fn count_active(
        &self,
        event_id: EventId,
        exclude: Option<RegistrationId>,
    ) -> Result<u32>;

    /// Atomically admit a registration against the event's capacity.
    ///
    /// In one critical section: counts active rows (excluding any existing
    /// row for the same email), rejects with [`crate::Error::SoldOut`] when a
    /// limited event is full, and otherwise upserts. An existing unverified
    /// row for the same email is overwritten in place (re-submission); an
    /// existing verified active row is returned untouched with
    /// `already_registered = true`.
    async fn admit(&self, registration: Registration, capacity: Capacity)
    -> Result<AdmitOutcome>;

    /// Persist an updated registration row.
    async fn update(&self, registration: &Registration) -> Result<()>;

    /// Stamp check-in exactly once (compare-and-swap on `checked_in`).
    ///
    /// Returns the updated row; fails with [`crate::Error::Conflict`] when
    /// the registration is already checked in, never silently re-stamping.
    async fn check_in_once(
        &self,
        id: RegistrationId,
        at: DateTime<Utc>,
    ) -> Result<Registration>;
}

/// Storage for payment attempt rows.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Fetch a payment by id.
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>>;

    /// The most recently created payment for a registration, if any.
    async fn latest_for_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<Payment>>;

    /// The completed payment for a registration, if one exists.
    async fn completed_for_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<Payment>>;

    /// Find a payment by gateway payment id or checkout-session id.
    async fn find_by_gateway_refs(
        &self,
        gateway_payment_id: Option<&str>,
        checkout_session_id: Option<&str>,
    ) -> Result<Option<Payment>>;

    /// Open a payment attempt, keeping at most one open attempt per
    /// registration. A concurrent or repeated open returns the existing row
    /// with `created = false` instead of inserting a duplicate.
    async fn create_open(&self, payment: Payment) -> Result<CreateOpenOutcome>;

    /// Persist an updated payment row.
    async fn update(&self, payment: &Payment) -> Result<()>;
}

/// Storage for email verification (OTP) rows.
#[async_trait]
pub trait VerificationStore: Send + Sync {
    /// Insert a freshly issued code.
    async fn insert(&self, verification: EmailVerification) -> Result<()>;

    /// The newest unverified code for (email, purpose, event), if any.
    async fn latest_active(
        &self,
        email: &Email,
        purpose: VerificationPurpose,
        event_id: Option<EventId>,
    ) -> Result<Option<EmailVerification>>;

    /// How many codes were issued for (email, purpose, event) since `since`.
    async fn count_issued_since(
        &self,
        email: &Email,
        purpose: VerificationPurpose,
        event_id: Option<EventId>,
        since: DateTime<Utc>,
    ) -> Result<u32>;

    /// Atomically increment the attempt counter, returning the new value.
    async fn increment_attempts(&self, id: VerificationId) -> Result<u32>;

    /// Mark a code as successfully used. Rows are kept for audit.
    async fn mark_verified(&self, id: VerificationId, at: DateTime<Utc>) -> Result<()>;
}
