//! In-memory store implementations.
//!
//! Used by tests and local development wiring. The mutex-guarded maps make
//! the atomicity contracts real: admission, payment opening, check-in, and
//! attempt counting each happen under one lock acquisition, so the
//! concurrency properties the traits promise hold here exactly as they do in
//! Postgres.

use crate::capacity::ensure_capacity;
use crate::error::{Error, Result};
use crate::stores::{
    AdmitOutcome, CreateOpenOutcome, EventRepository, PaymentStore, RegistrationStore,
    VerificationStore,
};
use crate::types::{
    Capacity, Email, EmailVerification, Event, EventId, Payment, PaymentId, PaymentState,
    Registration, RegistrationId, UserId, VerificationId, VerificationPurpose,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Propagating poison would turn one panicked test into cascading
    // failures; the data is still consistent for these simple maps.
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ============================================================================
// Events
// ============================================================================

/// In-memory event repository with seeding helpers.
#[derive(Clone, Default)]
pub struct InMemoryEventRepository {
    inner: Arc<Mutex<EventsInner>>,
}

#[derive(Default)]
struct EventsInner {
    events: HashMap<EventId, Event>,
    hosts: HashMap<EventId, HashSet<UserId>>,
}

impl InMemoryEventRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an event. The creator is registered as a host.
    pub fn insert_event(&self, event: Event) {
        let mut inner = lock(&self.inner);
        inner
            .hosts
            .entry(event.id)
            .or_default()
            .insert(event.created_by);
        inner.events.insert(event.id, event);
    }

    /// Grant host access to a user.
    pub fn add_host(&self, event_id: EventId, user_id: UserId) {
        lock(&self.inner).hosts.entry(event_id).or_default().insert(user_id);
    }
}

#[async_trait]
impl EventRepository for InMemoryEventRepository {
    async fn by_short_id(&self, short_id: &str) -> Result<Option<Event>> {
        Ok(lock(&self.inner)
            .events
            .values()
            .find(|event| event.short_id == short_id)
            .cloned())
    }

    async fn by_id(&self, event_id: EventId) -> Result<Option<Event>> {
        Ok(lock(&self.inner).events.get(&event_id).cloned())
    }

    async fn is_host(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        Ok(lock(&self.inner)
            .hosts
            .get(&event_id)
            .is_some_and(|hosts| hosts.contains(&user_id)))
    }
}

// ============================================================================
// Registrations
// ============================================================================

/// In-memory registration store.
#[derive(Clone, Default)]
pub struct InMemoryRegistrationStore {
    inner: Arc<Mutex<HashMap<RegistrationId, Registration>>>,
}

impl InMemoryRegistrationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn active_count_locked(
        rows: &HashMap<RegistrationId, Registration>,
        event_id: EventId,
        exclude: Option<RegistrationId>,
    ) -> u32 {
        u32::try_from(
            rows.values()
                .filter(|row| {
                    row.event_id == event_id
                        && row.status.is_active()
                        && exclude.is_none_or(|excluded| row.id != excluded)
                })
                .count(),
        )
        .unwrap_or(u32::MAX)
    }
}

#[async_trait]
impl RegistrationStore for InMemoryRegistrationStore {
    async fn get(&self, id: RegistrationId) -> Result<Option<Registration>> {
        Ok(lock(&self.inner).get(&id).cloned())
    }

    async fn find_by_event_and_email(
        &self,
        event_id: EventId,
        email: &Email,
    ) -> Result<Option<Registration>> {
        Ok(lock(&self.inner)
            .values()
            .find(|row| {
                row.event_id == event_id
                    && row.email == *email
                    && row.status != crate::types::RegistrationStatus::Cancelled
            })
            .cloned())
    }

    async fn count_active(
        &self,
        event_id: EventId,
        exclude: Option<RegistrationId>,
    ) -> Result<u32> {
        Ok(Self::active_count_locked(&lock(&self.inner), event_id, exclude))
    }

    async fn admit(
        &self,
        registration: Registration,
        capacity: Capacity,
    ) -> Result<AdmitOutcome> {
        // One lock acquisition covers the find, the count, and the upsert,
        // which is what makes this admission atomic.
        let mut rows = lock(&self.inner);

        let existing = rows
            .values()
            .find(|row| {
                row.event_id == registration.event_id
                    && row.email == registration.email
                    && row.status.is_active()
            })
            .cloned();

        if let Some(existing) = existing {
            if existing.email_verified {
                return Ok(AdmitOutcome {
                    registration: existing,
                    already_registered: true,
                });
            }
            // Re-submission before verification overwrites the same row.
            let mut replacement = registration;
            replacement.id = existing.id;
            replacement.created_at = existing.created_at;
            rows.insert(replacement.id, replacement.clone());
            return Ok(AdmitOutcome {
                registration: replacement,
                already_registered: false,
            });
        }

        let active = Self::active_count_locked(&rows, registration.event_id, None);
        ensure_capacity(capacity, active)?;

        rows.insert(registration.id, registration.clone());
        Ok(AdmitOutcome {
            registration,
            already_registered: false,
        })
    }

    async fn update(&self, registration: &Registration) -> Result<()> {
        let mut rows = lock(&self.inner);
        if !rows.contains_key(&registration.id) {
            return Err(Error::NotFound {
                resource: "registration",
            });
        }
        rows.insert(registration.id, registration.clone());
        Ok(())
    }

    async fn check_in_once(
        &self,
        id: RegistrationId,
        at: DateTime<Utc>,
    ) -> Result<Registration> {
        let mut rows = lock(&self.inner);
        let row = rows.get_mut(&id).ok_or(Error::NotFound {
            resource: "registration",
        })?;
        if row.checked_in {
            return Err(Error::conflict("registration is already checked in"));
        }
        row.checked_in = true;
        row.checked_in_at = Some(at);
        row.updated_at = at;
        Ok(row.clone())
    }
}

// ============================================================================
// Payments
// ============================================================================

/// In-memory payment store.
#[derive(Clone, Default)]
pub struct InMemoryPaymentStore {
    inner: Arc<Mutex<HashMap<PaymentId, Payment>>>,
}

impl InMemoryPaymentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(lock(&self.inner).get(&id).cloned())
    }

    async fn latest_for_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<Payment>> {
        Ok(lock(&self.inner)
            .values()
            .filter(|payment| payment.registration_id == registration_id)
            .max_by_key(|payment| payment.created_at)
            .cloned())
    }

    async fn completed_for_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<Payment>> {
        Ok(lock(&self.inner)
            .values()
            .find(|payment| {
                payment.registration_id == registration_id
                    && payment.state == PaymentState::Completed
            })
            .cloned())
    }

    async fn find_by_gateway_refs(
        &self,
        gateway_payment_id: Option<&str>,
        checkout_session_id: Option<&str>,
    ) -> Result<Option<Payment>> {
        Ok(lock(&self.inner)
            .values()
            .find(|payment| {
                let by_payment = match (gateway_payment_id, &payment.gateway_payment_id) {
                    (Some(wanted), Some(stored)) => wanted == stored,
                    _ => false,
                };
                let by_session = match (checkout_session_id, &payment.checkout_session_id) {
                    (Some(wanted), Some(stored)) => wanted == stored,
                    _ => false,
                };
                by_payment || by_session
            })
            .cloned())
    }

    async fn create_open(&self, payment: Payment) -> Result<CreateOpenOutcome> {
        // Find-or-insert under one lock: the unique-open-payment constraint,
        // not an application-level read check.
        let mut rows = lock(&self.inner);

        let existing_open = rows
            .values()
            .find(|row| row.registration_id == payment.registration_id && row.is_open())
            .cloned();

        if let Some(existing) = existing_open {
            return Ok(CreateOpenOutcome {
                payment: existing,
                created: false,
            });
        }

        rows.insert(payment.id, payment.clone());
        Ok(CreateOpenOutcome {
            payment,
            created: true,
        })
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        let mut rows = lock(&self.inner);
        if !rows.contains_key(&payment.id) {
            return Err(Error::NotFound {
                resource: "payment",
            });
        }
        rows.insert(payment.id, payment.clone());
        Ok(())
    }
}

// ============================================================================
// Email verifications
// ============================================================================

/// In-memory verification store.
#[derive(Clone, Default)]
pub struct InMemoryVerificationStore {
    inner: Arc<Mutex<HashMap<VerificationId, EmailVerification>>>,
}

impl InMemoryVerificationStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn key_matches(
    row: &EmailVerification,
    email: &Email,
    purpose: VerificationPurpose,
    event_id: Option<EventId>,
) -> bool {
    row.email == *email && row.purpose == purpose && row.event_id == event_id
}

#[async_trait]
impl VerificationStore for InMemoryVerificationStore {
    async fn insert(&self, verification: EmailVerification) -> Result<()> {
        lock(&self.inner).insert(verification.id, verification);
        Ok(())
    }

    async fn latest_active(
        &self,
        email: &Email,
        purpose: VerificationPurpose,
        event_id: Option<EventId>,
    ) -> Result<Option<EmailVerification>> {
        Ok(lock(&self.inner)
            .values()
            .filter(|row| key_matches(row, email, purpose, event_id) && !row.verified)
            .max_by_key(|row| row.created_at)
            .cloned())
    }

    async fn count_issued_since(
        &self,
        email: &Email,
        purpose: VerificationPurpose,
        event_id: Option<EventId>,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        Ok(u32::try_from(
            lock(&self.inner)
                .values()
                .filter(|row| key_matches(row, email, purpose, event_id) && row.created_at >= since)
                .count(),
        )
        .unwrap_or(u32::MAX))
    }

    async fn increment_attempts(&self, id: VerificationId) -> Result<u32> {
        let mut rows = lock(&self.inner);
        let row = rows.get_mut(&id).ok_or(Error::OtpNotFound)?;
        row.attempts += 1;
        Ok(row.attempts)
    }

    async fn mark_verified(&self, id: VerificationId, at: DateTime<Utc>) -> Result<()> {
        let mut rows = lock(&self.inner);
        let row = rows.get_mut(&id).ok_or(Error::OtpNotFound)?;
        row.verified = true;
        row.expires_at = row.expires_at.max(at);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{RegistrationPaymentStatus, RegistrationStatus};

    fn registration(event_id: EventId, email: &str) -> Registration {
        Registration {
            id: RegistrationId::new(),
            event_id,
            user_id: None,
            email: Email::parse(email).unwrap(),
            name: "Guest".to_string(),
            phone: None,
            social_link: None,
            answers: Vec::new(),
            status: RegistrationStatus::Pending,
            email_verified: false,
            email_verified_at: None,
            payment_status: RegistrationPaymentStatus::NotRequired,
            qr_code: None,
            checked_in: false,
            checked_in_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn admit_enforces_the_limit_under_concurrency() {
        let store = Arc::new(InMemoryRegistrationStore::new());
        let event_id = EventId::new();
        let capacity = Capacity::Limited { limit: 5 };

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .admit(
                        registration(event_id, &format!("guest{i}@example.com")),
                        capacity,
                    )
                    .await
            }));
        }

        let mut admitted = 0;
        let mut sold_out = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(Error::SoldOut) => sold_out += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(admitted, 5);
        assert_eq!(sold_out, 15);
        assert_eq!(store.count_active(event_id, None).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn admit_overwrites_unverified_resubmission() {
        let store = InMemoryRegistrationStore::new();
        let event_id = EventId::new();
        let capacity = Capacity::Limited { limit: 1 };

        let first = store
            .admit(registration(event_id, "guest@example.com"), capacity)
            .await
            .unwrap();
        assert!(!first.already_registered);

        // Same email again while unverified: same row id, still one slot used
        let mut resubmission = registration(event_id, "guest@example.com");
        resubmission.name = "Guest Renamed".to_string();
        let second = store.admit(resubmission, capacity).await.unwrap();
        assert!(!second.already_registered);
        assert_eq!(second.registration.id, first.registration.id);
        assert_eq!(second.registration.name, "Guest Renamed");
        assert_eq!(store.count_active(event_id, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn admit_returns_verified_rows_idempotently() {
        let store = InMemoryRegistrationStore::new();
        let event_id = EventId::new();

        let mut verified = registration(event_id, "guest@example.com");
        verified.email_verified = true;
        verified.status = RegistrationStatus::Registered;
        let stored = store
            .admit(verified, Capacity::Unlimited)
            .await
            .unwrap()
            .registration;

        let outcome = store
            .admit(registration(event_id, "guest@example.com"), Capacity::Unlimited)
            .await
            .unwrap();
        assert!(outcome.already_registered);
        assert_eq!(outcome.registration.id, stored.id);
        assert_eq!(outcome.registration.status, RegistrationStatus::Registered);
    }

    #[tokio::test]
    async fn check_in_is_exactly_once() {
        let store = InMemoryRegistrationStore::new();
        let row = store
            .admit(registration(EventId::new(), "guest@example.com"), Capacity::Unlimited)
            .await
            .unwrap()
            .registration;

        let first = store.check_in_once(row.id, Utc::now()).await.unwrap();
        assert!(first.checked_in);

        let second = store.check_in_once(row.id, Utc::now()).await;
        assert!(matches!(second, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn one_open_payment_per_registration() {
        let store = InMemoryPaymentStore::new();
        let registration_id = RegistrationId::new();
        let breakdown = crate::pricing::FeeSchedule::default()
            .breakdown(crate::types::Money::from_cents(2000))
            .unwrap();

        let payment = |id: PaymentId| Payment {
            id,
            registration_id,
            amount: breakdown.total,
            currency: "usd".to_string(),
            breakdown,
            checkout_session_id: Some("cs_1".to_string()),
            gateway_payment_id: None,
            state: PaymentState::Pending,
            refund_id: None,
            receipt_sent_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let first = store.create_open(payment(PaymentId::new())).await.unwrap();
        assert!(first.created);

        let second = store.create_open(payment(PaymentId::new())).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.payment.id, first.payment.id);
    }

    #[tokio::test]
    async fn attempt_counter_is_atomic_per_call() {
        let store = InMemoryVerificationStore::new();
        let verification = EmailVerification {
            id: VerificationId::new(),
            email: Email::parse("guest@example.com").unwrap(),
            purpose: VerificationPurpose::EventRegistration,
            event_id: None,
            registration_id: None,
            code: "123456".to_string(),
            expires_at: Utc::now() + chrono::Duration::minutes(10),
            verified: false,
            attempts: 0,
            created_at: Utc::now(),
        };
        store.insert(verification.clone()).await.unwrap();

        for expected in 1..=5 {
            let count = store.increment_attempts(verification.id).await.unwrap();
            assert_eq!(count, expected);
        }
    }
}
