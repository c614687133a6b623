//! PostgreSQL store implementations.
//!
//! Domain rows are stored as JSONB (their serde form) with the columns the
//! engine filters or locks on denormalized alongside. Writes keep column and
//! JSONB in sync; reads deserialize the JSONB.
//!
//! The atomicity contracts map onto database primitives:
//!
//! - admission takes a per-event advisory transaction lock before counting
//!   and upserting, backed by a partial unique index on active
//!   (`event_id`, `email`) pairs,
//! - one open payment per registration is a partial unique index; a
//!   conflicting insert falls back to returning the existing open row,
//! - check-in is `UPDATE ... WHERE checked_in = FALSE`,
//! - the OTP attempt counter increments with `RETURNING attempts`.

use crate::capacity::ensure_capacity;
use crate::error::{Error, Result};
use crate::stores::{
    AdmitOutcome, CreateOpenOutcome, EventRepository, PaymentStore, RegistrationStore,
    VerificationStore,
};
use crate::types::{
    Capacity, Email, EmailVerification, Event, EventId, Payment, PaymentId, Registration,
    RegistrationId, UserId, VerificationId, VerificationPurpose,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::JsonValue;

fn db_err(context: &str, error: sqlx::Error) -> Error {
    Error::Database(format!("{context}: {error}"))
}

fn decode<T: serde::de::DeserializeOwned>(resource: &'static str, json: JsonValue) -> Result<T> {
    serde_json::from_value(json)
        .map_err(|e| Error::Database(format!("corrupt {resource} row: {e}")))
}

fn encode<T: serde::Serialize>(resource: &'static str, value: &T) -> Result<JsonValue> {
    serde_json::to_value(value)
        .map_err(|e| Error::Database(format!("unencodable {resource} row: {e}")))
}

/// Run schema migrations for all stores.
///
/// # Errors
///
/// Returns [`Error::Database`] when a migration fails.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| Error::Database(format!("migration failed: {e}")))
}

// ============================================================================
// Events
// ============================================================================

/// PostgreSQL event repository.
#[derive(Clone)]
pub struct PostgresEventRepository {
    pool: PgPool,
}

impl PostgresEventRepository {
    /// Create a repository over a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Seed or replace an event row (used by fixtures and the host surface).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] when the write fails.
    pub async fn upsert_event(&self, event: &Event) -> Result<()> {
        let data = encode("event", event)?;
        sqlx::query(
            "INSERT INTO events (id, short_id, created_by, data)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET short_id = EXCLUDED.short_id, data = EXCLUDED.data",
        )
        .bind(event.id.as_uuid())
        .bind(&event.short_id)
        .bind(event.created_by.as_uuid())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to upsert event", e))?;
        Ok(())
    }
}

#[async_trait]
impl EventRepository for PostgresEventRepository {
    async fn by_short_id(&self, short_id: &str) -> Result<Option<Event>> {
        let row: Option<(JsonValue,)> =
            sqlx::query_as("SELECT data FROM events WHERE short_id = $1")
                .bind(short_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_err("failed to load event", e))?;
        row.map(|(json,)| decode("event", json)).transpose()
    }

    async fn by_id(&self, event_id: EventId) -> Result<Option<Event>> {
        let row: Option<(JsonValue,)> = sqlx::query_as("SELECT data FROM events WHERE id = $1")
            .bind(event_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to load event", e))?;
        row.map(|(json,)| decode("event", json)).transpose()
    }

    async fn is_host(&self, event_id: EventId, user_id: UserId) -> Result<bool> {
        let row: (bool,) = sqlx::query_as(
            "SELECT EXISTS(
                SELECT 1 FROM event_hosts WHERE event_id = $1 AND user_id = $2
             ) OR EXISTS(
                SELECT 1 FROM events WHERE id = $1 AND created_by = $2
             )",
        )
        .bind(event_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("failed to check host access", e))?;
        Ok(row.0)
    }
}

// ============================================================================
// Registrations
// ============================================================================

/// PostgreSQL registration store.
#[derive(Clone)]
pub struct PostgresRegistrationStore {
    pool: PgPool,
}

impl PostgresRegistrationStore {
    /// Create a store over a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write<'e, E>(executor: E, registration: &Registration) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Postgres>,
    {
        let data = encode("registration", registration)?;
        sqlx::query(
            "INSERT INTO registrations
                 (id, event_id, email, status, checked_in, created_at, data)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (id) DO UPDATE
             SET email = EXCLUDED.email,
                 status = EXCLUDED.status,
                 checked_in = EXCLUDED.checked_in,
                 data = EXCLUDED.data",
        )
        .bind(registration.id.as_uuid())
        .bind(registration.event_id.as_uuid())
        .bind(registration.email.as_str())
        .bind(registration.status.as_str())
        .bind(registration.checked_in)
        .bind(registration.created_at)
        .bind(data)
        .execute(executor)
        .await
        .map_err(|e| db_err("failed to write registration", e))?;
        Ok(())
    }
}

#[async_trait]
impl RegistrationStore for PostgresRegistrationStore {
    async fn get(&self, id: RegistrationId) -> Result<Option<Registration>> {
        let row: Option<(JsonValue,)> =
            sqlx::query_as("SELECT data FROM registrations WHERE id = $1")
                .bind(id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| db_err("failed to load registration", e))?;
        row.map(|(json,)| decode("registration", json)).transpose()
    }

    async fn find_by_event_and_email(
        &self,
        event_id: EventId,
        email: &Email,
    ) -> Result<Option<Registration>> {
        let row: Option<(JsonValue,)> = sqlx::query_as(
            "SELECT data FROM registrations
             WHERE event_id = $1 AND email = $2 AND status <> 'cancelled'
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(event_id.as_uuid())
        .bind(email.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to load registration", e))?;
        row.map(|(json,)| decode("registration", json)).transpose()
    }

    async fn count_active(
        &self,
        event_id: EventId,
        exclude: Option<RegistrationId>,
    ) -> Result<u32> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM registrations
             WHERE event_id = $1
               AND status IN ('pending', 'approved', 'registered')
               AND ($2::uuid IS NULL OR id <> $2)",
        )
        .bind(event_id.as_uuid())
        .bind(exclude.map(|id| *id.as_uuid()))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("failed to count registrations", e))?;
        Ok(u32::try_from(row.0).unwrap_or(u32::MAX))
    }

    async fn admit(
        &self,
        registration: Registration,
        capacity: Capacity,
    ) -> Result<AdmitOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("failed to begin admission", e))?;

        // Serialize admissions per event for the rest of this transaction.
        // An advisory lock works whether or not an events row exists, unlike
        // SELECT ... FOR UPDATE on the event itself.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1::text))")
            .bind(registration.event_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_err("failed to lock event", e))?;

        let existing: Option<(JsonValue,)> = sqlx::query_as(
            "SELECT data FROM registrations
             WHERE event_id = $1 AND email = $2
               AND status IN ('pending', 'approved', 'registered')
             LIMIT 1",
        )
        .bind(registration.event_id.as_uuid())
        .bind(registration.email.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("failed to probe registration", e))?;

        if let Some((json,)) = existing {
            let existing: Registration = decode("registration", json)?;
            if existing.email_verified {
                tx.commit()
                    .await
                    .map_err(|e| db_err("failed to commit admission", e))?;
                return Ok(AdmitOutcome {
                    registration: existing,
                    already_registered: true,
                });
            }

            // Re-submission before verification overwrites the same row.
            let mut replacement = registration;
            replacement.id = existing.id;
            replacement.created_at = existing.created_at;
            Self::write(&mut *tx, &replacement).await?;
            tx.commit()
                .await
                .map_err(|e| db_err("failed to commit admission", e))?;
            return Ok(AdmitOutcome {
                registration: replacement,
                already_registered: false,
            });
        }

        let count: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM registrations
             WHERE event_id = $1 AND status IN ('pending', 'approved', 'registered')",
        )
        .bind(registration.event_id.as_uuid())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_err("failed to count registrations", e))?;
        ensure_capacity(capacity, u32::try_from(count.0).unwrap_or(u32::MAX))?;

        Self::write(&mut *tx, &registration).await?;
        tx.commit()
            .await
            .map_err(|e| db_err("failed to commit admission", e))?;
        Ok(AdmitOutcome {
            registration,
            already_registered: false,
        })
    }

    async fn update(&self, registration: &Registration) -> Result<()> {
        Self::write(&self.pool, registration).await
    }

    async fn check_in_once(
        &self,
        id: RegistrationId,
        at: DateTime<Utc>,
    ) -> Result<Registration> {
        let updated: Option<(JsonValue,)> = sqlx::query_as(
            "UPDATE registrations
             SET checked_in = TRUE,
                 data = data || jsonb_build_object(
                     'checked_in', TRUE,
                     'checked_in_at', to_jsonb($2::timestamptz),
                     'updated_at', to_jsonb($2::timestamptz)
                 )
             WHERE id = $1 AND checked_in = FALSE
             RETURNING data",
        )
        .bind(id.as_uuid())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to check in", e))?;

        match updated {
            Some((json,)) => decode("registration", json),
            None => match self.get(id).await? {
                Some(_) => Err(Error::conflict("registration is already checked in")),
                None => Err(Error::NotFound {
                    resource: "registration",
                }),
            },
        }
    }
}

// ============================================================================
// Payments
// ============================================================================

/// PostgreSQL payment store.
#[derive(Clone)]
pub struct PostgresPaymentStore {
    pool: PgPool,
}

impl PostgresPaymentStore {
    /// Create a store over a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn state_str(payment: &Payment) -> &'static str {
        match payment.state {
            crate::types::PaymentState::Pending => "pending",
            crate::types::PaymentState::Completed => "completed",
            crate::types::PaymentState::Failed => "failed",
            crate::types::PaymentState::Refunded => "refunded",
        }
    }
}

#[async_trait]
impl PaymentStore for PostgresPaymentStore {
    async fn get(&self, id: PaymentId) -> Result<Option<Payment>> {
        let row: Option<(JsonValue,)> = sqlx::query_as("SELECT data FROM payments WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("failed to load payment", e))?;
        row.map(|(json,)| decode("payment", json)).transpose()
    }

    async fn latest_for_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<Payment>> {
        let row: Option<(JsonValue,)> = sqlx::query_as(
            "SELECT data FROM payments
             WHERE registration_id = $1
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(registration_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to load payment", e))?;
        row.map(|(json,)| decode("payment", json)).transpose()
    }

    async fn completed_for_registration(
        &self,
        registration_id: RegistrationId,
    ) -> Result<Option<Payment>> {
        let row: Option<(JsonValue,)> = sqlx::query_as(
            "SELECT data FROM payments
             WHERE registration_id = $1 AND state = 'completed'
             LIMIT 1",
        )
        .bind(registration_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to load payment", e))?;
        row.map(|(json,)| decode("payment", json)).transpose()
    }

    async fn find_by_gateway_refs(
        &self,
        gateway_payment_id: Option<&str>,
        checkout_session_id: Option<&str>,
    ) -> Result<Option<Payment>> {
        let row: Option<(JsonValue,)> = sqlx::query_as(
            "SELECT data FROM payments
             WHERE ($1::text IS NOT NULL AND gateway_payment_id = $1)
                OR ($2::text IS NOT NULL AND checkout_session_id = $2)
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(gateway_payment_id)
        .bind(checkout_session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to load payment", e))?;
        row.map(|(json,)| decode("payment", json)).transpose()
    }

    async fn create_open(&self, payment: Payment) -> Result<CreateOpenOutcome> {
        let data = encode("payment", &payment)?;
        // The partial unique index payments_one_open_per_registration turns
        // a concurrent double-submit into a no-op insert here.
        let inserted = sqlx::query(
            "INSERT INTO payments
                 (id, registration_id, state, checkout_session_id, gateway_payment_id,
                  created_at, data)
             VALUES ($1, $2, 'pending', $3, $4, $5, $6)
             ON CONFLICT DO NOTHING",
        )
        .bind(payment.id.as_uuid())
        .bind(payment.registration_id.as_uuid())
        .bind(&payment.checkout_session_id)
        .bind(&payment.gateway_payment_id)
        .bind(payment.created_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to open payment", e))?;

        if inserted.rows_affected() == 1 {
            return Ok(CreateOpenOutcome {
                payment,
                created: true,
            });
        }

        let existing: Option<(JsonValue,)> = sqlx::query_as(
            "SELECT data FROM payments
             WHERE registration_id = $1 AND state = 'pending'
             LIMIT 1",
        )
        .bind(payment.registration_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to load open payment", e))?;

        match existing {
            Some((json,)) => Ok(CreateOpenOutcome {
                payment: decode("payment", json)?,
                created: false,
            }),
            // The open row settled between our insert and the read; the
            // caller's idempotent completed-payment check covers it.
            None => Err(Error::conflict("payment attempt raced a settlement; retry")),
        }
    }

    async fn update(&self, payment: &Payment) -> Result<()> {
        let data = encode("payment", payment)?;
        let result = sqlx::query(
            "UPDATE payments
             SET state = $2,
                 checkout_session_id = $3,
                 gateway_payment_id = $4,
                 data = $5
             WHERE id = $1",
        )
        .bind(payment.id.as_uuid())
        .bind(Self::state_str(payment))
        .bind(&payment.checkout_session_id)
        .bind(&payment.gateway_payment_id)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to update payment", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                resource: "payment",
            });
        }
        Ok(())
    }
}

// ============================================================================
// Email verifications
// ============================================================================

/// PostgreSQL verification store.
#[derive(Clone)]
pub struct PostgresVerificationStore {
    pool: PgPool,
}

impl PostgresVerificationStore {
    /// Create a store over a connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationStore for PostgresVerificationStore {
    async fn insert(&self, verification: EmailVerification) -> Result<()> {
        let data = encode("verification", &verification)?;
        sqlx::query(
            "INSERT INTO email_verifications
                 (id, email, purpose, event_id, verified, attempts, created_at, data)
             VALUES ($1, $2, $3, $4, FALSE, 0, $5, $6)",
        )
        .bind(verification.id.as_uuid())
        .bind(verification.email.as_str())
        .bind(verification.purpose.as_str())
        .bind(verification.event_id.map(|id| *id.as_uuid()))
        .bind(verification.created_at)
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to insert verification", e))?;
        Ok(())
    }

    async fn latest_active(
        &self,
        email: &Email,
        purpose: VerificationPurpose,
        event_id: Option<EventId>,
    ) -> Result<Option<EmailVerification>> {
        let row: Option<(JsonValue,)> = sqlx::query_as(
            "SELECT data FROM email_verifications
             WHERE email = $1 AND purpose = $2
               AND event_id IS NOT DISTINCT FROM $3
               AND verified = FALSE
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(email.as_str())
        .bind(purpose.as_str())
        .bind(event_id.map(|id| *id.as_uuid()))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to load verification", e))?;
        row.map(|(json,)| decode("verification", json)).transpose()
    }

    async fn count_issued_since(
        &self,
        email: &Email,
        purpose: VerificationPurpose,
        event_id: Option<EventId>,
        since: DateTime<Utc>,
    ) -> Result<u32> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM email_verifications
             WHERE email = $1 AND purpose = $2
               AND event_id IS NOT DISTINCT FROM $3
               AND created_at >= $4",
        )
        .bind(email.as_str())
        .bind(purpose.as_str())
        .bind(event_id.map(|id| *id.as_uuid()))
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("failed to count verifications", e))?;
        Ok(u32::try_from(row.0).unwrap_or(u32::MAX))
    }

    async fn increment_attempts(&self, id: VerificationId) -> Result<u32> {
        let row: Option<(i32,)> = sqlx::query_as(
            "UPDATE email_verifications
             SET attempts = attempts + 1,
                 data = jsonb_set(data, '{attempts}', to_jsonb(attempts + 1))
             WHERE id = $1
             RETURNING attempts",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("failed to record attempt", e))?;

        let (attempts,) = row.ok_or(Error::OtpNotFound)?;
        Ok(u32::try_from(attempts).unwrap_or(u32::MAX))
    }

    async fn mark_verified(&self, id: VerificationId, _at: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE email_verifications
             SET verified = TRUE,
                 data = jsonb_set(data, '{verified}', 'true'::jsonb)
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("failed to mark verification", e))?;

        if result.rows_affected() == 0 {
            return Err(Error::OtpNotFound);
        }
        Ok(())
    }
}
