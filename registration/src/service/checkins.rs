//! Door check-in: manual and QR-scan, with live fan-out to dashboards.

use crate::error::{Error, Result};
use crate::providers::CheckinNotice;
use crate::service::ServiceEnvironment;
use crate::ticket::{TicketIssuer, is_ticket_eligible};
use crate::types::{CheckinMethod, EventId, Registration, RegistrationId, UserId};
use tokio::sync::broadcast;

/// Orchestrates attendee check-in.
#[derive(Clone)]
pub struct CheckinService {
    env: ServiceEnvironment,
}

impl CheckinService {
    /// Create a service over the given environment.
    #[must_use]
    pub const fn new(env: ServiceEnvironment) -> Self {
        Self { env }
    }

    /// Manual check-in by the host (clicking the attendee row).
    ///
    /// # Errors
    ///
    /// [`Error::Forbidden`] for non-hosts, [`Error::Conflict`] when the
    /// registration is ineligible or already checked in.
    pub async fn check_in_manual(
        &self,
        registration_id: RegistrationId,
        host: UserId,
    ) -> Result<Registration> {
        let registration = self.registration(registration_id).await?;
        self.require_host(registration.event_id, host).await?;
        self.stamp(registration, CheckinMethod::Manual).await
    }

    /// QR-scan check-in: validate the scanned payload's checksum (no
    /// database read needed for that part), then stamp the row it points at.
    ///
    /// # Errors
    ///
    /// [`Error::Validation`] for malformed or tampered codes,
    /// [`Error::Forbidden`] for non-hosts, [`Error::Conflict`] when already
    /// checked in.
    pub async fn check_in_scan(&self, code: &str, host: UserId) -> Result<Registration> {
        let payload = TicketIssuer::decode(code)?;
        let issuer = self.env.issuer();
        if !issuer.validate(&payload) {
            return Err(Error::validation("ticket checksum does not verify"));
        }

        let registration = self.registration(payload.registration_id).await?;
        if !issuer.matches_registration(&payload, &registration) {
            return Err(Error::validation("ticket does not match this registration"));
        }
        self.require_host(registration.event_id, host).await?;
        self.stamp(registration, CheckinMethod::QrScan).await
    }

    /// Subscribe to live check-in notifications. Callers filter by event.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<CheckinNotice> {
        self.env.checkins.subscribe()
    }

    async fn stamp(
        &self,
        registration: Registration,
        method: CheckinMethod,
    ) -> Result<Registration> {
        if !is_ticket_eligible(&registration) {
            return Err(Error::conflict(
                "registration is not eligible for check-in",
            ));
        }

        // The store's compare-and-swap makes this exactly-once; a second
        // attempt conflicts instead of silently re-stamping.
        let at = self.env.clock.now();
        let updated = self
            .env
            .registrations
            .check_in_once(registration.id, at)
            .await?;

        metrics::counter!("guestflow_checkins_total").increment(1);
        let notice = CheckinNotice {
            event_id: updated.event_id,
            registration_id: updated.id,
            attendee_name: updated.name.clone(),
            method,
            checked_in_at: at,
        };
        if let Err(error) = self.env.checkins.publish(notice).await {
            tracing::warn!(%error, "check-in broadcast failed; check-in stands");
        }

        Ok(updated)
    }

    async fn require_host(&self, event_id: EventId, host: UserId) -> Result<()> {
        if self.env.events.is_host(event_id, host).await? {
            Ok(())
        } else {
            Err(Error::forbidden("host access required"))
        }
    }

    async fn registration(&self, id: RegistrationId) -> Result<Registration> {
        self.env
            .registrations
            .get(id)
            .await?
            .ok_or(Error::NotFound {
                resource: "registration",
            })
    }
}
