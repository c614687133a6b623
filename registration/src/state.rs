//! State operated on by the lifecycle reducer.

use crate::error::Error;
use crate::types::{Payment, PaymentId, Registration, RegistrationId};
use std::collections::HashMap;

/// The registration rows and payment rows a reduction works over.
///
/// The imperative shell loads the rows a request touches into this state,
/// dispatches actions, and persists whatever changed. Tests load whole
/// scenarios into it directly.
#[derive(Clone, Debug, Default)]
pub struct LifecycleState {
    /// Registrations by id
    registrations: HashMap<RegistrationId, Registration>,
    /// Payment attempts by id
    payments: HashMap<PaymentId, Payment>,
    /// Guard violation recorded by the last reduction, if any
    last_error: Option<Error>,
}

impl LifecycleState {
    /// Create an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a registration row.
    pub fn insert_registration(&mut self, registration: Registration) {
        self.registrations.insert(registration.id, registration);
    }

    /// Load a payment row.
    pub fn insert_payment(&mut self, payment: Payment) {
        self.payments.insert(payment.id, payment);
    }

    /// Get a registration by id.
    #[must_use]
    pub fn registration(&self, id: &RegistrationId) -> Option<&Registration> {
        self.registrations.get(id)
    }

    /// Get a mutable registration by id.
    pub fn registration_mut(&mut self, id: &RegistrationId) -> Option<&mut Registration> {
        self.registrations.get_mut(id)
    }

    /// Get a payment by id.
    #[must_use]
    pub fn payment(&self, id: &PaymentId) -> Option<&Payment> {
        self.payments.get(id)
    }

    /// Get a mutable payment by id.
    pub fn payment_mut(&mut self, id: &PaymentId) -> Option<&mut Payment> {
        self.payments.get_mut(id)
    }

    /// Get a registration by id, recording a not-found violation when the
    /// row was never loaded.
    pub fn registration_or_flag(&mut self, id: &RegistrationId) -> Option<&Registration> {
        if self.registrations.contains_key(id) {
            self.registrations.get(id)
        } else {
            self.last_error = Some(Error::NotFound {
                resource: "registration",
            });
            None
        }
    }

    /// Mutable variant of [`LifecycleState::registration_or_flag`].
    pub fn registration_mut_or_flag(
        &mut self,
        id: &RegistrationId,
    ) -> Option<&mut Registration> {
        if self.registrations.contains_key(id) {
            self.registrations.get_mut(id)
        } else {
            self.last_error = Some(Error::NotFound {
                resource: "registration",
            });
            None
        }
    }

    /// Get a mutable payment by id, recording a not-found violation when the
    /// row was never loaded.
    pub fn payment_mut_or_flag(&mut self, id: &PaymentId) -> Option<&mut Payment> {
        if self.payments.contains_key(id) {
            self.payments.get_mut(id)
        } else {
            self.last_error = Some(Error::NotFound { resource: "payment" });
            None
        }
    }

    /// Record a guard violation.
    pub fn record_error(&mut self, error: Error) {
        self.last_error = Some(error);
    }

    /// Take the recorded violation, clearing it.
    pub fn take_error(&mut self) -> Option<Error> {
        self.last_error.take()
    }

    /// Number of loaded registrations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Whether no registrations are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}
