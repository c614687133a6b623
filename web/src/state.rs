//! Shared application state for handlers.

use guestflow_registration::{
    CheckinService, PaymentService, RegistrationService, ServiceEnvironment,
};

/// State injected into every handler.
#[derive(Clone)]
pub struct AppState {
    /// The service environment (used directly for event lookups)
    pub env: ServiceEnvironment,
    /// Registration lifecycle operations
    pub registrations: RegistrationService,
    /// Payment coordination
    pub payments: PaymentService,
    /// Check-in operations and live stream
    pub checkins: CheckinService,
}

impl AppState {
    /// Build the services over one environment.
    #[must_use]
    pub fn new(env: ServiceEnvironment) -> Self {
        Self {
            registrations: RegistrationService::new(env.clone()),
            payments: PaymentService::new(env.clone()),
            checkins: CheckinService::new(env.clone()),
            env,
        }
    }
}
