//! The imperative shell: async services orchestrating stores, providers, and
//! the lifecycle reducer.
//!
//! Each operation follows the same shape: do the async reads and external
//! calls, load the touched rows into a [`LifecycleState`], dispatch a
//! [`LifecycleAction`] through the reducer (the only writer of status),
//! persist what changed, and execute the returned effects.

pub mod checkins;
pub mod payments;
pub mod registrations;

pub use checkins::CheckinService;
pub use payments::PaymentService;
pub use registrations::RegistrationService;

use crate::actions::LifecycleAction;
use crate::config::PlatformConfig;
use crate::error::Result;
use crate::otp::OtpVerifier;
use crate::providers::{CheckinBus, EmailSender, PaymentGateway, TicketRenderer};
use crate::reducers::{LifecycleEnvironment, LifecycleReducer};
use crate::state::LifecycleState;
use crate::stores::{EventRepository, PaymentStore, RegistrationStore, VerificationStore};
use crate::ticket::TicketIssuer;
use crate::types::{PaymentId, RegistrationId};
use guestflow_core::environment::Clock;
use guestflow_core::reducer::Reducer;
use guestflow_core::{SmallVec, effect::Effect};
use std::sync::Arc;

/// Everything the services need, injected once at startup.
#[derive(Clone)]
pub struct ServiceEnvironment {
    /// Engine configuration
    pub config: PlatformConfig,
    /// Event and host-membership reads
    pub events: Arc<dyn EventRepository>,
    /// Registration rows
    pub registrations: Arc<dyn RegistrationStore>,
    /// Payment rows
    pub payments: Arc<dyn PaymentStore>,
    /// OTP rows
    pub verifications: Arc<dyn VerificationStore>,
    /// Payment gateway client
    pub gateway: Arc<dyn PaymentGateway>,
    /// Email delivery
    pub email: Arc<dyn EmailSender>,
    /// Ticket rendering
    pub renderer: Arc<dyn TicketRenderer>,
    /// Check-in fan-out
    pub checkins: Arc<dyn CheckinBus>,
    /// Clock
    pub clock: Arc<dyn Clock>,
}

impl ServiceEnvironment {
    /// The QR issuer for this configuration.
    #[must_use]
    pub fn issuer(&self) -> TicketIssuer {
        TicketIssuer::new(self.config.ticket_secret.clone())
    }

    /// The OTP verifier for this configuration.
    #[must_use]
    pub fn otp(&self) -> OtpVerifier {
        OtpVerifier::new(
            Arc::clone(&self.verifications),
            Arc::clone(&self.clock),
            self.config.otp.clone(),
        )
    }

    fn lifecycle_env(&self) -> LifecycleEnvironment {
        LifecycleEnvironment::new(
            Arc::clone(&self.clock),
            Arc::clone(&self.email),
            Arc::clone(&self.renderer),
            self.issuer(),
        )
    }
}

/// Run one action through the reducer, surface any guard violation, and
/// execute the effects.
pub(crate) async fn dispatch(
    env: &ServiceEnvironment,
    state: &mut LifecycleState,
    action: LifecycleAction,
) -> Result<()> {
    let effects = LifecycleReducer::new().reduce(state, action, &env.lifecycle_env());
    if let Some(error) = state.take_error() {
        return Err(error);
    }
    execute_effects(effects).await;
    Ok(())
}

/// Execute reducer effects in order. Email effects swallow their own
/// failures; anything an effect feeds back is logged and dropped because the
/// lifecycle reducer never emits follow-up actions.
async fn execute_effects(effects: SmallVec<[Effect<LifecycleAction>; 4]>) {
    for effect in effects {
        execute_effect(effect).await;
    }
}

fn execute_effect(
    effect: Effect<LifecycleAction>,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>> {
    Box::pin(async move {
        match effect {
            Effect::None => {}
            Effect::Parallel(effects) => {
                futures::future::join_all(effects.into_iter().map(execute_effect)).await;
            }
            Effect::Sequential(effects) => {
                for inner in effects {
                    execute_effect(inner).await;
                }
            }
            Effect::Delay { duration, action } => {
                tokio::spawn(async move {
                    tokio::time::sleep(duration).await;
                    tracing::debug!(?action, "dropping delayed action; no dispatcher attached");
                });
            }
            Effect::Future(future) => {
                if let Some(action) = future.await {
                    tracing::debug!(?action, "dropping effect feedback action");
                }
            }
        }
    })
}

/// Write the registration with this id back to its store, if loaded.
pub(crate) async fn persist_registration(
    env: &ServiceEnvironment,
    state: &LifecycleState,
    id: RegistrationId,
) -> Result<()> {
    if let Some(registration) = state.registration(&id) {
        env.registrations.update(registration).await?;
    }
    Ok(())
}

/// Write the payment with this id back to its store, if loaded.
pub(crate) async fn persist_payment(
    env: &ServiceEnvironment,
    state: &LifecycleState,
    id: PaymentId,
) -> Result<()> {
    if let Some(payment) = state.payment(&id) {
        env.payments.update(payment).await?;
    }
    Ok(())
}
