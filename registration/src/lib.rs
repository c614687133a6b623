//! # Guestflow Registration
//!
//! The registration lifecycle and payment reconciliation engine.
//!
//! This crate turns an anonymous registration request into a verified, paid,
//! capacity-respecting, check-in-able attendance record. It coordinates five
//! independent failure-prone concerns into one consistent state machine:
//!
//! - **Capacity gate** ([`capacity`]) - atomic admission against an event's limit
//! - **OTP verifier** ([`otp`]) - rate-limited one-time codes bound to
//!   (email, purpose, event)
//! - **Ticket issuer** ([`ticket`]) - checksum-signed, self-verifying QR payloads
//! - **Payment coordinator** ([`service::payments`]) - checkout sessions plus a
//!   single idempotent reconciliation routine shared by the polling and
//!   webhook paths
//! - **Lifecycle reducer** ([`reducers`]) - the one place registration and
//!   payment status transitions happen
//!
//! The architecture is functional core / imperative shell: the
//! [`reducers::LifecycleReducer`] owns every status transition as a pure
//! function over [`state::LifecycleState`], while the [`service`] layer loads
//! rows from [`stores`], dispatches actions, persists the result, and executes
//! the returned effects (emails, refunds, check-in broadcasts).

pub mod actions;
pub mod capacity;
pub mod config;
pub mod emails;
pub mod error;
pub mod lifecycle;
pub mod mocks;
pub mod otp;
pub mod pricing;
pub mod providers;
pub mod reducers;
pub mod retry;
pub mod service;
pub mod state;
pub mod stores;
pub mod ticket;
pub mod types;

pub use actions::LifecycleAction;
pub use config::{OtpConfig, PlatformConfig};
pub use error::{Error, Result};
pub use pricing::FeeSchedule;
pub use reducers::LifecycleReducer;
pub use service::{CheckinService, PaymentService, RegistrationService, ServiceEnvironment};
pub use state::LifecycleState;
pub use ticket::TicketIssuer;
