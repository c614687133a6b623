//! External collaborator traits and shared wire types.
//!
//! Everything the engine consumes from the outside world - email delivery,
//! the payment gateway, ticket rendering, and the check-in fan-out - is
//! abstracted behind the traits in this module and injected through the
//! service environment. Production implementations live in sibling modules;
//! scriptable test doubles live in [`crate::mocks`].

pub mod console_email;
pub mod local_bus;
pub mod redis_bus;
pub mod smtp_email;
pub mod text_renderer;

pub use console_email::ConsoleEmailSender;
pub use local_bus::LocalCheckinBus;
pub use redis_bus::RedisCheckinBus;
pub use smtp_email::{SmtpConfig, SmtpEmailSender};
pub use text_renderer::TextTicketRenderer;

use crate::error::{Error, Result};
use crate::lifecycle::GatewayPaymentStatus;
use crate::ticket::TicketDocument;
use crate::types::{CheckinMethod, EventId, Money, RegistrationId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

// ============================================================================
// Email
// ============================================================================

/// A file attached to an outgoing email (ticket documents, QR images).
#[derive(Clone, Debug)]
pub struct EmailAttachment {
    /// File name shown to the recipient
    pub filename: String,
    /// MIME type of the payload
    pub content_type: String,
    /// Raw file bytes
    pub bytes: Vec<u8>,
}

/// An outgoing email.
#[derive(Clone, Debug)]
pub struct EmailMessage {
    /// Recipient address
    pub to: String,
    /// Subject line
    pub subject: String,
    /// HTML body
    pub html: String,
    /// Attachments, possibly empty
    pub attachments: Vec<EmailAttachment>,
}

/// Delivery acknowledgment.
#[derive(Clone, Debug)]
pub struct EmailReceipt {
    /// Provider message id, or `"stub"` for no-op senders
    pub id: String,
    /// Whether the message actually left the building
    pub delivered: bool,
}

impl EmailReceipt {
    /// Receipt returned by no-op senders in non-configured environments.
    #[must_use]
    pub fn stub() -> Self {
        Self {
            id: "stub".to_string(),
            delivered: false,
        }
    }
}

/// Email delivery service.
///
/// Implementations must tolerate being a no-op stub in non-configured
/// environments without failing the caller; the engine logs and swallows
/// delivery errors rather than rolling back state.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Send one message.
    async fn send(&self, message: EmailMessage) -> Result<EmailReceipt>;
}

// ============================================================================
// Payment gateway
// ============================================================================

/// Request to open a gateway checkout session.
#[derive(Clone, Debug)]
pub struct CheckoutRequest {
    /// Registration being paid for; echoed back in webhooks as metadata
    pub registration_id: RegistrationId,
    /// Gateway product for this (currency, amount)
    pub product_id: String,
    /// Amount to charge, in minor units
    pub amount: Money,
    /// ISO currency code
    pub currency: String,
    /// Payer email for the gateway's receipt flows
    pub customer_email: String,
    /// Where the gateway redirects after payment
    pub success_url: String,
    /// Where the gateway redirects on abandon
    pub cancel_url: String,
}

/// A gateway-hosted checkout flow.
#[derive(Clone, Debug)]
pub struct CheckoutSession {
    /// Session id
    pub id: String,
    /// Hosted payment page URL
    pub url: String,
    /// Current session status
    pub status: GatewayPaymentStatus,
    /// Concrete payment id, once the session was paid
    pub gateway_payment_id: Option<String>,
}

/// A concrete gateway payment.
#[derive(Clone, Debug)]
pub struct GatewayPayment {
    /// Gateway payment id
    pub id: String,
    /// Current status
    pub status: GatewayPaymentStatus,
}

/// How the gateway answered a refund request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefundOutcome {
    /// Funds returned immediately
    Succeeded,
    /// Accepted; settles asynchronously via webhook
    Pending,
    /// Rejected
    Failed,
}

/// A gateway refund.
#[derive(Clone, Debug)]
pub struct GatewayRefund {
    /// Gateway refund id
    pub id: String,
    /// Immediate outcome
    pub outcome: RefundOutcome,
}

/// Payment gateway client.
///
/// Calls are expected to run under the engine's bounded timeout and retry
/// policy; on timeout the local payment row stays `pending` and is reconciled
/// later by polling or webhook.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Return a product id for (currency, amount), creating it on first use.
    /// Implementations cache per (currency, amount).
    async fn ensure_product(&self, currency: &str, amount: Money) -> Result<String>;

    /// Open a checkout session.
    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession>;

    /// Fetch a checkout session's current state.
    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSession>;

    /// Fetch a payment's current state.
    async fn retrieve_payment(&self, gateway_payment_id: &str) -> Result<GatewayPayment>;

    /// Request a refund for a settled payment.
    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Money,
        reason: &str,
    ) -> Result<GatewayRefund>;

    /// Verify and parse an inbound webhook.
    ///
    /// The signature check runs against the **unparsed raw bytes**; verifying
    /// a reserialized JSON object would make the check meaningless.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSignature`] when the header is missing or does not
    /// verify, [`Error::Validation`] for unparseable bodies.
    fn unwrap_webhook(
        &self,
        raw_body: &[u8],
        headers: &WebhookHeaders,
        secret: &str,
    ) -> Result<WebhookEvent> {
        let signature = headers
            .signature
            .as_deref()
            .ok_or(Error::InvalidSignature)?;
        verify_webhook_signature(secret, raw_body, signature)?;
        WebhookEvent::parse(raw_body)
    }
}

// ============================================================================
// Webhooks
// ============================================================================

/// Name of the HTTP header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "gateway-signature";

/// The subset of inbound headers the webhook path cares about.
#[derive(Clone, Debug, Default)]
pub struct WebhookHeaders {
    /// Hex HMAC-SHA256 of the raw body, from [`SIGNATURE_HEADER`]
    pub signature: Option<String>,
}

/// Kinds of gateway events the engine reconciles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WebhookEventType {
    /// `payment.succeeded`
    PaymentSucceeded,
    /// `payment.failed`
    PaymentFailed,
    /// `payment.processing`
    PaymentProcessing,
    /// `refund.succeeded`
    RefundSucceeded,
    /// `refund.failed`
    RefundFailed,
}

impl WebhookEventType {
    /// The gateway status a payment event folds into, `None` for refund
    /// events.
    #[must_use]
    pub const fn as_payment_status(self) -> Option<GatewayPaymentStatus> {
        match self {
            Self::PaymentSucceeded => Some(GatewayPaymentStatus::Succeeded),
            Self::PaymentFailed => Some(GatewayPaymentStatus::Failed),
            Self::PaymentProcessing => Some(GatewayPaymentStatus::Processing),
            Self::RefundSucceeded | Self::RefundFailed => None,
        }
    }
}

/// A verified, parsed gateway webhook.
#[derive(Clone, Debug)]
pub struct WebhookEvent {
    /// What happened
    pub event_type: WebhookEventType,
    /// Gateway payment id, when the event carries one
    pub gateway_payment_id: Option<String>,
    /// Checkout-session id, when the event carries one
    pub checkout_session_id: Option<String>,
    /// Gateway refund id, for refund events
    pub refund_id: Option<String>,
}

#[derive(Deserialize)]
struct WebhookWire {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payment_id: Option<String>,
    #[serde(default)]
    checkout_session_id: Option<String>,
    #[serde(default)]
    refund_id: Option<String>,
}

impl WebhookEvent {
    /// Parse a raw body into an event. Signature must already be verified.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] for malformed bodies or unknown event
    /// types.
    pub fn parse(raw_body: &[u8]) -> Result<Self> {
        let wire: WebhookWire = serde_json::from_slice(raw_body)
            .map_err(|e| Error::validation(format!("malformed webhook body: {e}")))?;

        let event_type = match wire.kind.as_str() {
            "payment.succeeded" => WebhookEventType::PaymentSucceeded,
            "payment.failed" => WebhookEventType::PaymentFailed,
            "payment.processing" => WebhookEventType::PaymentProcessing,
            "refund.succeeded" => WebhookEventType::RefundSucceeded,
            "refund.failed" => WebhookEventType::RefundFailed,
            other => {
                return Err(Error::validation(format!("unknown webhook type: {other}")));
            }
        };

        Ok(Self {
            event_type,
            gateway_payment_id: wire.payment_id,
            checkout_session_id: wire.checkout_session_id,
            refund_id: wire.refund_id,
        })
    }
}

/// Verify a hex HMAC-SHA256 signature over raw bytes.
///
/// # Errors
///
/// Returns [`Error::InvalidSignature`] on any mismatch or malformed hex.
pub fn verify_webhook_signature(secret: &str, raw_body: &[u8], signature: &str) -> Result<()> {
    let expected = hex::decode(signature.trim()).map_err(|_| Error::InvalidSignature)?;

    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::InvalidSignature)?;
    mac.update(raw_body);
    // verify_slice is constant-time
    mac.verify_slice(&expected).map_err(|_| Error::InvalidSignature)
}

/// Sign raw bytes the way the gateway does. Used by the mock gateway and by
/// webhook tests.
#[must_use]
pub fn sign_webhook_body(secret: &str, raw_body: &[u8]) -> String {
    // HMAC-SHA256 accepts keys of any length, so this cannot fail in
    // practice; an empty signature simply never verifies.
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

// ============================================================================
// Ticket rendering
// ============================================================================

/// Renders QR images and printable ticket documents.
///
/// Rendering is a side effect with no bearing on state; failures surface as
/// [`Error::Validation`] and are reported, never persisted.
pub trait TicketRenderer: Send + Sync {
    /// Render the QR code string as an image.
    ///
    /// # Errors
    ///
    /// Returns an error when the code cannot be rendered.
    fn render_qr(&self, code: &str) -> Result<Vec<u8>>;

    /// Render a printable ticket document embedding the QR image and
    /// human-readable event/attendee fields.
    ///
    /// # Errors
    ///
    /// Returns an error when the document cannot be rendered.
    fn render_document(&self, document: &TicketDocument) -> Result<Vec<u8>>;
}

// ============================================================================
// Check-in fan-out
// ============================================================================

/// A live check-in notification for dashboard listeners.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckinNotice {
    /// Event the check-in belongs to
    pub event_id: EventId,
    /// Checked-in registration
    pub registration_id: RegistrationId,
    /// Attendee display name
    pub attendee_name: String,
    /// How the attendee was checked in
    pub method: CheckinMethod,
    /// When the stamp happened
    pub checked_in_at: DateTime<Utc>,
}

/// Publish/subscribe channel for check-in notifications.
///
/// Deliberately a channel rather than an in-process subscriber map: with a
/// distributed implementation ([`RedisCheckinBus`]) any instance can
/// broadcast and any instance's connected dashboard clients receive it.
#[async_trait]
pub trait CheckinBus: Send + Sync {
    /// Broadcast a check-in to all subscribers.
    async fn publish(&self, notice: CheckinNotice) -> Result<()>;

    /// Subscribe to the notification stream. Callers filter by event id.
    fn subscribe(&self) -> tokio::sync::broadcast::Receiver<CheckinNotice>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trip() {
        let body = br#"{"type":"payment.succeeded","payment_id":"pay_1"}"#;
        let signature = sign_webhook_body("whsec", body);
        assert!(verify_webhook_signature("whsec", body, &signature).is_ok());
    }

    #[test]
    fn signature_fails_for_tampered_body() {
        let body = br#"{"type":"payment.succeeded","payment_id":"pay_1"}"#;
        let signature = sign_webhook_body("whsec", body);
        let tampered = br#"{"type":"payment.succeeded","payment_id":"pay_2"}"#;
        assert_eq!(
            verify_webhook_signature("whsec", tampered, &signature),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn signature_fails_for_wrong_secret() {
        let body = b"payload";
        let signature = sign_webhook_body("whsec", body);
        assert_eq!(
            verify_webhook_signature("other", body, &signature),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn webhook_parse_maps_types() {
        let event = WebhookEvent::parse(
            br#"{"type":"refund.succeeded","payment_id":"pay_1","refund_id":"re_1"}"#,
        )
        .unwrap();
        assert_eq!(event.event_type, WebhookEventType::RefundSucceeded);
        assert_eq!(event.refund_id.as_deref(), Some("re_1"));

        let unknown = WebhookEvent::parse(br#"{"type":"customer.created"}"#);
        assert!(matches!(unknown, Err(Error::Validation(_))));
    }
}
