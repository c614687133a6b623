//! Scriptable test doubles for the provider traits.
//!
//! Used by unit and scenario tests across the workspace. The gateway mock
//! settles payments according to a scripted outcome so tests can drive the
//! success, failure, and refund paths deterministically.

use crate::error::{Error, Result};
use crate::lifecycle::GatewayPaymentStatus;
use crate::providers::{
    CheckoutRequest, CheckoutSession, EmailMessage, EmailReceipt, EmailSender, GatewayPayment,
    GatewayRefund, PaymentGateway, RefundOutcome,
};
use crate::types::Money;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

// ============================================================================
// Email
// ============================================================================

/// Email sender that records every message.
#[derive(Clone, Default)]
pub struct MockEmailSender {
    sent: Arc<Mutex<Vec<EmailMessage>>>,
    fail: Arc<AtomicBool>,
}

impl MockEmailSender {
    /// Create a recording sender.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent sends fail, for exercising the swallow-and-log paths.
    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Every message sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<EmailMessage> {
        lock(&self.sent).clone()
    }

    /// Subjects sent so far, in order.
    #[must_use]
    pub fn subjects(&self) -> Vec<String> {
        lock(&self.sent)
            .iter()
            .map(|message| message.subject.clone())
            .collect()
    }
}

#[async_trait]
impl EmailSender for MockEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<EmailReceipt> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Email("mock sender is scripted to fail".to_string()));
        }
        let id = format!("mock-email-{}", lock(&self.sent).len());
        lock(&self.sent).push(message);
        Ok(EmailReceipt {
            id,
            delivered: true,
        })
    }
}

// ============================================================================
// Payment gateway
// ============================================================================

#[derive(Clone)]
struct SessionRecord {
    session: CheckoutSession,
}

/// Scriptable payment gateway.
///
/// Sessions settle to [`MockPaymentGateway::settle_next`]'s scripted status
/// when retrieved; refunds answer with the scripted [`RefundOutcome`].
/// Defaults: payments succeed, refunds succeed immediately.
#[derive(Clone)]
pub struct MockPaymentGateway {
    sessions: Arc<Mutex<HashMap<String, SessionRecord>>>,
    payments: Arc<Mutex<HashMap<String, GatewayPayment>>>,
    products: Arc<Mutex<HashMap<(String, u64), String>>>,
    product_creations: Arc<AtomicUsize>,
    next_status: Arc<Mutex<GatewayPaymentStatus>>,
    refund_outcome: Arc<Mutex<RefundOutcome>>,
    unreachable: Arc<AtomicBool>,
}

impl MockPaymentGateway {
    /// Create a gateway that settles everything successfully.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            payments: Arc::new(Mutex::new(HashMap::new())),
            products: Arc::new(Mutex::new(HashMap::new())),
            product_creations: Arc::new(AtomicUsize::new(0)),
            next_status: Arc::new(Mutex::new(GatewayPaymentStatus::Succeeded)),
            refund_outcome: Arc::new(Mutex::new(RefundOutcome::Succeeded)),
            unreachable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Script the status sessions settle to on retrieval.
    pub fn settle_next(&self, status: GatewayPaymentStatus) {
        *lock(&self.next_status) = status;
    }

    /// Script the refund answer.
    pub fn refund_answer(&self, outcome: RefundOutcome) {
        *lock(&self.refund_outcome) = outcome;
    }

    /// Make every call fail as if the provider were down.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// How many distinct products were created (the cache keeps this at one
    /// per (currency, amount)).
    #[must_use]
    pub fn product_creations(&self) -> usize {
        self.product_creations.load(Ordering::SeqCst)
    }

    fn check_reachable(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Gateway("mock gateway is unreachable".to_string()));
        }
        Ok(())
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn ensure_product(&self, currency: &str, amount: Money) -> Result<String> {
        self.check_reachable()?;
        let mut products = lock(&self.products);
        let key = (currency.to_string(), amount.cents());
        if let Some(existing) = products.get(&key) {
            return Ok(existing.clone());
        }
        let product_id = format!("prod_{}", Uuid::new_v4());
        self.product_creations.fetch_add(1, Ordering::SeqCst);
        products.insert(key, product_id.clone());
        Ok(product_id)
    }

    async fn create_checkout_session(&self, request: CheckoutRequest) -> Result<CheckoutSession> {
        self.check_reachable()?;
        let id = format!("cs_{}", Uuid::new_v4());
        let session = CheckoutSession {
            id: id.clone(),
            url: format!("https://gateway.test/checkout/{id}"),
            status: GatewayPaymentStatus::Processing,
            gateway_payment_id: None,
        };
        lock(&self.sessions).insert(
            id,
            SessionRecord {
                session: session.clone(),
            },
        );
        tracing::debug!(
            registration_id = %request.registration_id,
            amount = request.amount.cents(),
            "mock checkout session opened"
        );
        Ok(session)
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<CheckoutSession> {
        self.check_reachable()?;
        let scripted = *lock(&self.next_status);

        let mut sessions = lock(&self.sessions);
        let record = sessions
            .get_mut(session_id)
            .ok_or(Error::Gateway(format!("unknown session {session_id}")))?;

        record.session.status = scripted;
        if scripted == GatewayPaymentStatus::Succeeded
            && record.session.gateway_payment_id.is_none()
        {
            let payment_id = format!("pay_{}", Uuid::new_v4());
            lock(&self.payments).insert(
                payment_id.clone(),
                GatewayPayment {
                    id: payment_id.clone(),
                    status: scripted,
                },
            );
            record.session.gateway_payment_id = Some(payment_id);
        }
        Ok(record.session.clone())
    }

    async fn retrieve_payment(&self, gateway_payment_id: &str) -> Result<GatewayPayment> {
        self.check_reachable()?;
        lock(&self.payments)
            .get(gateway_payment_id)
            .cloned()
            .ok_or(Error::Gateway(format!(
                "unknown payment {gateway_payment_id}"
            )))
    }

    async fn create_refund(
        &self,
        gateway_payment_id: &str,
        amount: Money,
        reason: &str,
    ) -> Result<GatewayRefund> {
        self.check_reachable()?;
        let outcome = *lock(&self.refund_outcome);
        tracing::debug!(
            payment = gateway_payment_id,
            amount = amount.cents(),
            reason,
            ?outcome,
            "mock refund requested"
        );
        Ok(GatewayRefund {
            id: format!("re_{}", Uuid::new_v4()),
            outcome,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::RegistrationId;

    fn request() -> CheckoutRequest {
        CheckoutRequest {
            registration_id: RegistrationId::new(),
            product_id: "prod_1".to_string(),
            amount: Money::from_cents(2170),
            currency: "usd".to_string(),
            customer_email: "guest@example.com".to_string(),
            success_url: "https://guestflow.test/done".to_string(),
            cancel_url: "https://guestflow.test/cancel".to_string(),
        }
    }

    #[tokio::test]
    async fn sessions_settle_to_scripted_status() {
        let gateway = MockPaymentGateway::new();
        let session = gateway.create_checkout_session(request()).await.unwrap();
        assert_eq!(session.status, GatewayPaymentStatus::Processing);

        let settled = gateway
            .retrieve_checkout_session(&session.id)
            .await
            .unwrap();
        assert_eq!(settled.status, GatewayPaymentStatus::Succeeded);
        assert!(settled.gateway_payment_id.is_some());

        gateway.settle_next(GatewayPaymentStatus::Failed);
        let second = gateway.create_checkout_session(request()).await.unwrap();
        let failed = gateway.retrieve_checkout_session(&second.id).await.unwrap();
        assert_eq!(failed.status, GatewayPaymentStatus::Failed);
        assert!(failed.gateway_payment_id.is_none());
    }

    #[tokio::test]
    async fn products_are_cached_per_currency_and_amount() {
        let gateway = MockPaymentGateway::new();
        let first = gateway
            .ensure_product("usd", Money::from_cents(2170))
            .await
            .unwrap();
        let second = gateway
            .ensure_product("usd", Money::from_cents(2170))
            .await
            .unwrap();
        let other = gateway
            .ensure_product("usd", Money::from_cents(999))
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(gateway.product_creations(), 2);
    }

    #[tokio::test]
    async fn unreachable_gateway_fails_every_call() {
        let gateway = MockPaymentGateway::new();
        gateway.set_unreachable(true);
        assert!(matches!(
            gateway.ensure_product("usd", Money::from_cents(1)).await,
            Err(Error::Gateway(_))
        ));
    }

    #[tokio::test]
    async fn email_mock_records_and_fails_on_script() {
        let sender = MockEmailSender::new();
        sender
            .send(EmailMessage {
                to: "guest@example.com".to_string(),
                subject: "hello".to_string(),
                html: String::new(),
                attachments: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(sender.subjects(), vec!["hello".to_string()]);

        sender.fail_sends(true);
        let result = sender
            .send(EmailMessage {
                to: "guest@example.com".to_string(),
                subject: "again".to_string(),
                html: String::new(),
                attachments: Vec::new(),
            })
            .await;
        assert!(matches!(result, Err(Error::Email(_))));
    }
}
