//! End-to-end scenarios through the service layer, on in-memory stores and
//! scripted providers.

#![allow(clippy::unwrap_used, clippy::panic)]

use guestflow_core::environment::{Clock, FixedClock};
use guestflow_registration::error::Error;
use guestflow_registration::lifecycle::GatewayPaymentStatus;
use guestflow_registration::mocks::{MockEmailSender, MockPaymentGateway};
use guestflow_registration::providers::{
    LocalCheckinBus, RefundOutcome, TextTicketRenderer, WebhookHeaders, sign_webhook_body,
};
use guestflow_registration::service::registrations::{RegistrationOutcome, RegistrationRequest};
use guestflow_registration::stores::{
    InMemoryEventRepository, InMemoryPaymentStore, InMemoryRegistrationStore,
    InMemoryVerificationStore, VerificationStore,
};
use guestflow_registration::types::{
    Capacity, Email, Event, EventId, EventStatus, Money, PaymentState, RegistrationPaymentStatus,
    RegistrationStatus, UserId, VerificationPurpose, Viewer,
};
use guestflow_registration::{
    CheckinService, PaymentService, PlatformConfig, RegistrationService, ServiceEnvironment,
};
use guestflow_testing::test_clock;
use std::sync::Arc;

struct Fixture {
    env: ServiceEnvironment,
    clock: Arc<FixedClock>,
    events: Arc<InMemoryEventRepository>,
    verifications: Arc<InMemoryVerificationStore>,
    email: Arc<MockEmailSender>,
    gateway: Arc<MockPaymentGateway>,
    host: UserId,
}

impl Fixture {
    fn new() -> Self {
        let clock = test_clock();
        let events = Arc::new(InMemoryEventRepository::new());
        let verifications = Arc::new(InMemoryVerificationStore::new());
        let email = Arc::new(MockEmailSender::new());
        let gateway = Arc::new(MockPaymentGateway::new());
        let host = UserId::new();

        let env = ServiceEnvironment {
            config: PlatformConfig::default(),
            events: events.clone(),
            registrations: Arc::new(InMemoryRegistrationStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
            verifications: verifications.clone(),
            gateway: gateway.clone(),
            email: email.clone(),
            renderer: Arc::new(TextTicketRenderer::new()),
            checkins: Arc::new(LocalCheckinBus::default()),
            clock: clock.clone(),
        };

        Self {
            env,
            clock,
            events,
            verifications,
            email,
            gateway,
            host,
        }
    }

    fn seed_event(&self, capacity: Capacity, price: Option<Money>, require_approval: bool) -> Event {
        let now = self.clock.now();
        let event = Event {
            id: EventId::new(),
            short_id: "rustconf".to_string(),
            title: "RustConf Community Day".to_string(),
            venue: Some("Convention Center".to_string()),
            starts_at: now + chrono::Duration::days(7),
            ends_at: now + chrono::Duration::days(7) + chrono::Duration::hours(8),
            status: EventStatus::Published,
            capacity,
            ticket_price: price,
            currency: "usd".to_string(),
            require_approval,
            questions: Vec::new(),
            created_by: self.host,
        };
        self.events.insert_event(event.clone());
        event
    }

    fn registrations(&self) -> RegistrationService {
        RegistrationService::new(self.env.clone())
    }

    fn payments(&self) -> PaymentService {
        PaymentService::new(self.env.clone())
    }

    fn checkins(&self) -> CheckinService {
        CheckinService::new(self.env.clone())
    }

    fn request(email: &str) -> RegistrationRequest {
        RegistrationRequest {
            email: email.to_string(),
            name: "Ada Lovelace".to_string(),
            phone: Some(" +1 555 0100 ".to_string()),
            social_link: Some("example.com/ada".to_string()),
            answers: Vec::new(),
        }
    }

    /// Fish the issued code out of the verification store.
    async fn latest_code(&self, email: &str, event_id: EventId) -> String {
        self.verifications
            .latest_active(
                &Email::parse(email).unwrap(),
                VerificationPurpose::EventRegistration,
                Some(event_id),
            )
            .await
            .unwrap()
            .unwrap()
            .code
    }

    async fn register_and_verify(&self, event: &Event, email: &str) -> RegistrationOutcome {
        let service = self.registrations();
        let outcome = service
            .register_for_event(&event.short_id, Self::request(email), None)
            .await
            .unwrap();
        let code = self.latest_code(email, event.id).await;
        service
            .verify_email_otp(&event.short_id, email, &code)
            .await
            .unwrap();
        outcome
    }
}

// ════════════════════════════════════════════════════════════════════════
// Registration lifecycle
// ════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn free_event_registers_immediately_after_otp() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, None, false);
    let service = fixture.registrations();

    let outcome = service
        .register_for_event(&event.short_id, Fixture::request("Ada@Example.com"), None)
        .await
        .unwrap();
    assert!(outcome.verification_required);
    assert!(!outcome.already_registered);
    assert_eq!(outcome.registration.email.as_str(), "ada@example.com");
    assert_eq!(outcome.registration.status, RegistrationStatus::Pending);
    assert_eq!(
        outcome.registration.social_link.as_deref(),
        Some("https://example.com/ada")
    );

    let code = fixture.latest_code("ada@example.com", event.id).await;
    let verified = service
        .verify_email_otp(&event.short_id, "ada@example.com", &code)
        .await
        .unwrap();

    assert_eq!(verified.status, RegistrationStatus::Registered);
    assert!(verified.email_verified);
    assert_eq!(
        verified.payment_status,
        RegistrationPaymentStatus::NotRequired
    );
    assert!(verified.qr_code.is_some());

    // code email + confirmation email
    let subjects = fixture.email.subjects();
    assert_eq!(subjects.len(), 2);
    assert!(subjects[0].contains("verification code"));
    assert!(subjects[1].starts_with("You're registered"));
}

#[tokio::test]
async fn verified_resubmission_is_idempotent() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, None, false);
    let first = fixture.register_and_verify(&event, "ada@example.com").await;

    let again = fixture
        .registrations()
        .register_for_event(&event.short_id, Fixture::request("ada@example.com"), None)
        .await
        .unwrap();

    assert!(again.already_registered);
    assert!(!again.verification_required);
    assert_eq!(again.registration.id, first.registration.id);
}

#[tokio::test]
async fn capacity_is_enforced_under_concurrent_submissions() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Limited { limit: 3 }, None, false);
    let service = Arc::new(fixture.registrations());

    let mut handles = Vec::new();
    for i in 0..10 {
        let service = Arc::clone(&service);
        let short_id = event.short_id.clone();
        handles.push(tokio::spawn(async move {
            service
                .register_for_event(&short_id, Fixture::request(&format!("g{i}@example.com")), None)
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
    assert_eq!(admitted, 3);
    assert_eq!(sold_out, 7);
}

#[tokio::test]
async fn resend_shares_the_issue_rate_limit() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, None, false);
    let service = fixture.registrations();

    service
        .register_for_event(&event.short_id, Fixture::request("ada@example.com"), None)
        .await
        .unwrap();
    // issue 1 happened at registration; two resends exhaust the window
    service
        .resend_verification(&event.short_id, "ada@example.com")
        .await
        .unwrap();
    service
        .resend_verification(&event.short_id, "ada@example.com")
        .await
        .unwrap();

    let third = service
        .resend_verification(&event.short_id, "ada@example.com")
        .await;
    assert!(matches!(third, Err(Error::RateLimited { .. })));
}

// ════════════════════════════════════════════════════════════════════════
// Payments
// ════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn paid_event_with_approval_holds_at_pending_after_payment() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, Some(Money::from_cents(2000)), true);
    let outcome = fixture.register_and_verify(&event, "ada@example.com").await;
    let registration_id = outcome.registration.id;
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let checkout = fixture
        .payments()
        .create_payment(registration_id, &viewer)
        .await
        .unwrap();
    assert!(!checkout.already_paid);
    assert!(checkout.checkout_url.is_some());
    // 20.00 + 1.00 platform + (0.30 + 0.40) processing = 21.70
    assert_eq!(checkout.payment.breakdown.platform_fee, Money::from_cents(100));
    assert_eq!(checkout.payment.breakdown.processing_fee, Money::from_cents(70));
    assert_eq!(checkout.payment.amount, Money::from_cents(2170));

    let confirmation = fixture
        .payments()
        .confirm_payment(registration_id, Some(checkout.payment.id), None, &viewer)
        .await
        .unwrap();

    assert_eq!(confirmation.payment.state, PaymentState::Completed);
    // awaiting host approval, not registered
    assert_eq!(confirmation.registration.status, RegistrationStatus::Pending);
    assert_eq!(
        confirmation.registration.payment_status,
        RegistrationPaymentStatus::Completed
    );

    let approved = fixture
        .registrations()
        .approve_registration(registration_id, fixture.host)
        .await
        .unwrap();
    assert_eq!(approved.status, RegistrationStatus::Approved);
}

#[tokio::test]
async fn create_payment_is_idempotent_after_completion() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, Some(Money::from_cents(2000)), false);
    let outcome = fixture.register_and_verify(&event, "ada@example.com").await;
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let first = fixture
        .payments()
        .create_payment(outcome.registration.id, &viewer)
        .await
        .unwrap();
    fixture
        .payments()
        .confirm_payment(outcome.registration.id, Some(first.payment.id), None, &viewer)
        .await
        .unwrap();

    let again = fixture
        .payments()
        .create_payment(outcome.registration.id, &viewer)
        .await
        .unwrap();
    assert!(again.already_paid);
    assert_eq!(again.payment.id, first.payment.id);
    assert!(again.checkout_url.is_none());
}

#[tokio::test]
async fn poll_and_webhook_replay_settle_exactly_once() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, Some(Money::from_cents(2000)), false);
    let outcome = fixture.register_and_verify(&event, "ada@example.com").await;
    let registration_id = outcome.registration.id;
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let checkout = fixture
        .payments()
        .create_payment(registration_id, &viewer)
        .await
        .unwrap();
    let confirmation = fixture
        .payments()
        .confirm_payment(registration_id, Some(checkout.payment.id), None, &viewer)
        .await
        .unwrap();
    assert_eq!(confirmation.registration.status, RegistrationStatus::Registered);
    let receipt_stamp = confirmation.payment.receipt_sent_at.unwrap();

    // The gateway replays the success as a webhook.
    let gateway_payment_id = confirmation.payment.gateway_payment_id.clone().unwrap();
    let body = format!(
        r#"{{"type":"payment.succeeded","payment_id":"{gateway_payment_id}"}}"#
    );
    let headers = WebhookHeaders {
        signature: Some(sign_webhook_body(
            "dev-webhook-secret",
            body.as_bytes(),
        )),
    };
    let webhook = fixture
        .payments()
        .process_webhook(body.as_bytes(), &headers)
        .await
        .unwrap();
    assert!(webhook.handled);

    let settled = fixture
        .payments()
        .confirm_payment(registration_id, Some(checkout.payment.id), None, &viewer)
        .await
        .unwrap();
    assert_eq!(settled.payment.state, PaymentState::Completed);
    assert_eq!(settled.payment.receipt_sent_at, Some(receipt_stamp));
    assert_eq!(settled.registration.status, RegistrationStatus::Registered);

    // exactly one receipt among all sent mail
    let receipts = fixture
        .email
        .subjects()
        .into_iter()
        .filter(|subject| subject.starts_with("Receipt"))
        .count();
    assert_eq!(receipts, 1);
}

#[tokio::test]
async fn failed_settlement_leaves_registration_retryable() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, Some(Money::from_cents(2000)), false);
    let outcome = fixture.register_and_verify(&event, "ada@example.com").await;
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let checkout = fixture
        .payments()
        .create_payment(outcome.registration.id, &viewer)
        .await
        .unwrap();

    fixture.gateway.settle_next(GatewayPaymentStatus::Failed);
    let confirmation = fixture
        .payments()
        .confirm_payment(outcome.registration.id, Some(checkout.payment.id), None, &viewer)
        .await
        .unwrap();

    assert_eq!(confirmation.payment.state, PaymentState::Failed);
    assert_eq!(confirmation.registration.status, RegistrationStatus::Pending);
    assert_eq!(
        confirmation.registration.payment_status,
        RegistrationPaymentStatus::Pending
    );
}

#[tokio::test]
async fn gateway_outage_degrades_confirmation_to_pending() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, Some(Money::from_cents(2000)), false);
    let outcome = fixture.register_and_verify(&event, "ada@example.com").await;
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let checkout = fixture
        .payments()
        .create_payment(outcome.registration.id, &viewer)
        .await
        .unwrap();

    fixture.gateway.set_unreachable(true);
    let confirmation = fixture
        .payments()
        .confirm_payment(outcome.registration.id, Some(checkout.payment.id), None, &viewer)
        .await
        .unwrap();
    // status unchanged, report pending - not an error
    assert_eq!(confirmation.payment.state, PaymentState::Pending);
}

#[tokio::test]
async fn tampered_webhook_is_rejected() {
    let fixture = Fixture::new();
    let body = br#"{"type":"payment.succeeded","payment_id":"pay_x"}"#;
    let headers = WebhookHeaders {
        signature: Some(sign_webhook_body("dev-webhook-secret", body)),
    };

    let tampered = br#"{"type":"payment.succeeded","payment_id":"pay_y"}"#;
    let result = fixture
        .payments()
        .process_webhook(tampered, &headers)
        .await;
    assert!(matches!(result, Err(Error::InvalidSignature)));

    let unsigned = fixture
        .payments()
        .process_webhook(body, &WebhookHeaders::default())
        .await;
    assert!(matches!(unsigned, Err(Error::InvalidSignature)));
}

#[tokio::test]
async fn rejecting_a_paid_registration_refunds_first() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, Some(Money::from_cents(2000)), true);
    let outcome = fixture.register_and_verify(&event, "ada@example.com").await;
    let registration_id = outcome.registration.id;
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let checkout = fixture
        .payments()
        .create_payment(registration_id, &viewer)
        .await
        .unwrap();
    fixture
        .payments()
        .confirm_payment(registration_id, Some(checkout.payment.id), None, &viewer)
        .await
        .unwrap();

    let rejection = fixture
        .registrations()
        .reject_registration(registration_id, fixture.host, "event is over capacity")
        .await
        .unwrap();

    assert_eq!(rejection.registration.status, RegistrationStatus::Rejected);
    assert_eq!(rejection.refund, Some(RefundOutcome::Succeeded));
    assert_eq!(
        rejection.registration.payment_status,
        RegistrationPaymentStatus::Refunded
    );

    // idempotent: rejecting again reports success without another refund
    let again = fixture
        .registrations()
        .reject_registration(registration_id, fixture.host, "again")
        .await
        .unwrap();
    assert!(again.refund.is_none());
}

#[tokio::test]
async fn failed_refund_leaves_payment_status_alone() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, Some(Money::from_cents(2000)), true);
    let outcome = fixture.register_and_verify(&event, "ada@example.com").await;
    let registration_id = outcome.registration.id;
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let checkout = fixture
        .payments()
        .create_payment(registration_id, &viewer)
        .await
        .unwrap();
    fixture
        .payments()
        .confirm_payment(registration_id, Some(checkout.payment.id), None, &viewer)
        .await
        .unwrap();

    fixture.gateway.refund_answer(RefundOutcome::Failed);
    let rejection = fixture
        .registrations()
        .reject_registration(registration_id, fixture.host, "no-show policy")
        .await
        .unwrap();

    // rejected, but the money state is untouched so the host can retry
    assert_eq!(rejection.registration.status, RegistrationStatus::Rejected);
    assert_eq!(rejection.refund, Some(RefundOutcome::Failed));
    assert_eq!(
        rejection.registration.payment_status,
        RegistrationPaymentStatus::Completed
    );
}

// ════════════════════════════════════════════════════════════════════════
// Check-in
// ════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn scan_checks_in_exactly_once_and_broadcasts() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, None, false);
    let outcome = fixture.register_and_verify(&event, "ada@example.com").await;
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let ticket = fixture
        .registrations()
        .ticket_data(outcome.registration.id, &viewer, true)
        .await
        .unwrap();
    assert!(ticket.document.is_some());

    let checkins = fixture.checkins();
    let mut notices = checkins.subscribe();

    let checked_in = checkins
        .check_in_scan(&ticket.qr_code, fixture.host)
        .await
        .unwrap();
    assert!(checked_in.checked_in);

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.registration_id, outcome.registration.id);

    // second scan conflicts instead of re-stamping
    let second = checkins.check_in_scan(&ticket.qr_code, fixture.host).await;
    assert!(matches!(second, Err(Error::Conflict(_))));
}

#[tokio::test]
async fn scan_rejects_forged_codes_and_strangers() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, None, false);
    let outcome = fixture.register_and_verify(&event, "ada@example.com").await;
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let ticket = fixture
        .registrations()
        .ticket_data(outcome.registration.id, &viewer, false)
        .await
        .unwrap();

    // flip one character inside the checksum field
    let forged = ticket.qr_code.replacen("\"checksum\":\"", "\"checksum\":\"f", 1);
    let result = fixture
        .checkins()
        .check_in_scan(&forged, fixture.host)
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));

    // a non-host cannot check anyone in
    let stranger = UserId::new();
    let result = fixture
        .checkins()
        .check_in_scan(&ticket.qr_code, stranger)
        .await;
    assert!(matches!(result, Err(Error::Forbidden(_))));
}

#[tokio::test]
async fn unverified_registrations_get_no_ticket() {
    let fixture = Fixture::new();
    let event = fixture.seed_event(Capacity::Unlimited, None, true);
    let outcome = fixture
        .registrations()
        .register_for_event(&event.short_id, Fixture::request("ada@example.com"), None)
        .await
        .unwrap();
    let viewer = Viewer::guest(Email::parse("ada@example.com").unwrap());

    let result = fixture
        .registrations()
        .ticket_data(outcome.registration.id, &viewer, false)
        .await;
    assert!(matches!(result, Err(Error::Conflict(_))));
}
