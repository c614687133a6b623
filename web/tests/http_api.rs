//! HTTP-level tests over the full router with in-memory wiring.

#![allow(clippy::unwrap_used)]

use axum_test::TestServer;
use guestflow_core::environment::Clock;
use guestflow_registration::mocks::{MockEmailSender, MockPaymentGateway};
use guestflow_registration::providers::{
    LocalCheckinBus, SIGNATURE_HEADER, TextTicketRenderer, sign_webhook_body,
};
use guestflow_registration::stores::{
    InMemoryEventRepository, InMemoryPaymentStore, InMemoryRegistrationStore,
    InMemoryVerificationStore, VerificationStore,
};
use guestflow_registration::types::{
    Capacity, Email, Event, EventId, EventStatus, Money, UserId, VerificationPurpose,
};
use guestflow_registration::{PlatformConfig, ServiceEnvironment};
use guestflow_testing::test_clock;
use guestflow_web::{AppState, router};
use http::{HeaderName, HeaderValue};
use serde_json::{Value, json};
use std::sync::Arc;

struct TestApp {
    server: TestServer,
    verifications: Arc<InMemoryVerificationStore>,
    event: Event,
    host: UserId,
}

impl TestApp {
    fn new(price: Option<Money>, require_approval: bool) -> Self {
        let clock = test_clock();
        let events = Arc::new(InMemoryEventRepository::new());
        let verifications = Arc::new(InMemoryVerificationStore::new());
        let host = UserId::new();

        let now = clock.now();
        let event = Event {
            id: EventId::new(),
            short_id: "rustconf".to_string(),
            title: "RustConf Community Day".to_string(),
            venue: Some("Convention Center".to_string()),
            starts_at: now + chrono::Duration::days(7),
            ends_at: now + chrono::Duration::days(8),
            status: EventStatus::Published,
            capacity: Capacity::Unlimited,
            ticket_price: price,
            currency: "usd".to_string(),
            require_approval,
            questions: Vec::new(),
            created_by: host,
        };
        events.insert_event(event.clone());

        let env = ServiceEnvironment {
            config: PlatformConfig::default(),
            events: events.clone(),
            registrations: Arc::new(InMemoryRegistrationStore::new()),
            payments: Arc::new(InMemoryPaymentStore::new()),
            verifications: verifications.clone(),
            gateway: Arc::new(MockPaymentGateway::new()),
            email: Arc::new(MockEmailSender::new()),
            renderer: Arc::new(TextTicketRenderer::new()),
            checkins: Arc::new(LocalCheckinBus::default()),
            clock,
        };

        let server = TestServer::new(router(AppState::new(env))).unwrap();
        Self {
            server,
            verifications,
            event,
            host,
        }
    }

    async fn latest_code(&self, email: &str) -> String {
        self.verifications
            .latest_active(
                &Email::parse(email).unwrap(),
                VerificationPurpose::EventRegistration,
                Some(self.event.id),
            )
            .await
            .unwrap()
            .unwrap()
            .code
    }

    fn host_header(&self) -> (HeaderName, HeaderValue) {
        (
            HeaderName::from_static("x-user-id"),
            HeaderValue::from_str(&self.host.to_string()).unwrap(),
        )
    }

    /// Register and verify, returning the registration id.
    async fn registered_guest(&self, email: &str) -> String {
        let response = self
            .server
            .post("/events/rustconf/register")
            .json(&json!({ "email": email, "name": "Ada Lovelace" }))
            .await;
        assert_eq!(response.status_code(), 201);
        let body: Value = response.json();
        let id = body["registration"]["id"].as_str().unwrap().to_string();

        let code = self.latest_code(email).await;
        let response = self
            .server
            .post("/auth/verify-email")
            .json(&json!({
                "purpose": "event_registration",
                "event_short_id": "rustconf",
                "email": email,
                "code": code,
            }))
            .await;
        assert_eq!(response.status_code(), 200);
        id
    }
}

#[tokio::test]
async fn register_verify_and_fetch_ticket() {
    let app = TestApp::new(None, false);

    let response = app
        .server
        .post("/events/rustconf/register")
        .json(&json!({ "email": "Ada@Example.com", "name": "Ada Lovelace" }))
        .await;
    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    assert_eq!(body["verification_required"], json!(true));
    assert_eq!(body["registration"]["email"], json!("ada@example.com"));
    let id = body["registration"]["id"].as_str().unwrap().to_string();

    let code = app.latest_code("ada@example.com").await;
    let response = app
        .server
        .post("/auth/verify-email")
        .json(&json!({
            "purpose": "event_registration",
            "event_short_id": "rustconf",
            "email": "ada@example.com",
            "code": code,
        }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["registration"]["status"], json!("registered"));

    // The guest fetches their ticket by email claim.
    let response = app
        .server
        .get(&format!("/registrations/{id}/ticket"))
        .add_query_param("email", "ada@example.com")
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert!(body["qr_code"].as_str().unwrap().contains("checksum"));

    // A stranger gets nothing.
    let response = app
        .server
        .get(&format!("/registrations/{id}/ticket"))
        .add_query_param("email", "mallory@example.com")
        .await;
    assert_eq!(response.status_code(), 403);
}

#[tokio::test]
async fn wrong_code_is_rejected() {
    let app = TestApp::new(None, false);
    app.server
        .post("/events/rustconf/register")
        .json(&json!({ "email": "ada@example.com", "name": "Ada" }))
        .await
        .assert_status(http::StatusCode::CREATED);

    let code = app.latest_code("ada@example.com").await;
    let wrong = if code == "000000" { "000001" } else { "000000" };
    let response = app
        .server
        .post("/auth/verify-email")
        .json(&json!({
            "purpose": "event_registration",
            "event_short_id": "rustconf",
            "email": "ada@example.com",
            "code": wrong,
        }))
        .await;
    assert_eq!(response.status_code(), 400);
    let body: Value = response.json();
    assert_eq!(body["code"], json!("INVALID_CODE"));
}

#[tokio::test]
async fn webhook_rejects_bad_signatures_and_accepts_good_ones() {
    let app = TestApp::new(Some(Money::from_cents(2000)), false);

    let body = r#"{"type":"payment.succeeded","payment_id":"pay_unknown"}"#;

    // Unsigned delivery
    let response = app.server.post("/payments/webhook").text(body).await;
    assert_eq!(response.status_code(), 401);

    // Properly signed delivery for an unknown payment is acknowledged
    let signature = sign_webhook_body("dev-webhook-secret", body.as_bytes());
    let response = app
        .server
        .post("/payments/webhook")
        .add_header(
            HeaderName::from_static(SIGNATURE_HEADER),
            HeaderValue::from_str(&signature).unwrap(),
        )
        .text(body)
        .await;
    assert_eq!(response.status_code(), 200);
    let parsed: Value = response.json();
    assert_eq!(parsed["handled"], json!(false));
}

#[tokio::test]
async fn paid_flow_over_http() {
    let app = TestApp::new(Some(Money::from_cents(2000)), false);
    let id = app.registered_guest("ada@example.com").await;

    let response = app
        .server
        .post("/payments/create")
        .json(&json!({ "registration_id": id, "email": "ada@example.com" }))
        .await;
    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    assert_eq!(body["payment"]["breakdown"]["total_cents"], json!(2170));
    assert!(body["checkout_url"].as_str().is_some());
    let payment_id = body["payment"]["id"].as_str().unwrap().to_string();

    let response = app
        .server
        .post("/payments/confirm")
        .json(&json!({
            "registration_id": id,
            "payment_id": payment_id,
            "email": "ada@example.com",
        }))
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["payment"]["status"], json!("completed"));
    assert_eq!(body["registration"]["status"], json!("registered"));
}

#[tokio::test]
async fn manual_checkin_requires_host_and_happens_once() {
    let app = TestApp::new(None, false);
    let id = app.registered_guest("ada@example.com").await;

    // No auth header
    let response = app.server.post(&format!("/registrations/{id}/checkin")).await;
    assert_eq!(response.status_code(), 401);

    let (name, value) = app.host_header();
    let response = app
        .server
        .post(&format!("/registrations/{id}/checkin"))
        .add_header(name.clone(), value.clone())
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["checked_in"], json!(true));

    // Second attempt conflicts
    let response = app
        .server
        .post(&format!("/registrations/{id}/checkin"))
        .add_header(name, value)
        .await;
    assert_eq!(response.status_code(), 409);
}
