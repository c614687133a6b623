//! Email subject and body builders.
//!
//! Plain HTML strings, styled the same way across the platform. Builders are
//! pure so the reducer can compose messages inside effect closures.

use crate::types::{Event, Payment, Registration, RegistrationStatus};

/// An email ready for a sender, minus attachments.
#[derive(Clone, Debug)]
pub struct EmailContent {
    /// Subject line
    pub subject: String,
    /// HTML body
    pub html: String,
}

fn layout(heading: &str, inner: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; line-height: 1.6; color: #333;">
    <div style="max-width: 600px; margin: 0 auto; padding: 20px;">
        <h2 style="color: #2563eb;">{heading}</h2>
        {inner}
    </div>
</body>
</html>"#
    )
}

/// The OTP email sent after a registration is submitted or a code resent.
#[must_use]
pub fn verification_code(event: &Event, code: &str) -> EmailContent {
    let inner = format!(
        r#"<p>Use this code to confirm your registration for <strong>{title}</strong>:</p>
        <p style="font-size: 32px; letter-spacing: 6px; font-family: monospace;">{code}</p>
        <p style="color: #666; font-size: 14px;">The code expires in 10 minutes. If you didn't register, you can safely ignore this email.</p>"#,
        title = event.title,
    );
    EmailContent {
        subject: format!("Your verification code for {}", event.title),
        html: layout("Confirm your email", &inner),
    }
}

/// The status email sent once verification (and payment, where required) is
/// settled.
#[must_use]
pub fn registration_status(event: &Event, registration: &Registration) -> EmailContent {
    let (subject, heading, body) = match registration.status {
        RegistrationStatus::Registered | RegistrationStatus::Approved => (
            format!("You're registered for {}", event.title),
            "You're in!".to_string(),
            format!(
                "<p>Your registration for <strong>{}</strong> is confirmed. Your ticket is attached; have it ready at the door.</p>",
                event.title
            ),
        ),
        _ => (
            format!("Registration received for {}", event.title),
            "Registration received".to_string(),
            format!(
                "<p>Thanks for registering for <strong>{}</strong>. The host reviews registrations; we'll email you as soon as yours is approved.</p>",
                event.title
            ),
        ),
    };

    let inner = format!(
        "{body}<p>Starts: {starts}</p>{venue}",
        starts = event.starts_at.to_rfc3339(),
        venue = event
            .venue
            .as_deref()
            .map_or_else(String::new, |venue| format!("<p>Venue: {venue}</p>")),
    );

    EmailContent {
        subject,
        html: layout(&heading, &inner),
    }
}

/// The payment receipt, sent at most once per completed payment.
#[must_use]
pub fn payment_receipt(event: &Event, payment: &Payment) -> EmailContent {
    let breakdown = payment.breakdown;
    let currency = payment.currency.to_uppercase();
    let inner = format!(
        r#"<p>We received your payment for <strong>{title}</strong>.</p>
        <table style="border-collapse: collapse;">
            <tr><td style="padding: 4px 16px 4px 0;">Ticket</td><td>{ticket} {currency}</td></tr>
            <tr><td style="padding: 4px 16px 4px 0;">Platform fee</td><td>{platform} {currency}</td></tr>
            <tr><td style="padding: 4px 16px 4px 0;">Processing fee</td><td>{processing} {currency}</td></tr>
            <tr><td style="padding: 4px 16px 4px 0;"><strong>Total</strong></td><td><strong>{total} {currency}</strong></td></tr>
        </table>
        <p style="color: #666; font-size: 14px;">Payment reference: {reference}</p>"#,
        title = event.title,
        ticket = breakdown.ticket,
        platform = breakdown.platform_fee,
        processing = breakdown.processing_fee,
        total = breakdown.total,
        reference = payment.id,
    );

    EmailContent {
        subject: format!("Receipt for {}", event.title),
        html: layout("Payment received", &inner),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Capacity, Email, EventId, EventStatus, Money, RegistrationId,
        RegistrationPaymentStatus, UserId,
    };
    use chrono::Utc;

    fn event() -> Event {
        Event {
            id: EventId::new(),
            short_id: "rust-meetup".to_string(),
            title: "Rust Meetup".to_string(),
            venue: Some("c-base".to_string()),
            starts_at: Utc::now(),
            ends_at: Utc::now() + chrono::Duration::hours(3),
            status: EventStatus::Published,
            capacity: Capacity::Unlimited,
            ticket_price: Some(Money::from_cents(2000)),
            currency: "usd".to_string(),
            require_approval: false,
            questions: Vec::new(),
            created_by: UserId::new(),
        }
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn code_email_contains_the_code() {
        let content = verification_code(&event(), "042137");
        assert!(content.html.contains("042137"));
        assert!(content.subject.contains("Rust Meetup"));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn status_email_distinguishes_pending_from_registered() {
        let event = event();
        let mut registration = Registration {
            id: RegistrationId::new(),
            event_id: event.id,
            user_id: None,
            email: Email::parse("guest@example.com").unwrap(),
            name: "Guest".to_string(),
            phone: None,
            social_link: None,
            answers: Vec::new(),
            status: RegistrationStatus::Registered,
            email_verified: true,
            email_verified_at: None,
            payment_status: RegistrationPaymentStatus::NotRequired,
            qr_code: None,
            checked_in: false,
            checked_in_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let confirmed = registration_status(&event, &registration);
        assert!(confirmed.subject.starts_with("You're registered"));

        registration.status = RegistrationStatus::Pending;
        let pending = registration_status(&event, &registration);
        assert!(pending.subject.starts_with("Registration received"));
    }
}
