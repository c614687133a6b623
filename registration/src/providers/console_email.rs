//! Console email sender for development and non-configured environments.

use crate::error::Result;
use crate::providers::{EmailMessage, EmailReceipt, EmailSender};
use async_trait::async_trait;

/// Logs emails instead of sending them.
///
/// Used wherever SMTP is not configured. Never fails the caller: the
/// registration and payment flows must proceed whether or not mail can
/// actually leave the machine.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConsoleEmailSender;

impl ConsoleEmailSender {
    /// Create a console sender.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EmailSender for ConsoleEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<EmailReceipt> {
        tracing::info!(
            to = %message.to,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "email (console stub, not delivered)"
        );
        tracing::debug!(body = %message.html, "email body");
        Ok(EmailReceipt::stub())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_never_fails() {
        let sender = ConsoleEmailSender::new();
        let receipt = sender
            .send(EmailMessage {
                to: "guest@example.com".to_string(),
                subject: "Your code".to_string(),
                html: "<p>123456</p>".to_string(),
                attachments: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(receipt.id, "stub");
        assert!(!receipt.delivered);
    }
}
