//! SMTP email sender using Lettre.

use crate::error::{Error, Result};
use crate::providers::{EmailMessage, EmailReceipt, EmailSender};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Body, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};

/// SMTP connection settings.
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    /// SMTP server address (e.g. "smtp.postmarkapp.com")
    pub server: String,
    /// SMTP server port (usually 587 for TLS)
    pub port: u16,
    /// Authentication username
    pub username: String,
    /// Authentication password
    pub password: String,
    /// Sender address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
}

/// Email sender that delivers via SMTP, suitable for production use.
#[derive(Clone)]
pub struct SmtpEmailSender {
    server: String,
    port: u16,
    credentials: Credentials,
    from_email: String,
    from_name: String,
}

impl SmtpEmailSender {
    /// Create a sender from connection settings.
    #[must_use]
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            server: config.server,
            port: config.port,
            credentials: Credentials::new(config.username, config.password),
            from_email: config.from_email,
            from_name: config.from_name,
        }
    }

    /// Build a transport per send to avoid connection pooling issues.
    fn build_transport(&self) -> Result<SmtpTransport> {
        Ok(SmtpTransport::relay(&self.server)
            .map_err(|e| Error::Email(format!("SMTP relay error: {e}")))?
            .port(self.port)
            .credentials(self.credentials.clone())
            .build())
    }

    fn from_header(&self) -> String {
        format!("{} <{}>", self.from_name, self.from_email)
    }

    fn build_message(&self, message: &EmailMessage) -> Result<Message> {
        let builder = Message::builder()
            .from(
                self.from_header()
                    .parse()
                    .map_err(|e| Error::Email(format!("invalid from address: {e}")))?,
            )
            .to(message
                .to
                .parse()
                .map_err(|e| Error::Email(format!("invalid to address: {e}")))?)
            .subject(&message.subject);

        let html_part = SinglePart::builder()
            .header(ContentType::TEXT_HTML)
            .body(message.html.clone());

        if message.attachments.is_empty() {
            return builder
                .singlepart(html_part)
                .map_err(|e| Error::Email(format!("failed to build email: {e}")));
        }

        let mut multipart = MultiPart::mixed().singlepart(html_part);
        for attachment in &message.attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .unwrap_or(ContentType::TEXT_PLAIN);
            multipart = multipart.singlepart(
                Attachment::new(attachment.filename.clone())
                    .body(Body::new(attachment.bytes.clone()), content_type),
            );
        }

        builder
            .multipart(multipart)
            .map_err(|e| Error::Email(format!("failed to build email: {e}")))
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: EmailMessage) -> Result<EmailReceipt> {
        let email = self.build_message(&message)?;
        let mailer = self.build_transport()?;

        let response = tokio::task::spawn_blocking(move || mailer.send(&email))
            .await
            .map_err(|e| Error::Email(format!("email task failed: {e}")))?
            .map_err(|e| Error::Email(format!("failed to send email: {e}")))?;

        Ok(EmailReceipt {
            id: response
                .message()
                .next()
                .unwrap_or_default()
                .to_string(),
            delivered: true,
        })
    }
}
