//! Development ticket renderer.
//!
//! Emits an SVG placeholder for the QR image and an HTML ticket document.
//! Production deployments swap in a renderer backed by a real QR encoder;
//! the engine only cares that bytes come back.

use crate::error::Result;
use crate::providers::TicketRenderer;
use crate::ticket::TicketDocument;

/// Renders tickets as SVG/HTML text.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextTicketRenderer;

impl TextTicketRenderer {
    /// Create a text renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

impl TicketRenderer for TextTicketRenderer {
    fn render_qr(&self, code: &str) -> Result<Vec<u8>> {
        let escaped = escape(code);
        let svg = format!(
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="240" height="240">
  <rect width="240" height="240" fill="white"/>
  <text x="8" y="120" font-family="monospace" font-size="7">{escaped}</text>
</svg>"#
        );
        Ok(svg.into_bytes())
    }

    fn render_document(&self, document: &TicketDocument) -> Result<Vec<u8>> {
        let qr = String::from_utf8_lossy(&self.render_qr(&document.qr_code)?).into_owned();
        let venue = document
            .venue
            .as_deref()
            .map(escape)
            .map_or_else(String::new, |venue| format!("<p>Venue: {venue}</p>"));

        let html = format!(
            r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif;">
  <h1>{title}</h1>
  {venue}
  <p>Starts: {starts_at}</p>
  <p>Attendee: {name} &lt;{email}&gt;</p>
  {qr}
</body>
</html>"#,
            title = escape(&document.event_title),
            starts_at = document.starts_at.to_rfc3339(),
            name = escape(&document.attendee_name),
            email = escape(&document.attendee_email),
        );
        Ok(html.into_bytes())
    }
}
