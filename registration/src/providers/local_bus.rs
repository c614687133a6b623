//! In-process check-in fan-out on a tokio broadcast channel.

use crate::error::Result;
use crate::providers::{CheckinBus, CheckinNotice};
use async_trait::async_trait;
use tokio::sync::broadcast;

/// Single-instance check-in bus.
///
/// Publishes on a broadcast channel shared by every SSE subscriber in this
/// process. Deployments running more than one instance use
/// [`crate::providers::RedisCheckinBus`] so a check-in handled on one
/// instance reaches dashboards connected to another.
#[derive(Clone)]
pub struct LocalCheckinBus {
    sender: broadcast::Sender<CheckinNotice>,
}

impl LocalCheckinBus {
    /// Create a bus buffering up to `capacity` undelivered notices per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }
}

impl Default for LocalCheckinBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl CheckinBus for LocalCheckinBus {
    async fn publish(&self, notice: CheckinNotice) -> Result<()> {
        // A send error just means nobody is listening right now.
        let _ = self.sender.send(notice);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CheckinNotice> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{CheckinMethod, EventId, RegistrationId};
    use chrono::Utc;

    #[tokio::test]
    async fn subscribers_receive_published_notices() {
        let bus = LocalCheckinBus::default();
        let mut receiver = bus.subscribe();

        let notice = CheckinNotice {
            event_id: EventId::new(),
            registration_id: RegistrationId::new(),
            attendee_name: "Guest".to_string(),
            method: CheckinMethod::QrScan,
            checked_in_at: Utc::now(),
        };
        bus.publish(notice.clone()).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.registration_id, notice.registration_id);
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_fine() {
        let bus = LocalCheckinBus::default();
        let notice = CheckinNotice {
            event_id: EventId::new(),
            registration_id: RegistrationId::new(),
            attendee_name: "Guest".to_string(),
            method: CheckinMethod::Manual,
            checked_in_at: Utc::now(),
        };
        assert!(bus.publish(notice).await.is_ok());
    }
}
