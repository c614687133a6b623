//! Distributed check-in fan-out over redis pub/sub.

use crate::error::{Error, Result};
use crate::providers::{CheckinBus, CheckinNotice};
use async_trait::async_trait;
use futures::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::broadcast;

/// Redis channel the bus publishes on.
const CHANNEL: &str = "guestflow:checkins";

/// Multi-instance check-in bus.
///
/// Publishes every notice to a redis channel and forwards inbound messages
/// into a local broadcast channel, so a check-in handled by any instance
/// reaches SSE clients connected to every instance.
#[derive(Clone)]
pub struct RedisCheckinBus {
    publisher: ConnectionManager,
    local: broadcast::Sender<CheckinNotice>,
}

impl RedisCheckinBus {
    /// Connect to redis and start the subscriber loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Database`] when the connection or subscription fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| Error::Database(format!("redis open failed: {e}")))?;
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| Error::Database(format!("redis connect failed: {e}")))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| Error::Database(format!("redis pubsub failed: {e}")))?;
        pubsub
            .subscribe(CHANNEL)
            .await
            .map_err(|e| Error::Database(format!("redis subscribe failed: {e}")))?;

        let (local, _) = broadcast::channel(256);
        let forward = local.clone();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(message) = stream.next().await {
                let Ok(payload) = message.get_payload::<String>() else {
                    continue;
                };
                match serde_json::from_str::<CheckinNotice>(&payload) {
                    Ok(notice) => {
                        let _ = forward.send(notice);
                    }
                    Err(error) => {
                        tracing::warn!(%error, "dropping malformed check-in notice");
                    }
                }
            }
            tracing::warn!("redis check-in subscription ended");
        });

        Ok(Self { publisher, local })
    }
}

#[async_trait]
impl CheckinBus for RedisCheckinBus {
    async fn publish(&self, notice: CheckinNotice) -> Result<()> {
        let payload = serde_json::to_string(&notice)
            .map_err(|e| Error::Database(format!("unencodable notice: {e}")))?;
        let mut connection = self.publisher.clone();
        let _: () = connection
            .publish(CHANNEL, payload)
            .await
            .map_err(|e| Error::Database(format!("redis publish failed: {e}")))?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<CheckinNotice> {
        self.local.subscribe()
    }
}
