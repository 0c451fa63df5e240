//! Redis pub/sub broker.
//!
//! Publishes go through one shared auto-reconnecting connection. Each
//! subscription gets its own pub/sub connection, so dropping the
//! subscription stream unsubscribes by closing that connection.

use super::{Broker, BrokerError, Subscription};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Timeout for a single Redis round trip.
const REDIS_TIMEOUT: Duration = Duration::from_secs(5);

/// A broker backed by Redis pub/sub.
pub struct RedisBroker {
    client: redis::Client,
    publisher: ConnectionManager,
}

impl RedisBroker {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or Redis cannot be reached.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let publisher = timeout(REDIS_TIMEOUT, ConnectionManager::new(client.clone()))
            .await
            .map_err(|_| BrokerError::Timeout(format!("connecting to {url}")))?
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        info!("Connected to Redis broker");
        Ok(Self { client, publisher })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        let mut conn = self.publisher.clone();

        let receivers: i64 = timeout(REDIS_TIMEOUT, conn.publish(topic, payload))
            .await
            .map_err(|_| BrokerError::Timeout(format!("publishing to {topic}")))?
            .map_err(|e| BrokerError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;

        debug!(topic = %topic, receivers, "Published to Redis");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError> {
        let subscribe_failed = |reason: String| BrokerError::Subscribe {
            topic: topic.to_string(),
            reason,
        };

        let mut pubsub = timeout(REDIS_TIMEOUT, self.client.get_async_pubsub())
            .await
            .map_err(|_| BrokerError::Timeout(format!("opening pub/sub for {topic}")))?
            .map_err(|e| subscribe_failed(e.to_string()))?;

        timeout(REDIS_TIMEOUT, pubsub.subscribe(topic))
            .await
            .map_err(|_| BrokerError::Timeout(format!("subscribing to {topic}")))?
            .map_err(|e| subscribe_failed(e.to_string()))?;

        debug!(topic = %topic, "Subscribed on Redis");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    warn!(channel = %msg.get_channel_name(), error = %e, "Invalid payload");
                    None
                }
            }
        });

        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
