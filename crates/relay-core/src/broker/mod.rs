//! Publish/subscribe broker abstraction.
//!
//! The broker is the only channel between relay instances. It must deliver
//! each published payload at least once to every subscription that is live
//! at publish time; nothing stronger is assumed.

mod memory;
#[cfg(feature = "redis")]
mod redis_pubsub;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

pub use memory::MemoryBroker;
#[cfg(feature = "redis")]
pub use redis_pubsub::RedisBroker;

/// A live broker subscription: the payloads published on one topic.
///
/// Dropping the stream closes the subscription. The stream ends if the
/// broker drops the subscription on its side.
pub type Subscription = BoxStream<'static, String>;

/// Broker errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Could not reach the broker.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// Publish was rejected or failed.
    #[error("Publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    /// Subscribe was rejected or failed.
    #[error("Subscribe to {topic} failed: {reason}")]
    Subscribe { topic: String, reason: String },

    /// Broker operation timed out.
    #[error("Broker operation timed out: {0}")]
    Timeout(String),
}

/// A topic publish/subscribe broker.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Publish a payload to a topic.
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError>;

    /// Open a new subscription to a topic.
    ///
    /// Every call opens a fresh subscription; deduplication is the caller's job.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError>;

    /// Get the broker name (e.g., "redis", "memory").
    fn name(&self) -> &'static str;
}
