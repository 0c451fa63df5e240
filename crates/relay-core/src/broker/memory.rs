//! In-process broker.
//!
//! Serves single-instance deployments, and lets several `Relay`s in one
//! process share a broker. It also keeps counters (subscribe calls, publishes
//! per topic) that tests use to observe broker traffic.

use super::{Broker, BrokerError, Subscription};
use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::trace;

/// An in-memory broker.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    /// Live subscriber queues per topic.
    topics: DashMap<String, Vec<mpsc::UnboundedSender<String>>>,
    /// Number of subscribe calls per topic.
    subscribe_calls: DashMap<String, usize>,
    /// Published payloads per topic, in publish order.
    published: DashMap<String, Vec<String>>,
    /// Artificial latency of each subscribe call.
    subscribe_delay: Option<Duration>,
    /// When set, every publish fails.
    fail_publish: AtomicBool,
    /// When set, every subscribe fails.
    fail_subscribe: AtomicBool,
}

impl MemoryBroker {
    /// Create a new broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a broker whose subscribe calls take `delay` to complete.
    #[must_use]
    pub fn with_subscribe_delay(delay: Duration) -> Self {
        Self {
            subscribe_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Make every following publish fail (or succeed again).
    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Make every following subscribe fail (or succeed again).
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Number of subscribe calls made for a topic.
    #[must_use]
    pub fn subscribe_calls(&self, topic: &str) -> usize {
        self.subscribe_calls.get(topic).map(|c| *c).unwrap_or(0)
    }

    /// Number of live subscriptions on a topic.
    #[must_use]
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    /// Payloads published to a topic so far.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<String> {
        self.published
            .get(topic)
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Number of payloads published to a topic.
    #[must_use]
    pub fn publish_count(&self, topic: &str) -> usize {
        self.published.get(topic).map(|p| p.len()).unwrap_or(0)
    }

    /// Number of payloads published across all topics.
    #[must_use]
    pub fn total_published(&self) -> usize {
        self.published.iter().map(|p| p.len()).sum()
    }

    /// Drop every subscription on a topic, as a broker connection loss would.
    pub fn close_topic(&self, topic: &str) {
        self.topics.remove(topic);
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), BrokerError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish {
                topic: topic.to_string(),
                reason: "publishing disabled".to_string(),
            });
        }

        self.published
            .entry(topic.to_string())
            .or_default()
            .push(payload.clone());

        if let Some(mut subs) = self.topics.get_mut(topic) {
            subs.retain(|tx| tx.send(payload.clone()).is_ok());
            trace!(topic = %topic, recipients = subs.len(), "Published");
        }

        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BrokerError> {
        *self.subscribe_calls.entry(topic.to_string()).or_default() += 1;

        if let Some(delay) = self.subscribe_delay {
            tokio::time::sleep(delay).await;
        }

        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(BrokerError::Subscribe {
                topic: topic.to_string(),
                reason: "subscribing disabled".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.topics.entry(topic.to_string()).or_default().push(tx);

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        });
        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
