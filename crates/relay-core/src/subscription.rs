//! Broker subscription management.
//!
//! The manager owns at most one broker subscription per topic and runs one
//! delivery loop per subscription. Each topic has its own slot lock; the
//! existence check, the broker subscribe call and the registration of the
//! new subscription all happen under a single acquisition of that lock, so
//! concurrent first joins can never open duplicate subscriptions.

use crate::broker::{Broker, Subscription};
use crate::error::RelayError;
use crate::group::GroupRegistry;
use crate::registry::ConnectionRegistry;
use dashmap::DashMap;
use futures_util::StreamExt;
use relay_protocol::{codec, notice, RelayMessage, Topic};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// A live subscription and its delivery loop.
struct ActiveSubscription {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ActiveSubscription {
    /// The delivery loop ends on its own if the broker drops the subscription.
    fn is_live(&self) -> bool {
        !self.task.is_finished()
    }

    fn stop(self) {
        self.cancel.cancel();
    }
}

type Slot = Arc<Mutex<Option<ActiveSubscription>>>;

/// Owns this instance's broker subscriptions.
pub struct SubscriptionManager {
    broker: Arc<dyn Broker>,
    connections: Arc<ConnectionRegistry>,
    groups: Arc<GroupRegistry>,
    /// Topic name -> subscription slot.
    topics: DashMap<String, Slot>,
}

impl SubscriptionManager {
    /// Create a manager delivering into the given registries.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        connections: Arc<ConnectionRegistry>,
        groups: Arc<GroupRegistry>,
    ) -> Self {
        Self {
            broker,
            connections,
            groups,
            topics: DashMap::new(),
        }
    }

    fn slot(&self, name: &str) -> Slot {
        self.topics.entry(name.to_string()).or_default().clone()
    }

    /// Drop an empty slot unless another caller holds or waits on it.
    fn forget_slot(&self, name: &str, slot: &Slot) {
        self.topics.remove_if(name, |_, s| {
            Arc::ptr_eq(s, slot)
                && Arc::strong_count(s) == 2
                && s.try_lock().map(|g| g.is_none()).unwrap_or(false)
        });
    }

    /// Make sure a live subscription exists for `topic`.
    ///
    /// Returns `true` if this call created it (and started its delivery loop),
    /// `false` if one already existed, in which case the broker is not called.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker subscribe call fails; nothing is
    /// registered in that case.
    pub async fn ensure_subscribed(&self, topic: &Topic) -> Result<bool, RelayError> {
        let name = topic.name();
        let slot = self.slot(&name);
        let mut guard = slot.lock().await;

        if guard.as_ref().is_some_and(ActiveSubscription::is_live) {
            trace!(topic = %name, "Already subscribed");
            return Ok(false);
        }

        let subscription = match self.broker.subscribe(&name).await {
            Ok(subscription) => subscription,
            Err(e) => {
                if let Some(stale) = guard.take() {
                    stale.stop();
                }
                drop(guard);
                self.forget_slot(&name, &slot);
                return Err(e.into());
            }
        };
        let cancel = CancellationToken::new();
        let task = tokio::spawn(delivery_loop(
            topic.clone(),
            subscription,
            cancel.clone(),
            self.connections.clone(),
            self.groups.clone(),
        ));

        // A finished loop left behind by a dropped broker subscription is replaced
        if let Some(stale) = guard.replace(ActiveSubscription { cancel, task }) {
            stale.stop();
        }

        info!(topic = %name, broker = self.broker.name(), "Subscribed");
        Ok(true)
    }

    /// Close the subscription for `topic`, if any.
    ///
    /// Returns `true` if a subscription was torn down.
    pub async fn teardown(&self, topic: &Topic) -> bool {
        self.teardown_if(topic, || true).await
    }

    /// Close the subscription for `topic` if `unused` still holds.
    ///
    /// `unused` is evaluated under the topic's lock, so a concurrent
    /// `ensure_subscribed` either runs before it (and the predicate sees the
    /// new user) or after the teardown (and subscribes again).
    pub async fn teardown_if(&self, topic: &Topic, unused: impl FnOnce() -> bool) -> bool {
        let name = topic.name();
        let Some(slot) = self.topics.get(&name).map(|s| s.clone()) else {
            return false;
        };

        let mut guard = slot.lock().await;
        if guard.is_none() || !unused() {
            return false;
        }
        let torn_down = match guard.take() {
            Some(active) => {
                active.stop();
                true
            }
            None => false,
        };
        drop(guard);

        self.forget_slot(&name, &slot);

        info!(topic = %name, "Subscription torn down");
        torn_down
    }

    /// Check whether a live subscription exists for `topic`.
    pub async fn is_subscribed(&self, topic: &Topic) -> bool {
        let Some(slot) = self.topics.get(&topic.name()).map(|s| s.clone()) else {
            return false;
        };
        let guard = slot.lock().await;
        guard.as_ref().is_some_and(ActiveSubscription::is_live)
    }

    /// Names of all topics with a live subscription.
    pub async fn active_topics(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .topics
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut active = Vec::new();
        for (name, slot) in slots {
            if slot.lock().await.as_ref().is_some_and(ActiveSubscription::is_live) {
                active.push(name);
            }
        }
        active
    }

    /// Tear down every subscription.
    pub async fn shutdown(&self) {
        let names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some(topic) = Topic::parse(&name) {
                self.teardown(&topic).await;
            }
        }
        debug!("Subscription manager shut down");
    }
}

/// Consume one subscription until cancelled or the broker ends it.
async fn delivery_loop(
    topic: Topic,
    mut subscription: Subscription,
    cancel: CancellationToken,
    connections: Arc<ConnectionRegistry>,
    groups: Arc<GroupRegistry>,
) {
    debug!(topic = %topic, "Delivery loop started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(topic = %topic, "Delivery loop cancelled");
                break;
            }
            next = subscription.next() => {
                let Some(payload) = next else {
                    warn!(topic = %topic, "Broker ended subscription");
                    break;
                };

                match codec::decode_relay(&payload) {
                    Ok(message) => {
                        let delivered = fanout(&topic, &message, &connections, &groups);
                        trace!(topic = %topic, from = %message.from, delivered, "Fanned out");
                    }
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Dropping undecodable relay message");
                    }
                }
            }
        }
    }
}

/// Deliver a relay message to the local connections its scope covers.
///
/// Works on registry snapshots; no registry lock is held while queueing.
/// Returns the number of connections the message was queued for.
pub(crate) fn fanout(
    topic: &Topic,
    message: &RelayMessage,
    connections: &ConnectionRegistry,
    groups: &GroupRegistry,
) -> usize {
    match topic {
        Topic::User(_) => match connections.lookup(&message.to) {
            Some(conn) => usize::from(conn.deliver(notice::direct(&message.from, &message.msg))),
            // Recipient left between publish and delivery
            None => 0,
        },
        Topic::Group(_) => {
            let Some(members) = groups.members(&message.to) else {
                return 0;
            };
            let text = notice::group(&message.to, &message.from, &message.msg);
            members
                .iter()
                .filter(|member| **member != message.from)
                .filter_map(|member| connections.lookup(member))
                .filter(|conn| conn.deliver(text.as_str()))
                .count()
        }
        Topic::Broadcast => {
            let text = notice::broadcast(&message.from, &message.msg);
            connections
                .snapshot()
                .into_iter()
                .filter(|(user_id, _)| *user_id != message.from)
                .filter(|(_, conn)| conn.deliver(text.as_str()))
                .count()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::connection::{spawn_writer, ConnectionHandle};
    use std::time::Duration;
    use tenvis_relay_transport::{memory, ConnectionId};
    use tokio::time::timeout;

    struct Fixture {
        broker: Arc<MemoryBroker>,
        connections: Arc<ConnectionRegistry>,
        groups: Arc<GroupRegistry>,
        manager: SubscriptionManager,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(MemoryBroker::new());
        let connections = Arc::new(ConnectionRegistry::new());
        let groups = Arc::new(GroupRegistry::new());
        let manager = SubscriptionManager::new(broker.clone(), connections.clone(), groups.clone());
        Fixture {
            broker,
            connections,
            groups,
            manager,
        }
    }

    fn connect(registry: &ConnectionRegistry, user: &str) -> (ConnectionHandle, memory::MemoryClient) {
        let (sink, _stream, client) = memory::pair();
        let (handle, _task) = spawn_writer(user, ConnectionId::generate(), sink);
        registry.register(handle.clone());
        (handle, client)
    }

    /// Register a connection whose writer has already stopped.
    async fn connect_dead(registry: &ConnectionRegistry, user: &str) -> ConnectionHandle {
        let (sink, _stream, client) = memory::pair();
        let (handle, task) = spawn_writer(user, ConnectionId::generate(), sink);
        registry.register(handle.clone());

        drop(client);
        handle.send("lost").unwrap();
        task.await.unwrap();
        assert!(!handle.is_open());
        handle
    }

    #[tokio::test]
    async fn test_ensure_subscribed_once() {
        let f = fixture();
        let topic = Topic::group("rust");

        assert!(f.manager.ensure_subscribed(&topic).await.unwrap());
        assert!(!f.manager.ensure_subscribed(&topic).await.unwrap());
        assert_eq!(f.broker.subscribe_calls("group:rust"), 1);
        assert!(f.manager.is_subscribed(&topic).await);
        assert_eq!(f.manager.active_topics().await, vec!["group:rust".to_string()]);
    }

    #[tokio::test]
    async fn test_teardown() {
        let f = fixture();
        let topic = Topic::user("alice");

        assert!(!f.manager.teardown(&topic).await);

        f.manager.ensure_subscribed(&topic).await.unwrap();
        assert!(f.manager.teardown(&topic).await);
        assert!(!f.manager.is_subscribed(&topic).await);
        assert!(!f.manager.teardown(&topic).await);

        // The broker side is released once the loop observes cancellation
        timeout(Duration::from_secs(1), async {
            while f.broker.subscriber_count("user:alice") > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        // And the topic can be subscribed again
        assert!(f.manager.ensure_subscribed(&topic).await.unwrap());
        assert_eq!(f.broker.subscribe_calls("user:alice"), 2);
    }

    #[tokio::test]
    async fn test_failed_subscribe_leaves_nothing_behind() {
        let f = fixture();
        let topic = Topic::group("rust");

        f.broker.set_fail_subscribe(true);
        assert!(matches!(
            f.manager.ensure_subscribed(&topic).await,
            Err(RelayError::Broker(_))
        ));
        assert!(!f.manager.is_subscribed(&topic).await);
        assert!(f.manager.topics.is_empty());
        assert!(f.manager.active_topics().await.is_empty());

        f.broker.set_fail_subscribe(false);
        assert!(f.manager.ensure_subscribed(&topic).await.unwrap());
        assert_eq!(f.broker.subscribe_calls("group:rust"), 2);
    }

    #[tokio::test]
    async fn test_failed_resubscribe_clears_stale_loop() {
        let f = fixture();
        let topic = Topic::Broadcast;
        f.manager.ensure_subscribed(&topic).await.unwrap();

        f.broker.close_topic("all");
        timeout(Duration::from_secs(1), async {
            while f.manager.is_subscribed(&topic).await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        f.broker.set_fail_subscribe(true);
        assert!(f.manager.ensure_subscribed(&topic).await.is_err());
        assert!(f.manager.topics.is_empty());
    }

    #[tokio::test]
    async fn test_teardown_if_respects_predicate() {
        let f = fixture();
        let topic = Topic::group("rust");
        f.manager.ensure_subscribed(&topic).await.unwrap();

        assert!(!f.manager.teardown_if(&topic, || false).await);
        assert!(f.manager.is_subscribed(&topic).await);
        assert!(f.manager.teardown_if(&topic, || true).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensure_subscribes_once() {
        let broker = Arc::new(MemoryBroker::with_subscribe_delay(Duration::from_millis(20)));
        let manager = Arc::new(SubscriptionManager::new(
            broker.clone(),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(GroupRegistry::new()),
        ));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                manager.ensure_subscribed(&Topic::group("rust")).await.unwrap()
            }));
        }

        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }

        assert_eq!(created, 1);
        assert_eq!(broker.subscribe_calls("group:rust"), 1);
    }

    #[tokio::test]
    async fn test_resubscribes_after_broker_drops_topic() {
        let f = fixture();
        let topic = Topic::Broadcast;
        f.manager.ensure_subscribed(&topic).await.unwrap();

        f.broker.close_topic("all");
        timeout(Duration::from_secs(1), async {
            while f.manager.is_subscribed(&topic).await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert!(f.manager.ensure_subscribed(&topic).await.unwrap());
        assert_eq!(f.broker.subscribe_calls("all"), 2);
    }

    #[tokio::test]
    async fn test_delivery_loop_skips_undecodable_payloads() {
        let f = fixture();
        let (_alice, mut alice_client) = connect(&f.connections, "alice");
        f.manager.ensure_subscribed(&Topic::Broadcast).await.unwrap();

        f.broker.publish("all", "garbage".to_string()).await.unwrap();
        let valid = codec::encode_relay(&RelayMessage::broadcast("bob", "hi")).unwrap();
        f.broker.publish("all", valid).await.unwrap();

        let received = timeout(Duration::from_secs(1), alice_client.recv())
            .await
            .unwrap();
        assert_eq!(received, Some(notice::broadcast("bob", "hi")));
    }

    #[tokio::test]
    async fn test_user_fanout() {
        let f = fixture();
        let (_bob, mut bob_client) = connect(&f.connections, "bob");

        let message = RelayMessage::direct("alice", "bob", "hi");
        assert_eq!(fanout(&Topic::user("bob"), &message, &f.connections, &f.groups), 1);

        // Recipient gone: dropped silently
        let message = RelayMessage::direct("alice", "carol", "hi");
        assert_eq!(fanout(&Topic::user("carol"), &message, &f.connections, &f.groups), 0);

        assert_eq!(bob_client.recv().await, Some("user alice send:hi".to_string()));
    }

    #[tokio::test]
    async fn test_group_fanout_skips_sender_and_remote_members() {
        let f = fixture();
        let (_alice, mut alice_client) = connect(&f.connections, "alice");
        let (_bob, mut bob_client) = connect(&f.connections, "bob");
        f.groups.join("rust", "alice");
        f.groups.join("rust", "bob");
        // Member on another instance
        f.groups.join("rust", "carol");

        let message = RelayMessage::group("alice", "rust", "hi");
        assert_eq!(fanout(&Topic::group("rust"), &message, &f.connections, &f.groups), 1);

        assert_eq!(
            bob_client.recv().await,
            Some(notice::group("rust", "alice", "hi"))
        );
        tokio::task::yield_now().await;
        assert!(alice_client.drain().is_empty());
    }

    #[tokio::test]
    async fn test_group_fanout_continues_past_stopped_writer() {
        let f = fixture();
        let (_alice, _alice_client) = connect(&f.connections, "alice");
        let _bob = connect_dead(&f.connections, "bob").await;
        let (_carol, mut carol_client) = connect(&f.connections, "carol");
        let (_dave, mut dave_client) = connect(&f.connections, "dave");
        for user in ["alice", "bob", "carol", "dave"] {
            f.groups.join("rust", user);
        }

        let message = RelayMessage::group("alice", "rust", "hi");
        assert_eq!(fanout(&Topic::group("rust"), &message, &f.connections, &f.groups), 2);

        let expected = Some(notice::group("rust", "alice", "hi"));
        assert_eq!(carol_client.recv().await, expected);
        assert_eq!(dave_client.recv().await, expected);
    }

    #[tokio::test]
    async fn test_broadcast_fanout_continues_past_stopped_writer() {
        let f = fixture();
        let (_alice, _alice_client) = connect(&f.connections, "alice");
        let _bob = connect_dead(&f.connections, "bob").await;
        let (_carol, mut carol_client) = connect(&f.connections, "carol");
        let (_dave, mut dave_client) = connect(&f.connections, "dave");

        let message = RelayMessage::broadcast("alice", "hi");
        assert_eq!(fanout(&Topic::Broadcast, &message, &f.connections, &f.groups), 2);

        let expected = Some(notice::broadcast("alice", "hi"));
        assert_eq!(carol_client.recv().await, expected);
        assert_eq!(dave_client.recv().await, expected);
    }

    #[tokio::test]
    async fn test_broadcast_fanout_skips_sender() {
        let f = fixture();
        let (_alice, mut alice_client) = connect(&f.connections, "alice");
        let (_bob, mut bob_client) = connect(&f.connections, "bob");
        let (_carol, mut carol_client) = connect(&f.connections, "carol");

        let message = RelayMessage::broadcast("alice", "hi");
        assert_eq!(fanout(&Topic::Broadcast, &message, &f.connections, &f.groups), 2);

        let expected = Some(notice::broadcast("alice", "hi"));
        assert_eq!(bob_client.recv().await, expected);
        assert_eq!(carol_client.recv().await, expected);
        tokio::task::yield_now().await;
        assert!(alice_client.drain().is_empty());
    }
}
