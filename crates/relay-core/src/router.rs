//! Message router.
//!
//! Turns a decoded client envelope into local delivery, a broker publish, or
//! both. State changes go through the registries' own atomic operations;
//! no registry lock is held across a send or a publish.

use crate::broker::Broker;
use crate::connection::ConnectionHandle;
use crate::error::RelayError;
use crate::group::GroupRegistry;
use crate::registry::ConnectionRegistry;
use crate::subscription::SubscriptionManager;
use relay_protocol::{codec, notice, Envelope, RelayMessage, Topic};
use std::sync::Arc;
use tracing::{debug, warn};

/// Why a group send was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// Nobody on this instance joined the group.
    UnknownGroup,
    /// The sender is not a member of the group.
    NotMember,
}

/// The outcome of dispatching one envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Delivered straight to a local connection, broker untouched.
    Local,
    /// Published to the broker.
    Published,
    /// Sender joined a group.
    Joined {
        /// Sender was the group's first member on this instance.
        first_member: bool,
        /// This join created the group's subscription.
        subscribed: bool,
    },
    /// Refused, with an informational reply to the sender.
    Rejected(Rejection),
    /// A broker or delivery failure, already logged.
    Failed,
}

/// Routes client envelopes.
pub struct MessageRouter {
    broker: Arc<dyn Broker>,
    connections: Arc<ConnectionRegistry>,
    groups: Arc<GroupRegistry>,
    subscriptions: Arc<SubscriptionManager>,
}

impl MessageRouter {
    /// Create a router over the given components.
    #[must_use]
    pub fn new(
        broker: Arc<dyn Broker>,
        connections: Arc<ConnectionRegistry>,
        groups: Arc<GroupRegistry>,
        subscriptions: Arc<SubscriptionManager>,
    ) -> Self {
        Self {
            broker,
            connections,
            groups,
            subscriptions,
        }
    }

    /// Dispatch an envelope received from `sender`.
    pub async fn dispatch(&self, sender: &ConnectionHandle, envelope: Envelope) -> Dispatch {
        debug!(user = %sender.user_id(), method = envelope.method().as_str(), "Dispatch");

        match envelope {
            Envelope::Direct { target, text } => self.direct(sender, &target, &text).await,
            Envelope::JoinGroup { group } => self.join_group(sender, &group).await,
            Envelope::GroupSend { group, text } => self.group_send(sender, &group, &text).await,
            Envelope::Broadcast { text } => self.broadcast(sender, &text).await,
        }
    }

    /// Send to one user: locally if attached here, else via its user topic.
    pub async fn direct(&self, sender: &ConnectionHandle, target: &str, text: &str) -> Dispatch {
        let from = sender.user_id();

        if let Some(conn) = self.connections.lookup(target) {
            return if conn.deliver(notice::direct(from, text)) {
                Dispatch::Local
            } else {
                Dispatch::Failed
            };
        }

        let message = RelayMessage::direct(from, target, text);
        self.publish_outcome(&Topic::user(target), &message).await
    }

    /// Join the sender to a group and announce it.
    ///
    /// If the group's subscription cannot be created the join is undone and
    /// nothing is confirmed or announced.
    pub async fn join_group(&self, sender: &ConnectionHandle, group: &str) -> Dispatch {
        let user = sender.user_id();
        let joined = self.groups.join(group, user);

        // Every joiner waits here, so a second joiner cannot publish before
        // the first joiner's subscribe has completed.
        let topic = Topic::group(group);
        let subscribed = match self.subscriptions.ensure_subscribed(&topic).await {
            Ok(created) => created,
            Err(e) => {
                warn!(group = %group, user = %user, error = %e, "Group subscribe failed");
                if joined.added {
                    self.groups.leave(group, user);
                }
                return Dispatch::Failed;
            }
        };

        let text = notice::joined(user, group);
        sender.deliver(text.as_str());

        let message = RelayMessage::group(user, group, text);
        if let Err(e) = self.publish(&topic, &message).await {
            warn!(group = %group, user = %user, error = %e, "Join notice publish failed");
        }

        Dispatch::Joined {
            first_member: joined.first,
            subscribed,
        }
    }

    /// Send to every member of a group the sender belongs to.
    pub async fn group_send(&self, sender: &ConnectionHandle, group: &str, text: &str) -> Dispatch {
        let user = sender.user_id();

        if !self.groups.exists(group) {
            debug!(group = %group, user = %user, "Group send to unknown group");
            sender.deliver(notice::group_not_found(group));
            return Dispatch::Rejected(Rejection::UnknownGroup);
        }

        if !self.groups.is_member(group, user) {
            debug!(group = %group, user = %user, "Group send from non-member");
            sender.deliver(notice::not_member(user, group));
            return Dispatch::Rejected(Rejection::NotMember);
        }

        let message = RelayMessage::group(user, group, text);
        self.publish_outcome(&Topic::group(group), &message).await
    }

    /// Send to every connected user.
    pub async fn broadcast(&self, sender: &ConnectionHandle, text: &str) -> Dispatch {
        let message = RelayMessage::broadcast(sender.user_id(), text);
        self.publish_outcome(&Topic::Broadcast, &message).await
    }

    async fn publish(&self, topic: &Topic, message: &RelayMessage) -> Result<(), RelayError> {
        let payload = codec::encode_relay(message)?;
        self.broker.publish(&topic.name(), payload).await?;
        Ok(())
    }

    async fn publish_outcome(&self, topic: &Topic, message: &RelayMessage) -> Dispatch {
        match self.publish(topic, message).await {
            Ok(()) => Dispatch::Published,
            Err(e) => {
                warn!(topic = %topic, from = %message.from, error = %e, "Publish failed");
                Dispatch::Failed
            }
        }
    }
}
