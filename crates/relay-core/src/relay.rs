//! The relay and its connection lifecycle.
//!
//! A connection goes `Connecting -> Active -> Closed`:
//!
//! - **Connecting**: its writer is spawned, it is registered, and the
//!   subscriptions it needs (its user topic and the broadcast topic) exist
//!   before any of its envelopes are read.
//! - **Active**: envelopes are decoded and each one is dispatched on its own
//!   task, so a slow recipient never stalls the receive loop.
//! - **Closed**: on end of stream or a receive error the connection is
//!   deregistered and its user topic released.

use crate::broker::Broker;
use crate::connection::{spawn_writer, ConnectionHandle};
use crate::error::RelayError;
use crate::group::GroupRegistry;
use crate::registry::ConnectionRegistry;
use crate::router::MessageRouter;
use crate::subscription::SubscriptionManager;
use relay_protocol::{codec, Topic};
use std::sync::Arc;
use tenvis_relay_transport::{ConnectionId, MessageSink, MessageStream};
use tracing::{debug, info, warn};

/// Relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Remove a disconnecting user from every group it joined.
    pub retract_groups_on_disconnect: bool,
    /// Release the subscription of a group left without members.
    /// Only meaningful with `retract_groups_on_disconnect`.
    pub release_empty_groups: bool,
    /// Maximum size of an inbound envelope in bytes.
    pub max_message_size: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            retract_groups_on_disconnect: false,
            release_empty_groups: false,
            max_message_size: codec::MAX_MESSAGE_SIZE,
        }
    }
}

/// An active connection.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
}

impl Session {
    /// The handle used to reach this connection.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// The user id of this connection.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.handle.user_id()
    }
}

/// Relay statistics.
#[derive(Debug, Clone)]
pub struct RelayStats {
    /// Number of local connections.
    pub connection_count: usize,
    /// Number of groups with local members.
    pub group_count: usize,
    /// Number of live broker subscriptions.
    pub subscription_count: usize,
}

/// One relay instance.
pub struct Relay {
    connections: Arc<ConnectionRegistry>,
    groups: Arc<GroupRegistry>,
    subscriptions: Arc<SubscriptionManager>,
    router: Arc<MessageRouter>,
    config: RelayConfig,
}

impl Relay {
    /// Create a relay with default configuration.
    #[must_use]
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self::with_config(broker, RelayConfig::default())
    }

    /// Create a relay with custom configuration.
    #[must_use]
    pub fn with_config(broker: Arc<dyn Broker>, config: RelayConfig) -> Self {
        info!(broker = broker.name(), "Creating relay with config: {:?}", config);

        let connections = Arc::new(ConnectionRegistry::new());
        let groups = Arc::new(GroupRegistry::new());
        let subscriptions = Arc::new(SubscriptionManager::new(
            broker.clone(),
            connections.clone(),
            groups.clone(),
        ));
        let router = Arc::new(MessageRouter::new(
            broker,
            connections.clone(),
            groups.clone(),
            subscriptions.clone(),
        ));

        Self {
            connections,
            groups,
            subscriptions,
            router,
            config,
        }
    }

    /// The connection registry.
    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// The group registry.
    #[must_use]
    pub fn groups(&self) -> &GroupRegistry {
        &self.groups
    }

    /// The subscription manager.
    #[must_use]
    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    /// The message router.
    #[must_use]
    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Get relay statistics.
    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            connection_count: self.connections.len(),
            group_count: self.groups.group_count(),
            subscription_count: self.subscriptions.active_topics().await.len(),
        }
    }

    /// Serve one connection for its whole life.
    ///
    /// Returns once the transport reports closure.
    ///
    /// # Errors
    ///
    /// Returns an error only if the connection could not be activated.
    pub async fn serve<S, R>(&self, user_id: &str, sink: S, stream: R) -> Result<(), RelayError>
    where
        S: MessageSink,
        R: MessageStream,
    {
        let session = self.connect(user_id, sink).await?;
        self.run(session, stream).await;
        Ok(())
    }

    /// `Connecting -> Active`.
    ///
    /// On return the connection is registered and both its user topic and the
    /// broadcast topic are subscribed.
    ///
    /// # Errors
    ///
    /// Returns an error if a subscription could not be created; the
    /// registration is rolled back and the connection should be closed.
    pub async fn connect<S: MessageSink>(&self, user_id: &str, sink: S) -> Result<Session, RelayError> {
        let (handle, _writer) = spawn_writer(user_id, ConnectionId::generate(), sink);
        info!(user = %user_id, session = %handle.session(), "Connection joining");

        if self.connections.register(handle.clone()).is_some() {
            info!(user = %user_id, "Replaced existing connection");
        }

        let session = Session { handle };
        let subscribed = async {
            self.subscriptions.ensure_subscribed(&Topic::user(user_id)).await?;
            // A no-op for every connection after the first
            self.subscriptions.ensure_subscribed(&Topic::Broadcast).await?;
            Ok::<_, RelayError>(())
        }
        .await;

        if let Err(e) = subscribed {
            warn!(user = %user_id, error = %e, "Failed to activate connection");
            self.disconnect(session).await;
            return Err(e);
        }

        debug!(user = %user_id, connections = self.connections.len(), "Connection active");
        Ok(session)
    }

    /// Run the receive loop of an active connection, then close it.
    pub async fn run<R: MessageStream>(&self, session: Session, mut stream: R) {
        let user_id = session.user_id().to_string();

        loop {
            match stream.recv().await {
                Ok(Some(text)) => match codec::decode_envelope_with_limit(
                    &text,
                    self.config.max_message_size,
                ) {
                    Ok(envelope) => {
                        let router = self.router.clone();
                        let sender = session.handle.clone();
                        tokio::spawn(async move {
                            router.dispatch(&sender, envelope).await;
                        });
                    }
                    Err(e) => {
                        warn!(user = %user_id, error = %e, "Dropping undecodable envelope");
                    }
                },
                Ok(None) => {
                    debug!(user = %user_id, "Connection closed by peer");
                    break;
                }
                Err(e) => {
                    debug!(user = %user_id, error = %e, "Receive failed, closing");
                    break;
                }
            }
        }

        self.disconnect(session).await;
    }

    /// `Active -> Closed`.
    pub async fn disconnect(&self, session: Session) {
        let user_id = session.user_id().to_string();
        self.connections
            .unregister_session(&user_id, session.handle.session());

        // A reconnect under the same user id keeps the topic alive
        let connections = &self.connections;
        self.subscriptions
            .teardown_if(&Topic::user(&user_id), || !connections.contains(&user_id))
            .await;

        if self.config.retract_groups_on_disconnect {
            let summary = self.groups.leave_all(&user_id);
            if self.config.release_empty_groups {
                for group in &summary.emptied {
                    let groups = &self.groups;
                    self.subscriptions
                        .teardown_if(&Topic::group(group), || !groups.exists(group))
                        .await;
                }
            }
        }

        // Dropping the last handle lets the writer drain and stop
        drop(session);
        info!(user = %user_id, connections = self.connections.len(), "Connection closed");
    }

    /// Tear down every subscription.
    pub async fn shutdown(&self) {
        self.subscriptions.shutdown().await;
        info!("Relay shut down");
    }
}
