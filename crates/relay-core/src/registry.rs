//! Connection registry.
//!
//! Maps a user id to its live local connection. Lookups and snapshots run
//! concurrently; a register or unregister excludes other access to its shard.

use crate::connection::ConnectionHandle;
use dashmap::DashMap;
use tenvis_relay_transport::ConnectionId;
use tracing::debug;

/// The registry of connections attached to this instance.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its user id.
    ///
    /// Last join wins: an existing connection for the same user is replaced
    /// and returned.
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = handle.user_id().to_string();
        let previous = self.connections.insert(user_id.clone(), handle);
        debug!(
            user = %user_id,
            replaced = previous.is_some(),
            connections = self.connections.len(),
            "Registered connection"
        );
        previous
    }

    /// Remove whatever connection is registered for a user.
    pub fn unregister(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.connections.remove(user_id).map(|(_, handle)| handle)
    }

    /// Remove the user's connection only if it is the given session.
    ///
    /// A connection closing after its user reconnected must not evict the
    /// newer connection. Returns `true` if an entry was removed.
    pub fn unregister_session(&self, user_id: &str, session: &ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(user_id, |_, handle| handle.session() == session)
            .is_some();
        debug!(user = %user_id, session = %session, removed, "Unregistered connection");
        removed
    }

    /// Look up a user's connection.
    #[must_use]
    pub fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.connections.get(user_id).map(|h| h.clone())
    }

    /// Check whether a user has a local connection.
    #[must_use]
    pub fn contains(&self, user_id: &str) -> bool {
        self.connections.contains_key(user_id)
    }

    /// Copy out every registered connection, for fanout without holding locks.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ConnectionHandle)> {
        self.connections
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Number of registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no connections are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::spawn_writer;
    use tenvis_relay_transport::memory;

    fn handle(user: &str) -> ConnectionHandle {
        let (sink, _stream, _client) = memory::pair();
        spawn_writer(user, ConnectionId::generate(), sink).0
    }

    #[tokio::test]
    async fn test_register_lookup_unregister() {
        let registry = ConnectionRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.register(handle("alice")).is_none());
        assert!(registry.contains("alice"));
        assert_eq!(registry.lookup("alice").unwrap().user_id(), "alice");
        assert!(registry.lookup("bob").is_none());

        assert!(registry.unregister("alice").is_some());
        assert!(registry.unregister("alice").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_last_join_wins() {
        let registry = ConnectionRegistry::new();
        let first = handle("alice");
        let second = handle("alice");

        registry.register(first.clone());
        let replaced = registry.register(second.clone()).unwrap();

        assert_eq!(replaced.session(), first.session());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("alice").unwrap().session(), second.session());
    }

    #[tokio::test]
    async fn test_stale_session_does_not_evict_newer() {
        let registry = ConnectionRegistry::new();
        let first = handle("alice");
        let second = handle("alice");

        registry.register(first.clone());
        registry.register(second.clone());

        assert!(!registry.unregister_session("alice", first.session()));
        assert!(registry.contains("alice"));

        assert!(registry.unregister_session("alice", second.session()));
        assert!(!registry.contains("alice"));
    }

    #[tokio::test]
    async fn test_snapshot() {
        let registry = ConnectionRegistry::new();
        registry.register(handle("alice"));
        registry.register(handle("bob"));

        let mut users: Vec<_> = registry.snapshot().into_iter().map(|(u, _)| u).collect();
        users.sort();
        assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);
    }
}
