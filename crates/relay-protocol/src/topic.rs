//! Broker topic naming.
//!
//! A topic name is derived from the message scope alone. The prefixes keep user, group
//! and broadcast topics disjoint whatever ids clients choose.

use std::fmt;

/// Prefix of per-user topics.
pub const USER_PREFIX: &str = "user:";

/// Prefix of per-group topics.
pub const GROUP_PREFIX: &str = "group:";

/// The global broadcast topic.
pub const BROADCAST_TOPIC: &str = "all";

/// A broker topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    /// `user:<id>`
    User(String),
    /// `group:<id>`
    Group(String),
    /// The broadcast topic.
    Broadcast,
}

impl Topic {
    /// The topic for a single user.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self::User(id.into())
    }

    /// The topic for a group.
    #[must_use]
    pub fn group(id: impl Into<String>) -> Self {
        Self::Group(id.into())
    }

    /// Parse a topic name.
    ///
    /// Returns `None` for names outside the relay's namespace.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        if name == BROADCAST_TOPIC {
            Some(Self::Broadcast)
        } else if let Some(id) = name.strip_prefix(USER_PREFIX) {
            Some(Self::user(id))
        } else {
            name.strip_prefix(GROUP_PREFIX).map(Self::group)
        }
    }

    /// The broker-level topic name.
    #[must_use]
    pub fn name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "{USER_PREFIX}{id}"),
            Self::Group(id) => write!(f, "{GROUP_PREFIX}{id}"),
            Self::Broadcast => f.write_str(BROADCAST_TOPIC),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_names() {
        assert_eq!(Topic::user("alice").name(), "user:alice");
        assert_eq!(Topic::group("rust").name(), "group:rust");
        assert_eq!(Topic::Broadcast.name(), "all");
    }

    #[test]
    fn test_topic_parse() {
        assert_eq!(Topic::parse("user:alice"), Some(Topic::user("alice")));
        assert_eq!(Topic::parse("group:rust"), Some(Topic::group("rust")));
        assert_eq!(Topic::parse("all"), Some(Topic::Broadcast));
        assert_eq!(Topic::parse("room:1"), None);
    }

    #[test]
    fn test_ids_cannot_collide_across_scopes() {
        // A user called "all" and a group called "all" still get their own topics.
        assert_ne!(Topic::user("all").name(), Topic::Broadcast.name());
        assert_ne!(Topic::group("all").name(), Topic::Broadcast.name());
        assert_ne!(Topic::user("x").name(), Topic::group("x").name());
        assert_eq!(Topic::parse(&Topic::user("group:x").name()), Some(Topic::user("group:x")));
    }
}
