//! The payload carried between instances over the broker.

use serde::{Deserialize, Serialize};

/// A relay message.
///
/// The topic it is published on decides the scope; `to` is the target user
/// for direct messages, the group for group messages and empty for
/// broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Sending user id.
    #[serde(rename = "fromId")]
    pub from: String,
    /// Target user or group id.
    #[serde(rename = "toId", default)]
    pub to: String,
    /// Message text.
    #[serde(default)]
    pub msg: String,
}

impl RelayMessage {
    /// A message for a single user.
    #[must_use]
    pub fn direct(from: impl Into<String>, to: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            msg: msg.into(),
        }
    }

    /// A message for every member of a group.
    #[must_use]
    pub fn group(from: impl Into<String>, group: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::direct(from, group, msg)
    }

    /// A message for every connected user.
    #[must_use]
    pub fn broadcast(from: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::direct(from, String::new(), msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let msg = RelayMessage::direct("alice", "bob", "hi");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "fromId": "alice", "toId": "bob", "msg": "hi" })
        );
    }

    #[test]
    fn test_broadcast_has_empty_target() {
        let msg = RelayMessage::broadcast("alice", "hi");
        assert!(msg.to.is_empty());
    }

    #[test]
    fn test_missing_target_defaults_to_empty() {
        let msg: RelayMessage = serde_json::from_str(r#"{"fromId":"alice","msg":"hi"}"#).unwrap();
        assert_eq!(msg, RelayMessage::broadcast("alice", "hi"));
    }
}
