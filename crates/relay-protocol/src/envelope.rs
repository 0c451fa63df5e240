//! Inbound client envelopes.
//!
//! Clients send one JSON object per text frame:
//!
//! ```text
//! { "method": "One" | "UserGroup" | "Group" | <absent/other>,
//!   "group":  "<group id>",
//!   "msgBody": {"id": "<user id>", "msg": "<text>"} | "<text>" }
//! ```
//!
//! A missing or unrecognised `method` is a broadcast. This fallback is part
//! of the protocol, not an error path: older clients send broadcasts without
//! any method tag at all.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Method tag for a direct message.
pub const METHOD_DIRECT: &str = "One";
/// Method tag for a group join request.
pub const METHOD_JOIN_GROUP: &str = "UserGroup";
/// Method tag for a group message.
pub const METHOD_GROUP: &str = "Group";

/// The operation requested by an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Direct,
    JoinGroup,
    GroupSend,
    Broadcast,
}

impl Method {
    /// Resolve a method tag. Unknown and absent tags resolve to `Broadcast`.
    #[must_use]
    pub fn from_tag(tag: Option<&str>) -> Self {
        match tag {
            Some(METHOD_DIRECT) => Self::Direct,
            Some(METHOD_JOIN_GROUP) => Self::JoinGroup,
            Some(METHOD_GROUP) => Self::GroupSend,
            _ => Self::Broadcast,
        }
    }

    /// The wire tag for this method, `None` for broadcast.
    #[must_use]
    pub fn tag(self) -> Option<&'static str> {
        match self {
            Self::Direct => Some(METHOD_DIRECT),
            Self::JoinGroup => Some(METHOD_JOIN_GROUP),
            Self::GroupSend => Some(METHOD_GROUP),
            Self::Broadcast => None,
        }
    }

    /// Short lowercase label, used for logs and metrics.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::JoinGroup => "join_group",
            Self::GroupSend => "group",
            Self::Broadcast => "broadcast",
        }
    }
}

/// Body of a direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectBody {
    /// Target user id.
    pub id: String,
    /// Message text.
    #[serde(default)]
    pub msg: String,
}

/// A decoded client envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Send `text` to a single user, wherever it is connected.
    Direct { target: String, text: String },
    /// Join the sender to `group`.
    JoinGroup { group: String },
    /// Send `text` to every member of `group`.
    GroupSend { group: String, text: String },
    /// Send `text` to every connected user.
    Broadcast { text: String },
}

impl Envelope {
    /// The method this envelope dispatches to.
    #[must_use]
    pub fn method(&self) -> Method {
        match self {
            Self::Direct { .. } => Method::Direct,
            Self::JoinGroup { .. } => Method::JoinGroup,
            Self::GroupSend { .. } => Method::GroupSend,
            Self::Broadcast { .. } => Method::Broadcast,
        }
    }

    /// Create a direct envelope.
    #[must_use]
    pub fn direct(target: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Direct {
            target: target.into(),
            text: text.into(),
        }
    }

    /// Create a group join envelope.
    #[must_use]
    pub fn join_group(group: impl Into<String>) -> Self {
        Self::JoinGroup {
            group: group.into(),
        }
    }

    /// Create a group send envelope.
    #[must_use]
    pub fn group_send(group: impl Into<String>, text: impl Into<String>) -> Self {
        Self::GroupSend {
            group: group.into(),
            text: text.into(),
        }
    }

    /// Create a broadcast envelope.
    #[must_use]
    pub fn broadcast(text: impl Into<String>) -> Self {
        Self::Broadcast { text: text.into() }
    }
}

/// The envelope exactly as it appears on the wire.
#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct RawEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, rename = "msgBody", skip_serializing_if = "Option::is_none")]
    pub msg_body: Option<Value>,
}

impl From<&Envelope> for RawEnvelope {
    fn from(envelope: &Envelope) -> Self {
        let method = envelope.method().tag().map(str::to_string);
        match envelope {
            Envelope::Direct { target, text } => Self {
                method,
                group: None,
                msg_body: Some(serde_json::json!({ "id": target, "msg": text })),
            },
            Envelope::JoinGroup { group } => Self {
                method,
                group: Some(group.clone()),
                msg_body: None,
            },
            Envelope::GroupSend { group, text } => Self {
                method,
                group: Some(group.clone()),
                msg_body: Some(Value::String(text.clone())),
            },
            Envelope::Broadcast { text } => Self {
                method,
                group: None,
                msg_body: Some(Value::String(text.clone())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_from_tag() {
        assert_eq!(Method::from_tag(Some("One")), Method::Direct);
        assert_eq!(Method::from_tag(Some("UserGroup")), Method::JoinGroup);
        assert_eq!(Method::from_tag(Some("Group")), Method::GroupSend);
        assert_eq!(Method::from_tag(Some("Shout")), Method::Broadcast);
        assert_eq!(Method::from_tag(None), Method::Broadcast);
    }

    #[test]
    fn test_method_tags_are_case_sensitive() {
        assert_eq!(Method::from_tag(Some("one")), Method::Broadcast);
        assert_eq!(Method::from_tag(Some("group")), Method::Broadcast);
    }

    #[test]
    fn test_raw_envelope_omits_empty_fields() {
        let raw = RawEnvelope::from(&Envelope::broadcast("hi"));
        let json = serde_json::to_value(&raw).unwrap();
        assert_eq!(json, serde_json::json!({ "msgBody": "hi" }));
    }
}
