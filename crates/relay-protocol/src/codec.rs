//! Codec for client envelopes and relay messages.
//!
//! Both payloads are JSON. Decoding is structural only: field presence and
//! types are checked, message text is passed through untouched.

use serde_json::Value;
use thiserror::Error;

use crate::envelope::{DirectBody, Envelope, Method, RawEnvelope};
use crate::relay::RelayMessage;

/// Maximum size of a single text payload (64 KiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Payload exceeds maximum size.
    #[error("Message size {size} exceeds maximum {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// JSON syntax or shape error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field required by the method is absent.
    #[error("Missing field `{field}` for {method} envelope")]
    MissingField {
        field: &'static str,
        method: &'static str,
    },

    /// A field has the wrong type.
    #[error("Invalid field `{field}`: {reason}")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

/// Decode a client envelope from a text frame, with the default size limit.
///
/// # Errors
///
/// See [`decode_envelope_with_limit`].
pub fn decode_envelope(text: &str) -> Result<Envelope, ProtocolError> {
    decode_envelope_with_limit(text, MAX_MESSAGE_SIZE)
}

/// Decode a client envelope from a text frame of at most `max_size` bytes.
///
/// # Errors
///
/// Returns an error if the payload is too large, is not a JSON object, or is
/// missing a field its method requires.
pub fn decode_envelope_with_limit(text: &str, max_size: usize) -> Result<Envelope, ProtocolError> {
    if text.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: text.len(),
            max: max_size,
        });
    }

    let raw: RawEnvelope = serde_json::from_str(text)?;
    let method = Method::from_tag(raw.method.as_deref());

    match method {
        Method::Direct => {
            let body = raw.msg_body.ok_or(ProtocolError::MissingField {
                field: "msgBody",
                method: method.as_str(),
            })?;
            let DirectBody { id, msg } = decode_direct_body(body)?;
            if id.is_empty() {
                return Err(ProtocolError::MissingField {
                    field: "msgBody.id",
                    method: method.as_str(),
                });
            }
            Ok(Envelope::Direct {
                target: id,
                text: msg,
            })
        }
        Method::JoinGroup => Ok(Envelope::JoinGroup {
            group: required_group(raw.group, method)?,
        }),
        Method::GroupSend => {
            let group = required_group(raw.group, method)?;
            let text = required_text(raw.msg_body, method)?;
            Ok(Envelope::GroupSend { group, text })
        }
        Method::Broadcast => Ok(Envelope::Broadcast {
            text: required_text(raw.msg_body, method)?,
        }),
    }
}

/// Encode a client envelope as a text frame.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_envelope(envelope: &Envelope) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(&RawEnvelope::from(envelope))?)
}

/// Decode a relay message received from the broker.
///
/// No size limit applies here: the text was bounded when its envelope was
/// decoded, and the relay payload adds ids and framing on top of it.
///
/// # Errors
///
/// Returns an error if the payload is not a relay message.
pub fn decode_relay(payload: &str) -> Result<RelayMessage, ProtocolError> {
    Ok(serde_json::from_str(payload)?)
}

/// Encode a relay message for publishing.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn encode_relay(message: &RelayMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

// Direct bodies arrive either as an object or as a string holding that object.
fn decode_direct_body(body: Value) -> Result<DirectBody, ProtocolError> {
    match body {
        Value::String(inner) => Ok(serde_json::from_str(&inner)?),
        Value::Object(_) => Ok(serde_json::from_value(body)?),
        _ => Err(ProtocolError::InvalidField {
            field: "msgBody",
            reason: "expected an object with `id` and `msg`",
        }),
    }
}

fn required_group(group: Option<String>, method: Method) -> Result<String, ProtocolError> {
    match group {
        Some(group) if !group.is_empty() => Ok(group),
        _ => Err(ProtocolError::MissingField {
            field: "group",
            method: method.as_str(),
        }),
    }
}

fn required_text(body: Option<Value>, method: Method) -> Result<String, ProtocolError> {
    match body {
        Some(Value::String(text)) => Ok(text),
        None | Some(Value::Null) => Err(ProtocolError::MissingField {
            field: "msgBody",
            method: method.as_str(),
        }),
        Some(_) => Err(ProtocolError::InvalidField {
            field: "msgBody",
            reason: "expected a string",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_direct() {
        let envelope =
            decode_envelope(r#"{"method":"One","msgBody":{"id":"bob","msg":"hi"}}"#).unwrap();
        assert_eq!(envelope, Envelope::direct("bob", "hi"));
    }

    #[test]
    fn test_decode_direct_with_string_body() {
        let envelope =
            decode_envelope(r#"{"method":"One","msgBody":"{\"id\":\"bob\",\"msg\":\"hi\"}"}"#)
                .unwrap();
        assert_eq!(envelope, Envelope::direct("bob", "hi"));
    }

    #[test]
    fn test_decode_direct_without_target() {
        assert!(matches!(
            decode_envelope(r#"{"method":"One","msgBody":{"msg":"hi"}}"#),
            Err(ProtocolError::Json(_))
        ));
        assert!(matches!(
            decode_envelope(r#"{"method":"One","msgBody":{"id":"","msg":"hi"}}"#),
            Err(ProtocolError::MissingField { field: "msgBody.id", .. })
        ));
    }

    #[test]
    fn test_decode_join_ignores_body() {
        let envelope =
            decode_envelope(r#"{"method":"UserGroup","group":"rust","msgBody":"ignored"}"#)
                .unwrap();
        assert_eq!(envelope, Envelope::join_group("rust"));
    }

    #[test]
    fn test_decode_group_requires_group() {
        match decode_envelope(r#"{"method":"Group","msgBody":"hi"}"#) {
            Err(ProtocolError::MissingField { field: "group", .. }) => {}
            other => panic!("Expected MissingField error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_method_is_broadcast() {
        let envelope = decode_envelope(r#"{"method":"Shout","msgBody":"hi"}"#).unwrap();
        assert_eq!(envelope, Envelope::broadcast("hi"));

        let envelope = decode_envelope(r#"{"msgBody":"hi"}"#).unwrap();
        assert_eq!(envelope, Envelope::broadcast("hi"));
    }

    #[test]
    fn test_broadcast_requires_text_body() {
        assert!(matches!(
            decode_envelope(r#"{"msgBody":{"id":"bob"}}"#),
            Err(ProtocolError::InvalidField { .. })
        ));
        assert!(matches!(
            decode_envelope(r#"{}"#),
            Err(ProtocolError::MissingField { .. })
        ));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(decode_envelope("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(decode_relay("[1,2]"), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn test_message_too_large() {
        let text = format!(r#"{{"msgBody":"{}"}}"#, "a".repeat(MAX_MESSAGE_SIZE));
        match decode_envelope(&text) {
            Err(ProtocolError::MessageTooLarge { max, .. }) => assert_eq!(max, MAX_MESSAGE_SIZE),
            other => panic!("Expected MessageTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_configured_limit() {
        let text = encode_envelope(&Envelope::broadcast("a".repeat(MAX_MESSAGE_SIZE))).unwrap();

        assert!(decode_envelope(&text).is_err());
        assert_eq!(
            decode_envelope_with_limit(&text, 2 * MAX_MESSAGE_SIZE).unwrap(),
            Envelope::broadcast("a".repeat(MAX_MESSAGE_SIZE))
        );
        assert!(matches!(
            decode_envelope_with_limit(&text, 1024),
            Err(ProtocolError::MessageTooLarge { max: 1024, .. })
        ));
    }

    #[test]
    fn test_relay_payload_of_limit_sized_envelope_decodes() {
        // Largest broadcast envelope that fits the limit
        let overhead = encode_envelope(&Envelope::broadcast("")).unwrap().len();
        let text = "a".repeat(MAX_MESSAGE_SIZE - overhead);
        let envelope = encode_envelope(&Envelope::broadcast(text.clone())).unwrap();
        assert_eq!(envelope.len(), MAX_MESSAGE_SIZE);
        assert!(decode_envelope(&envelope).is_ok());

        let payload = encode_relay(&RelayMessage::broadcast("alice", text.clone())).unwrap();
        assert!(payload.len() > MAX_MESSAGE_SIZE);
        assert_eq!(decode_relay(&payload).unwrap().msg, text);
    }

    #[test]
    fn test_encoded_envelopes_decode_to_themselves() {
        let envelopes = vec![
            Envelope::direct("bob", "hi"),
            Envelope::join_group("rust"),
            Envelope::group_send("rust", "hello"),
            Envelope::broadcast("hello all"),
        ];

        for envelope in envelopes {
            let encoded = encode_envelope(&envelope).unwrap();
            assert_eq!(decode_envelope(&encoded).unwrap(), envelope);
        }
    }
}
