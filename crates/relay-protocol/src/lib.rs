//! # relay-protocol
//!
//! Wire protocol definitions for the Relay message relay.
//!
//! Two payloads cross the wire:
//!
//! - **Envelope** - JSON text frames sent by clients (`One`, `UserGroup`,
//!   `Group`, or anything else, which is treated as a broadcast)
//! - **RelayMessage** - the `{fromId, toId, msg}` payload carried between
//!   instances over the broker
//!
//! Broker topics are derived from the message scope (see [`Topic`]) and the
//! text frames pushed back to clients are rendered by [`notice`].
//!
//! ## Example
//!
//! ```rust
//! use relay_protocol::{codec, Envelope};
//!
//! let envelope = codec::decode_envelope(
//!     r#"{"method":"Group","group":"rust","msgBody":"hello"}"#,
//! ).unwrap();
//!
//! assert_eq!(
//!     envelope,
//!     Envelope::GroupSend { group: "rust".into(), text: "hello".into() }
//! );
//! ```

pub mod codec;
pub mod envelope;
pub mod notice;
pub mod relay;
pub mod topic;

pub use codec::{
    decode_envelope, decode_envelope_with_limit, decode_relay, encode_envelope, encode_relay,
    ProtocolError,
};
pub use envelope::{DirectBody, Envelope, Method};
pub use relay::RelayMessage;
pub use topic::{Topic, BROADCAST_TOPIC, GROUP_PREFIX, USER_PREFIX};
