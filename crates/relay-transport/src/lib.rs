//! # relay-transport
//!
//! Transport abstraction layer for the Relay message relay.
//!
//! A connection is handed to the relay as two halves:
//!
//! - [`MessageStream`] - the receive half, read by the connection's receive loop
//! - [`MessageSink`] - the send half, owned by the connection's single writer task
//!
//! Implementations:
//!
//! - **WebSocket** - axum WebSocket upgrade, split into halves
//! - **Memory** - channel-backed halves plus a client handle, for tests and
//!   embedding
//!
//! ```rust,ignore
//! use relay_transport::MessageStream;
//!
//! async fn read_all(mut stream: impl MessageStream) {
//!     while let Ok(Some(text)) = stream.recv().await {
//!         // Decode and dispatch
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{ConnectionId, MessageSink, MessageStream, TransportError};

#[cfg(feature = "websocket")]
pub use websocket::{split_websocket, WebSocketSink, WebSocketStream};
