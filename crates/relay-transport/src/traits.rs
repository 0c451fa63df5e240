//! Transport abstraction traits for Relay.
//!
//! These traits define the interface that all transport implementations must provide,
//! allowing the relay to be transport-agnostic.

use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for one accepted connection (a session).
///
/// A user may reconnect under the same user id; each connection still gets
/// its own `ConnectionId`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a unique connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let counter = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{:x}_{:x}", timestamp, counter))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Inbound message exceeds the configured limit.
    #[error("Message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// Binary frame that is not valid UTF-8.
    #[error("Invalid UTF-8 in frame")]
    InvalidUtf8,

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// The send half of a connection.
///
/// A sink is owned by exactly one writer task; it is never shared.
#[async_trait]
pub trait MessageSink: Send + 'static {
    /// Send one text message.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Close the connection gracefully.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// The receive half of a connection.
#[async_trait]
pub trait MessageStream: Send + 'static {
    /// Receive the next text message.
    ///
    /// Returns `None` if the connection is closed cleanly.
    async fn recv(&mut self) -> Result<Option<String>, TransportError>;
}
