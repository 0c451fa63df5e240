//! Relay errors.

use crate::broker::BrokerError;
use relay_protocol::ProtocolError;
use thiserror::Error;

/// Relay errors.
///
/// None of these are fatal to the process; callers log them and carry on.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Broker publish or subscribe failed.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Payload could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The connection's writer has stopped.
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),
}
