//! Connection handles and the per-connection writer.
//!
//! Every outbound message to a connection goes through one ordered queue
//! drained by a single writer task that owns the transport sink. Handles are
//! cheap clones of the queue sender, so the router, delivery loops and the
//! lifecycle can all target a connection without ever touching the sink.

use crate::error::RelayError;
use std::sync::Arc;
use tenvis_relay_transport::{ConnectionId, MessageSink};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// A handle to a live local connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    user_id: Arc<str>,
    session: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
}

impl ConnectionHandle {
    /// The user id this connection belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The session id of this particular connection.
    #[must_use]
    pub fn session(&self) -> &ConnectionId {
        &self.session
    }

    /// Queue a message for this connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection's writer has stopped.
    pub fn send(&self, text: impl Into<String>) -> Result<(), RelayError> {
        self.outbound
            .send(text.into())
            .map_err(|_| RelayError::ConnectionClosed(self.user_id.to_string()))
    }

    /// Queue a message, logging instead of failing.
    ///
    /// Returns `true` if the message was queued.
    pub fn deliver(&self, text: impl Into<String>) -> bool {
        match self.send(text) {
            Ok(()) => true,
            Err(e) => {
                warn!(user = %self.user_id, session = %self.session, error = %e, "Delivery failed");
                false
            }
        }
    }

    /// Whether the connection's writer is still running.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.outbound.is_closed()
    }
}

/// Spawn the writer task for a connection and return its handle.
///
/// The writer sends queued messages in order. When every handle has been
/// dropped it drains what is left, closes the sink and stops. A transport
/// send failure stops it early; later sends through the handle then fail.
pub fn spawn_writer<S: MessageSink>(
    user_id: &str,
    session: ConnectionId,
    sink: S,
) -> (ConnectionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = ConnectionHandle {
        user_id: Arc::from(user_id),
        session,
        outbound: tx,
    };

    let task = tokio::spawn(run_writer(
        handle.user_id.clone(),
        handle.session.clone(),
        sink,
        rx,
    ));

    (handle, task)
}

async fn run_writer<S: MessageSink>(
    user_id: Arc<str>,
    session: ConnectionId,
    mut sink: S,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(text) = rx.recv().await {
        trace!(user = %user_id, session = %session, "Writing message");
        if let Err(e) = sink.send(text).await {
            warn!(user = %user_id, session = %session, error = %e, "Send failed, stopping writer");
            rx.close();
            break;
        }
    }

    if let Err(e) = sink.close().await {
        debug!(user = %user_id, session = %session, error = %e, "Close failed");
    }
    debug!(user = %user_id, session = %session, "Writer stopped");
}
