//! In-memory transport.
//!
//! [`pair`] returns the two server-side halves of a connection together with
//! a [`MemoryClient`] playing the remote peer. Used by tests and by anything
//! embedding the relay in-process.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::traits::{MessageSink, MessageStream, TransportError};

/// Create a connected in-memory connection.
#[must_use]
pub fn pair() -> (MemorySink, MemoryStream, MemoryClient) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

    (
        MemorySink {
            tx: Some(outbound_tx),
        },
        MemoryStream { rx: inbound_rx },
        MemoryClient {
            tx: Some(inbound_tx),
            rx: outbound_rx,
        },
    )
}

/// Server-side send half.
#[derive(Debug)]
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(text).map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.tx = None;
        Ok(())
    }
}

/// Server-side receive half.
#[derive(Debug)]
pub struct MemoryStream {
    rx: mpsc::UnboundedReceiver<String>,
}

#[async_trait]
impl MessageStream for MemoryStream {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// The remote end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryClient {
    tx: Option<mpsc::UnboundedSender<String>>,
    rx: mpsc::UnboundedReceiver<String>,
}

impl MemoryClient {
    /// Send a text message to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has disconnected or the server dropped
    /// the receive half.
    pub fn send(&self, text: impl Into<String>) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::ConnectionClosed)?;
        tx.send(text.into())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Receive the next message from the server.
    ///
    /// Returns `None` once the server closed its send half and the queue is empty.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take every message already delivered, without waiting.
    pub fn drain(&mut self) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            messages.push(text);
        }
        messages
    }

    /// Disconnect: the server sees end of stream on its next receive.
    ///
    /// Messages the server already sent can still be read.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }
}
