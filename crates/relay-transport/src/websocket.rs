//! WebSocket transport implementation.
//!
//! Adapts an upgraded axum [`WebSocket`] into the relay's sink/stream halves.
//! Text frames carry envelopes; binary frames are accepted if they hold UTF-8.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::traits::{MessageSink, MessageStream, TransportError};

/// Default maximum inbound message size (64 KB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Split an upgraded WebSocket into relay halves.
#[must_use]
pub fn split_websocket(socket: WebSocket, max_message_size: usize) -> (WebSocketSink, WebSocketStream) {
    let (sink, stream) = socket.split();
    (
        WebSocketSink { sink },
        WebSocketStream {
            stream,
            max_message_size,
        },
    )
}

/// Send half of a WebSocket connection.
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl MessageSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::Other(format!("Failed to close: {}", e)))
    }
}

/// Receive half of a WebSocket connection.
pub struct WebSocketStream {
    stream: SplitStream<WebSocket>,
    max_message_size: usize,
}

impl WebSocketStream {
    fn check_size(&self, len: usize) -> Result<(), TransportError> {
        if len > self.max_message_size {
            warn!(
                "Message too large: {} bytes (max: {})",
                len, self.max_message_size
            );
            return Err(TransportError::MessageTooLarge(len));
        }
        Ok(())
    }
}

#[async_trait]
impl MessageStream for WebSocketStream {
    async fn recv(&mut self) -> Result<Option<String>, TransportError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    self.check_size(text.len())?;
                    return Ok(Some(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    self.check_size(data.len())?;
                    return String::from_utf8(data)
                        .map(Some)
                        .map_err(|_| TransportError::InvalidUtf8);
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Pongs are answered by the WebSocket layer itself
                }
                Some(Ok(Message::Close(_))) => {
                    debug!("Received close frame");
                    return Ok(None);
                }
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(e.to_string()));
                }
                None => {
                    debug!("WebSocket stream ended");
                    return Ok(None);
                }
            }
        }
    }
}
