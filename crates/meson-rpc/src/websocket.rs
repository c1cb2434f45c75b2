//! WebSocket transport over an upgraded axum socket.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use meson_core::transport::{Result, Transport, TransportError};
use meson_core::ShutdownSignal;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Text-frame transport for one WebSocket connection.
///
/// Ping and pong frames are answered by axum and never surface here. Binary
/// frames are accepted if they hold UTF-8 text and skipped otherwise.
pub struct WebSocketTransport {
    sink: Mutex<SplitSink<WebSocket, Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    peer: String,
    closed: ShutdownSignal,
}

impl WebSocketTransport {
    pub fn from_axum(socket: WebSocket, peer: impl Into<String>) -> Self {
        let (sink, stream) = socket.split();
        Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            peer: peer.into(),
            closed: ShutdownSignal::new(),
        }
    }

    async fn next_text(&self) -> Result<String> {
        let mut stream = self.stream.lock().await;
        loop {
            let message = match stream.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.closed.trigger();
                    return Err(TransportError::Io(e.to_string()));
                }
                None => {
                    self.closed.trigger();
                    return Err(TransportError::ConnectionClosed);
                }
            };

            match message {
                Message::Text(text) => return Ok(text),
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => return Ok(text),
                    Err(_) => warn!("Skipping non-UTF-8 binary frame from {}", self.peer),
                },
                Message::Close(frame) => {
                    debug!("WebSocket {} sent close: {:?}", self.peer, frame);
                    self.closed.trigger();
                    return Err(TransportError::ConnectionClosed);
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn recv(&self) -> Result<String> {
        if self.closed.is_triggered() {
            return Err(TransportError::ConnectionClosed);
        }

        tokio::select! {
            _ = self.closed.triggered() => Err(TransportError::ConnectionClosed),
            received = self.next_text() => received,
        }
    }

    async fn send(&self, frame: String) -> Result<()> {
        if self.closed.is_triggered() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame))
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.trigger() {
            return Ok(());
        }

        let mut sink = self.sink.lock().await;
        // The peer may already be gone; the socket is finished either way.
        let _ = sink.send(Message::Close(None)).await;
        let _ = sink.close().await;
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}
