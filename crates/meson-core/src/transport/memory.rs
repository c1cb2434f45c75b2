//! In-process duplex transport.
//!
//! Frames sent on one end of a [`MemoryTransport::pair`] appear on the other
//! end's `recv()`. Closing either end ends the stream for both.

use super::{Result, Transport, TransportError};
use crate::shutdown::ShutdownSignal;
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};

/// A duplex channel transport backed by tokio mpsc channels.
pub struct MemoryTransport {
    label: String,
    tx: StdMutex<Option<mpsc::UnboundedSender<String>>>,
    rx: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: ShutdownSignal,
}

impl MemoryTransport {
    /// Create a pair of transports connected to each other.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::unbounded_channel();
        let (tx_b, rx_b) = mpsc::unbounded_channel();

        let a = Self {
            label: "memory:a".to_string(),
            tx: StdMutex::new(Some(tx_a)),
            rx: Mutex::new(rx_b),
            closed: ShutdownSignal::new(),
        };

        let b = Self {
            label: "memory:b".to_string(),
            tx: StdMutex::new(Some(tx_b)),
            rx: Mutex::new(rx_a),
            closed: ShutdownSignal::new(),
        };

        (a, b)
    }
}

#[async_trait::async_trait]
impl Transport for MemoryTransport {
    async fn recv(&self) -> Result<String> {
        if self.closed.is_triggered() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            _ = self.closed.triggered() => Err(TransportError::ConnectionClosed),
            frame = rx.recv() => frame.ok_or(TransportError::ConnectionClosed),
        }
    }

    async fn send(&self, frame: String) -> Result<()> {
        let tx = self.tx.lock().unwrap_or_else(|e| e.into_inner());
        match tx.as_ref() {
            Some(tx) => tx.send(frame).map_err(|_| TransportError::ConnectionClosed),
            None => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.trigger() {
            // Dropping the sender ends the peer's stream.
            self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }

    fn peer(&self) -> String {
        self.label.clone()
    }
}
