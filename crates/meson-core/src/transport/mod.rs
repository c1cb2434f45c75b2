//! Transport abstraction.
//!
//! A transport is one persistent, bidirectional connection carrying text
//! frames. It knows nothing about RPC: frames are opaque strings.
//!
//! Implementations:
//! - [`memory::MemoryTransport`]: in-process duplex pair, used by tests and
//!   embedders.
//! - [`stream::StreamTransport`]: length-prefixed frames over any async byte
//!   stream (TCP in practice).

pub mod memory;
pub mod stream;

pub use memory::MemoryTransport;
pub use stream::{read_frame, write_frame, StreamTransport};

use thiserror::Error;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The peer closed the connection, or it was closed locally.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A frame exceeded the configured size limit.
    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame could not be decoded as text.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// Generic I/O error or internal transport failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => TransportError::ConnectionClosed,
            _ => TransportError::Io(err.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A persistent duplex connection moving text frames.
///
/// This trait is object-safe and used as `Arc<dyn Transport>`.
///
/// # Invariants
/// - `recv` returns `Err(ConnectionClosed)` once the connection is gone and
///   keeps returning it on later calls.
/// - `close` is idempotent.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Suspend until the next frame arrives.
    async fn recv(&self) -> Result<String>;

    /// Hand a frame to the network layer.
    async fn send(&self, frame: String) -> Result<()>;

    /// Close the connection. Calling this more than once is a no-op.
    async fn close(&self) -> Result<()>;

    /// Whether the connection is closed or closing.
    fn is_closed(&self) -> bool;

    /// Label for the remote side, used in logs and sessions.
    fn peer(&self) -> String;
}
