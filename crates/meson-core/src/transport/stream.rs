//! Length-prefixed framing over async byte streams.
//!
//! Wire format: 4-byte big-endian length prefix followed by a UTF-8 payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 bytes of len]
//! ```

use super::{Result, Transport, TransportError};
use crate::config::TransportConfig;
use crate::shutdown::ShutdownSignal;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > TransportConfig::MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: TransportConfig::MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > TransportConfig::MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: TransportConfig::MAX_FRAME_SIZE,
        });
    }

    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Framed text transport over a split byte stream.
///
/// Reads and writes are serialized independently, so one task may block in
/// `recv` while another sends.
pub struct StreamTransport<R, W> {
    reader: Mutex<R>,
    writer: Mutex<W>,
    peer: String,
    closed: ShutdownSignal,
}

impl StreamTransport<OwnedReadHalf, OwnedWriteHalf> {
    /// Wrap an accepted or connected TCP stream.
    pub fn from_tcp(stream: TcpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "tcp:unknown".to_string());
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer, peer)
    }

    /// Connect to a framed TCP endpoint.
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(TransportConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::Io(format!("Timed out connecting to {}", addr)))??;

        debug!("Stream transport connected to {}", addr);
        Ok(Self::from_tcp(stream))
    }
}

impl<R, W> StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(reader: R, writer: W, peer: impl Into<String>) -> Self {
        Self {
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            peer: peer.into(),
            closed: ShutdownSignal::new(),
        }
    }
}

#[async_trait::async_trait]
impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn recv(&self) -> Result<String> {
        if self.closed.is_triggered() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut reader = self.reader.lock().await;
        let frame = tokio::select! {
            _ = self.closed.triggered() => return Err(TransportError::ConnectionClosed),
            frame = read_frame(&mut *reader) => frame?,
        };

        match frame {
            Some(bytes) => String::from_utf8(bytes)
                .map_err(|_| TransportError::InvalidFrame("Invalid UTF-8 in frame".to_string())),
            None => {
                self.closed.trigger();
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn send(&self, frame: String) -> Result<()> {
        if self.closed.is_triggered() {
            return Err(TransportError::ConnectionClosed);
        }

        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame.as_bytes()).await
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.trigger() {
            return Ok(());
        }

        let mut writer = self.writer.lock().await;
        match writer.shutdown().await {
            Ok(()) => Ok(()),
            Err(e) => match TransportError::from(e) {
                TransportError::ConnectionClosed => Ok(()),
                other => Err(other),
            },
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}
