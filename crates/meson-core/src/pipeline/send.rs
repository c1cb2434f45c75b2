//! Outgoing direction facade.

use crate::error::{MesonError, Result};
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

/// One outbound unit handed to the send pipeline.
///
/// Only text frames reach the wire; binary frames are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Text(_) => "text",
            Frame::Binary(_) => "binary",
        }
    }
}

impl From<String> for Frame {
    fn from(text: String) -> Self {
        Frame::Text(text)
    }
}

impl From<&str> for Frame {
    fn from(text: &str) -> Self {
        Frame::Text(text.to_string())
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Frame::Binary(data)
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Frame::Binary(Bytes::from(data))
    }
}

/// Cloneable handle that schedules frames onto a pipeline's outbound queue.
///
/// Producers such as RPC reply tasks hold one of these; transmission happens
/// later on the pipeline's produce loop.
#[derive(Debug, Clone)]
pub struct SendPipeline {
    outbound: mpsc::UnboundedSender<String>,
}

impl SendPipeline {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<String>) -> Self {
        Self { outbound }
    }

    /// Validate and schedule a frame for transmission.
    ///
    /// Fails with [`MesonError::InvalidOutboundMessage`] for anything but a
    /// text frame. Does not wait for the frame to be written.
    pub fn process(&self, message: impl Into<Frame>) -> Result<()> {
        match message.into() {
            Frame::Text(text) => {
                self.enqueue(text);
                Ok(())
            }
            other => Err(MesonError::InvalidOutboundMessage { kind: other.kind() }),
        }
    }

    pub(crate) fn enqueue(&self, message: String) {
        if self.outbound.send(message).is_err() {
            debug!("Dropping outbound message, pipeline is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_frame_is_enqueued() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = SendPipeline::new(tx);

        pipeline.process("hello").unwrap();
        pipeline.process(String::from("world")).unwrap();

        assert_eq!(rx.try_recv().unwrap(), "hello");
        assert_eq!(rx.try_recv().unwrap(), "world");
    }

    #[test]
    fn test_binary_frame_is_rejected_before_queue() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let pipeline = SendPipeline::new(tx);

        let err = pipeline.process(vec![1u8, 2, 3]).unwrap_err();
        assert!(matches!(
            err,
            MesonError::InvalidOutboundMessage { kind: "binary" }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_send_after_queue_dropped_is_silent() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        let pipeline = SendPipeline::new(tx);
        assert!(pipeline.process("late").is_ok());
    }
}
