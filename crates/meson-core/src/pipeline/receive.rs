//! Incoming direction facade and the root handler seam.

use super::send::SendPipeline;
use crate::error::{MesonError, Result};
use crate::session::Session;
use crate::shutdown::ShutdownSignal;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// What a root handler can reach of the connection it serves.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    session: Session,
    outgoing: SendPipeline,
}

impl PipelineContext {
    pub(crate) fn new(session: Session, outgoing: SendPipeline) -> Self {
        Self { session, outgoing }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Send pipeline of the same connection, for replies.
    pub fn outgoing(&self) -> &SendPipeline {
        &self.outgoing
    }
}

/// Entry point of the handler chain behind a receive pipeline.
///
/// Implementations get exactly one raw message per call and do whatever
/// classification and dispatch they need.
#[async_trait::async_trait]
pub trait IncomingHandler: Send + Sync + 'static {
    async fn handle(&self, message: String, context: &PipelineContext) -> Result<()>;
}

/// Read side of the inbound queue, shared by the pipeline and its facade.
#[derive(Debug, Clone)]
pub(crate) struct Inbox {
    rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    closed: ShutdownSignal,
}

impl Inbox {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<String>, closed: ShutdownSignal) -> Self {
        Self {
            rx: Arc::new(Mutex::new(rx)),
            closed,
        }
    }

    pub(crate) async fn recv(&self) -> Result<String> {
        if self.closed.is_triggered() {
            return Err(MesonError::PipelineClosed);
        }

        let mut rx = self.rx.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.triggered() => Err(MesonError::PipelineClosed),
            message = rx.recv() => message.ok_or(MesonError::PipelineClosed),
        }
    }
}

/// Hands inbound messages, one per `process()` call, to the root handler.
pub struct ReceivePipeline {
    inbox: Inbox,
    root: Arc<dyn IncomingHandler>,
    context: PipelineContext,
}

impl ReceivePipeline {
    pub(crate) fn new(inbox: Inbox, root: Arc<dyn IncomingHandler>, context: PipelineContext) -> Self {
        Self {
            inbox,
            root,
            context,
        }
    }

    pub fn root_handler(&self) -> &Arc<dyn IncomingHandler> {
        &self.root
    }

    /// Wait for the next inbound message and hand it to the root handler.
    pub async fn process(&self) -> Result<()> {
        let message = self.inbox.recv().await?;
        self.root.handle(message, &self.context).await
    }
}
