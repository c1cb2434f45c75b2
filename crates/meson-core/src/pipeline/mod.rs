//! Per-connection communication pipeline.
//!
//! A [`CommunicationPipeline`] decouples transport I/O from message processing
//! with two FIFO queues and supervises three loops:
//!
//! - **consume**: transport → inbound queue
//! - **produce**: outbound queue → transport
//! - **process-incoming**: inbound queue → [`ReceivePipeline`] → root handler
//!
//! The first loop to finish ends [`CommunicationPipeline::run`]. Every loop
//! closes the pipeline on its way out, so the remaining loops observe the
//! closed-flag and exit on their own.

pub mod receive;
pub mod send;

pub use receive::{IncomingHandler, PipelineContext, ReceivePipeline};
pub use send::{Frame, SendPipeline};

use crate::error::{MesonError, Result};
use crate::session::Session;
use crate::shutdown::ShutdownSignal;
use crate::transport::{Transport, TransportError};
use receive::Inbox;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Identifies one of the pipeline's loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineLoop {
    Consume,
    Produce,
    ProcessIncoming,
}

impl PipelineLoop {
    /// Spawn order used by `run`.
    const ALL: [PipelineLoop; 3] = [
        PipelineLoop::Consume,
        PipelineLoop::Produce,
        PipelineLoop::ProcessIncoming,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineLoop::Consume => "consume",
            PipelineLoop::Produce => "produce",
            PipelineLoop::ProcessIncoming => "process-incoming",
        }
    }
}

impl fmt::Display for PipelineLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The per-connection owner of a transport, its queues and its loops.
pub struct CommunicationPipeline {
    transport: Arc<dyn Transport>,
    inbound_tx: mpsc::UnboundedSender<String>,
    inbox: Inbox,
    outbound_rx: Mutex<mpsc::UnboundedReceiver<String>>,
    closed: ShutdownSignal,
    first_finished: OnceLock<PipelineLoop>,
    session: Session,
    outgoing: SendPipeline,
    incoming: ReceivePipeline,
}

impl CommunicationPipeline {
    /// Create a pipeline with a fresh session labelled after the transport peer.
    pub fn new(transport: Arc<dyn Transport>, root: Arc<dyn IncomingHandler>) -> Arc<Self> {
        let session = Session::new(transport.peer());
        Self::with_session(transport, root, session)
    }

    /// Create a pipeline bound to an existing session.
    pub fn with_session(
        transport: Arc<dyn Transport>,
        root: Arc<dyn IncomingHandler>,
        session: Session,
    ) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = ShutdownSignal::new();

        let inbox = Inbox::new(inbound_rx, closed.clone());
        let outgoing = SendPipeline::new(outbound_tx);
        let context = PipelineContext::new(session.clone(), outgoing.clone());
        let incoming = ReceivePipeline::new(inbox.clone(), root, context);

        Arc::new(Self {
            transport,
            inbound_tx,
            inbox,
            outbound_rx: Mutex::new(outbound_rx),
            closed,
            first_finished: OnceLock::new(),
            session,
            outgoing,
            incoming,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn incoming_pipeline(&self) -> &ReceivePipeline {
        &self.incoming
    }

    pub fn outgoing_pipeline(&self) -> &SendPipeline {
        &self.outgoing
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_triggered()
    }

    /// Suspend until the pipeline is closed.
    pub async fn closed(&self) {
        self.closed.triggered().await
    }

    /// Next inbound message in FIFO order.
    ///
    /// Fails with [`MesonError::PipelineClosed`] immediately if the pipeline is
    /// already closed, or as soon as it closes while waiting.
    pub async fn recv_message(&self) -> Result<String> {
        self.inbox.recv().await
    }

    /// Schedule a message for transmission on the produce loop.
    pub fn send(&self, message: impl Into<String>) {
        self.outgoing.enqueue(message.into());
    }

    /// Close the pipeline and its transport.
    ///
    /// Only the first call has any effect; later and concurrent calls return
    /// without touching the transport.
    pub async fn close(&self) {
        if !self.closed.trigger() {
            return;
        }

        info!("Closing the pipeline of {}", self.transport.peer());
        if self.transport.is_closed() {
            return;
        }
        if let Err(e) = self.transport.close().await {
            warn!("Error closing transport of {}: {}", self.transport.peer(), e);
        }
    }

    /// Run the three loops until the first of them finishes.
    ///
    /// Returns which loop finished first, that is the loop whose exit closed
    /// the pipeline. Loops still running are not
    /// aborted; they exit once they observe the closed-flag.
    pub async fn run(self: &Arc<Self>) -> Result<PipelineLoop> {
        info!("Running communication pipeline for {}", self.transport.peer());

        let tasks = vec![
            tokio::spawn(self.clone().consume()),
            tokio::spawn(self.clone().produce()),
            tokio::spawn(self.clone().process_incoming()),
        ];

        let (finished, index, _still_running) = futures::future::select_all(tasks).await;
        info!("Exiting communication pipeline for {}", self.transport.peer());

        match finished {
            // Siblings released by the same close may be ready alongside the initiator.
            Ok(which) => Ok(self.first_finished.get().copied().unwrap_or(which)),
            Err(e) => {
                // A panicking loop skipped its own cleanup.
                self.close().await;
                Err(MesonError::TaskFailed {
                    task: PipelineLoop::ALL[index].to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn consume(self: Arc<Self>) -> PipelineLoop {
        while !self.closed.is_triggered() {
            let received = tokio::select! {
                _ = self.closed.triggered() => break,
                received = self.transport.recv() => received,
            };

            match received {
                Ok(message) => {
                    if self.inbound_tx.send(message).is_err() {
                        break;
                    }
                }
                Err(TransportError::ConnectionClosed) => {
                    warn!("The transport of {} had been closed", self.transport.peer());
                    break;
                }
                Err(e) => {
                    error!("Receive failed on {}: {}", self.transport.peer(), e);
                    break;
                }
            }
        }

        info!("Exiting pipeline consumer of {}", self.transport.peer());
        self.finish(PipelineLoop::Consume).await
    }

    async fn produce(self: Arc<Self>) -> PipelineLoop {
        let mut outbound = self.outbound_rx.lock().await;

        while !self.closed.is_triggered() {
            let message = tokio::select! {
                _ = self.closed.triggered() => break,
                message = outbound.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            debug!("Sending {} bytes to {}", message.len(), self.transport.peer());
            if let Err(e) = self.transport.send(message).await {
                warn!("Send failed on {}: {}", self.transport.peer(), e);
                break;
            }
        }

        info!("Exiting pipeline producer of {}", self.transport.peer());
        self.finish(PipelineLoop::Produce).await
    }

    async fn process_incoming(self: Arc<Self>) -> PipelineLoop {
        while !self.closed.is_triggered() {
            let processed = tokio::select! {
                _ = self.closed.triggered() => break,
                processed = self.incoming.process() => processed,
            };

            if let Err(e) = processed {
                if e.is_closure() {
                    debug!("Incoming processing of {} stopped: {}", self.transport.peer(), e);
                } else {
                    error!("Incoming processing of {} failed: {}", self.transport.peer(), e);
                }
                break;
            }
        }

        info!("Closing incoming message processor of {}", self.transport.peer());
        self.finish(PipelineLoop::ProcessIncoming).await
    }

    /// Record `which` if no loop has exited before it, then close.
    async fn finish(&self, which: PipelineLoop) -> PipelineLoop {
        let _ = self.first_finished.set(which);
        self.close().await;
        which
    }
}

impl fmt::Display for CommunicationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Communication Pipeline, peer={}, closed={}",
            self.transport.peer(),
            self.is_closed()
        )
    }
}
