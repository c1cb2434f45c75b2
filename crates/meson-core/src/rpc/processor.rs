//! Queue-fed RPC processor.
//!
//! Request contexts are pushed by the dispatcher and consumed one at a time by
//! [`RpcProcessor::step`]. Each consumed context is matched against the
//! registry, executed, and finalized before `step` returns, so the completion
//! side always observes a terminal state even when `step` reports an error.

use super::context::InstructionContext;
use super::execution::ExecutionContext;
use super::registry::{Handler, InstructionBinding, InstructionRegistry};
use crate::config::ProtocolConfig;
use crate::error::{MesonError, Result, RpcError};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<InstructionContext>,
    /// Single-slot idle waiter, fulfilled by the next push.
    idle: Option<oneshot::Sender<u64>>,
    closed: bool,
}

/// Single-consumer processor of instruction requests.
///
/// Only one idle waiter may be parked at a time; a second concurrent
/// [`idle`](Self::idle) call fails with [`MesonError::IdleWaiterBusy`].
pub struct RpcProcessor {
    registry: Arc<InstructionRegistry>,
    state: Mutex<QueueState>,
    available: Notify,
    next_seq: AtomicU64,
}

impl RpcProcessor {
    pub fn new(registry: Arc<InstructionRegistry>) -> Self {
        Self {
            registry,
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<InstructionRegistry> {
        &self.registry
    }

    /// Register a handler on the underlying registry.
    pub fn register(&self, name: impl Into<String>, handler: Handler) -> Arc<InstructionBinding> {
        self.registry.register(name, handler)
    }

    /// Number of queued, not yet stepped, requests.
    pub fn len(&self) -> usize {
        self.lock_state().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }

    /// Whether `payload` is shaped like an instruction request.
    pub fn can_handle_operation(payload: &Value) -> bool {
        payload
            .get(ProtocolConfig::METHOD_FIELD)
            .is_some_and(Value::is_string)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a request and wake a parked idle waiter.
    ///
    /// Returns the sequence number assigned to the request. Pushing to a closed
    /// processor finalizes the request as abandoned.
    pub fn push(&self, mut ctx: InstructionContext) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        ctx.set_seq(seq);

        let mut state = self.lock_state();
        if state.closed {
            drop(state);
            warn!("Dropping {}, the processor is closed", ctx);
            return seq;
        }

        debug!("Queueing {}", ctx);
        state.pending.push_back(ctx);
        let waiter = state.idle.take();
        drop(state);

        if let Some(waiter) = waiter {
            let _ = waiter.send(seq);
        }
        self.available.notify_one();
        seq
    }

    /// Wait until there is queued work.
    ///
    /// Returns immediately if the queue is non-empty; otherwise parks until the
    /// next [`push`](Self::push).
    pub async fn idle(&self) -> Result<()> {
        let parked = {
            let mut state = self.lock_state();
            if state.closed {
                return Err(MesonError::ProcessorClosed);
            }
            if !state.pending.is_empty() {
                return Ok(());
            }
            if state.idle.as_ref().is_some_and(|waiter| !waiter.is_closed()) {
                return Err(MesonError::IdleWaiterBusy);
            }

            let (tx, rx) = oneshot::channel();
            state.idle = Some(tx);
            rx
        };

        match parked.await {
            Ok(seq) => {
                debug!("Idle waiter woken by request #{}", seq);
                Ok(())
            }
            Err(_) => Err(MesonError::ProcessorClosed),
        }
    }

    async fn pop(&self) -> Result<InstructionContext> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock_state();
                if let Some(ctx) = state.pending.pop_front() {
                    return Ok(ctx);
                }
                if state.closed {
                    return Err(MesonError::ProcessorClosed);
                }
            }

            notified.await;
        }
    }

    /// Process the next queued request.
    ///
    /// Suspends while the queue is empty. The request is finalized before this
    /// returns; an unknown method or a failing handler is reported as
    /// [`MesonError::Rpc`] after finalization.
    pub async fn step(&self) -> Result<()> {
        let mut ctx = self.pop().await?;
        debug!("Will handle instruction request {}", ctx);

        let Some(instruction) = self.registry.find_suitable_instruction(&ctx) else {
            let error = RpcError::UnknownRemoteProcedure {
                method: ctx.method().unwrap_or_default().to_string(),
            };
            ctx.set_error(error.clone());
            ctx.done();
            return Err(error.into());
        };

        debug!("Found executable logic {} for {}", instruction, ctx);
        ctx.set_instruction(instruction.clone());

        let outcome = match ExecutionContext::new(&ctx) {
            Ok(execution) => execution.execute(instruction.handler()).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(value) => {
                ctx.set_result(value);
                ctx.done();
                debug!("RPC had been executed {}", ctx);
                Ok(())
            }
            Err(error) => {
                ctx.set_error(error.clone());
                ctx.done();
                debug!("RPC had failed {}: {}", ctx, error);
                Err(error.into())
            }
        }
    }

    /// Drive [`step`](Self::step) until the processor is closed.
    ///
    /// Per-request failures are logged and do not stop the loop.
    pub async fn run(&self) {
        loop {
            match self.step().await {
                Ok(()) => {}
                Err(MesonError::ProcessorClosed) => break,
                Err(MesonError::Rpc(e)) => warn!("Instruction request failed: {}", e),
                Err(e) => error!("RPC processor error: {}", e),
            }
        }
        debug!("RPC processor loop exited");
    }

    /// Stop accepting requests.
    ///
    /// Queued requests complete as abandoned, a parked idle waiter and a
    /// suspended `step` both fail with [`MesonError::ProcessorClosed`].
    pub fn close(&self) {
        let (abandoned, waiter) = {
            let mut state = self.lock_state();
            if state.closed {
                return;
            }
            state.closed = true;
            (std::mem::take(&mut state.pending), state.idle.take())
        };

        info!("Closing RPC processor, abandoning {} queued request(s)", abandoned.len());
        drop(waiter);
        drop(abandoned);
        self.available.notify_waiters();
    }
}

impl std::fmt::Debug for RpcProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock_state();
        f.debug_struct("RpcProcessor")
            .field("instructions", &self.registry.len())
            .field("pending", &state.pending.len())
            .field("idle_waiter", &state.idle.is_some())
            .field("closed", &state.closed)
            .finish()
    }
}
