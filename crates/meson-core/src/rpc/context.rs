//! Per-request instruction context and its completion signal.

use super::registry::InstructionBinding;
use crate::config::ProtocolConfig;
use crate::error::RpcError;
use crate::session::Session;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// Terminal state of a request: its result or its error.
pub type Outcome = std::result::Result<Value, RpcError>;

/// One inbound request travelling through the RPC processor.
///
/// Finalization happens exactly once: either through [`done`](Self::done) or,
/// if the context is dropped first, from `Drop` with [`RpcError::Abandoned`].
pub struct InstructionContext {
    seq: u64,
    session: Session,
    payload: Map<String, Value>,
    instruction: Option<Arc<InstructionBinding>>,
    result: Option<Value>,
    error: Option<RpcError>,
    completion: Option<oneshot::Sender<Outcome>>,
}

impl InstructionContext {
    /// Create a context and the handle that observes its completion.
    pub fn new(session: Session, payload: Map<String, Value>) -> (Self, Completion) {
        let (tx, rx) = oneshot::channel();
        let ctx = Self {
            seq: 0,
            session,
            payload,
            instruction: None,
            result: None,
            error: None,
            completion: Some(tx),
        };
        (ctx, Completion { rx })
    }

    /// Sequence number assigned when the context was pushed to a processor.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// The requested method name, if the payload carries a string `method`.
    pub fn method(&self) -> Option<&str> {
        self.payload
            .get(ProtocolConfig::METHOD_FIELD)
            .and_then(Value::as_str)
    }

    pub fn instruction(&self) -> Option<&Arc<InstructionBinding>> {
        self.instruction.as_ref()
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&RpcError> {
        self.error.as_ref()
    }

    /// Whether completion has already been signaled.
    pub fn is_done(&self) -> bool {
        self.completion.is_none()
    }

    pub(crate) fn set_seq(&mut self, seq: u64) {
        self.seq = seq;
    }

    pub(crate) fn set_instruction(&mut self, instruction: Arc<InstructionBinding>) {
        self.instruction = Some(instruction);
    }

    pub(crate) fn set_result(&mut self, value: Value) {
        self.error = None;
        self.result = Some(value);
    }

    pub(crate) fn set_error(&mut self, error: RpcError) {
        self.result = None;
        self.error = Some(error);
    }

    /// Signal completion to whoever holds the [`Completion`].
    ///
    /// Only the first call signals; later calls do nothing.
    pub fn done(&mut self) {
        let Some(tx) = self.completion.take() else {
            return;
        };

        if self.error.is_none() && self.result.is_none() {
            self.error = Some(RpcError::Abandoned);
        }

        let outcome = match &self.error {
            Some(error) => Err(error.clone()),
            None => Ok(self.result.clone().unwrap_or(Value::Null)),
        };

        // The waiter may have gone away; the request is finished either way.
        let _ = tx.send(outcome);
    }
}

impl Drop for InstructionContext {
    fn drop(&mut self) {
        self.done();
    }
}

impl fmt::Display for InstructionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "request #{} method={} ({})",
            self.seq,
            self.method().unwrap_or("<none>"),
            self.session
        )
    }
}

impl fmt::Debug for InstructionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstructionContext")
            .field("seq", &self.seq)
            .field("session", &self.session)
            .field("payload", &self.payload)
            .field("result", &self.result)
            .field("error", &self.error)
            .field("done", &self.is_done())
            .finish()
    }
}

/// Receiving side of an instruction context's completion signal.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Outcome>,
}

impl Completion {
    /// Suspend until the request is finalized.
    pub async fn wait(self) -> Outcome {
        self.rx.await.unwrap_or(Err(RpcError::Abandoned))
    }

    /// Outcome if the request is already finalized, without waiting.
    pub fn try_wait(&mut self) -> Option<Outcome> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_done_delivers_result() {
        let (mut ctx, completion) =
            InstructionContext::new(Session::new("t"), payload(json!({"method": "ping"})));
        assert_eq!(ctx.method(), Some("ping"));

        ctx.set_result(json!("pong"));
        ctx.done();
        assert!(ctx.is_done());
        assert_eq!(completion.wait().await, Ok(json!("pong")));
    }

    #[test]
    fn test_done_is_signaled_once() {
        let (mut ctx, mut completion) =
            InstructionContext::new(Session::new("t"), payload(json!({"method": "ping"})));
        ctx.set_error(RpcError::failed("first"));
        ctx.done();

        ctx.set_result(json!("late"));
        ctx.done();

        assert_eq!(completion.try_wait(), Some(Err(RpcError::failed("first"))));
    }

    #[test]
    fn test_drop_without_done_is_abandoned() {
        let (ctx, mut completion) =
            InstructionContext::new(Session::new("t"), payload(json!({"method": "ping"})));
        assert!(completion.try_wait().is_none());

        drop(ctx);
        assert_eq!(completion.try_wait(), Some(Err(RpcError::Abandoned)));
    }

    #[test]
    fn test_method_must_be_string() {
        let (ctx, _completion) =
            InstructionContext::new(Session::new("t"), payload(json!({"method": 7})));
        assert_eq!(ctx.method(), None);
    }
}
