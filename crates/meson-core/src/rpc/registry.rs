//! Instruction registry and matcher.
//!
//! Handlers are registered under a name and matched against requests by the
//! payload's `method` field. Names need not be unique: a request that matches
//! several bindings is ambiguous and resolves to nothing, exactly like a
//! request that matches none.

use super::context::InstructionContext;
use super::execution::Arguments;
use crate::error::RpcError;
use crate::session::Session;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, warn};

/// What a handler produces.
pub type HandlerResult = std::result::Result<Value, RpcError>;

type PlainFn = dyn Fn(Arguments) -> BoxFuture<'static, HandlerResult> + Send + Sync;
type SessionFn = dyn Fn(Session, Arguments) -> BoxFuture<'static, HandlerResult> + Send + Sync;

/// A registered callable together with its calling convention.
///
/// The convention is fixed at registration: [`Handler::new`] handlers get the
/// arguments only, [`Handler::with_session`] handlers also get the caller's
/// session.
#[derive(Clone)]
pub enum Handler {
    Plain(Arc<PlainFn>),
    WithSession(Arc<SessionFn>),
}

impl Handler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::Plain(Arc::new(move |args: Arguments| f(args).boxed()))
    }

    pub fn with_session<F, Fut>(f: F) -> Self
    where
        F: Fn(Session, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Handler::WithSession(Arc::new(move |session: Session, args: Arguments| {
            f(session, args).boxed()
        }))
    }

    pub fn takes_session(&self) -> bool {
        matches!(self, Handler::WithSession(_))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Plain(_) => f.write_str("Handler::Plain"),
            Handler::WithSession(_) => f.write_str("Handler::WithSession"),
        }
    }
}

/// A named handler.
#[derive(Debug)]
pub struct InstructionBinding {
    name: String,
    handler: Handler,
}

impl InstructionBinding {
    pub fn new(name: impl Into<String>, handler: Handler) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// A binding handles a request whose `method` equals its name.
    pub fn can_handle(&self, ctx: &InstructionContext) -> bool {
        ctx.method() == Some(self.name.as_str())
    }
}

impl fmt::Display for InstructionBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Add-only collection of instruction bindings, shared across connections.
#[derive(Debug, Default)]
pub struct InstructionRegistry {
    bindings: RwLock<Vec<Arc<InstructionBinding>>>,
}

impl InstructionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Duplicate names are accepted.
    pub fn register(&self, name: impl Into<String>, handler: Handler) -> Arc<InstructionBinding> {
        let binding = Arc::new(InstructionBinding::new(name, handler));
        debug!("Registering instruction {}", binding);

        let mut bindings = self.bindings.write().unwrap_or_else(|e| e.into_inner());
        bindings.push(binding.clone());
        binding
    }

    pub fn len(&self) -> usize {
        self.bindings.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered names in registration order, duplicates included.
    pub fn names(&self) -> Vec<String> {
        self.bindings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|b| b.name.clone())
            .collect()
    }

    /// Resolve the single binding able to handle `ctx`.
    ///
    /// Returns `None` when nothing matches (logged as a warning) and when more
    /// than one binding matches (logged as an error).
    pub fn find_suitable_instruction(
        &self,
        ctx: &InstructionContext,
    ) -> Option<Arc<InstructionBinding>> {
        let mut suitable: Vec<Arc<InstructionBinding>> = self
            .bindings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|binding| binding.can_handle(ctx))
            .cloned()
            .collect();

        match suitable.len() {
            0 => {
                warn!("No suitable instruction found for {}", ctx);
                None
            }
            1 => suitable.pop(),
            n => {
                error!("Multiple instructions ({}) found for {}", n, ctx);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(payload: Value) -> InstructionContext {
        let (ctx, _completion) =
            InstructionContext::new(Session::new("t"), payload.as_object().cloned().unwrap());
        ctx
    }

    fn constant(value: Value) -> Handler {
        Handler::new(move |_args| {
            let value = value.clone();
            async move { Ok(value) }
        })
    }

    #[test]
    fn test_single_match_resolves() {
        let registry = InstructionRegistry::new();
        let ping = registry.register("ping", constant(json!("pong")));
        registry.register("other", constant(json!(1)));

        let found = registry
            .find_suitable_instruction(&ctx(json!({"method": "ping"})))
            .unwrap();
        assert!(Arc::ptr_eq(&found, &ping));
    }

    #[test]
    fn test_no_match_is_none() {
        let registry = InstructionRegistry::new();
        registry.register("ping", constant(json!("pong")));

        assert!(registry
            .find_suitable_instruction(&ctx(json!({"method": "pong"})))
            .is_none());
        assert!(registry
            .find_suitable_instruction(&ctx(json!({"args": []})))
            .is_none());
    }

    #[test]
    fn test_duplicates_register_but_do_not_resolve() {
        let registry = InstructionRegistry::new();
        registry.register("dup", constant(json!(1)));
        registry.register("dup", constant(json!(2)));

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["dup".to_string(), "dup".to_string()]);
        assert!(registry
            .find_suitable_instruction(&ctx(json!({"method": "dup"})))
            .is_none());
    }

    #[test]
    fn test_calling_convention_is_recorded() {
        let plain = constant(json!(null));
        let with_session = Handler::with_session(|_session, _args| async { Ok(Value::Null) });
        assert!(!plain.takes_session());
        assert!(with_session.takes_session());
    }
}
