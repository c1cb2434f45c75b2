//! Call-specific execution context: argument binding and session hand-off.

use super::context::InstructionContext;
use super::registry::{Handler, HandlerResult};
use crate::config::ProtocolConfig;
use crate::error::RpcError;
use crate::session::Session;
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;

/// Arguments derived from a request payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Arguments {
    #[default]
    None,
    Positional(Vec<Value>),
    Keyword(Map<String, Value>),
}

impl Arguments {
    /// Derive arguments from a payload.
    ///
    /// A non-empty `kargs` object wins over a non-empty `args` array; with
    /// neither, the call has no arguments. A `kargs` that is not an object or
    /// an `args` that is not an array is rejected.
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, RpcError> {
        match payload.get(ProtocolConfig::KARGS_FIELD) {
            None | Some(Value::Null) => {}
            Some(Value::Object(kargs)) if !kargs.is_empty() => {
                return Ok(Arguments::Keyword(kargs.clone()))
            }
            Some(Value::Object(_)) => {}
            Some(_) => return Err(RpcError::invalid_params("kargs must be an object")),
        }

        match payload.get(ProtocolConfig::ARGS_FIELD) {
            None | Some(Value::Null) => Ok(Arguments::None),
            Some(Value::Array(args)) if !args.is_empty() => Ok(Arguments::Positional(args.clone())),
            Some(Value::Array(_)) => Ok(Arguments::None),
            Some(_) => Err(RpcError::invalid_params("args must be an array")),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Arguments::None => 0,
            Arguments::Positional(args) => args.len(),
            Arguments::Keyword(kargs) => kargs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Positional argument at `index`.
    pub fn positional(&self, index: usize) -> Option<&Value> {
        match self {
            Arguments::Positional(args) => args.get(index),
            _ => None,
        }
    }

    /// Keyword argument called `name`.
    pub fn named(&self, name: &str) -> Option<&Value> {
        match self {
            Arguments::Keyword(kargs) => kargs.get(name),
            _ => None,
        }
    }

    /// Argument by keyword, falling back to its position.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.named(name).or_else(|| self.positional(index))
    }

    /// Like [`get`](Self::get) but fails with invalid params when missing.
    pub fn require(&self, index: usize, name: &str) -> Result<&Value, RpcError> {
        self.get(index, name)
            .ok_or_else(|| RpcError::invalid_params(format!("Missing required parameter: {}", name)))
    }

    /// Deserialize all arguments at once: positional as a tuple or sequence,
    /// keyword as a struct or map, none as `null`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, RpcError> {
        Ok(serde_json::from_value(self.clone().into_value())?)
    }

    pub fn into_value(self) -> Value {
        match self {
            Arguments::None => Value::Null,
            Arguments::Positional(args) => Value::Array(args),
            Arguments::Keyword(kargs) => Value::Object(kargs),
        }
    }
}

/// Everything one handler invocation receives.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    session: Session,
    arguments: Arguments,
}

impl ExecutionContext {
    pub fn new(ctx: &InstructionContext) -> Result<Self, RpcError> {
        Ok(Self {
            session: ctx.session().clone(),
            arguments: Arguments::from_payload(ctx.payload())?,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Invoke `handler` with the derived arguments, passing the session to
    /// handlers registered as session-taking.
    ///
    /// A panicking handler is reported as [`RpcError::Failed`].
    pub async fn execute(self, handler: &Handler) -> HandlerResult {
        let Self { session, arguments } = self;
        let handler = handler.clone();
        // Building the future runs handler code too, so it stays under the guard.
        let call = async move {
            match handler {
                Handler::Plain(f) => f(arguments).await,
                Handler::WithSession(f) => f(session, arguments).await,
            }
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(RpcError::failed(format!(
                "handler panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
