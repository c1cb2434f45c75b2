//! Built-in instructions served by every connection.

use meson_core::{Arguments, Handler, HandlerResult, InstructionRegistry, RpcError, Session};
use serde_json::{json, Value};
use std::sync::Arc;

/// Registry holding the built-in instructions.
pub fn builtin_registry() -> Arc<InstructionRegistry> {
    let registry = Arc::new(InstructionRegistry::new());
    registry.register("ping", Handler::new(ping));
    registry.register("echo", Handler::new(echo));
    registry.register("add", Handler::new(add));
    registry.register("session.info", Handler::with_session(session_info));
    registry.register("session.set", Handler::with_session(session_set));
    registry.register("session.get", Handler::with_session(session_get));
    registry
}

async fn ping(_args: Arguments) -> HandlerResult {
    Ok(json!("pong"))
}

async fn echo(args: Arguments) -> HandlerResult {
    Ok(args.into_value())
}

async fn add(args: Arguments) -> HandlerResult {
    let a = number(args.require(0, "a")?, "a")?;
    let b = number(args.require(1, "b")?, "b")?;

    match (a.as_i64(), b.as_i64()) {
        (Some(a), Some(b)) => a
            .checked_add(b)
            .map(|sum| json!(sum))
            .ok_or_else(|| RpcError::failed("integer overflow")),
        _ => Ok(json!(a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default())),
    }
}

fn number<'a>(value: &'a Value, name: &str) -> Result<&'a serde_json::Number, RpcError> {
    match value {
        Value::Number(n) => Ok(n),
        _ => Err(RpcError::invalid_params(format!("{} must be a number", name))),
    }
}

async fn session_info(session: Session, _args: Arguments) -> HandlerResult {
    Ok(json!({
        "id": session.id().to_string(),
        "peer": session.peer(),
        "opened_at": session.opened_at().to_rfc3339(),
    }))
}

async fn session_set(session: Session, args: Arguments) -> HandlerResult {
    let key = key(&args)?;
    let value = args.require(1, "value")?.clone();
    Ok(session.set(key, value).unwrap_or(Value::Null))
}

async fn session_get(session: Session, args: Arguments) -> HandlerResult {
    let key = key(&args)?;
    Ok(session.get(&key).unwrap_or(Value::Null))
}

fn key(args: &Arguments) -> Result<String, RpcError> {
    args.require(0, "key")?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| RpcError::invalid_params("key must be a string"))
}
