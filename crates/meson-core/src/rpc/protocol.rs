//! JSON-RPC 2.0 shaped request and reply frames.
//!
//! Requests carry `method` with either positional `args` or keyword `kargs`:
//!
//! ```text
//! {"jsonrpc": "2.0", "method": "add", "args": [1, 2], "id": 1}
//! {"jsonrpc": "2.0", "method": "add", "kargs": {"a": 1, "b": 2}, "id": 2}
//! ```
//!
//! Replies are standard JSON-RPC 2.0 responses keyed by the request `id`.

use super::context::Outcome;
use crate::config::ProtocolConfig;
use crate::error::{Result, RpcError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Parse error: the frame is not valid JSON.
pub const PARSE_ERROR: i32 = -32700;
/// Invalid request: valid JSON but not an instruction request.
pub const INVALID_REQUEST: i32 = -32600;

/// Instruction request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kargs: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

impl RpcRequest {
    /// Create a request without arguments and without an id.
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            method: method.into(),
            args: None,
            kargs: None,
            id: None,
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }

    pub fn with_kargs(mut self, kargs: Map<String, Value>) -> Self {
        self.kargs = Some(kargs);
        self
    }

    pub fn with_id(mut self, id: impl Into<Value>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Serialize to a text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Reply frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
    pub id: Option<Value>,
}

impl RpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: ProtocolConfig::JSONRPC_VERSION.to_string(),
            result: None,
            error: Some(RpcErrorObject {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Build the reply for a finalized request.
    pub fn from_outcome(id: Option<Value>, outcome: Outcome) -> Self {
        match outcome {
            Ok(result) => Self::success(id, result),
            Err(e) => Self::from_error(id, &e),
        }
    }

    pub fn from_error(id: Option<Value>, error: &RpcError) -> Self {
        Self::error(id, error.to_rpc_error_code(), error.to_string())
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A field that is present reads back as `Some`, even when it is `null`.
fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}
