//! Error types for Meson.
//!
//! Two layers of failure exist: connection-scoped errors ([`MesonError`]) that
//! end a pipeline or signal API misuse, and request-scoped errors
//! ([`RpcError`]) that are recorded on an instruction context and reported back
//! to the remote caller.

use crate::transport::TransportError;
use thiserror::Error;

/// Main error type for the Meson library.
#[derive(Debug, Error)]
pub enum MesonError {
    // Pipeline lifecycle errors
    #[error("The pipeline is closed or closing")]
    PipelineClosed,

    #[error("Send message should be a text frame, got a {kind} frame")]
    InvalidOutboundMessage { kind: &'static str },

    #[error("Pipeline task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    // Transport errors
    #[error(transparent)]
    Transport(#[from] TransportError),

    // RPC processor errors
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error("The RPC processor is closed")]
    ProcessorClosed,

    #[error("An idle waiter is already parked on this processor")]
    IdleWaiterBusy,

    // IO and serialization errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for Meson operations.
pub type Result<T> = std::result::Result<T, MesonError>;

impl From<std::io::Error> for MesonError {
    fn from(err: std::io::Error) -> Self {
        MesonError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for MesonError {
    fn from(err: serde_json::Error) -> Self {
        MesonError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl MesonError {
    /// Whether this error is the ordinary end of a connection rather than a fault.
    pub fn is_closure(&self) -> bool {
        matches!(
            self,
            MesonError::PipelineClosed
                | MesonError::ProcessorClosed
                | MesonError::Transport(TransportError::ConnectionClosed)
        )
    }
}

/// Request-scoped failure, recorded on an instruction context.
///
/// This type is `Clone` so the same failure can be stored on the context for
/// the reply path and re-raised to the loop driving the processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    #[error("Unknown Remote Procedure \"{method}\" is called")]
    UnknownRemoteProcedure { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Remote procedure failed: {message}")]
    Failed { message: String },

    #[error("Request was finalized without a result")]
    Abandoned,
}

impl RpcError {
    /// Create a handler failure from any displayable error.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        RpcError::Failed {
            message: err.to_string(),
        }
    }

    /// Create an invalid-params failure.
    pub fn invalid_params(message: impl Into<String>) -> Self {
        RpcError::InvalidParams {
            message: message.into(),
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error (handler failure)
    /// - -32000: Request abandoned before completion
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            RpcError::UnknownRemoteProcedure { .. } => -32601,
            RpcError::InvalidParams { .. } => -32602,
            RpcError::Failed { .. } => -32603,
            RpcError::Abandoned => -32000,
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(err: serde_json::Error) -> Self {
        RpcError::InvalidParams {
            message: err.to_string(),
        }
    }
}
