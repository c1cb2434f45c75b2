//! Meson Core - connection-scoped message pipeline and RPC processor.
//!
//! Each persistent connection (a [`Transport`]) is owned by a
//! [`CommunicationPipeline`] that runs three cooperative loops: consuming
//! frames from the transport, producing queued frames back to it, and handing
//! inbound frames to a root handler. The RPC side of the crate provides that
//! root handler ([`RpcDispatcher`]), which feeds instruction requests to a
//! queue-driven [`RpcProcessor`] backed by a shared [`InstructionRegistry`].
//!
//! # Example
//!
//! ```rust,ignore
//! use meson_core::{Handler, InstructionRegistry, PipelineServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> meson_core::Result<()> {
//!     let registry = Arc::new(InstructionRegistry::new());
//!     registry.register("ping", Handler::new(|_args| async { Ok("pong".into()) }));
//!
//!     let handle = PipelineServer::start(registry, "127.0.0.1:9000".parse().unwrap()).await?;
//!     println!("Listening on {}", handle.addr());
//!
//!     tokio::signal::ctrl_c().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod rpc;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;

// Re-export commonly used types
pub use error::{MesonError, Result, RpcError};
pub use pipeline::{
    CommunicationPipeline, Frame, IncomingHandler, PipelineContext, PipelineLoop,
    ReceivePipeline, SendPipeline,
};
pub use rpc::{
    Arguments, Completion, ExecutionContext, Handler, HandlerResult, InstructionBinding,
    InstructionContext, InstructionRegistry, RpcDispatcher, RpcProcessor, RpcRequest,
    RpcResponse,
};
pub use server::{serve_connection, PipelineServer, PipelineServerHandle};
pub use session::Session;
pub use shutdown::ShutdownSignal;
pub use transport::{MemoryTransport, StreamTransport, Transport, TransportError};
