//! RPC processing: instruction registry, request contexts, the queue-fed
//! processor and the root handler that feeds it.

pub mod context;
pub mod dispatcher;
pub mod execution;
pub mod processor;
pub mod protocol;
pub mod registry;

pub use context::{Completion, InstructionContext, Outcome};
pub use dispatcher::RpcDispatcher;
pub use execution::{Arguments, ExecutionContext};
pub use processor::RpcProcessor;
pub use protocol::{RpcErrorObject, RpcRequest, RpcResponse};
pub use registry::{Handler, HandlerResult, InstructionBinding, InstructionRegistry};
