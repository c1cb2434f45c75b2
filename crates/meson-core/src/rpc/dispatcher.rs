//! Root handler that turns inbound frames into instruction requests.

use super::context::InstructionContext;
use super::processor::RpcProcessor;
use super::protocol::{RpcResponse, INVALID_REQUEST, PARSE_ERROR};
use crate::config::ProtocolConfig;
use crate::error::Result;
use crate::pipeline::{IncomingHandler, PipelineContext, SendPipeline};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Feeds parsed requests to an [`RpcProcessor`] and replies when they finish.
///
/// Requests without an `id` (or with a `null` one) are executed but never
/// answered.
pub struct RpcDispatcher {
    processor: Arc<RpcProcessor>,
}

impl RpcDispatcher {
    pub fn new(processor: Arc<RpcProcessor>) -> Self {
        Self { processor }
    }

    pub fn processor(&self) -> &Arc<RpcProcessor> {
        &self.processor
    }

    fn reply(outgoing: &SendPipeline, response: RpcResponse) {
        match response.to_frame() {
            Ok(frame) => {
                if let Err(e) = outgoing.process(frame) {
                    warn!("Failed to queue reply: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize reply: {}", e),
        }
    }
}

#[async_trait::async_trait]
impl IncomingHandler for RpcDispatcher {
    async fn handle(&self, message: String, context: &PipelineContext) -> Result<()> {
        let value: Value = match serde_json::from_str(&message) {
            Ok(value) => value,
            Err(e) => {
                warn!("Unparseable frame from {}: {}", context.session(), e);
                Self::reply(
                    context.outgoing(),
                    RpcResponse::error(None, PARSE_ERROR, format!("Parse error: {}", e)),
                );
                return Ok(());
            }
        };

        let id = value
            .get(ProtocolConfig::ID_FIELD)
            .filter(|id| !id.is_null())
            .cloned();

        if !RpcProcessor::can_handle_operation(&value) {
            warn!("Frame from {} is not an instruction request", context.session());
            Self::reply(
                context.outgoing(),
                RpcResponse::error(id, INVALID_REQUEST, "Invalid Request: missing method"),
            );
            return Ok(());
        }

        let Value::Object(payload) = value else {
            return Ok(());
        };

        let (ctx, completion) = InstructionContext::new(context.session().clone(), payload);
        let seq = self.processor.push(ctx);

        let Some(id) = id else {
            debug!("Request #{} is a notification, no reply", seq);
            return Ok(());
        };

        let outgoing = context.outgoing().clone();
        tokio::spawn(async move {
            let outcome = completion.wait().await;
            Self::reply(&outgoing, RpcResponse::from_outcome(Some(id), outcome));
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::execution::Arguments;
    use crate::rpc::registry::{Handler, InstructionRegistry};
    use crate::session::Session;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn dispatcher() -> (RpcDispatcher, PipelineContext, mpsc::UnboundedReceiver<String>) {
        let registry = Arc::new(InstructionRegistry::new());
        registry.register(
            "echo",
            Handler::new(|args: Arguments| async move { Ok(args.into_value()) }),
        );
        let processor = Arc::new(RpcProcessor::new(registry));

        let (tx, rx) = mpsc::unbounded_channel();
        let context = PipelineContext::new(Session::new("test"), SendPipeline::new(tx));
        (RpcDispatcher::new(processor), context, rx)
    }

    fn parse(frame: &str) -> RpcResponse {
        serde_json::from_str(frame).unwrap()
    }

    #[tokio::test]
    async fn test_request_is_answered_after_step() {
        let (dispatcher, context, mut replies) = dispatcher();
        dispatcher
            .handle(r#"{"method":"echo","args":[1,2],"id":7}"#.into(), &context)
            .await
            .unwrap();
        assert_eq!(dispatcher.processor().len(), 1);

        dispatcher.processor().step().await.unwrap();
        let reply = parse(&replies.recv().await.unwrap());
        assert_eq!(reply, RpcResponse::success(Some(json!(7)), json!([1, 2])));
    }

    #[tokio::test]
    async fn test_notification_gets_no_reply() {
        let (dispatcher, context, mut replies) = dispatcher();
        dispatcher
            .handle(r#"{"method":"echo","args":[1]}"#.into(), &context)
            .await
            .unwrap();
        dispatcher.processor().step().await.unwrap();

        tokio::task::yield_now().await;
        assert!(replies.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_parse_error_reply() {
        let (dispatcher, context, mut replies) = dispatcher();
        dispatcher.handle("{not json".into(), &context).await.unwrap();

        let reply = parse(&replies.recv().await.unwrap());
        assert_eq!(reply.error.unwrap().code, PARSE_ERROR);
        assert!(reply.id.is_none());
        assert!(dispatcher.processor().is_empty());
    }

    #[tokio::test]
    async fn test_missing_method_is_invalid_request() {
        let (dispatcher, context, mut replies) = dispatcher();
        dispatcher
            .handle(r#"{"args":[1],"id":3}"#.into(), &context)
            .await
            .unwrap();

        let reply = parse(&replies.recv().await.unwrap());
        assert_eq!(reply.error.unwrap().code, INVALID_REQUEST);
        assert_eq!(reply.id, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_abandoned_request_still_replies() {
        let (dispatcher, context, mut replies) = dispatcher();
        dispatcher
            .handle(r#"{"method":"echo","id":"x"}"#.into(), &context)
            .await
            .unwrap();
        dispatcher.processor().close();

        let reply = parse(&replies.recv().await.unwrap());
        assert_eq!(reply.error.unwrap().code, -32000);
    }
}
