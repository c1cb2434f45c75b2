//! Integration tests for connection lifecycle and end-to-end RPC.
//!
//! These drive the public API only: a pipeline over an in-memory or TCP
//! transport, with the RPC dispatcher as its root handler.

use meson_core::{
    serve_connection, Arguments, CommunicationPipeline, Handler, IncomingHandler,
    InstructionRegistry, MemoryTransport, MesonError, PipelineContext, PipelineLoop,
    PipelineServer, RpcError, RpcRequest, RpcResponse, Session, StreamTransport, Transport,
    TransportError,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Wraps a memory transport and counts `close` calls that reach it.
struct CountingTransport {
    inner: MemoryTransport,
    closes: AtomicUsize,
}

impl CountingTransport {
    fn new(inner: MemoryTransport) -> Self {
        Self {
            inner,
            closes: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl Transport for CountingTransport {
    async fn recv(&self) -> Result<String, TransportError> {
        self.inner.recv().await
    }

    async fn send(&self, frame: String) -> Result<(), TransportError> {
        self.inner.send(frame).await
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn peer(&self) -> String {
        self.inner.peer()
    }
}

/// Memory transport whose sends always fail.
struct RefusingTransport {
    inner: MemoryTransport,
}

#[async_trait::async_trait]
impl Transport for RefusingTransport {
    async fn recv(&self) -> Result<String, TransportError> {
        self.inner.recv().await
    }

    async fn send(&self, _frame: String) -> Result<(), TransportError> {
        Err(TransportError::Io("send refused".to_string()))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn peer(&self) -> String {
        self.inner.peer()
    }
}

/// Root handler that rejects every message.
struct Reject;

#[async_trait::async_trait]
impl IncomingHandler for Reject {
    async fn handle(&self, _message: String, _context: &PipelineContext) -> meson_core::Result<()> {
        Err(RpcError::failed("rejected").into())
    }
}

/// Root handler that ignores everything.
struct Sink;

#[async_trait::async_trait]
impl IncomingHandler for Sink {
    async fn handle(&self, _message: String, _context: &PipelineContext) -> meson_core::Result<()> {
        Ok(())
    }
}

fn registry() -> Arc<InstructionRegistry> {
    let registry = Arc::new(InstructionRegistry::new());
    registry.register("ping", Handler::new(|_args| async { Ok(json!("pong")) }));
    registry.register(
        "add",
        Handler::new(|args: Arguments| async move {
            let a = args.require(0, "a")?.as_i64().unwrap_or_default();
            let b = args.require(1, "b")?.as_i64().unwrap_or_default();
            Ok::<Value, RpcError>(json!(a + b))
        }),
    );
    registry.register(
        "whoami",
        Handler::with_session(|session: Session, _args: Arguments| async move {
            Ok(json!(session.peer()))
        }),
    );
    registry
}

async fn call(client: &dyn Transport, request: RpcRequest) -> RpcResponse {
    client.send(request.to_frame().unwrap()).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(2), client.recv())
        .await
        .expect("reply should arrive")
        .unwrap();
    serde_json::from_str(&frame).unwrap()
}

#[tokio::test]
async fn test_double_close_closes_transport_once() {
    let (local, _remote) = MemoryTransport::pair();
    let transport = Arc::new(CountingTransport::new(local));
    let pipeline = CommunicationPipeline::new(transport.clone(), Arc::new(Sink));

    pipeline.close().await;
    pipeline.close().await;

    assert!(pipeline.is_closed());
    assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_concurrent_close_closes_transport_once() {
    let (local, _remote) = MemoryTransport::pair();
    let transport = Arc::new(CountingTransport::new(local));
    let pipeline = CommunicationPipeline::new(transport.clone(), Arc::new(Sink));

    let closers: Vec<_> = (0..8)
        .map(|_| {
            let pipeline = pipeline.clone();
            tokio::spawn(async move { pipeline.close().await })
        })
        .collect();
    for closer in closers {
        closer.await.unwrap();
    }

    assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_recv_message_after_close_fails_immediately() {
    let (local, remote) = MemoryTransport::pair();
    let pipeline = CommunicationPipeline::new(Arc::new(local), Arc::new(Sink));
    remote.send("pending".to_string()).await.unwrap();

    pipeline.close().await;
    let result = tokio::time::timeout(Duration::from_millis(100), pipeline.recv_message())
        .await
        .expect("recv_message must not block on a closed pipeline");
    assert!(matches!(result, Err(MesonError::PipelineClosed)));
}

#[tokio::test]
async fn test_run_returns_when_one_loop_ends() {
    let (local, remote) = MemoryTransport::pair();
    let pipeline = CommunicationPipeline::new(Arc::new(local), Arc::new(Sink));

    let runner = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run().await })
    };

    remote.close().await.unwrap();
    let finished = tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("run should return")
        .unwrap()
        .unwrap();

    assert_eq!(finished, PipelineLoop::Consume);
    tokio::time::timeout(Duration::from_secs(1), pipeline.closed())
        .await
        .expect("closed-flag should be set");
    assert!(pipeline.is_closed());
}

#[tokio::test]
async fn test_root_handler_error_tears_connection_down() {
    let (local, remote) = MemoryTransport::pair();
    let pipeline = CommunicationPipeline::new(Arc::new(local), Arc::new(Reject));

    let runner = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run().await })
    };

    remote.send("anything".to_string()).await.unwrap();
    let finished = tokio::time::timeout(Duration::from_secs(1), runner)
        .await
        .expect("run should return")
        .unwrap()
        .unwrap();

    assert_eq!(finished, PipelineLoop::ProcessIncoming);
    assert!(pipeline.is_closed());
    let ended = tokio::time::timeout(Duration::from_secs(1), remote.recv())
        .await
        .expect("peer should see the transport closed");
    assert_eq!(ended, Err(TransportError::ConnectionClosed));
}

#[tokio::test]
async fn test_send_failure_ends_produce_loop_first() {
    let (local, remote) = MemoryTransport::pair();
    let pipeline = CommunicationPipeline::new(
        Arc::new(RefusingTransport { inner: local }),
        Arc::new(Sink),
    );
    pipeline.send("hello");

    let finished = tokio::time::timeout(Duration::from_secs(1), pipeline.run())
        .await
        .expect("run should return")
        .unwrap();

    assert_eq!(finished, PipelineLoop::Produce);
    assert!(pipeline.is_closed());
    let ended = tokio::time::timeout(Duration::from_secs(1), remote.recv())
        .await
        .expect("peer should see the transport closed");
    assert_eq!(ended, Err(TransportError::ConnectionClosed));
}

#[tokio::test]
async fn test_rpc_over_memory_transport() {
    let (server_end, client) = MemoryTransport::pair();
    let serving = tokio::spawn(serve_connection(Arc::new(server_end), registry()));

    let reply = call(&client, RpcRequest::new("ping").with_id(1)).await;
    assert_eq!(reply, RpcResponse::success(Some(json!(1)), json!("pong")));

    let kargs = json!({"a": 2, "b": 5}).as_object().cloned().unwrap();
    let reply = call(&client, RpcRequest::new("add").with_kargs(kargs).with_id(2)).await;
    assert_eq!(reply.result, Some(json!(7)));

    let reply = call(&client, RpcRequest::new("whoami").with_id(3)).await;
    assert_eq!(reply.result, Some(json!("memory:a")));

    let reply = call(&client, RpcRequest::new("pong").with_id(4)).await;
    let error = reply.error.unwrap();
    assert_eq!(error.code, -32601);
    assert_eq!(error.message, "Unknown Remote Procedure \"pong\" is called");

    let reply = call(&client, RpcRequest::new("add").with_id(5)).await;
    assert_eq!(reply.error.unwrap().code, -32602);

    client.close().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), serving)
        .await
        .expect("serving should stop")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_rpc_over_tcp() {
    let mut handle = PipelineServer::start(registry(), "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let client = StreamTransport::connect(handle.addr()).await.unwrap();
    let reply = call(
        &client,
        RpcRequest::new("add").with_args(vec![json!(40), json!(2)]).with_id("a"),
    )
    .await;
    assert_eq!(reply, RpcResponse::success(Some(json!("a")), json!(42)));

    // Replies are correlated by id even when several requests are in flight.
    for id in 0..5 {
        client
            .send(RpcRequest::new("ping").with_id(id).to_frame().unwrap())
            .await
            .unwrap();
    }
    let mut ids = Vec::new();
    for _ in 0..5 {
        let reply: RpcResponse = serde_json::from_str(&client.recv().await.unwrap()).unwrap();
        ids.push(reply.id.and_then(|id| id.as_i64()).unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);

    client.close().await.unwrap();
    handle.shutdown();
}

#[tokio::test]
async fn test_sessions_are_per_connection() {
    let registry = registry();
    registry.register(
        "session.id",
        Handler::with_session(|session: Session, _args: Arguments| async move {
            Ok(json!(session.id().to_string()))
        }),
    );

    let mut handle = PipelineServer::start(registry, "127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();

    let first = StreamTransport::connect(handle.addr()).await.unwrap();
    let second = StreamTransport::connect(handle.addr()).await.unwrap();

    let a1 = call(&first, RpcRequest::new("session.id").with_id(1)).await.result;
    let a2 = call(&first, RpcRequest::new("session.id").with_id(2)).await.result;
    let b = call(&second, RpcRequest::new("session.id").with_id(1)).await.result;

    assert_eq!(a1, a2);
    assert_ne!(a1, b);

    handle.shutdown();
}
