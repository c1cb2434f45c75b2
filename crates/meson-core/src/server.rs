//! Connection serving: per-connection wiring and the framed TCP server.
//!
//! Every connection gets its own [`CommunicationPipeline`], [`RpcProcessor`]
//! and [`Session`](crate::session::Session); the [`InstructionRegistry`] is
//! shared by all of them.
//!
//! # Thread Safety
//!
//! The server runs on the tokio runtime. Each connection is served in its own
//! spawned task, with its processor loop in a second task.

use crate::config::ServerConfig;
use crate::error::Result;
use crate::pipeline::{CommunicationPipeline, PipelineLoop};
use crate::rpc::{InstructionRegistry, RpcDispatcher, RpcProcessor};
use crate::transport::{StreamTransport, Transport};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};

/// Serve instruction requests over one transport until the connection ends.
///
/// Returns the pipeline loop that finished first. The connection's processor
/// is closed before returning, so requests still queued complete as abandoned.
/// If the processor stops while the connection is live, the pipeline is closed.
pub async fn serve_connection(
    transport: Arc<dyn Transport>,
    registry: Arc<InstructionRegistry>,
) -> Result<PipelineLoop> {
    let processor = Arc::new(RpcProcessor::new(registry));
    let mut worker = {
        let processor = processor.clone();
        tokio::spawn(async move { processor.run().await })
    };

    let pipeline = CommunicationPipeline::new(
        transport,
        Arc::new(RpcDispatcher::new(processor.clone())),
    );
    debug!("Serving {}", pipeline);

    let run = pipeline.run();
    tokio::pin!(run);

    let mut worker_exited = false;
    let finished = tokio::select! {
        finished = &mut run => finished,
        joined = &mut worker => {
            worker_exited = true;
            match joined {
                Ok(()) => warn!("RPC processor for {} stopped while connected", pipeline.session()),
                Err(e) => error!("RPC processor task for {} failed: {}", pipeline.session(), e),
            }
            pipeline.close().await;
            run.await
        }
    };

    processor.close();
    if !worker_exited {
        if let Err(e) = worker.await {
            warn!("RPC processor task for {} failed: {}", pipeline.session(), e);
        }
    }

    finished
}

/// Handle to a running pipeline server. Dropping shuts down the server.
pub struct PipelineServerHandle {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    active_connections: Arc<AtomicUsize>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl PipelineServerHandle {
    /// Get the address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Number of connections currently being served.
    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Shut down the server.
    ///
    /// Stops accepting new connections and closes the transports of all
    /// active ones.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for PipelineServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Framed TCP server speaking the length-prefixed text protocol.
pub struct PipelineServer;

impl PipelineServer {
    /// Bind `addr` and start accepting connections in the background.
    ///
    /// Bind to port 0 for an OS-assigned port; the handle reports the actual
    /// address.
    pub async fn start(
        registry: Arc<InstructionRegistry>,
        addr: SocketAddr,
    ) -> Result<PipelineServerHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("Pipeline server listening on {}", addr);

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            registry,
            shutdown_rx,
            conn_shutdown_rx,
            active_connections.clone(),
        ));

        Ok(PipelineServerHandle {
            addr,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            active_connections,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        registry: Arc<InstructionRegistry>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Pipeline server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= ServerConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr,
                                    ServerConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let registry = registry.clone();
                            let conns = active_connections.clone();
                            let conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Connection from {}", peer_addr);
                                let transport: Arc<dyn Transport> =
                                    Arc::new(StreamTransport::from_tcp(stream));
                                Self::handle_connection(transport, registry, conn_shutdown).await;
                                conns.fetch_sub(1, Ordering::Relaxed);
                                debug!("Connection {} ended", peer_addr);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        transport: Arc<dyn Transport>,
        registry: Arc<InstructionRegistry>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let serve = serve_connection(transport.clone(), registry);
        tokio::pin!(serve);

        let finished = tokio::select! {
            finished = &mut serve => finished,
            _ = shutdown_rx.changed() => {
                if let Err(e) = transport.close().await {
                    debug!("Error closing {} on shutdown: {}", transport.peer(), e);
                }
                serve.await
            }
        };

        match finished {
            Ok(which) => debug!("Connection {} ended on the {} loop", transport.peer(), which),
            Err(e) => warn!("Connection {} failed: {}", transport.peer(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Arguments, Handler, RpcRequest, RpcResponse};
    use crate::transport::MemoryTransport;
    use serde_json::json;
    use std::time::Duration;

    fn registry() -> Arc<InstructionRegistry> {
        let registry = Arc::new(InstructionRegistry::new());
        registry.register("ping", Handler::new(|_args| async { Ok(json!("pong")) }));
        registry.register(
            "first",
            Handler::new(|args: Arguments| {
                let first = args.positional(0).cloned().unwrap();
                async move { Ok(first) }
            }),
        );
        registry.register(
            "sum",
            Handler::new(|args: Arguments| async move {
                args.parse::<Vec<i64>>()
                    .map(|numbers| json!(numbers.iter().sum::<i64>()))
            }),
        );
        registry
    }

    async fn call(client: &dyn Transport, request: RpcRequest) -> RpcResponse {
        client.send(request.to_frame().unwrap()).await.unwrap();
        serde_json::from_str(&client.recv().await.unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_serve_connection_over_memory() {
        let (server_end, client) = MemoryTransport::pair();
        let serving = tokio::spawn(serve_connection(Arc::new(server_end), registry()));

        let reply = call(&client, RpcRequest::new("ping").with_id(1)).await;
        assert_eq!(reply.result, Some(json!("pong")));

        let reply = call(
            &client,
            RpcRequest::new("sum").with_args(vec![json!(1), json!(2), json!(3)]).with_id(2),
        )
        .await;
        assert_eq!(reply.result, Some(json!(6)));

        client.close().await.unwrap();
        let finished = tokio::time::timeout(Duration::from_secs(1), serving)
            .await
            .expect("serving should stop when the client leaves")
            .unwrap()
            .unwrap();
        assert_eq!(finished, PipelineLoop::Consume);
    }

    #[tokio::test]
    async fn test_connection_keeps_serving_after_handler_panic() {
        let (server_end, client) = MemoryTransport::pair();
        let serving = tokio::spawn(serve_connection(Arc::new(server_end), registry()));

        let reply = call(&client, RpcRequest::new("first").with_id(1)).await;
        assert_eq!(reply.error.unwrap().code, -32603);

        let reply = tokio::time::timeout(
            Duration::from_secs(1),
            call(&client, RpcRequest::new("ping").with_id(2)),
        )
        .await
        .expect("processor should still answer");
        assert_eq!(reply.result, Some(json!("pong")));

        client.close().await.unwrap();
        serving.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_start_and_shutdown() {
        let mut handle = PipelineServer::start(registry(), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();

        assert!(handle.addr().port() > 0);
        assert_eq!(handle.active_connections(), 0);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_server_shutdown_closes_connections() {
        let mut handle = PipelineServer::start(registry(), "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let client = StreamTransport::connect(handle.addr()).await.unwrap();

        let reply = call(&client, RpcRequest::new("ping").with_id(1)).await;
        assert_eq!(reply.result, Some(json!("pong")));

        handle.shutdown();
        let ended = tokio::time::timeout(Duration::from_secs(1), client.recv())
            .await
            .expect("client should see the connection end");
        assert!(ended.is_err());
    }
}
