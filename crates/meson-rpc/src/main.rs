//! Meson RPC Server - WebSocket and framed TCP RPC endpoint.
//!
//! This binary serves the built-in instructions over a WebSocket endpoint and,
//! optionally, over the length-prefixed TCP protocol.

mod instructions;
mod server;
mod websocket;

use anyhow::Result;
use clap::Parser;
use meson_core::PipelineServer;
use std::net::SocketAddr;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "meson-rpc")]
#[command(about = "WebSocket and TCP RPC server for Meson")]
struct Args {
    /// Port to listen on for HTTP and WebSocket (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = meson_core::config::AppConfig::DEFAULT_HOST)]
    host: String,

    /// Also serve the framed TCP protocol on this port (0 = auto-assign)
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting {} RPC Server", meson_core::config::AppConfig::APP_NAME);

    let registry = instructions::builtin_registry();
    info!("Serving instructions: {}", registry.names().join(", "));

    let addr = server::start_server(registry.clone(), &args.host, args.port).await?;

    // Print ports for the parent process to read (intentional stdout)
    println!("RPC_PORT={}", addr.port());
    info!("RPC server running on {}", addr);

    let _tcp_server = match args.tcp_port {
        Some(port) => {
            let tcp_addr: SocketAddr = format!("{}:{}", args.host, port).parse()?;
            let handle = PipelineServer::start(registry, tcp_addr).await?;
            println!("TCP_PORT={}", handle.addr().port());
            Some(handle)
        }
        None => None,
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, exiting");

    Ok(())
}
