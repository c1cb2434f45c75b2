//! Centralized configuration for Meson.
//!
//! Constants for transports, the connection server, and wire protocol details.

use std::time::Duration;

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "Meson";
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
}

/// Transport-level limits and timeouts.
pub struct TransportConfig;

impl TransportConfig {
    /// Largest frame accepted by the framed stream transport.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Connection server configuration.
pub struct ServerConfig;

impl ServerConfig {
    pub const MAX_CONNECTIONS: usize = 256;
    pub const WEBSOCKET_PATH: &'static str = "/ws";
    pub const HEALTH_PATH: &'static str = "/health";
}

/// Wire protocol field names and values.
pub struct ProtocolConfig;

impl ProtocolConfig {
    pub const JSONRPC_VERSION: &'static str = "2.0";
    pub const METHOD_FIELD: &'static str = "method";
    pub const ARGS_FIELD: &'static str = "args";
    pub const KARGS_FIELD: &'static str = "kargs";
    pub const ID_FIELD: &'static str = "id";
}
