use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use crate::McpError;

/// Runtime settings for the HTTP listener and the session layer.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub assets_dir: PathBuf,
    /// Path of the stream endpoint (`GET`).
    pub sse_path: String,
    /// Path of the message endpoint (`POST ?sessionId=`).
    pub message_path: String,
    pub request_timeout: Duration,
    pub keep_alive: Duration,
    /// Also write every JSON-RPC reply onto the session's event stream.
    pub mirror_responses: bool,
    pub channel_capacity: usize,
    pub server_name: String,
    pub server_version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            assets_dir: PathBuf::from("assets"),
            sse_path: "/mcp".to_string(),
            message_path: "/mcp/messages".to_string(),
            request_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(15),
            mirror_responses: true,
            channel_capacity: 100,
            server_name: "storefront-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Reads the configuration from the process environment, loading `.env` first if present.
    pub fn from_env() -> Result<Self, McpError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, McpError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = ServerConfig::default();

        let host = lookup("MCP_HOST").unwrap_or_else(|| defaults.bind_addr.ip().to_string());
        let port: u16 = parse_var(&lookup, "PORT")?.unwrap_or(defaults.bind_addr.port());
        let bind_addr = SocketAddr::from_str(&format!("{}:{}", host, port))
            .map_err(|e| McpError::Config(format!("MCP_HOST/PORT '{}:{}': {}", host, port, e)))?;

        let sse_path = lookup("MCP_SSE_PATH").unwrap_or(defaults.sse_path);
        let message_path = lookup("MCP_MESSAGE_PATH").unwrap_or(defaults.message_path);
        for (key, path) in [("MCP_SSE_PATH", &sse_path), ("MCP_MESSAGE_PATH", &message_path)] {
            if !path.starts_with('/') {
                return Err(McpError::Config(format!("{} must start with '/', got '{}'", key, path)));
            }
        }
        if sse_path == message_path {
            return Err(McpError::Config("MCP_SSE_PATH and MCP_MESSAGE_PATH must differ".to_string()));
        }

        let request_timeout = parse_var::<u64, _>(&lookup, "MCP_REQUEST_TIMEOUT_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.request_timeout);
        let keep_alive = parse_var::<u64, _>(&lookup, "MCP_KEEP_ALIVE_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.keep_alive);
        if keep_alive.is_zero() {
            return Err(McpError::Config("MCP_KEEP_ALIVE_SECS must be positive".to_string()));
        }

        Ok(ServerConfig {
            bind_addr,
            assets_dir: lookup("MCP_ASSETS_DIR").map(PathBuf::from).unwrap_or(defaults.assets_dir),
            sse_path,
            message_path,
            request_timeout,
            keep_alive,
            mirror_responses: parse_var(&lookup, "MCP_MIRROR_RESPONSES")?.unwrap_or(defaults.mirror_responses),
            channel_capacity: defaults.channel_capacity,
            server_name: lookup("MCP_SERVER_NAME").unwrap_or(defaults.server_name),
            server_version: defaults.server_version,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, McpError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| McpError::Config(format!("{}='{}': {}", key, raw, e))),
    }
}
