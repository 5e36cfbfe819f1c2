//! Tool server plumbing on top of the `rmcp` Model Context Protocol SDK.
//!
//! The client half ([`RmcpTransport`], [`ToolConnection`]) lets the chat
//! server use tools hosted in a child process. The server half
//! ([`server::ToolServer`]) hosts a [`crate::ToolRegistry`] for such a client.

use std::time::Duration;

use rmcp::service::ServiceError;

mod connection;
pub mod server;
mod transport;

pub use connection::{McpTool, StdioToolConnector, ToolConnection, ToolConnector};
pub use rmcp::model::{CallToolResult, Content, Tool as McpToolDefinition};
pub use transport::{RmcpTransport, StdioServerConfig, ToolTransport, joined_text};

/// Tool protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("failed to spawn tool server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tool server transport error: {0}")]
    Transport(String),

    #[error("tool server request timed out after {0:?}")]
    Timeout(Duration),

    #[error("tool server error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("tool connection closed")]
    ConnectionClosed,

    #[error("invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl From<ServiceError> for McpError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::McpError(data) => McpError::Rpc {
                code: i64::from(data.code.0),
                message: data.message.into_owned(),
            },
            ServiceError::TransportClosed => McpError::ConnectionClosed,
            other => McpError::Transport(other.to_string()),
        }
    }
}
