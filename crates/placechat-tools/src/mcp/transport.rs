use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rmcp::ServiceExt;
use rmcp::model::{CallToolRequestParam, CallToolResult, Tool as McpToolDefinition};
use rmcp::service::{Peer, RoleClient, RunningService, ServiceError};
use rmcp::transport::{IntoTransport, TokioChildProcess};
use serde_json::Value;
use tokio::process::Command;
use tracing::debug;

use super::McpError;

/// Client side of a tool server session.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError>;

    /// Tear down the session and the server process behind it. Synchronous so
    /// it can run from `Drop`.
    fn close(&self);
}

/// How to launch a tool server subprocess.
#[derive(Debug, Clone)]
pub struct StdioServerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub request_timeout: Duration,
}

/// Text blocks of a tool result, newline separated.
pub fn joined_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|c| c.as_text())
        .map(|t| t.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// An initialized `rmcp` client session, usually over a child's stdio.
pub struct RmcpTransport {
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, ()>>>,
    timeout: Duration,
}

impl RmcpTransport {
    /// Spawn the server process and complete the `initialize` handshake.
    pub async fn spawn(config: &StdioServerConfig) -> Result<Self, McpError> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(config.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let process = TokioChildProcess::new(cmd).map_err(|source| McpError::Spawn {
            command: config.command.clone(),
            source,
        })?;
        debug!(command = %config.command, "Spawned tool server");
        Self::connect(process, config.request_timeout).await
    }

    /// Run the client over any `rmcp` transport, e.g. one end of an
    /// in-memory duplex pipe.
    pub async fn connect<T, E, A>(transport: T, timeout: Duration) -> Result<Self, McpError>
    where
        T: IntoTransport<RoleClient, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let service = tokio::time::timeout(timeout, ().serve(transport))
            .await
            .map_err(|_| McpError::Timeout(timeout))?
            .map_err(|e| McpError::Transport(format!("handshake failed: {e}")))?;

        if let Some(info) = service.peer_info() {
            debug!(server = %info.server_info.name, "Tool server initialized");
        }

        Ok(Self {
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
            timeout,
        })
    }

    async fn request<T>(
        &self,
        fut: impl Future<Output = Result<T, ServiceError>>,
    ) -> Result<T, McpError> {
        if lock(&self.service).is_none() {
            return Err(McpError::ConnectionClosed);
        }
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(McpError::from),
            Err(_) => Err(McpError::Timeout(self.timeout)),
        }
    }
}

#[async_trait]
impl ToolTransport for RmcpTransport {
    async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.request(self.peer.list_all_tools()).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(McpError::InvalidArguments(format!(
                    "expected a JSON object, got {other}"
                )));
            }
        };
        let request = CallToolRequestParam {
            name: name.to_string().into(),
            arguments,
        };
        self.request(self.peer.call_tool(request)).await
    }

    fn close(&self) {
        // Dropping the running service cancels its task, which closes the
        // transport and kills the child process.
        if let Some(service) = lock(&self.service).take() {
            drop(service);
            debug!("Tool server session cancelled");
        }
    }
}
