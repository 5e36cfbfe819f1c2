use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::{debug, info};

use super::transport::{RmcpTransport, StdioServerConfig, ToolTransport, joined_text};
use super::{McpError, McpToolDefinition};
use crate::{Tool, ToolContext, ToolOutput, ToolRegistry};

struct Shared {
    transport: Arc<dyn ToolTransport>,
    released: AtomicBool,
}

impl Shared {
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.transport.close();
        true
    }
}

/// A live tool server session scoped to one chat request.
///
/// The session is released exactly once: on [`ToolConnection::close`] or on
/// drop, whichever comes first. Tools handed out by [`ToolConnection::tools`]
/// fail with [`McpError::ConnectionClosed`] once the connection is released.
pub struct ToolConnection {
    shared: Arc<Shared>,
    tools: ToolRegistry,
}

impl std::fmt::Debug for ToolConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolConnection")
            .field("tools", &self.tools.list())
            .field("released", &self.is_released())
            .finish()
    }
}

impl ToolConnection {
    /// Adopt an initialized transport and discover its tools. The transport
    /// is closed if discovery fails.
    pub async fn open(transport: Arc<dyn ToolTransport>) -> Result<Self, McpError> {
        let shared = Arc::new(Shared {
            transport,
            released: AtomicBool::new(false),
        });
        let mut connection = Self {
            shared,
            tools: ToolRegistry::new(),
        };

        let definitions = connection.shared.transport.list_tools().await?;
        for def in definitions {
            connection.tools.register(Arc::new(McpTool::new(
                def,
                Arc::clone(&connection.shared),
            )));
        }
        info!(tools = ?connection.tools.list(), "Tool connection established");
        Ok(connection)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn is_released(&self) -> bool {
        self.shared.released.load(Ordering::SeqCst)
    }

    /// Release the session. Returns `true` only for the call that actually
    /// released it.
    pub fn close(&self) -> bool {
        let released = self.shared.release();
        if released {
            debug!("Tool connection released");
        }
        released
    }
}

impl Drop for ToolConnection {
    fn drop(&mut self) {
        self.close();
    }
}

/// A remote tool proxied through a [`ToolConnection`].
pub struct McpTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    shared: Arc<Shared>,
}

impl McpTool {
    fn new(def: McpToolDefinition, shared: Arc<Shared>) -> Self {
        Self {
            name: def.name.into_owned(),
            description: def.description.map(|d| d.into_owned()).unwrap_or_default(),
            schema: serde_json::Value::Object((*def.input_schema).clone()),
            shared,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _context: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        if self.shared.released.load(Ordering::SeqCst) {
            return Err(McpError::ConnectionClosed.into());
        }
        let result = self.shared.transport.call_tool(&self.name, params).await?;
        Ok(ToolOutput {
            content: joined_text(&result),
            is_error: result.is_error.unwrap_or(false),
        })
    }
}

/// Opens a fresh [`ToolConnection`] per chat request.
#[async_trait]
pub trait ToolConnector: Send + Sync {
    async fn connect(&self) -> Result<ToolConnection, McpError>;
}

/// Launches the tool server as a subprocess speaking MCP over stdio.
pub struct StdioToolConnector {
    config: StdioServerConfig,
}

impl StdioToolConnector {
    pub fn new(config: StdioServerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StdioServerConfig {
        &self.config
    }
}

#[async_trait]
impl ToolConnector for StdioToolConnector {
    async fn connect(&self) -> Result<ToolConnection, McpError> {
        let transport = RmcpTransport::spawn(&self.config).await?;
        ToolConnection::open(Arc::new(transport)).await
    }
}
