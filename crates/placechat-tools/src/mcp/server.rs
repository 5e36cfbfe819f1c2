//! Host a [`ToolRegistry`] as an MCP tool server.

use std::sync::Arc;

use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, Implementation, ListToolsResult,
    PaginatedRequestParam, ServerCapabilities, ServerInfo, Tool as McpToolDefinition,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::transport::IntoTransport;
use rmcp::{ErrorData, ServerHandler, ServiceExt};
use serde_json::Value;
use tracing::{info, warn};

use crate::{ToolContext, ToolRegistry};

/// Serves every tool in a registry over `tools/list` and `tools/call`.
#[derive(Clone)]
pub struct ToolServer {
    registry: ToolRegistry,
    name: String,
    version: String,
}

impl ToolServer {
    pub fn new(registry: ToolRegistry, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            registry,
            name: name.into(),
            version: version.into(),
        }
    }

    /// Answer requests on `transport` until the client goes away.
    pub async fn run<T, E, A>(self, transport: T) -> anyhow::Result<()>
    where
        T: IntoTransport<RoleServer, E, A>,
        E: std::error::Error + Send + Sync + 'static,
    {
        info!(name = %self.name, tools = ?self.registry.list(), "Tool server ready");
        let service = self
            .serve(transport)
            .await
            .map_err(|e| anyhow::anyhow!("tool server handshake failed: {e}"))?;
        let reason = service.waiting().await?;
        info!(?reason, "Tool server exiting");
        Ok(())
    }

    fn definitions(&self) -> Vec<McpToolDefinition> {
        self.registry
            .tools()
            .iter()
            .map(|tool| {
                let schema = match tool.parameters_schema() {
                    Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                McpToolDefinition::new(
                    tool.name().to_string(),
                    tool.description().to_string(),
                    Arc::new(schema),
                )
            })
            .collect()
    }
}

impl ServerHandler for ToolServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: self.name.clone(),
                version: self.version.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        Ok(ListToolsResult::with_all_items(self.definitions()))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let Some(tool) = self.registry.get(&request.name) else {
            return Err(ErrorData::invalid_params(
                format!("Unknown tool: {}", request.name),
                None,
            ));
        };

        let arguments = Value::Object(request.arguments.unwrap_or_default());
        match tool.execute(arguments, &ToolContext::default()).await {
            Ok(output) if output.is_error => {
                Ok(CallToolResult::error(vec![Content::text(output.content)]))
            }
            Ok(output) => Ok(CallToolResult::success(vec![Content::text(output.content)])),
            Err(e) => {
                warn!(tool = %request.name, %e, "Tool execution failed");
                Ok(CallToolResult::error(vec![Content::text(format!(
                    "Error executing tool {}: {e}",
                    request.name
                ))]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use rmcp::model::ErrorCode;
    use serde_json::json;

    use super::*;
    use crate::mcp::{McpError, RmcpTransport, ToolConnection, ToolTransport, joined_text};
    use crate::{Tool, ToolOutput};

    struct Upper;

    #[async_trait]
    impl Tool for Upper {
        fn name(&self) -> &str {
            "upper"
        }
        fn description(&self) -> &str {
            "Uppercase text"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}, "required": ["text"]})
        }
        async fn execute(&self, params: Value, _ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
            let text = params["text"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("text is required"))?;
            Ok(ToolOutput::ok(text.to_uppercase()))
        }
    }

    /// Start a server on one end of an in-memory pipe and connect to it.
    async fn connect() -> RmcpTransport {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Upper));
        tokio::spawn(async move {
            let _ = ToolServer::new(registry, "test-server", "0.0.1")
                .run(server_io)
                .await;
        });
        RmcpTransport::connect(client_io, Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lists_registry_tools() {
        let transport = connect().await;
        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "upper");
        assert_eq!(tools[0].description.as_deref(), Some("Uppercase text"));
        assert_eq!(tools[0].input_schema["required"], json!(["text"]));
    }

    #[tokio::test]
    async fn test_call_through_connection() {
        let connection = ToolConnection::open(Arc::new(connect().await))
            .await
            .unwrap();
        let tool = connection.tools().get("upper").unwrap();
        let out = tool
            .execute(json!({"text": "강남 cafe"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out.content, "강남 CAFE");
        assert!(!out.is_error);

        assert!(connection.close());
        let err = tool
            .execute(json!({"text": "x"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_tool_failure_is_error_result() {
        let transport = connect().await;
        let result = transport.call_tool("upper", json!({})).await.unwrap();
        assert_eq!(result.is_error, Some(true));
        assert!(joined_text(&result).contains("text is required"));
    }

    #[tokio::test]
    async fn test_unknown_tool_is_invalid_params() {
        let transport = connect().await;
        let err = transport.call_tool("nope", json!({})).await.unwrap_err();
        match err {
            McpError::Rpc { code, message } => {
                assert_eq!(code, i64::from(ErrorCode::INVALID_PARAMS.0));
                assert!(message.contains("nope"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_object_arguments_rejected() {
        let transport = connect().await;
        let err = transport.call_tool("upper", json!("abc")).await.unwrap_err();
        assert!(matches!(err, McpError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn test_client_times_out_on_silent_server() {
        let (client_io, _server_io) = tokio::io::duplex(1024);
        let err = RmcpTransport::connect(client_io, Duration::from_millis(50))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, McpError::Timeout(_)));
    }
}
