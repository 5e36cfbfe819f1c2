//! Tools exposed to the agent runtime.
//!
//! Tools are capabilities exposed to the LLM during agent runs. Each tool
//! implements the [`Tool`] trait. Tools reach the agent through a
//! [`mcp::ToolConnection`]: the chat server spawns a tool server process and
//! proxies calls to it over stdio.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod mcp;
pub mod naver;

/// Context provided to tools during execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
}

/// Output from a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// The core tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name as exposed to the LLM (e.g., "search_naver_places").
    fn name(&self) -> &str;

    /// JSON Schema describing the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Human-readable description for the LLM.
    fn description(&self) -> &str;

    /// Execute the tool with the given parameters.
    async fn execute(
        &self,
        params: serde_json::Value,
        context: &ToolContext,
    ) -> anyhow::Result<ToolOutput>;
}

/// Registry of available tools.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.iter().find(|t| t.name() == name).map(|t| t.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Register the tools hosted by the Naver local search tool server.
pub fn register_search_tools(registry: &mut ToolRegistry) {
    registry.register(Arc::new(naver::SearchNaverPlacesTool::new(
        naver::NaverLocalSearch::new(),
    )));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_search_tools() {
        let mut registry = ToolRegistry::new();
        register_search_tools(&mut registry);
        assert_eq!(registry.list(), vec!["search_naver_places"]);
        assert!(registry.get("search_naver_places").is_some());
        assert!(registry.get("exec").is_none());
    }
}
