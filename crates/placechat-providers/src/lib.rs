//! LLM provider abstraction.
//!
//! A provider implements [`LlmProvider`] to stream chat completions. The
//! OpenAI Chat Completions API (and compatible endpoints) is the one shipped
//! implementation.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use placechat_core::session::TranscriptEntry;

pub mod openai;
pub mod sse;

/// Credentials for authenticating with an LLM provider.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Credentials {
    #[serde(rename = "api_key")]
    ApiKey { api_key: String },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiKey { .. } => f.write_str("ApiKey(***)"),
        }
    }
}

/// Provider-neutral description of a tool offered to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// A request to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub tools: Option<Vec<serde_json::Value>>,
    pub system: Option<String>,
}

/// A streamed chunk from the LLM.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub delta: Option<String>,
    pub tool_use: Option<ToolUseChunk>,
    pub usage: Option<ChunkUsage>,
    pub stop_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUseChunk {
    pub id: String,
    pub name: String,
    pub input_json: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

pub type CompletionStream = Pin<Box<dyn Stream<Item = anyhow::Result<CompletionChunk>> + Send>>;

/// The core LLM provider trait.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider identifier (e.g., "openai").
    fn id(&self) -> &str;

    /// Convert tool definitions into the provider's wire format.
    fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<serde_json::Value>;

    /// Convert a transcript into the provider's message list.
    fn format_messages(&self, transcript: &[TranscriptEntry]) -> Vec<serde_json::Value>;

    /// Whether a stop reason means the model is waiting on tool results.
    fn is_tool_use_stop(&self, stop_reason: &str) -> bool;

    /// Stream a chat completion.
    async fn stream(
        &self,
        request: &CompletionRequest,
        credentials: &Credentials,
    ) -> anyhow::Result<CompletionStream>;
}
