//! Agent runtime: drives one chat turn through the LLM tool-calling loop.
//!
//! A run takes the user's message, the session it belongs to and a tool set,
//! streams the model's answer, executes requested tools and produces a lazy
//! sequence of [`RunEvent`]s for the gateway to encode.

use std::pin::Pin;

use futures::Stream;

use placechat_core::session::SessionHandle;
use placechat_tools::ToolRegistry;

pub mod event;
pub mod prompt;
pub mod runtime;

pub use event::{Part, RunActions, RunEvent, RunItem, ToolCall, ToolResultItem};
pub use runtime::{AgentSettings, LlmAgent};

/// Everything one run needs.
pub struct AgentInput {
    /// Session whose transcript is the conversation history. Locked for the
    /// whole run.
    pub session: SessionHandle,
    pub message: String,
    pub tools: ToolRegistry,
    pub system_prompt: String,
}

pub type RunStream = Pin<Box<dyn Stream<Item = anyhow::Result<RunEvent>> + Send>>;

/// Something that can run a chat turn.
///
/// The returned stream is lazy and single-use: nothing happens until it is
/// polled, and dropping it abandons the run.
pub trait ChatAgent: Send + Sync {
    fn run(&self, input: AgentInput) -> RunStream;
}
