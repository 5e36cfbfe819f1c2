//! Run items produced by the agent loop and their classification into [`RunEvent`]s.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One piece of content inside a [`RunItem`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Part {
    Text {
        text: String,
    },
    FunctionCall {
        id: String,
        name: String,
        args: Value,
    },
    FunctionResponse {
        id: String,
        name: String,
        response: Value,
    },
}

/// Side effects attached to a run item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunActions {
    #[serde(default)]
    pub state_delta: Map<String, Value>,
    #[serde(default)]
    pub artifact_delta: Map<String, Value>,
}

/// Raw progress record from an agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunItem {
    pub author: String,
    #[serde(default)]
    pub parts: Vec<Part>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub actions: RunActions,
}

impl RunItem {
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            parts: Vec::new(),
            partial: false,
            actions: RunActions::default(),
        }
    }

    pub fn text(author: impl Into<String>, text: impl Into<String>, partial: bool) -> Self {
        let mut item = Self::new(author);
        item.parts.push(Part::Text { text: text.into() });
        item.partial = partial;
        item
    }

    pub fn with_part(mut self, part: Part) -> Self {
        self.parts.push(part);
        self
    }

    pub fn with_state_delta(mut self, delta: Map<String, Value>) -> Self {
        self.actions.state_delta = delta;
        self
    }

    pub fn function_calls(&self) -> Vec<ToolCall> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionCall { name, args, .. } => Some(ToolCall {
                    name: name.clone(),
                    arguments: args.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn function_responses(&self) -> Vec<ToolResultItem> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionResponse { name, response, .. } => Some(ToolResultItem {
                    name: name.clone(),
                    value: response.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Concatenated text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultItem {
    pub name: String,
    pub value: Value,
}

/// What a run item means to a consumer of the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    TextDelta { text: String, is_partial: bool },
    ToolCallRequested { calls: Vec<ToolCall> },
    ToolResultReceived { results: Vec<ToolResultItem> },
    StateUpdate { has_state_delta: bool, has_artifact_delta: bool },
    Other,
}

impl RunEvent {
    /// Classify a run item. The checks run in order and the first match wins:
    /// tool calls, tool results, non-empty text, state/artifact changes.
    pub fn classify(item: &RunItem) -> Self {
        let calls = item.function_calls();
        if !calls.is_empty() {
            return Self::ToolCallRequested { calls };
        }

        let results = item.function_responses();
        if !results.is_empty() {
            return Self::ToolResultReceived { results };
        }

        let text = item.text_content();
        if !text.is_empty() {
            return Self::TextDelta {
                text,
                is_partial: item.partial,
            };
        }

        let has_state_delta = !item.actions.state_delta.is_empty();
        let has_artifact_delta = !item.actions.artifact_delta.is_empty();
        if has_state_delta || has_artifact_delta {
            return Self::StateUpdate {
                has_state_delta,
                has_artifact_delta,
            };
        }

        Self::Other
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::TextDelta { .. } => "text_delta",
            Self::ToolCallRequested { .. } => "tool_call_requested",
            Self::ToolResultReceived { .. } => "tool_result_received",
            Self::StateUpdate { .. } => "state_update",
            Self::Other => "other",
        }
    }
}

impl From<&RunItem> for RunEvent {
    fn from(item: &RunItem) -> Self {
        Self::classify(item)
    }
}
