//! Session model: conversation transcript, key/value state, and the store trait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::types::ContentBlock;

/// A chat session: one conversation between a user and the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    /// Free-form conversation state shared across turns.
    #[serde(default)]
    pub state: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub transcript: Vec<TranscriptEntry>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

/// A single entry in a session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TranscriptEntry {
    #[serde(rename = "user")]
    User {
        content: Vec<ContentBlock>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "assistant")]
    Assistant {
        content: Vec<ContentBlock>,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        timestamp: DateTime<Utc>,
    },
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        tool: String,
        content: String,
        is_error: bool,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            app_name: app_name.into(),
            user_id: user_id.into(),
            state: serde_json::Map::new(),
            transcript: Vec::new(),
            created_at: now,
            last_updated_at: now,
        }
    }

    pub fn append(&mut self, entry: TranscriptEntry) {
        self.transcript.push(entry);
        self.last_updated_at = Utc::now();
    }

    /// Drop the oldest history so at most `max_entries` remain, cutting only
    /// at the start of a user turn. Returns the number of entries removed.
    pub fn trim_history(&mut self, max_entries: usize) -> usize {
        let len = self.transcript.len();
        if len <= max_entries {
            return 0;
        }
        let start = self.transcript[len - max_entries..]
            .iter()
            .position(|e| matches!(e, TranscriptEntry::User { .. }))
            .map_or(len, |offset| len - max_entries + offset);
        self.transcript.drain(..start);
        start
    }

    /// Merge a state delta into the session state, returning whether anything changed.
    pub fn apply_state_delta(&mut self, delta: &serde_json::Map<String, serde_json::Value>) -> bool {
        let mut changed = false;
        for (key, value) in delta {
            if self.state.get(key) != Some(value) {
                self.state.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        if changed {
            self.last_updated_at = Utc::now();
        }
        changed
    }
}

/// Shared handle to a live session. Holding the lock serializes turns on that session.
pub type SessionHandle = Arc<Mutex<ChatSession>>;

/// Storage for chat sessions.
///
/// Implementations must be safe to share across concurrent requests. Turns on
/// the same session are serialized through the per-session [`SessionHandle`]
/// lock; turns on different sessions never contend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Return the session with `id`, creating an empty one if it does not exist.
    async fn get_or_create(&self, id: &str, app_name: &str, user_id: &str) -> Result<SessionHandle>;

    /// Forget sessions that have been idle longer than the store's TTL.
    /// Sessions with a turn in flight are kept. Returns how many were removed.
    async fn evict_idle(&self) -> Result<usize>;

    /// Number of live sessions.
    async fn count(&self) -> usize;
}
