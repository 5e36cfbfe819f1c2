//! One chat turn, from tool connection to the last SSE frame.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::stream;
use futures::Stream;
use tokio::time::Instant;
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use placechat_agent::prompt::build_system_prompt;
use placechat_agent::{AgentInput, ChatAgent};
use placechat_core::session::SessionHandle;
use placechat_tools::mcp::ToolConnection;

use crate::encoder::{SseFrame, StreamFrameEncoder};
use crate::error::ChatError;
use crate::state::GatewayState;

pub type FrameStream = Pin<Box<dyn Stream<Item = SseFrame> + Send>>;

/// Lifecycle of a [`ChatStreamSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Created,
    ToolConnected,
    Running,
    Draining,
    ClosingOnError,
    Closed,
}

/// A user message addressed to a session.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub session_id: String,
    pub message: String,
}

/// Drives one chat turn and owns its tool connection.
///
/// The connection is released exactly once whichever way the turn ends:
/// stream exhausted, agent error, turn timeout, or the consumer dropping the
/// stream.
pub struct ChatStreamSession {
    turn: ChatTurn,
    session: SessionHandle,
    connection: ToolConnection,
    agent: Arc<dyn ChatAgent>,
    encoder: StreamFrameEncoder,
    system_prompt: String,
    turn_timeout: Duration,
    phase: SessionPhase,
}

impl ChatStreamSession {
    /// Connect to the tool server and attach the session. Nothing is streamed
    /// yet; a failure here is reported to the caller as an HTTP error.
    pub async fn open(state: &GatewayState, turn: ChatTurn) -> Result<Self, ChatError> {
        debug!(session_id = %turn.session_id, phase = ?SessionPhase::Created, "Opening chat turn");

        let connection = state.connector.connect().await.map_err(|e| {
            error!(session_id = %turn.session_id, %e, "Tool server connection failed");
            ChatError::from(e)
        })?;

        let session = state
            .sessions
            .get_or_create(
                &turn.session_id,
                &state.config.app_name(),
                &state.config.user_id(),
            )
            .await?;

        let system_prompt = build_system_prompt(connection.tools(), state.config.agent_prompt());

        let chat = Self {
            turn,
            session,
            connection,
            agent: Arc::clone(&state.agent),
            encoder: StreamFrameEncoder::new(state.frame_options),
            system_prompt,
            turn_timeout: state.turn_timeout,
            phase: SessionPhase::ToolConnected,
        };
        debug!(session_id = %chat.turn.session_id, phase = ?chat.phase, "Tool connection ready");
        Ok(chat)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    fn transition(&mut self, next: SessionPhase) {
        debug!(session_id = %self.turn.session_id, from = ?self.phase, to = ?next, "Chat turn phase");
        self.phase = next;
    }

    fn close(&mut self) {
        if self.connection.close() {
            info!(session_id = %self.turn.session_id, "Tool connection released");
        }
        self.transition(SessionPhase::Closed);
    }

    /// Run the turn, yielding frames as soon as they are encoded.
    pub fn into_stream(self) -> FrameStream {
        let mut this = self;
        Box::pin(stream! {
            let deadline = Instant::now() + this.turn_timeout;
            let input = AgentInput {
                session: Arc::clone(&this.session),
                message: this.turn.message.clone(),
                tools: this.connection.tools().clone(),
                system_prompt: this.system_prompt.clone(),
            };

            this.transition(SessionPhase::Running);
            let mut run = this.agent.run(input);
            let mut frames = 0usize;

            loop {
                match tokio::time::timeout_at(deadline, run.next()).await {
                    Ok(Some(Ok(event))) => {
                        if let Some(frame) = this.encoder.encode(&event) {
                            frames += 1;
                            yield frame;
                        }
                    }
                    Ok(Some(Err(e))) => {
                        error!(session_id = %this.turn.session_id, %e, "Agent run failed");
                        this.transition(SessionPhase::ClosingOnError);
                        break;
                    }
                    Ok(None) => {
                        this.transition(SessionPhase::Draining);
                        break;
                    }
                    Err(_) => {
                        warn!(
                            session_id = %this.turn.session_id,
                            timeout_secs = this.turn_timeout.as_secs_f64(),
                            "Chat turn timed out"
                        );
                        this.transition(SessionPhase::ClosingOnError);
                        break;
                    }
                }
            }

            drop(run);
            this.close();
            info!(session_id = %this.turn.session_id, frames, "Chat turn finished");
        })
    }
}
