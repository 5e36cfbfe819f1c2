//! Agent runtime loop: orchestrates LLM streaming + tool calling.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use async_stream::stream;
use chrono::Utc;
use futures::Stream;
use serde_json::{Map, Value, json};
use tokio_stream::StreamExt;
use tracing::{debug, error, info, warn};

use placechat_core::config::Config;
use placechat_core::session::{TranscriptEntry, Usage};
use placechat_core::types::ContentBlock;
use placechat_providers::{CompletionRequest, Credentials, LlmProvider, ToolDefinition};
use placechat_tools::{ToolContext, ToolOutput};

use crate::event::{Part, RunItem};
use crate::{AgentInput, ChatAgent, RunEvent, RunStream};

pub const AGENT_NAME: &str = "place_search_agent";

pub type ItemStream = Pin<Box<dyn Stream<Item = anyhow::Result<RunItem>> + Send>>;

/// Model parameters for a run.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub name: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub max_tool_iterations: u32,
    pub max_history_entries: usize,
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: AGENT_NAME.to_string(),
            model: config.model(),
            max_tokens: config.max_tokens(),
            temperature: config.temperature(),
            max_tool_iterations: config.max_tool_iterations(),
            max_history_entries: config.max_history_entries(),
        }
    }
}

/// Chat agent backed by an [`LlmProvider`].
pub struct LlmAgent {
    provider: Arc<dyn LlmProvider>,
    credentials: Credentials,
    settings: AgentSettings,
}

impl LlmAgent {
    pub fn new(provider: Arc<dyn LlmProvider>, credentials: Credentials, settings: AgentSettings) -> Self {
        Self {
            provider,
            credentials,
            settings,
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Run the loop, yielding raw items.
    ///
    /// Each text delta is yielded as a partial text item and the whole
    /// completion text as a complete one. Tool calls and their results get one
    /// item each per model round. The run ends with a state-update item and a
    /// bare control item.
    ///
    /// A tool round reaches the transcript only once all of its results are
    /// in, so dropping the stream mid-round leaves no unanswered tool calls.
    pub fn run_items(&self, input: AgentInput) -> ItemStream {
        let provider = Arc::clone(&self.provider);
        let credentials = self.credentials.clone();
        let settings = self.settings.clone();

        Box::pin(stream! {
            let start = Instant::now();
            let AgentInput { session, message, tools, system_prompt } = input;
            let mut session = session.lock_owned().await;
            let author = settings.name.clone();
            let context = ToolContext { session_id: session.id.clone() };

            let trimmed = session.trim_history(settings.max_history_entries);
            if trimmed > 0 {
                debug!(trimmed, kept = session.transcript.len(), "Trimmed session history");
            }
            session.append(TranscriptEntry::User {
                content: vec![ContentBlock::text(message)],
                timestamp: Utc::now(),
            });

            let tool_defs = if tools.is_empty() {
                None
            } else {
                let definitions: Vec<ToolDefinition> = tools
                    .tools()
                    .iter()
                    .map(|t| ToolDefinition {
                        name: t.name().to_string(),
                        description: t.description().to_string(),
                        parameters_schema: t.parameters_schema(),
                    })
                    .collect();
                Some(provider.format_tools(&definitions))
            };

            let mut total_input_tokens: u64 = 0;
            let mut total_output_tokens: u64 = 0;
            let mut tool_call_count: u32 = 0;

            for iteration in 0..settings.max_tool_iterations {
                debug!(iteration, "Agent loop iteration");

                let request = CompletionRequest {
                    model: settings.model.clone(),
                    messages: provider.format_messages(&session.transcript),
                    max_tokens: settings.max_tokens,
                    temperature: settings.temperature,
                    tools: tool_defs.clone(),
                    system: Some(system_prompt.clone()),
                };

                let mut completion = match provider.stream(&request, &credentials).await {
                    Ok(s) => s,
                    Err(e) => {
                        error!(%e, "Provider stream error");
                        yield Err(e);
                        return;
                    }
                };

                let mut response_text = String::new();
                let mut tool_uses: Vec<(String, String, Value)> = Vec::new();
                let mut stop_reason = None;
                let mut usage = Usage::default();

                while let Some(chunk) = completion.next().await {
                    let chunk = match chunk {
                        Ok(c) => c,
                        Err(e) => {
                            error!(%e, "Stream chunk error");
                            yield Err(e);
                            return;
                        }
                    };

                    if let Some(delta) = chunk.delta.filter(|d| !d.is_empty()) {
                        response_text.push_str(&delta);
                        yield Ok(RunItem::text(&author, delta, true));
                    }

                    if let Some(tool_use) = chunk.tool_use {
                        let input: Value = serde_json::from_str(&tool_use.input_json).unwrap_or_else(|e| {
                            warn!(tool = %tool_use.name, %e, "Tool arguments are not valid JSON");
                            json!({})
                        });
                        let id = if tool_use.id.is_empty() {
                            format!("call_{}", uuid::Uuid::new_v4().simple())
                        } else {
                            tool_use.id
                        };
                        tool_uses.push((id, tool_use.name, input));
                    }

                    if let Some(u) = chunk.usage {
                        if let Some(inp) = u.input_tokens {
                            usage.input_tokens = inp;
                        }
                        if let Some(out) = u.output_tokens {
                            usage.output_tokens = out;
                        }
                    }

                    if let Some(reason) = chunk.stop_reason {
                        stop_reason = Some(reason);
                    }
                }

                total_input_tokens += usage.input_tokens;
                total_output_tokens += usage.output_tokens;

                let is_tool_round = !tool_uses.is_empty()
                    && stop_reason
                        .as_deref()
                        .is_some_and(|r| provider.is_tool_use_stop(r));
                if !tool_uses.is_empty() && !is_tool_round {
                    warn!(?stop_reason, calls = tool_uses.len(), "Ignoring tool calls without a tool-use stop");
                }

                let mut assistant_content = Vec::new();
                if !response_text.is_empty() {
                    assistant_content.push(ContentBlock::text(response_text.clone()));
                }
                if is_tool_round {
                    for (id, name, input) in &tool_uses {
                        assistant_content.push(ContentBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            input: input.clone(),
                        });
                    }
                }
                let assistant = TranscriptEntry::Assistant {
                    content: assistant_content,
                    usage: Some(usage),
                    timestamp: Utc::now(),
                };

                if !is_tool_round {
                    session.append(assistant);
                    if !response_text.is_empty() {
                        yield Ok(RunItem::text(&author, response_text, false));
                    }
                    break;
                }

                if !response_text.is_empty() {
                    yield Ok(RunItem::text(&author, response_text, false));
                }

                let mut call_item = RunItem::new(&author);
                for (id, name, input) in &tool_uses {
                    call_item.parts.push(Part::FunctionCall {
                        id: id.clone(),
                        name: name.clone(),
                        args: input.clone(),
                    });
                }
                yield Ok(call_item);

                let mut round = vec![assistant];
                let mut result_item = RunItem::new(&author);
                for (id, name, input) in tool_uses {
                    tool_call_count += 1;
                    info!(tool = %name, "Executing tool");

                    let output = match tools.get(&name) {
                        Some(tool) => match tool.execute(input, &context).await {
                            Ok(output) => output,
                            Err(e) => {
                                warn!(tool = %name, %e, "Tool execution failed");
                                ToolOutput::error(format!("Tool error: {e}"))
                            }
                        },
                        None => {
                            warn!(tool = %name, "Unknown tool requested");
                            ToolOutput::error(format!("Unknown tool: {name}"))
                        }
                    };

                    round.push(TranscriptEntry::ToolResult {
                        tool_use_id: id.clone(),
                        tool: name.clone(),
                        content: output.content.clone(),
                        is_error: output.is_error,
                        timestamp: Utc::now(),
                    });
                    result_item.parts.push(Part::FunctionResponse {
                        id,
                        name,
                        response: response_value(output),
                    });
                }
                for entry in round {
                    session.append(entry);
                }
                yield Ok(result_item);

                if iteration + 1 == settings.max_tool_iterations {
                    warn!(
                        max = settings.max_tool_iterations,
                        "Tool iteration limit reached, ending turn"
                    );
                }
            }

            let turns = session
                .state
                .get("turn_count")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                + 1;
            let mut delta = Map::new();
            delta.insert("turn_count".into(), json!(turns));
            delta.insert("last_turn_at".into(), json!(Utc::now().to_rfc3339()));
            session.apply_state_delta(&delta);
            yield Ok(RunItem::new(&author).with_state_delta(delta));

            info!(
                session_id = %session.id,
                duration_ms = start.elapsed().as_millis() as u64,
                input_tokens = total_input_tokens,
                output_tokens = total_output_tokens,
                tool_calls = tool_call_count,
                "Agent run complete"
            );
            yield Ok(RunItem::new(&author));
        })
    }
}

/// Tool output as a structured value: parsed JSON when the tool returned
/// JSON, the raw text otherwise, wrapped in `{"error": ...}` on failure.
fn response_value(output: ToolOutput) -> Value {
    if output.is_error {
        return json!({ "error": output.content });
    }
    serde_json::from_str(&output.content).unwrap_or(Value::String(output.content))
}

impl ChatAgent for LlmAgent {
    fn run(&self, input: AgentInput) -> RunStream {
        Box::pin(
            self.run_items(input)
                .map(|item| item.map(|i| RunEvent::classify(&i))),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use placechat_core::session::ChatSession;
    use placechat_providers::{CompletionChunk, CompletionStream, ToolUseChunk};
    use placechat_tools::{Tool, ToolRegistry};

    use super::*;

    /// Replays one scripted chunk list per completion call.
    struct ScriptedProvider {
        scripts: Mutex<VecDeque<Vec<anyhow::Result<CompletionChunk>>>>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Vec<anyhow::Result<CompletionChunk>>>) -> Arc<Self> {
            Arc::new(Self {
                scripts: Mutex::new(scripts.into()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn id(&self) -> &str {
            "scripted"
        }

        fn format_tools(&self, tools: &[ToolDefinition]) -> Vec<Value> {
            tools.iter().map(|t| json!({"name": t.name})).collect()
        }

        fn format_messages(&self, transcript: &[TranscriptEntry]) -> Vec<Value> {
            transcript
                .iter()
                .map(|e| match e {
                    TranscriptEntry::User { .. } => json!("user"),
                    TranscriptEntry::Assistant { .. } => json!("assistant"),
                    TranscriptEntry::ToolResult { content, .. } => json!({"tool": content}),
                })
                .collect()
        }

        fn is_tool_use_stop(&self, stop_reason: &str) -> bool {
            stop_reason == "tool_calls"
        }

        async fn stream(
            &self,
            request: &CompletionRequest,
            _credentials: &Credentials,
        ) -> anyhow::Result<CompletionStream> {
            self.requests.lock().unwrap().push(request.clone());
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("OpenAI API error 500: no script left"))?;
            Ok(Box::pin(tokio_stream::iter(script)))
        }
    }

    struct FixedTool;

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            "search_naver_places"
        }
        fn description(&self) -> &str {
            "search"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, params: Value, _ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
            if params["query"] == "fail" {
                anyhow::bail!("tool connection closed");
            }
            Ok(ToolOutput::ok(r#"[{"name": "카페 A"}]"#))
        }
    }

    /// Never finishes, like a search that outlives the turn deadline.
    struct HangingTool;

    #[async_trait]
    impl Tool for HangingTool {
        fn name(&self) -> &str {
            "search_naver_places"
        }
        fn description(&self) -> &str {
            "search"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
            std::future::pending().await
        }
    }

    fn text(s: &str) -> anyhow::Result<CompletionChunk> {
        Ok(CompletionChunk {
            delta: Some(s.into()),
            ..Default::default()
        })
    }

    fn stop(reason: &str) -> anyhow::Result<CompletionChunk> {
        Ok(CompletionChunk {
            stop_reason: Some(reason.into()),
            ..Default::default()
        })
    }

    fn tool_call(name: &str, args: &str) -> anyhow::Result<CompletionChunk> {
        Ok(CompletionChunk {
            tool_use: Some(ToolUseChunk {
                id: "call_1".into(),
                name: name.into(),
                input_json: args.into(),
            }),
            ..Default::default()
        })
    }

    fn settings(max_tool_iterations: u32) -> AgentSettings {
        AgentSettings {
            name: AGENT_NAME.into(),
            model: "gpt-4o".into(),
            max_tokens: 256,
            temperature: None,
            max_tool_iterations,
            max_history_entries: 50,
        }
    }

    fn agent(provider: Arc<ScriptedProvider>, max_tool_iterations: u32) -> LlmAgent {
        LlmAgent::new(
            provider,
            Credentials::ApiKey {
                api_key: "sk-test".into(),
            },
            settings(max_tool_iterations),
        )
    }

    fn input(session: &placechat_core::session::SessionHandle, message: &str) -> AgentInput {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(FixedTool));
        AgentInput {
            session: session.clone(),
            message: message.into(),
            tools,
            system_prompt: "system".into(),
        }
    }

    fn new_session() -> placechat_core::session::SessionHandle {
        Arc::new(tokio::sync::Mutex::new(ChatSession::new("s1", "app", "user_0101")))
    }

    async fn collect(stream: RunStream) -> Vec<anyhow::Result<RunEvent>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_text_only_run() {
        let provider = ScriptedProvider::new(vec![vec![text("안녕"), text("하세요"), stop("stop")]]);
        let agent = agent(provider.clone(), 4);
        let session = new_session();

        let events: Vec<RunEvent> = collect(agent.run(input(&session, "hi")))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        assert_eq!(
            events[..3],
            [
                RunEvent::TextDelta { text: "안녕".into(), is_partial: true },
                RunEvent::TextDelta { text: "하세요".into(), is_partial: true },
                RunEvent::TextDelta { text: "안녕하세요".into(), is_partial: false },
            ]
        );
        assert_eq!(
            events[3],
            RunEvent::StateUpdate { has_state_delta: true, has_artifact_delta: false }
        );
        assert_eq!(events[4], RunEvent::Other);
        assert_eq!(events.len(), 5);

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[0].system.as_deref(), Some("system"));
        assert_eq!(requests[0].tools.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_tool_round_trip() {
        let provider = ScriptedProvider::new(vec![
            vec![tool_call("search_naver_places", r#"{"query":"강남 카페"}"#), stop("tool_calls")],
            vec![text("Found 1 place"), stop("stop")],
        ]);
        let agent = agent(provider.clone(), 4);
        let session = new_session();

        let events: Vec<RunEvent> = collect(agent.run(input(&session, "cafes?")))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let kinds: Vec<&str> = events.iter().map(RunEvent::kind).collect();
        assert_eq!(
            kinds,
            [
                "tool_call_requested",
                "tool_result_received",
                "text_delta",
                "text_delta",
                "state_update",
                "other"
            ]
        );
        let RunEvent::ToolResultReceived { results } = &events[1] else {
            panic!("expected tool results");
        };
        assert_eq!(results[0].value[0]["name"], "카페 A");

        // The second completion sees the tool result.
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].messages[2]["tool"], r#"[{"name": "카페 A"}]"#);

        let session = session.lock().await;
        assert_eq!(session.transcript.len(), 4);
        assert_eq!(session.state["turn_count"], 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_and_failing_tool_become_error_results() {
        let provider = ScriptedProvider::new(vec![
            vec![tool_call("nope", "{}"), stop("tool_calls")],
            vec![tool_call("search_naver_places", r#"{"query":"fail"}"#), stop("tool_calls")],
            vec![text("sorry"), stop("stop")],
        ]);
        let agent = agent(provider, 4);
        let session = new_session();
        let events: Vec<RunEvent> = collect(agent.run(input(&session, "x")))
            .await
            .into_iter()
            .map(Result::unwrap)
            .collect();

        let errors: Vec<&Value> = events
            .iter()
            .filter_map(|e| match e {
                RunEvent::ToolResultReceived { results } => Some(&results[0].value),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0]["error"], "Unknown tool: nope");
        assert!(errors[1]["error"].as_str().unwrap().contains("connection closed"));
    }

    #[tokio::test]
    async fn test_provider_failure_is_run_error() {
        let provider = ScriptedProvider::new(vec![vec![
            text("partial"),
            Err(anyhow::anyhow!("SSE stream error: reset")),
        ]]);
        let agent = agent(provider, 4);
        let session = new_session();
        let events = collect(agent.run(input(&session, "x"))).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].is_ok());
        assert!(events[1].as_ref().unwrap_err().to_string().contains("reset"));
    }

    #[tokio::test]
    async fn test_iteration_limit_ends_turn() {
        let provider = ScriptedProvider::new(vec![
            vec![tool_call("search_naver_places", "{}"), stop("tool_calls")],
            vec![tool_call("search_naver_places", "{}"), stop("tool_calls")],
        ]);
        let agent = agent(provider.clone(), 1);
        let session = new_session();
        let events = collect(agent.run(input(&session, "x"))).await;
        assert!(events.iter().all(|e| e.is_ok()));
        assert_eq!(provider.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_carries_across_turns() {
        let provider = ScriptedProvider::new(vec![
            vec![text("first"), stop("stop")],
            vec![text("second"), stop("stop")],
        ]);
        let agent = agent(provider.clone(), 4);
        let session = new_session();

        let _ = collect(agent.run(input(&session, "one"))).await;
        let _ = collect(agent.run(input(&session, "two"))).await;

        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[1].messages, vec![json!("user"), json!("assistant"), json!("user")]);
        assert_eq!(session.lock().await.state["turn_count"], 2);
    }

    #[tokio::test]
    async fn test_cancel_during_tool_call_leaves_consistent_history() {
        let provider = ScriptedProvider::new(vec![
            vec![tool_call("search_naver_places", r#"{"query":"cafes"}"#), stop("tool_calls")],
            vec![text("welcome back"), stop("stop")],
        ]);
        let agent = agent(provider.clone(), 4);
        let session = new_session();

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(HangingTool));
        let mut run = agent.run(AgentInput {
            session: session.clone(),
            message: "cafes".into(),
            tools,
            system_prompt: "system".into(),
        });

        loop {
            let event = run.next().await.unwrap().unwrap();
            if event.kind() == "tool_call_requested" {
                break;
            }
        }
        let pending = tokio::time::timeout(std::time::Duration::from_millis(50), run.next()).await;
        assert!(pending.is_err(), "tool call should still be running");
        drop(run);

        {
            let session = session.lock().await;
            assert_eq!(session.transcript.len(), 1);
            let history = placechat_providers::openai::OpenAiProvider::openai(None)
                .format_messages(&session.transcript);
            assert!(history.iter().all(|m| m.get("tool_calls").is_none()), "{history:?}");
        }

        // The next turn on the same session runs normally.
        let events = collect(agent.run(input(&session, "again"))).await;
        assert!(events.iter().all(|e| e.is_ok()));
        let requests = provider.requests.lock().unwrap();
        assert_eq!(requests[1].messages, vec![json!("user"), json!("user")]);
    }

    #[tokio::test]
    async fn test_tool_calls_without_tool_stop_are_not_recorded() {
        let provider = ScriptedProvider::new(vec![
            vec![text("done"), tool_call("search_naver_places", "{}"), stop("stop")],
        ]);
        let agent = agent(provider, 4);
        let session = new_session();
        let events = collect(agent.run(input(&session, "x"))).await;
        assert!(events.iter().all(|e| e.is_ok()));

        let session = session.lock().await;
        let TranscriptEntry::Assistant { content, .. } = &session.transcript[1] else {
            panic!("expected assistant entry");
        };
        assert!(content.iter().all(|b| !matches!(b, ContentBlock::ToolUse { .. })));
    }

    #[tokio::test]
    async fn test_history_is_trimmed_to_whole_turns() {
        let provider = ScriptedProvider::new(vec![
            vec![text("first"), stop("stop")],
            vec![text("second"), stop("stop")],
            vec![text("third"), stop("stop")],
        ]);
        let mut settings = settings(4);
        settings.max_history_entries = 3;
        let agent = LlmAgent::new(
            provider.clone(),
            Credentials::ApiKey {
                api_key: "sk-test".into(),
            },
            settings,
        );
        let session = new_session();

        for message in ["one", "two", "three"] {
            let _ = collect(agent.run(input(&session, message))).await;
        }

        let requests = provider.requests.lock().unwrap();
        // Before turn three the transcript held four entries; only the last
        // whole turn fits in three.
        assert_eq!(requests[2].messages, vec![json!("user"), json!("assistant"), json!("user")]);
        assert_eq!(session.lock().await.transcript.len(), 4);
    }
}
