//! System prompt builder for the agent.

use placechat_tools::ToolRegistry;

/// Instructions every run starts with.
pub const BASE_PROMPT: &str = "You are a helpful assistant that recommends places such as \
restaurants and cafes. Use the available tools to look places up instead of guessing, \
and answer in the language the user writes in.";

/// Build the system prompt: the base instructions, the current time, the tool
/// list, then the configured prompt appended after a blank line.
pub fn build_system_prompt(tools: &ToolRegistry, configured: Option<&str>) -> String {
    let mut parts = vec![BASE_PROMPT.to_string()];

    let now = chrono::Utc::now();
    parts.push(format!("Current time: {}", now.format("%Y-%m-%d %H:%M:%S UTC")));

    let tool_names = tools.list();
    if !tool_names.is_empty() {
        parts.push(format!("Available tools: {}", tool_names.join(", ")));
    }

    if let Some(extra) = configured.map(str::trim).filter(|p| !p.is_empty()) {
        parts.push(extra.to_string());
    }

    parts.join("\n\n")
}
