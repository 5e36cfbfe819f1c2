//! Naver local search tool server.
//!
//! Speaks MCP on stdin/stdout and logs to stderr. The chat server spawns one
//! instance per chat turn.

use tracing_subscriber::EnvFilter;

use placechat_core::config::{NAVER_CLIENT_ID_ENV, NAVER_CLIENT_SECRET_ENV};
use placechat_tools::mcp::server::ToolServer;
use placechat_tools::naver::NaverCredentials;
use placechat_tools::{ToolRegistry, register_search_tools};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let level = std::env::var("LOG_LEVEL")
        .map(|l| l.to_ascii_lowercase())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .init();

    if NaverCredentials::from_env().is_none() {
        tracing::error!(
            "{NAVER_CLIENT_ID_ENV} and {NAVER_CLIENT_SECRET_ENV} must be set; refusing to start"
        );
        std::process::exit(1);
    }

    let mut registry = ToolRegistry::new();
    register_search_tools(&mut registry);

    ToolServer::new(registry, "NaverMapSearch", env!("CARGO_PKG_VERSION"))
        .run(rmcp::transport::stdio())
        .await
}
