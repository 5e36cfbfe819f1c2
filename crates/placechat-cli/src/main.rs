use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

use placechat_agent::{AgentSettings, LlmAgent};
use placechat_core::config::{
    Config, DEFAULT_TOOL_SERVER_COMMAND, EnvConfig, NAVER_CLIENT_ID_ENV, NAVER_CLIENT_SECRET_ENV,
};
use placechat_core::session_store::MemorySessionStore;
use placechat_gateway::GatewayState;
use placechat_providers::Credentials;
use placechat_providers::openai::OpenAiProvider;
use placechat_tools::mcp::{StdioServerConfig, StdioToolConnector};

#[derive(Parser)]
#[command(
    name = "placechat",
    about = "Streaming place-recommendation chat server backed by an LLM agent",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file path (default: $APP_HOME/config/<ENV>.yaml)
    #[arg(short, long, global = true, env = "PLACECHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the chat server (default)
    Serve {
        /// Port to listen on (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Validate the environment and configuration, then exit
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let env = EnvConfig::from_env()?;
    let config_path = cli.config.clone().unwrap_or_else(|| env.config_path());
    let config = Config::load(&config_path)?;

    let log_format = env.log_format.as_deref().unwrap_or(config.log_format());
    init_logging(&env.log_level, log_format, config.log_filters(), cli.verbose);
    tracing::info!(env = %env.env, config = %config_path.display(), "Configuration loaded");
    tracing::debug!(?env, "Environment");

    let (warnings, errors) = config.validate(&env);
    for warning in &warnings {
        tracing::warn!("{warning}");
    }
    if !errors.is_empty() {
        for error in &errors {
            tracing::error!("{error}");
        }
        bail!("invalid configuration: {}", errors.join("; "));
    }

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Check => {
            println!("placechat v{}", env!("CARGO_PKG_VERSION"));
            println!("Config: {}", config_path.display());
            println!("Listen: {}", env.bind_addr());
            println!("Model: {}", config.model());
            println!("Tool server: {}", tool_server_command(&config).display());
            println!("Warnings: {}", warnings.len());
        }
        Commands::Serve { port } => {
            let addr = match port {
                Some(p) => format!("{}:{p}", env.host),
                None => env.bind_addr(),
            };
            let state = build_state(&env, config);
            tracing::info!("Starting placechat on {addr}");
            placechat_gateway::start_gateway(Arc::new(state), &addr).await?;
        }
    }

    Ok(())
}

fn init_logging(level: &str, format: &str, filters: &[String], verbose: bool) {
    let base = if verbose {
        "debug".to_string()
    } else {
        level.to_ascii_lowercase()
    };
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&base));
    for raw in filters {
        match raw.parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(e) => eprintln!("Ignoring invalid log filter '{raw}': {e}"),
        }
    }

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_state(env: &EnvConfig, config: Config) -> GatewayState {
    let provider = Arc::new(OpenAiProvider::openai(config.llm_base_url()));
    let credentials = Credentials::ApiKey {
        api_key: env.openai_api_key.clone().unwrap_or_default(),
    };
    let agent = LlmAgent::new(provider, credentials, AgentSettings::from_config(&config));

    let mut tool_env = Vec::new();
    if let Some(id) = &env.naver_client_id {
        tool_env.push((NAVER_CLIENT_ID_ENV.to_string(), id.clone()));
    }
    if let Some(secret) = &env.naver_client_secret {
        tool_env.push((NAVER_CLIENT_SECRET_ENV.to_string(), secret.clone()));
    }
    let connector = StdioToolConnector::new(StdioServerConfig {
        command: tool_server_command(&config).to_string_lossy().into_owned(),
        args: config.tool_server_args(),
        env: tool_env,
        request_timeout: Duration::from_secs(config.tool_request_timeout_secs()),
    });

    let sessions = MemorySessionStore::with_limits(
        Duration::from_secs(config.session_idle_ttl_secs()),
        config.max_sessions(),
    );

    GatewayState::new(
        Arc::new(config),
        Arc::new(sessions),
        Arc::new(agent),
        Arc::new(connector),
    )
}

/// Configured tool server command, or the `naver-local-search` binary
/// installed next to this executable.
fn tool_server_command(config: &Config) -> PathBuf {
    if let Some(command) = config.tool_server_command() {
        return PathBuf::from(command);
    }
    std::env::current_exe()
        .ok()
        .as_deref()
        .and_then(Path::parent)
        .map(sibling_tool_server)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TOOL_SERVER_COMMAND))
}

fn sibling_tool_server(dir: &Path) -> PathBuf {
    dir.join(format!(
        "{DEFAULT_TOOL_SERVER_COMMAND}{}",
        std::env::consts::EXE_SUFFIX
    ))
}
