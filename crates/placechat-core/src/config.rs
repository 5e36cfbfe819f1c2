//! Configuration loading and validation.
//!
//! Two layers:
//! - [`EnvConfig`]: process environment (`HOST`, `PORT`, `ENV`, `LOG_LEVEL`, secrets).
//! - [`Config`]: per-environment YAML file at `$APP_HOME/config/<ENV>.yaml`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PlacechatError, Result};

/// Env var names for the Naver credentials, shared by the server and the tool server.
pub const NAVER_CLIENT_ID_ENV: &str = "X-NAVER-CLIENT-ID";
pub const NAVER_CLIENT_SECRET_ENV: &str = "X-NAVER-CLIENT-SECRET";
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Local,
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = PlacechatError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "dev" => Ok(Self::Dev),
            "prod" => Ok(Self::Prod),
            other => Err(PlacechatError::Config(format!(
                "ENV must be one of local, dev, prod (got '{other}')"
            ))),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Local => "local",
            Self::Dev => "dev",
            Self::Prod => "prod",
        };
        f.write_str(s)
    }
}

/// Values read from the process environment at startup.
#[derive(Clone)]
pub struct EnvConfig {
    pub host: String,
    pub port: u16,
    pub env: Environment,
    pub log_level: String,
    pub log_format: Option<String>,
    pub app_home: PathBuf,
    pub openai_api_key: Option<String>,
    pub naver_client_id: Option<String>,
    pub naver_client_secret: Option<String>,
}

impl fmt::Debug for EnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("app_home", &self.app_home)
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("naver_client_id", &self.naver_client_id.as_ref().map(|_| "***"))
            .field("naver_client_secret", &self.naver_client_secret.as_ref().map(|_| "***"))
            .finish()
    }
}

impl EnvConfig {
    /// Read the process environment. Missing required variables are fatal.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key).ok_or_else(|| PlacechatError::Config(format!("{key} is not set")))
        };
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let host = required("HOST")?;
        let port = required("PORT")?;
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|e| PlacechatError::Config(format!("PORT is not a valid port ({port}): {e}")))?;
        let env: Environment = required("ENV")?.parse()?;
        let log_level = required("LOG_LEVEL")?;

        let app_home = optional("APP_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            host,
            port,
            env,
            log_level,
            log_format: optional("LOG_FORMAT"),
            app_home,
            openai_api_key: optional(OPENAI_API_KEY_ENV),
            naver_client_id: optional(NAVER_CLIENT_ID_ENV),
            naver_client_secret: optional(NAVER_CLIENT_SECRET_ENV),
        })
    }

    /// `$APP_HOME/config/<ENV>.yaml`
    pub fn config_path(&self) -> PathBuf {
        self.app_home.join("config").join(format!("{}.yaml", self.env))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-environment application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm: Option<LlmConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_server: Option<ToolServerConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Chat model settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL (default: `https://api.openai.com`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    /// Instructions appended to the base system prompt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tool_iterations: Option<u32>,

    /// Upper bound on a whole chat turn, including tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_timeout_secs: Option<u64>,

    /// Transcript entries kept as history for the model, trimmed at turn boundaries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_history_entries: Option<usize>,
}

/// How to launch the tool server child process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolServerConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Add `is_partial` to text frames so clients can tell chunks from final messages.
    #[serde(default)]
    pub include_partial_flag: bool,
}

/// In-memory session retention.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_ttl_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sessions: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Per-crate log level overrides (e.g. "placechat_gateway=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    // The pattern is a literal and always compiles.
    let Ok(re) = regex::Regex::new(r"\$\{([^}]+)\}") else {
        return input.to_string();
    };
    re.replace_all(input, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}

pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_APP_NAME: &str = "naver-local-search-app";
pub const DEFAULT_USER_ID: &str = "user_0101";
pub const DEFAULT_TOOL_SERVER_COMMAND: &str = "naver-local-search";

impl Config {
    /// Load config from a YAML file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        let substituted = substitute_env_vars(raw);
        if substituted.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Config = serde_yaml::from_str(&substituted)
            .map_err(|e| PlacechatError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn model(&self) -> String {
        self.llm
            .as_ref()
            .and_then(|l| l.model.clone())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn llm_base_url(&self) -> Option<&str> {
        self.llm.as_ref().and_then(|l| l.base_url.as_deref())
    }

    pub fn max_tokens(&self) -> u32 {
        self.llm.as_ref().and_then(|l| l.max_tokens).unwrap_or(1024)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.llm.as_ref().and_then(|l| l.temperature)
    }

    pub fn agent_prompt(&self) -> Option<&str> {
        self.llm
            .as_ref()
            .and_then(|l| l.prompt.as_deref())
            .filter(|p| !p.trim().is_empty())
    }

    pub fn app_name(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.app_name.clone())
            .unwrap_or_else(|| DEFAULT_APP_NAME.to_string())
    }

    pub fn user_id(&self) -> String {
        self.agent
            .as_ref()
            .and_then(|a| a.user_id.clone())
            .unwrap_or_else(|| DEFAULT_USER_ID.to_string())
    }

    pub fn max_tool_iterations(&self) -> u32 {
        self.agent
            .as_ref()
            .and_then(|a| a.max_tool_iterations)
            .unwrap_or(8)
    }

    pub fn turn_timeout_secs(&self) -> u64 {
        self.agent
            .as_ref()
            .and_then(|a| a.turn_timeout_secs)
            .unwrap_or(120)
    }

    pub fn max_history_entries(&self) -> usize {
        self.agent
            .as_ref()
            .and_then(|a| a.max_history_entries)
            .unwrap_or(50)
    }

    pub fn session_idle_ttl_secs(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.idle_ttl_secs)
            .unwrap_or(3600)
    }

    pub fn max_sessions(&self) -> usize {
        self.session
            .as_ref()
            .and_then(|s| s.max_sessions)
            .unwrap_or(10_000)
    }

    pub fn tool_server_command(&self) -> Option<&str> {
        self.tool_server.as_ref().and_then(|t| t.command.as_deref())
    }

    pub fn tool_server_args(&self) -> Vec<String> {
        self.tool_server
            .as_ref()
            .map(|t| t.args.clone())
            .unwrap_or_default()
    }

    pub fn tool_request_timeout_secs(&self) -> u64 {
        self.tool_server
            .as_ref()
            .and_then(|t| t.request_timeout_secs)
            .unwrap_or(30)
    }

    pub fn include_partial_flag(&self) -> bool {
        self.stream.as_ref().is_some_and(|s| s.include_partial_flag)
    }

    pub fn log_format(&self) -> &str {
        self.logging
            .as_ref()
            .map(|l| l.format.as_str())
            .unwrap_or("plain")
    }

    pub fn log_filters(&self) -> &[String] {
        self.logging
            .as_ref()
            .map(|l| l.filters.as_slice())
            .unwrap_or(&[])
    }

    /// Validate config against the environment, returning (warnings, errors).
    pub fn validate(&self, env: &EnvConfig) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if env.openai_api_key.is_none() {
            warnings.push(format!("{OPENAI_API_KEY_ENV} is not set; chat completions will fail"));
        }
        if env.naver_client_id.is_none() || env.naver_client_secret.is_none() {
            warnings.push(format!(
                "{NAVER_CLIENT_ID_ENV} / {NAVER_CLIENT_SECRET_ENV} are not set; place search will return errors"
            ));
        }
        if self.max_tool_iterations() == 0 {
            errors.push("agent.max_tool_iterations must be at least 1".to_string());
        }
        if self.turn_timeout_secs() == 0 {
            errors.push("agent.turn_timeout_secs must be at least 1".to_string());
        }
        if self.session_idle_ttl_secs() == 0 {
            errors.push("session.idle_ttl_secs must be at least 1".to_string());
        }
        if self.max_sessions() == 0 {
            errors.push("session.max_sessions must be at least 1".to_string());
        }
        if self.tool_request_timeout_secs() == 0 {
            errors.push("tool_server.request_timeout_secs must be at least 1".to_string());
        }
        if let Some(t) = self.temperature() {
            if !(0.0..=2.0).contains(&t) {
                errors.push(format!("llm.temperature must be within 0.0..=2.0 (got {t})"));
            }
        }
        if !matches!(self.log_format(), "plain" | "json") {
            errors.push(format!(
                "logging.format must be 'plain' or 'json' (got '{}')",
                self.log_format()
            ));
        }

        (warnings, errors)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn base_env() -> Vec<(&'static str, &'static str)> {
        vec![
            ("HOST", "127.0.0.1"),
            ("PORT", "8000"),
            ("ENV", "local"),
            ("LOG_LEVEL", "INFO"),
            ("APP_HOME", "/srv/placechat"),
        ]
    }

    #[test]
    fn test_env_config_reads_required_vars() {
        let env = EnvConfig::from_lookup(lookup(&base_env())).unwrap();
        assert_eq!(env.bind_addr(), "127.0.0.1:8000");
        assert_eq!(env.env, Environment::Local);
        assert_eq!(env.config_path(), PathBuf::from("/srv/placechat/config/local.yaml"));
        assert!(env.openai_api_key.is_none());
    }

    #[test]
    fn test_env_config_missing_log_level_is_fatal() {
        let vars: Vec<_> = base_env()
            .into_iter()
            .filter(|(k, _)| *k != "LOG_LEVEL")
            .collect();
        let err = EnvConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("LOG_LEVEL is not set"), "got: {err}");
    }

    #[test]
    fn test_env_config_rejects_bad_port_and_env() {
        let mut vars = base_env();
        vars[1] = ("PORT", "eighty");
        assert!(EnvConfig::from_lookup(lookup(&vars)).is_err());

        let mut vars = base_env();
        vars[2] = ("ENV", "staging");
        let err = EnvConfig::from_lookup(lookup(&vars)).unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[test]
    fn test_env_config_debug_redacts_secrets() {
        let mut vars = base_env();
        vars.push(("OPENAI_API_KEY", "sk-secret"));
        vars.push(("X-NAVER-CLIENT-ID", "naver-id"));
        let env = EnvConfig::from_lookup(lookup(&vars)).unwrap();
        let debug = format!("{env:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("naver-id"));
        assert_eq!(env.naver_client_id.as_deref(), Some("naver-id"));
    }

    #[test]
    fn test_yaml_config_and_defaults() {
        let yaml = r#"
llm:
  model: gpt-4o-mini
  temperature: 0.2
  prompt: |
    Answer in Korean.
agent:
  turn_timeout_secs: 30
stream:
  include_partial_flag: true
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.model(), "gpt-4o-mini");
        assert_eq!(config.temperature(), Some(0.2));
        assert_eq!(config.agent_prompt().map(str::trim), Some("Answer in Korean."));
        assert_eq!(config.turn_timeout_secs(), 30);
        assert_eq!(config.max_tool_iterations(), 8);
        assert_eq!(config.app_name(), DEFAULT_APP_NAME);
        assert_eq!(config.user_id(), DEFAULT_USER_ID);
        assert!(config.include_partial_flag());
        assert!(config.tool_server_command().is_none());
        assert_eq!(config.max_history_entries(), 50);
        assert_eq!(config.session_idle_ttl_secs(), 3600);
        assert_eq!(config.max_sessions(), 10_000);
    }

    #[test]
    fn test_session_retention_settings() {
        let config = Config::from_yaml(
            "agent:\n  max_history_entries: 0\nsession:\n  idle_ttl_secs: 600\n  max_sessions: 0\n",
        )
        .unwrap();
        assert_eq!(config.max_history_entries(), 0);
        assert_eq!(config.session_idle_ttl_secs(), 600);

        let env = EnvConfig::from_lookup(lookup(&base_env())).unwrap();
        let (_, errors) = config.validate(&env);
        assert_eq!(errors, vec!["session.max_sessions must be at least 1".to_string()]);
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, the variable name is unique to this test
        unsafe { std::env::set_var("PLACECHAT_TEST_MODEL", "gpt-test") };
        let config = Config::from_yaml("llm:\n  model: ${PLACECHAT_TEST_MODEL}\n").unwrap();
        assert_eq!(config.model(), "gpt-test");
        unsafe { std::env::remove_var("PLACECHAT_TEST_MODEL") };
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("config/local.yaml")).unwrap();
        assert_eq!(config.model(), DEFAULT_MODEL);
        assert_eq!(config.log_format(), "plain");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dev.yaml");
        std::fs::write(&path, "tool_server:\n  command: /opt/bin/search\n  args: [\"--quiet\"]\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tool_server_command(), Some("/opt/bin/search"));
        assert_eq!(config.tool_server_args(), vec!["--quiet".to_string()]);
    }

    #[test]
    fn test_validate() {
        let env = EnvConfig::from_lookup(lookup(&base_env())).unwrap();
        let config = Config::from_yaml(
            "llm:\n  temperature: 3.5\nagent:\n  turn_timeout_secs: 0\nlogging:\n  format: xml\n",
        )
        .unwrap();
        let (warnings, errors) = config.validate(&env);
        assert!(warnings.iter().any(|w| w.contains("OPENAI_API_KEY")));
        assert_eq!(errors.len(), 3, "got: {errors:?}");
    }
}
