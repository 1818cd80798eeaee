//! # Configuration
//!
//! A single optional TOML file plus environment variables. Raw structs
//! mirror the file exactly; the final [`AppConfig`] carries resolved
//! values with shell expansion applied.
//!
//! ```toml
//! [llm]
//! provider = "gemini"
//! model = "gemini-2.5-pro"
//! max_iterations = 20
//!
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 200
//!
//! [sessions]
//! dir = "~/.config/kubepilot/sessions"
//!
//! [tools]
//! custom_config = "~/.config/kubepilot/tools.yaml"
//!
//! [[mcp_servers]]
//! name = "sequential-thinking"
//! command = "npx"
//! args = ["-y", "@modelcontextprotocol/server-sequential-thinking"]
//!
//! [[mcp_servers]]
//! name = "inventory"
//! url = "https://tools.example.com/mcp"
//! timeout_secs = 20
//! auth = { type = "bearer", token = "${INVENTORY_TOKEN}" }
//! ```

mod error;

pub use error::ConfigError;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::llm::RetryConfig;

const DEFAULT_CONFIG_DIR: &str = "~/.config/kubepilot";

static ENV_LOADER: Once = Once::new();

/// Loads `.env` once per process, before any credential lookup.
pub fn ensure_env_loaded() {
    ENV_LOADER.call_once(|| {
        let _ = dotenvy::dotenv();
    });
}

fn expand(value: &str) -> String {
    shellexpand::full(value)
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| value.to_string())
}

/// Authentication for an HTTP MCP server. OAuth2 access tokens are
/// supplied through the bearer variant.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum McpAuthConfig {
    Bearer { token: String },
    Basic { username: String, password: String },
    ApiKey { header: String, key: String },
}

/// One MCP server: a subprocess (`command`) or a streamable HTTP
/// endpoint (`url`).
#[derive(Debug, Clone, PartialEq)]
pub struct McpServerConfig {
    pub name: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub workdir: Option<PathBuf>,
    pub url: Option<String>,
    pub auth: Option<McpAuthConfig>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawMcpServer {
    name: String,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    workdir: Option<String>,
    url: Option<String>,
    auth: Option<McpAuthConfig>,
    timeout_secs: Option<u64>,
}

impl RawMcpServer {
    fn into_config(self) -> Result<McpServerConfig, ConfigError> {
        if self.command.is_some() == self.url.is_some() {
            return Err(ConfigError::AmbiguousServer { server: self.name });
        }
        let auth = self.auth.map(|auth| match auth {
            McpAuthConfig::Bearer { token } => McpAuthConfig::Bearer { token: expand(&token) },
            McpAuthConfig::Basic { username, password } => McpAuthConfig::Basic {
                username: expand(&username),
                password: expand(&password),
            },
            McpAuthConfig::ApiKey { header, key } => McpAuthConfig::ApiKey {
                header,
                key: expand(&key),
            },
        });
        Ok(McpServerConfig {
            name: self.name,
            command: self.command.as_deref().map(expand),
            args: self.args.iter().map(|a| expand(a)).collect(),
            env: self.env,
            workdir: self.workdir.map(|d| PathBuf::from(expand(&d))),
            url: self.url,
            auth,
            timeout_secs: self.timeout_secs,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawLlm {
    provider: Option<String>,
    model: Option<String>,
    max_iterations: Option<u32>,
    #[serde(default)]
    enable_tool_use_shim: bool,
    system_prompt: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawRetry {
    max_attempts: Option<u32>,
    initial_backoff_ms: Option<u64>,
    max_backoff_ms: Option<u64>,
    backoff_factor: Option<f64>,
    jitter: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawSessions {
    dir: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawTools {
    custom_config: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawAppConfig {
    #[serde(default)]
    llm: RawLlm,
    #[serde(default)]
    retry: RawRetry,
    #[serde(default)]
    sessions: RawSessions,
    #[serde(default)]
    tools: RawTools,
    #[serde(default)]
    mcp_servers: Vec<RawMcpServer>,
}

/// Resolved application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
    pub enable_tool_use_shim: bool,
    pub system_prompt: Option<String>,
    pub retry: RetryConfig,
    pub sessions_dir: PathBuf,
    pub custom_tools_config: Option<PathBuf>,
    pub mcp_servers: Vec<McpServerConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            max_iterations: None,
            enable_tool_use_shim: false,
            system_prompt: None,
            retry: RetryConfig::default(),
            sessions_dir: PathBuf::from(expand(&format!("{DEFAULT_CONFIG_DIR}/sessions"))),
            custom_tools_config: None,
            mcp_servers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration. A missing file at the default path yields the
    /// defaults; a missing file at an explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        ensure_env_loaded();
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (
                PathBuf::from(expand(&format!("{DEFAULT_CONFIG_DIR}/config.toml"))),
                false,
            ),
        };
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                if explicit {
                    return Err(ConfigError::NotFound { path });
                }
                debug!(path = %path.display(), "no config file; using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(ConfigError::Io { path, source: err }),
        };
        let raw: RawAppConfig =
            toml::from_str(&content).map_err(|source| ConfigError::Parse { path, source })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawAppConfig) -> Result<Self, ConfigError> {
        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_attempts: raw.retry.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff: raw
                .retry
                .initial_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.initial_backoff),
            max_backoff: raw
                .retry
                .max_backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_backoff),
            backoff_factor: raw.retry.backoff_factor.unwrap_or(defaults.backoff_factor),
            jitter: raw.retry.jitter.unwrap_or(defaults.jitter),
        };

        let mut servers = Vec::new();
        for raw_server in raw.mcp_servers {
            servers.push(raw_server.into_config()?);
        }

        let base = Self::default();
        Ok(Self {
            provider: raw.llm.provider,
            model: raw.llm.model,
            max_iterations: raw.llm.max_iterations,
            enable_tool_use_shim: raw.llm.enable_tool_use_shim,
            system_prompt: raw.llm.system_prompt,
            retry,
            sessions_dir: raw
                .sessions
                .dir
                .map(|d| PathBuf::from(expand(&d)))
                .unwrap_or(base.sessions_dir),
            custom_tools_config: raw.tools.custom_config.map(|p| PathBuf::from(expand(&p))),
            mcp_servers: servers,
        })
    }
}

/// Kubeconfig resolution priority: flag, then `KUBECONFIG`, then
/// `~/.kube/config`.
pub fn resolve_kubeconfig(flag: Option<&str>) -> Result<String, ConfigError> {
    if let Some(path) = flag.filter(|p| !p.trim().is_empty()) {
        return Ok(expand(path));
    }
    if let Ok(path) = std::env::var("KUBECONFIG") {
        if !path.trim().is_empty() {
            return Ok(path);
        }
    }
    let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
    Ok(home.join(".kube").join("config").to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_config_file() {
        let raw: RawAppConfig = toml::from_str(
            r#"
[llm]
provider = "bedrock://bedrock.us-west-2.amazonaws.com"
model = "us.amazon.nova-pro-v1:0"
max_iterations = 10
enable_tool_use_shim = true

[retry]
max_attempts = 3
initial_backoff_ms = 50

[[mcp_servers]]
name = "thinking"
command = "npx"
args = ["-y", "server-thinking"]

[[mcp_servers]]
name = "inventory"
url = "https://tools.example.com/mcp"
timeout_secs = 20
auth = { type = "bearer", token = "tok" }
"#,
        )
        .expect("parses");
        let config = AppConfig::from_raw(raw).expect("builds");

        assert_eq!(
            config.provider.as_deref(),
            Some("bedrock://bedrock.us-west-2.amazonaws.com")
        );
        assert_eq!(config.max_iterations, Some(10));
        assert!(config.enable_tool_use_shim);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(50));
        // Unspecified retry knobs fall back to the defaults.
        assert_eq!(config.retry.max_backoff, Duration::from_secs(10));
        assert_eq!(config.mcp_servers.len(), 2);
        assert_eq!(config.mcp_servers[0].command.as_deref(), Some("npx"));
        assert_eq!(
            config.mcp_servers[1].auth,
            Some(McpAuthConfig::Bearer { token: "tok".into() })
        );
    }

    #[test]
    fn server_with_both_command_and_url_is_rejected() {
        let raw: RawAppConfig = toml::from_str(
            r#"
[[mcp_servers]]
name = "broken"
command = "npx"
url = "https://example.com"
"#,
        )
        .expect("parses");
        assert!(matches!(
            AppConfig::from_raw(raw),
            Err(ConfigError::AmbiguousServer { .. })
        ));
    }

    #[test]
    fn kubeconfig_flag_takes_priority() {
        std::env::set_var("KUBECONFIG", "/from/env");
        assert_eq!(resolve_kubeconfig(Some("/from/flag")).unwrap(), "/from/flag");
        assert_eq!(resolve_kubeconfig(None).unwrap(), "/from/env");
        std::env::remove_var("KUBECONFIG");
        let fallback = resolve_kubeconfig(None).unwrap();
        assert!(fallback.contains(".kube"));
    }
}
