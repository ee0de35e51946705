//! Configuration for Switchyard
//!
//! A single TOML file holds the provider table, the routing policy, external
//! tool servers, tool policy and context settings. Every section has
//! defaults, so an empty file is a valid configuration.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::provider::{ApiStyle, Capability, ProviderKind, TaskType};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Provider table, keyed by provider id
    #[serde(default = "default_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Task type → ordered fallback chain of provider ids
    #[serde(default = "default_routing")]
    pub routing: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub mcp_servers: Vec<ExternalServerConfig>,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

fn default_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert("claude".to_string(), ProviderConfig::remote("anthropic"));
    providers.insert("openai".to_string(), ProviderConfig::remote("openai"));
    providers.insert("gemini".to_string(), ProviderConfig::remote("gemini"));
    providers
}

fn default_routing() -> BTreeMap<String, Vec<String>> {
    let chain = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    let mut routing = BTreeMap::new();
    routing.insert(TaskType::SPECIFICATION.to_string(), chain(&["claude", "openai", "gemini"]));
    routing.insert(TaskType::PLANNING.to_string(), chain(&["claude", "openai", "gemini"]));
    routing.insert(TaskType::TASKS.to_string(), chain(&["claude", "openai", "gemini"]));
    routing.insert(TaskType::CODE_GENERATION.to_string(), chain(&["openai", "claude", "gemini"]));
    routing.insert(TaskType::TASK_EXECUTION.to_string(), chain(&["gemini", "openai", "claude"]));
    routing.insert(TaskType::REFACTORING.to_string(), chain(&["claude", "openai", "gemini"]));
    routing.insert(TaskType::REVIEW.to_string(), chain(&["claude", "gemini", "openai"]));
    routing
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            routing: default_routing(),
            mcp_servers: Vec::new(),
            tools: ToolsConfig::default(),
            context: ContextConfig::default(),
            router: RouterConfig::default(),
        }
    }
}

impl Config {
    /// Default config path: `<config dir>/switchyard/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Configuration("Could not find config directory".to_string()))?;

        Ok(config_dir.join("switchyard").join("config.toml"))
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from the default path
    pub fn load_default() -> Result<Self> {
        Self::load(&Self::default_path()?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.get(id)
    }

    /// Ids of providers that are switched on
    pub fn enabled_providers(&self) -> impl Iterator<Item = (&String, &ProviderConfig)> {
        self.providers.iter().filter(|(_, p)| p.enabled)
    }
}

/// One entry of the provider table
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Catalog backend (`anthropic`, `ollama`, `claude-cli`, ...); defaults
    /// per kind when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    /// Overrides the catalog default model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Wire dialect for `kind = "local"`
    #[serde(default)]
    pub api_style: ApiStyle,
    /// Executable for `kind = "session"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_context_tokens: Option<usize>,
    /// Accepted task types; empty means any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_types: Vec<TaskType>,
    /// Overrides the catalog capabilities
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Vec<Capability>>,
}

fn default_true() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            backend: None,
            enabled: true,
            api_key: None,
            api_key_env: None,
            model: None,
            base_url: None,
            api_style: ApiStyle::default(),
            command: None,
            args: Vec::new(),
            max_context_tokens: None,
            task_types: Vec::new(),
            capabilities: None,
        }
    }

    pub fn remote(backend: &str) -> Self {
        Self {
            backend: Some(backend.to_string()),
            ..Self::new(ProviderKind::Remote)
        }
    }

    pub fn local(base_url: &str, api_style: ApiStyle) -> Self {
        Self {
            base_url: Some(base_url.to_string()),
            api_style,
            ..Self::new(ProviderKind::Local)
        }
    }

    pub fn session(command: &str, args: &[&str]) -> Self {
        Self {
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Self::new(ProviderKind::Session)
        }
    }

    /// Catalog backend, falling back to the kind's usual one
    pub fn backend_id(&self) -> &str {
        if let Some(backend) = &self.backend {
            return backend;
        }
        match (self.kind, self.api_style) {
            (ProviderKind::Remote, _) => "anthropic",
            (ProviderKind::Local, ApiStyle::Ollama) => "ollama",
            (ProviderKind::Local, ApiStyle::OpenAI) => "openai-compatible",
            (ProviderKind::Session, _) => match self.command.as_deref() {
                Some("gemini") => "gemini-cli",
                Some("codex") => "codex-cli",
                _ => "claude-cli",
            },
        }
    }

    /// Resolved API key: the literal key, then the named variable
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key
            && !key.trim().is_empty()
        {
            return Some(key.clone());
        }
        let env_name = self.api_key_env.as_deref()?;
        std::env::var(env_name).ok().filter(|k| !k.trim().is_empty())
    }
}

// Keys stay out of debug output and therefore out of logs
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("kind", &self.kind)
            .field("backend", &self.backend)
            .field("enabled", &self.enabled)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_key_env", &self.api_key_env)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_style", &self.api_style)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("max_context_tokens", &self.max_context_tokens)
            .field("task_types", &self.task_types)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// How an external tool server is reached
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerTransport {
    #[default]
    Stdio,
    Http,
    Sse,
}

/// External tool (MCP) server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalServerConfig {
    pub name: String,
    #[serde(default)]
    pub transport: ServerTransport,
    /// Executable for stdio servers
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Endpoint for http/sse servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Register tools as `mcp__<server>__<tool>`
    #[serde(default)]
    pub namespace_tools: bool,
    /// Bound on connect + handshake + discovery
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_handshake_timeout() -> u64 {
    30
}

impl ExternalServerConfig {
    pub fn stdio(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            transport: ServerTransport::Stdio,
            command: command.into(),
            args,
            url: None,
            env: HashMap::new(),
            headers: HashMap::new(),
            enabled: true,
            namespace_tools: false,
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }

    pub fn remote(name: impl Into<String>, transport: ServerTransport, url: impl Into<String>) -> Self {
        Self {
            transport,
            url: Some(url.into()),
            ..Self::stdio(name, String::new(), Vec::new())
        }
    }

    pub fn handshake_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.handshake_timeout_secs)
    }
}

/// Tool execution policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Glob patterns; when non-empty only matching tools may run
    pub allow: Vec<String>,
    /// Glob patterns checked before `allow`
    pub deny: Vec<String>,
    pub default_timeout_secs: u64,
    /// Root that relative file paths resolve against; defaults to the cwd
    pub workspace: Option<PathBuf>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow: Vec::new(),
            deny: Vec::new(),
            default_timeout_secs: 60,
            workspace: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_tokens: usize,
    /// Where context snapshots are saved; defaults under the data dir
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100_000,
            snapshot_dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Per-candidate bound on one `generate` call
    pub provider_timeout_secs: u64,
    /// How long a health check result is trusted
    pub health_ttl_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            provider_timeout_secs: 300,
            health_ttl_secs: 300,
            temperature: 0.7,
            max_tokens: 4096,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.providers.contains_key("claude"));
        assert!(config.providers.contains_key("openai"));
        assert!(config.providers.contains_key("gemini"));

        for task in TaskType::well_known() {
            let chain = &config.routing[task];
            assert!(!chain.is_empty());
            assert!(chain.iter().all(|id| config.providers.contains_key(id)));
        }
        assert_eq!(config.routing["code_generation"][0], "openai");
        assert_eq!(config.routing["task_execution"][0], "gemini");
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.providers.len(), 3);
        assert_eq!(config.context.max_tokens, 100_000);
        assert_eq!(config.tools.default_timeout_secs, 60);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml_str(
            r#"
            [providers.local]
            kind = "local"
            base_url = "http://localhost:11434"
            api_style = "ollama"
            task_types = ["code_generation"]

            [providers.cli]
            kind = "session"
            command = "claude"
            args = ["-p", "--model", "{model}"]
            enabled = false

            [routing]
            code_generation = ["local", "cli"]

            [[mcp_servers]]
            name = "files"
            command = "npx"
            args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]

            [[mcp_servers]]
            name = "remote"
            transport = "http"
            url = "http://localhost:8080/mcp"
            namespace_tools = true

            [tools]
            deny = ["shell_*"]

            [router]
            provider_timeout_secs = 30
            "#,
        )
        .unwrap();

        let local = config.provider("local").unwrap();
        assert_eq!(local.api_style, ApiStyle::Ollama);
        assert_eq!(local.backend_id(), "ollama");
        assert_eq!(local.task_types, vec![TaskType::from("code_generation")]);

        let cli = config.provider("cli").unwrap();
        assert!(!cli.enabled);
        assert_eq!(cli.backend_id(), "claude-cli");

        assert_eq!(config.enabled_providers().count(), 1);
        assert_eq!(config.mcp_servers[0].transport, ServerTransport::Stdio);
        assert_eq!(config.mcp_servers[1].transport, ServerTransport::Http);
        assert!(config.mcp_servers[1].namespace_tools);
        assert_eq!(config.tools.deny, vec!["shell_*"]);
        assert_eq!(config.router.provider_timeout_secs, 30);
        assert_eq!(config.router.health_ttl_secs, 300);
    }

    #[test]
    fn test_invalid_toml_is_configuration_error() {
        let err = Config::from_toml_str("providers = 3").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_api_key_resolution_and_redaction() {
        let mut provider = ProviderConfig::remote("openai");
        provider.api_key = Some("sk-secret".into());
        assert_eq!(provider.resolve_api_key().as_deref(), Some("sk-secret"));
        assert!(!format!("{:?}", provider).contains("sk-secret"));

        provider.api_key = None;
        provider.api_key_env = Some("SWITCHYARD_TEST_SURELY_UNSET_KEY".into());
        assert!(provider.resolve_api_key().is_none());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.context.max_tokens = 1234;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.context.max_tokens, 1234);
        assert_eq!(loaded.routing, config.routing);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.providers.len(), 3);
    }
}
