//! Provider abstraction
//!
//! Every backend is reached through a [`ProviderAdapter`]. Three kinds exist:
//! - Remote APIs through the genai multi-provider client ([`RemoteApiProvider`])
//! - Local HTTP endpoints, OpenAI-compatible or Ollama-style ([`LocalEndpointProvider`])
//! - Authenticated CLI sessions such as `claude` or `gemini` ([`ExternalSessionProvider`])
//!
//! Adapters never touch the shared context window; the router hands them a
//! read-only view and appends their output itself.

pub mod catalog;
pub mod factory;
mod genai_provider;
mod local;
mod logging;
pub mod model_listing;
pub mod registry;
mod session;

pub use factory::ProviderFactory;
pub use genai_provider::RemoteApiProvider;
pub use local::{ApiStyle, LocalEndpointProvider};
pub use registry::{CachedHealth, ProviderRegistry};
pub use session::ExternalSessionProvider;

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::ContextMessage;
use crate::error::{Error, ProviderError, Result};
use crate::tools::ToolDefinition;

/// What a backend is good at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    CodeGeneration,
    CodeUnderstanding,
    LongContext,
    FastInference,
    Planning,
    Refactoring,
    FunctionCalling,
    Multimodal,
}

/// How a backend is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Remote,
    Local,
    Session,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ProviderKind::Remote => "remote",
            ProviderKind::Local => "local",
            ProviderKind::Session => "session",
        })
    }
}

/// Workflow task type used as the routing key
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub const SPECIFICATION: &'static str = "specification";
    pub const PLANNING: &'static str = "planning";
    pub const TASKS: &'static str = "tasks";
    pub const CODE_GENERATION: &'static str = "code_generation";
    pub const TASK_EXECUTION: &'static str = "task_execution";
    pub const REFACTORING: &'static str = "refactoring";
    pub const REVIEW: &'static str = "review";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn well_known() -> [&'static str; 7] {
        [
            Self::SPECIFICATION,
            Self::PLANNING,
            Self::TASKS,
            Self::CODE_GENERATION,
            Self::TASK_EXECUTION,
            Self::REFACTORING,
            Self::REVIEW,
        ]
    }
}

impl From<&str> for TaskType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskType {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Static description of a registered provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub kind: ProviderKind,
    pub capabilities: BTreeSet<Capability>,
    pub max_context_tokens: usize,
    /// Task types this provider accepts; empty means any
    pub task_types: BTreeSet<TaskType>,
    pub default_model: String,
}

impl ProviderDescriptor {
    pub fn new(
        id: impl Into<String>,
        kind: ProviderKind,
        default_model: impl Into<String>,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            capabilities: BTreeSet::new(),
            max_context_tokens,
            task_types: BTreeSet::new(),
            default_model: default_model.into(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        self.capabilities = capabilities.into_iter().collect();
        self
    }

    pub fn with_task_types<T: Into<TaskType>>(mut self, task_types: impl IntoIterator<Item = T>) -> Self {
        self.task_types = task_types.into_iter().map(Into::into).collect();
        self
    }

    pub fn supports(&self, task: &TaskType) -> bool {
        self.task_types.is_empty() || self.task_types.contains(task)
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Checked at registration
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("Provider id must not be empty".into()));
        }
        if self.max_context_tokens == 0 {
            return Err(Error::Validation(format!(
                "Provider '{}' has a zero context budget",
                self.id
            )));
        }
        if self.default_model.trim().is_empty() {
            return Err(Error::Validation(format!(
                "Provider '{}' has no default model",
                self.id
            )));
        }
        Ok(())
    }
}

/// Result of a reachability/authentication probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
}

impl HealthStatus {
    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::Unhealthy {
            reason: reason.into(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }
}

/// Sampling parameters for one call
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Overrides the descriptor's default model
    pub model: Option<String>,
    /// Tools the backend may ask to call
    pub tools: Vec<ToolDefinition>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 4096,
            model: None,
            tools: Vec::new(),
        }
    }
}

impl GenerationParams {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
}

/// Tool call requested by a backend response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Successful response from a provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: TokenUsage,
    pub provider_id: String,
    pub model: String,
    pub finish_reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
}

impl Generation {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Uniform invocation contract over one backend
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    fn id(&self) -> &str {
        &self.descriptor().id
    }

    /// Cheap reachability and credential check
    async fn validate(&self) -> HealthStatus;

    async fn generate(
        &self,
        prompt: &str,
        context: &[ContextMessage],
        params: &GenerationParams,
    ) -> std::result::Result<Generation, ProviderError>;

    /// Live model discovery, falling back to the static catalog
    async fn list_available_models(&self) -> Vec<String>;
}

/// Classify a free-form failure message from a backend or CLI.
///
/// An explicit HTTP status in the text wins; otherwise keywords decide, and
/// anything unrecognised counts as a transport failure.
pub fn classify_error_text(text: &str) -> ProviderError {
    if let Some(status) = find_status_code(text)
        && let Some(classified) = ProviderError::from_status(status, text)
    {
        return classified;
    }

    let lower = text.to_lowercase();
    let message = text.trim().to_string();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if has(&["not logged in", "authentication", "unauthorized", "invalid api key", "api key not", "permission denied"]) {
        ProviderError::Authentication(message)
    } else if has(&["rate limit", "too many requests", "quota"]) {
        ProviderError::RateLimited(message)
    } else if has(&["timed out", "timeout", "deadline"]) {
        ProviderError::Timeout(message)
    } else if has(&["overloaded", "unavailable", "bad gateway"]) {
        ProviderError::Unavailable(message)
    } else if has(&["invalid request", "model not found", "unknown model", "invalid_request"]) {
        ProviderError::MalformedRequest(message)
    } else {
        ProviderError::Transport(message)
    }
}

/// First three-digit number following the word "status" or "HTTP"
fn find_status_code(text: &str) -> Option<u16> {
    let lower = text.to_lowercase();
    for marker in ["status", "http"] {
        let mut search_from = 0;
        while let Some(pos) = lower[search_from..].find(marker) {
            let start = search_from + pos + marker.len();
            let window: String = lower[start..].chars().take(24).collect();
            let digits: String = window
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if digits.len() == 3
                && let Ok(code) = digits.parse::<u16>()
                && (100..600).contains(&code)
            {
                return Some(code);
            }
            search_from = start;
        }
    }
    None
}
