//! Tool system
//!
//! Tools are the side-effecting actions a provider response may ask for.
//! Each tool has:
//! - A unique name and a description for the model
//! - A JSON schema for its arguments
//! - An execute method
//!
//! Tools live in a [`ToolRegistry`] tagged with where they came from
//! ([`ToolSource`]); the [`ToolExecutor`] validates, authorises and runs them.

pub mod executor;
pub mod filesystem;
pub mod mcp;
pub mod policy;
pub mod process_utils;
pub mod registry;
pub mod schema;
pub mod shell;

pub use executor::{ExecutorMetrics, ToolExecutor, ToolMetrics};
pub use mcp::McpToolWrapper;
pub use policy::ToolPolicy;
pub use registry::{GroupRegistration, ToolRegistry, ToolSnapshot};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ToolError;

/// Boxed future type for object-safe async trait methods
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Output from a tool run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub content: Value,
    pub error: Option<String>,
    pub metadata: HashMap<String, Value>,
}

impl ToolOutput {
    pub fn success(content: impl Into<Value>) -> Self {
        Self {
            success: true,
            content: content.into(),
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Tool ran but reports failure (non-zero exit, remote `isError`)
    pub fn failure(content: impl Into<Value>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            content: content.into(),
            error: Some(message.into()),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Tool definition for model consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Where a registered tool came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ToolSource {
    Builtin,
    /// Discovered on the named external tool server
    ExternalServer(String),
}

impl ToolSource {
    pub fn external(server: impl Into<String>) -> Self {
        Self::ExternalServer(server.into())
    }
}

impl std::fmt::Display for ToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolSource::Builtin => f.write_str("builtin"),
            ToolSource::ExternalServer(name) => write!(f, "external-server:{}", name),
        }
    }
}

impl Serialize for ToolSource {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A registry entry as seen from outside
#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub source: ToolSource,
}

/// Core trait for all tools
pub trait Tool: Send + Sync {
    /// Tool name (used by the model to invoke it)
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for parameters
    fn parameters_schema(&self) -> Value;

    /// Run the tool. Arguments have already been validated against the schema.
    fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A request to run one tool
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub arguments: Value,
    /// Overrides the policy default
    pub timeout: Option<Duration>,
    /// Who asked: a provider id, `user`, or a caller label
    pub requester: String,
}

impl ToolInvocation {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            timeout: None,
            requester: crate::context::USER_PROVIDER_ID.to_string(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = requester.into();
        self
    }
}

/// Why an invocation did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolFailureKind {
    NotFound,
    Validation,
    PermissionDenied,
    Timeout,
    Cancelled,
    Execution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: ToolFailureKind,
    pub message: String,
}

/// Outcome of one invocation; failures are values, not errors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

impl ToolResult {
    pub fn failed(kind: ToolFailureKind, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(ToolFailure {
                kind,
                message: message.into(),
            }),
            duration,
        }
    }

    pub fn failure_kind(&self) -> Option<ToolFailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Text form used when the result is fed back to a model
    pub fn to_context_text(&self) -> String {
        match &self.error {
            None => match &self.data {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
            Some(failure) if self.data.is_null() => format!("Error: {}", failure.message),
            Some(failure) => format!("Error: {}\n{}", failure.message, self.data),
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// The builtin tool set, resolving relative paths against `workspace`
pub fn builtin_tools(workspace: &Path) -> Vec<Arc<dyn Tool>> {
    let workspace = workspace.to_path_buf();
    vec![
        Arc::new(filesystem::ReadFile::new(workspace.clone())),
        Arc::new(filesystem::WriteFile::new(workspace.clone())),
        Arc::new(filesystem::ListFiles::new(workspace.clone())),
        Arc::new(shell::ShellExecute::new(workspace)),
    ]
}

/// Helper macro for creating tool parameter schemas
#[macro_export]
macro_rules! tool_params {
    ($($field:ident : $type:expr => $desc:expr),* $(,)?) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $( stringify!($field): { "type": $type, "description": $desc } ),*
            },
            "required": [ $( stringify!($field) ),* ]
        })
    };
}
