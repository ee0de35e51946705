//! External tool wrapper
//!
//! Exposes one tool discovered on an external tool server as a `Tool`, so the
//! executor treats it like any builtin. Calls go through the server's shared
//! link; a call that finds the connection gone drops the whole link.

use std::sync::Arc;

use serde_json::{json, Value};
use switchyard_mcp::McpTool;

use crate::error::ToolError;
use crate::mcp_manager::ServerLink;
use crate::tools::{BoxFuture, Tool, ToolOutput};

/// Registered name for a server tool when namespacing is on: `mcp__{server}__{tool}`
pub fn namespaced_name(server: &str, tool: &str) -> String {
    format!("mcp__{}__{}", server.replace('-', "_"), tool.replace('-', "_"))
}

pub struct McpToolWrapper {
    tool: McpTool,
    link: Arc<ServerLink>,
    /// Name the tool is registered under
    exposed_name: String,
}

impl McpToolWrapper {
    pub fn new(tool: McpTool, link: Arc<ServerLink>, namespaced: bool) -> Self {
        let exposed_name = if namespaced {
            namespaced_name(link.name(), &tool.name)
        } else {
            tool.name.clone()
        };
        Self {
            tool,
            link,
            exposed_name,
        }
    }

    pub fn server_name(&self) -> &str {
        self.link.name()
    }

    /// Tool name on the server
    pub fn original_name(&self) -> &str {
        &self.tool.name
    }
}

impl Tool for McpToolWrapper {
    fn name(&self) -> &str {
        &self.exposed_name
    }

    fn description(&self) -> &str {
        &self.tool.description
    }

    fn parameters_schema(&self) -> Value {
        self.tool.input_schema.clone()
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            if self.link.is_dropped() {
                return Err(ToolError::ExecutionFailed(format!(
                    "External server '{}' is disconnected",
                    self.link.name()
                )));
            }

            let response = match self.link.client().call_tool(&self.tool.name, params).await {
                Ok(response) => response,
                Err(e) => {
                    if e.is_connection_lost() {
                        self.link.mark_dropped(&e.to_string());
                    }
                    return Err(ToolError::ExecutionFailed(format!(
                        "Tool '{}' on server '{}' failed: {}",
                        self.tool.name,
                        self.link.name(),
                        e
                    )));
                }
            };

            let text = response.text();
            let content = match (&response.structured_content, text.is_empty()) {
                (Some(structured), _) => structured.clone(),
                (None, false) => Value::String(text.clone()),
                (None, true) => json!(response.content),
            };

            let output = if response.is_error {
                let message = if text.is_empty() {
                    "External tool reported an error".to_string()
                } else {
                    text
                };
                ToolOutput::failure(content, message)
            } else {
                ToolOutput::success(content)
            };

            Ok(output
                .with_metadata("server", self.link.name())
                .with_metadata("tool", self.tool.name.as_str()))
        })
    }
}
