//! Switchyard MCP - Model Context Protocol client
//!
//! This crate speaks the client side of MCP: JSON-RPC framing, the
//! transports external tool servers are reachable over (stdio, streamable
//! HTTP, legacy SSE) and a request/response client used for handshake,
//! tool discovery and tool calls.

pub mod client;
pub mod protocol;
pub mod transport;

use serde::{Deserialize, Serialize};

pub use client::{ClientInfo, ContentItem, McpClient, McpError, ServerInfo, ToolCallResult};
pub use transport::{HttpTransport, SseTransport, StdioTransport, Transport};

/// MCP protocol version
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Tool definition in MCP format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "inputSchema", default = "empty_object_schema")]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

/// Server capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolsCapability {
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}
