//! MCP Client implementation

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::protocol::{
    is_response, methods, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
use crate::transport::Transport;
use crate::{McpTool, ServerCapabilities, PROTOCOL_VERSION};

/// Default per-request timeout
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on `tools/list` pages, guards against a server that loops its cursor
const MAX_LIST_PAGES: usize = 64;

/// MCP Client for connecting to MCP servers
pub struct McpClient {
    transport: Mutex<Box<dyn Transport>>,
    request_id: AtomicI64,
    request_timeout: Duration,
    server_capabilities: Option<ServerCapabilities>,
}

impl McpClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport: Mutex::new(transport),
            request_id: AtomicI64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            server_capabilities: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn server_capabilities(&self) -> Option<&ServerCapabilities> {
        self.server_capabilities.as_ref()
    }

    fn next_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Initialize the connection
    pub async fn initialize(&mut self, client_info: ClientInfo) -> Result<ServerInfo, McpError> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": client_info.name,
                "version": client_info.version
            }
        });

        let request = JsonRpcRequest::new(self.next_id(), methods::INITIALIZE).with_params(params);
        let result = self.request(request).await?;

        let init: InitializeResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;

        self.server_capabilities = Some(init.capabilities.clone());

        self.notify(JsonRpcNotification::new(methods::INITIALIZED)).await?;

        debug!(
            server = %init.server_info.name,
            version = %init.server_info.version,
            protocol = %init.protocol_version,
            "MCP handshake complete"
        );

        Ok(ServerInfo {
            name: init.server_info.name,
            version: init.server_info.version,
            protocol_version: init.protocol_version,
        })
    }

    /// List available tools, following pagination cursors
    pub async fn list_tools(&self) -> Result<Vec<McpTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let mut request = JsonRpcRequest::new(self.next_id(), methods::TOOLS_LIST);
            if let Some(c) = &cursor {
                request = request.with_params(serde_json::json!({ "cursor": c }));
            }

            let result = self.request(request).await?;
            let page: ToolsListResult =
                serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(tools),
            }
        }

        Err(McpError::Protocol(format!(
            "tools/list did not terminate after {} pages",
            MAX_LIST_PAGES
        )))
    }

    /// Call a tool
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult, McpError> {
        let params = serde_json::json!({
            "name": name,
            "arguments": arguments
        });

        let request = JsonRpcRequest::new(self.next_id(), methods::TOOLS_CALL).with_params(params);
        let result = self.request(request).await?;

        serde_json::from_value(result).map_err(|e| McpError::Protocol(e.to_string()))
    }

    /// Liveness check
    pub async fn ping(&self) -> Result<(), McpError> {
        let request = JsonRpcRequest::new(self.next_id(), methods::PING);
        self.request(request).await.map(|_| ())
    }

    pub async fn close(&self) -> Result<(), McpError> {
        let mut transport = self.transport.lock().await;
        transport
            .close()
            .await
            .map_err(McpError::from_io)
    }

    async fn notify(&self, notification: JsonRpcNotification) -> Result<(), McpError> {
        let value =
            serde_json::to_value(&notification).map_err(|e| McpError::Protocol(e.to_string()))?;
        let mut transport = self.transport.lock().await;
        transport
            .send(value)
            .await
            .map_err(McpError::from_io)
    }

    /// Send a request and return its `result`, mapping JSON-RPC errors
    async fn request(&self, request: JsonRpcRequest) -> Result<Value, McpError> {
        let method = request.method.clone();
        let response = tokio::time::timeout(self.request_timeout, self.send_request(request))
            .await
            .map_err(|_| McpError::Timeout {
                method,
                after: self.request_timeout,
            })??;

        if let Some(error) = response.error {
            return Err(McpError::Server {
                code: error.code,
                message: error.message,
            });
        }

        // A missing result is an empty object (e.g. `ping`)
        Ok(response.result.unwrap_or_else(|| serde_json::json!({})))
    }

    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, McpError> {
        let mut transport = self.transport.lock().await;

        let request_value =
            serde_json::to_value(&request).map_err(|e| McpError::Protocol(e.to_string()))?;

        transport
            .send(request_value)
            .await
            .map_err(McpError::from_io)?;

        loop {
            let message = transport
                .receive()
                .await
                .map_err(McpError::from_io)?
                .ok_or(McpError::Closed)?;

            if !is_response(&message) {
                trace!(message = %message, "Ignoring server-initiated message");
                continue;
            }

            let response: JsonRpcResponse =
                serde_json::from_value(message).map_err(|e| McpError::Protocol(e.to_string()))?;

            // Responses to requests that timed out earlier arrive late; drop them
            if response.id.as_ref() != Some(&request.id) {
                debug!(expected = %request.id, got = ?response.id, "Discarding stale response");
                continue;
            }

            return Ok(response);
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self {
            name: "switchyard".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub protocol_version: String,
}

#[derive(Debug, serde::Deserialize)]
struct InitializeResult {
    #[serde(rename = "protocolVersion")]
    protocol_version: String,
    #[serde(default)]
    capabilities: ServerCapabilities,
    #[serde(rename = "serverInfo")]
    server_info: ServerInfoInner,
}

#[derive(Debug, serde::Deserialize)]
struct ServerInfoInner {
    name: String,
    #[serde(default)]
    version: String,
}

#[derive(Debug, serde::Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<McpTool>,
    #[serde(rename = "nextCursor")]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
    #[serde(rename = "structuredContent", default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl ToolCallResult {
    /// Concatenated text parts
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// MCP errors
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Server error {code}: {message}")]
    Server { code: i64, message: String },
    #[error("Request '{method}' timed out after {after:?}")]
    Timeout { method: String, after: Duration },
    #[error("Connection closed")]
    Closed,
}

impl McpError {
    /// Unparseable or missing replies are protocol faults; any other io
    /// failure means the link itself broke
    pub fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::InvalidData => McpError::Protocol(e.to_string()),
            _ => McpError::Transport(e.to_string()),
        }
    }

    /// Whether the underlying connection should be considered gone
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, McpError::Transport(_) | McpError::Closed)
    }
}
