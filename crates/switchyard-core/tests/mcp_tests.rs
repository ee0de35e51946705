//! External tool client tests
//!
//! Servers are either a scripted in-memory transport or, on unix, a small
//! `sh` script speaking line-delimited JSON-RPC over stdio.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use switchyard_core::tools::{builtin_tools, ToolFailureKind};
use switchyard_core::{
    ExternalServerConfig, ExternalToolClient, ServerStatus, ToolExecutor, ToolInvocation, ToolPolicy, ToolRegistry,
    ToolSource,
};
use switchyard_mcp::Transport;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// In-memory server advertising a fixed tool list. Once `broken` is set,
/// every send fails as if the pipe had closed.
struct ScriptedServer {
    tools: Vec<&'static str>,
    queue: VecDeque<Value>,
    broken: Arc<AtomicBool>,
}

impl ScriptedServer {
    fn new(tools: &[&'static str]) -> (Self, Arc<AtomicBool>) {
        let broken = Arc::new(AtomicBool::new(false));
        (
            Self {
                tools: tools.to_vec(),
                queue: VecDeque::new(),
                broken: broken.clone(),
            },
            broken,
        )
    }

    fn respond(&self, request: &Value) -> Option<Value> {
        let result = match request["method"].as_str()? {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "scripted", "version": "1.0.0" }
            }),
            "tools/list" => json!({
                "tools": self.tools.iter().map(|name| json!({
                    "name": name,
                    "description": format!("{name} tool"),
                    "inputSchema": {
                        "type": "object",
                        "properties": { "query": { "type": "string" } }
                    }
                })).collect::<Vec<_>>()
            }),
            "tools/call" => {
                let name = request["params"]["name"].as_str().unwrap_or_default();
                let query = request["params"]["arguments"]["query"].as_str().unwrap_or_default();
                json!({
                    "content": [{ "type": "text", "text": format!("{name}: {query}") }],
                    "isError": query == "bad"
                })
            }
            "ping" => json!({}),
            _ => return None,
        };
        Some(json!({ "jsonrpc": "2.0", "id": request["id"].clone(), "result": result }))
    }
}

#[async_trait]
impl Transport for ScriptedServer {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "server went away"));
        }
        if let Some(reply) = self.respond(&message) {
            self.queue.push_back(reply);
        }
        Ok(())
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        Ok(self.queue.pop_front())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn registry_with_builtins(dir: &TempDir) -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    registry.register_group(&ToolSource::Builtin, builtin_tools(dir.path()));
    registry
}

fn server_config(name: &str) -> ExternalServerConfig {
    ExternalServerConfig::stdio(name, "unused", Vec::new())
}

const DOCS_TOOLS: [&str; 4] = ["search", "fetch", "summarize", "index"];

mod registration_tests {
    use super::*;

    #[tokio::test]
    async fn test_disconnect_removes_exactly_the_server_tools() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with_builtins(&dir);
        let client = ExternalToolClient::new(registry.clone());

        let (server, _) = ScriptedServer::new(&DOCS_TOOLS);
        let registration = client
            .connect_with_transport(&server_config("docs"), Box::new(server))
            .await
            .unwrap();
        assert_eq!(registration.registered.len(), 4);
        assert!(registration.rejected.is_empty());
        assert_eq!(registry.len(), 8);
        assert_eq!(registry.get("search").unwrap().source, ToolSource::external("docs"));

        let servers = client.servers();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].tool_count, 4);
        assert_eq!(servers[0].status, ServerStatus::Connected);

        let removed = client.disconnect("docs").await.unwrap();
        assert_eq!(removed, ["fetch", "index", "search", "summarize"]);
        assert_eq!(registry.len(), 4);
        assert!(registry.contains("file_read"));
        assert!(client.servers().is_empty());
    }

    #[tokio::test]
    async fn test_name_conflict_with_builtin_is_rejected() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with_builtins(&dir);
        let client = ExternalToolClient::new(registry.clone());

        let (server, _) = ScriptedServer::new(&["file_read", "lookup"]);
        let registration = client
            .connect_with_transport(&server_config("clash"), Box::new(server))
            .await
            .unwrap();

        assert_eq!(registration.registered, ["lookup"]);
        assert_eq!(registration.rejected, ["file_read"]);
        assert_eq!(registry.get("file_read").unwrap().source, ToolSource::Builtin);

        // Disconnecting the server leaves the builtin alone
        client.disconnect("clash").await.unwrap();
        assert!(registry.contains("file_read"));
        assert!(!registry.contains("lookup"));
    }

    #[tokio::test]
    async fn test_namespaced_tools() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with_builtins(&dir);
        let client = ExternalToolClient::new(registry.clone());

        let mut config = server_config("docs-server");
        config.namespace_tools = true;
        let (server, _) = ScriptedServer::new(&["file_read"]);
        let registration = client.connect_with_transport(&config, Box::new(server)).await.unwrap();

        assert_eq!(registration.registered, ["mcp__docs_server__file_read"]);
        assert!(registration.rejected.is_empty());
    }

    #[tokio::test]
    async fn test_second_connect_with_same_name_fails() {
        let dir = TempDir::new().unwrap();
        let client = ExternalToolClient::new(registry_with_builtins(&dir));

        let (first, _) = ScriptedServer::new(&["one"]);
        client
            .connect_with_transport(&server_config("docs"), Box::new(first))
            .await
            .unwrap();

        let (second, _) = ScriptedServer::new(&["two"]);
        let err = client
            .connect_with_transport(&server_config("docs"), Box::new(second))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Already connected"), "{err}");
        assert!(!client.registry().contains("two"));
    }
}

mod call_tests {
    use super::*;

    #[tokio::test]
    async fn test_call_through_executor() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with_builtins(&dir);
        let client = ExternalToolClient::new(registry.clone());
        let (server, _) = ScriptedServer::new(&DOCS_TOOLS);
        client
            .connect_with_transport(&server_config("docs"), Box::new(server))
            .await
            .unwrap();

        let executor = ToolExecutor::new(registry, ToolPolicy::default());
        let cancel = CancellationToken::new();

        let ok = executor
            .execute(ToolInvocation::new("search", json!({"query": "routing"})), &cancel)
            .await;
        assert!(ok.success);
        assert_eq!(ok.data, json!("search: routing"));

        let reported = executor
            .execute(ToolInvocation::new("search", json!({"query": "bad"})), &cancel)
            .await;
        assert_eq!(reported.failure_kind(), Some(ToolFailureKind::Execution));
        assert_eq!(reported.data, json!("search: bad"));

        let invalid = executor
            .execute(ToolInvocation::new("search", json!({"query": 7})), &cancel)
            .await;
        assert_eq!(invalid.failure_kind(), Some(ToolFailureKind::Validation));
    }

    #[tokio::test]
    async fn test_transport_failure_drops_server_tools() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with_builtins(&dir);
        let client = ExternalToolClient::new(registry.clone());
        let (server, broken) = ScriptedServer::new(&DOCS_TOOLS);
        client
            .connect_with_transport(&server_config("docs"), Box::new(server))
            .await
            .unwrap();

        let executor = ToolExecutor::new(registry.clone(), ToolPolicy::default());
        broken.store(true, Ordering::SeqCst);

        let result = executor
            .execute(ToolInvocation::new("fetch", json!({})), &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert_eq!(result.failure_kind(), Some(ToolFailureKind::Execution));

        assert_eq!(registry.len(), 4);
        assert!(registry.names_for(&ToolSource::external("docs")).is_empty());
        assert!(matches!(client.status("docs"), Some(ServerStatus::Dropped(_))));

        let after = executor
            .execute(ToolInvocation::new("fetch", json!({})), &CancellationToken::new())
            .await;
        assert_eq!(after.failure_kind(), Some(ToolFailureKind::NotFound));

        // A dropped server may be connected again
        let (replacement, _) = ScriptedServer::new(&DOCS_TOOLS);
        client
            .connect_with_transport(&server_config("docs"), Box::new(replacement))
            .await
            .unwrap();
        assert_eq!(registry.len(), 8);
    }

    #[tokio::test]
    async fn test_probe_detects_lost_connection() {
        let dir = TempDir::new().unwrap();
        let client = ExternalToolClient::new(registry_with_builtins(&dir));
        let (server, broken) = ScriptedServer::new(&["one"]);
        client
            .connect_with_transport(&server_config("docs"), Box::new(server))
            .await
            .unwrap();

        assert_eq!(client.probe("docs").await.unwrap(), ServerStatus::Connected);
        broken.store(true, Ordering::SeqCst);
        assert!(matches!(client.probe("docs").await.unwrap(), ServerStatus::Dropped(_)));
        assert!(!client.registry().contains("one"));
    }
}

#[cfg(unix)]
mod stdio_tests {
    use super::*;

    /// Answers initialize, tools/list, tools/call and ping; ignores notifications
    const SERVER_SCRIPT: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/.*"id":\([0-9]*\).*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"sh-server","version":"0.1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"greet","description":"Say hello","inputSchema":{"type":"object"}},{"name":"shout","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"hello from sh"}],"isError":false}}\n' "$id" ;;
    *'"method":"ping"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Method not found"}}\n' "$id" ;;
  esac
done
"#;

    fn sh_server(name: &str) -> ExternalServerConfig {
        let mut config = ExternalServerConfig::stdio(name, "sh", vec!["-c".to_string(), SERVER_SCRIPT.to_string()]);
        config.handshake_timeout_secs = 10;
        config
    }

    #[tokio::test]
    async fn test_stdio_server_lifecycle() {
        let dir = TempDir::new().unwrap();
        let registry = registry_with_builtins(&dir);
        let client = ExternalToolClient::new(registry.clone());

        let registration = client.connect(&sh_server("greeter")).await.unwrap();
        assert_eq!(registration.registered, ["greet", "shout"]);

        let executor = ToolExecutor::new(registry.clone(), ToolPolicy::default());
        let result = executor
            .execute(ToolInvocation::new("greet", json!({})), &CancellationToken::new())
            .await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.data, json!("hello from sh"));

        assert_eq!(client.probe("greeter").await.unwrap(), ServerStatus::Connected);

        let removed = client.disconnect("greeter").await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(registry.len(), 4);
    }

    #[tokio::test]
    async fn test_server_that_never_answers_times_out() {
        let dir = TempDir::new().unwrap();
        let client = ExternalToolClient::new(registry_with_builtins(&dir));

        let mut config = ExternalServerConfig::stdio("mute", "sh", vec!["-c".to_string(), "sleep 30".to_string()]);
        config.handshake_timeout_secs = 1;

        let err = client.connect(&config).await.unwrap_err();
        assert!(err.to_string().contains("timed out"), "{err}");
        assert!(client.servers().is_empty());
        assert_eq!(client.registry().len(), 4);
    }

    #[tokio::test]
    async fn test_missing_executable() {
        let dir = TempDir::new().unwrap();
        let client = ExternalToolClient::new(registry_with_builtins(&dir));

        let config = ExternalServerConfig::stdio("ghost", "/nonexistent/switchyard-server", Vec::new());
        let err = client.connect(&config).await.unwrap_err();
        assert!(err.to_string().contains("Failed to start"), "{err}");
    }
}
