//! MCP Transport layer implementations
//!
//! Three transports are provided:
//! - [`StdioTransport`]: a child process speaking newline-delimited JSON
//! - [`HttpTransport`]: streamable HTTP, one POST per message, with the reply
//!   carried either as a JSON body or as a short `text/event-stream`
//! - [`SseTransport`]: the older split transport, a long-lived GET event
//!   stream for server messages plus POSTs to an announced endpoint

use std::collections::{HashMap, VecDeque};
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Header carrying the session assigned by a streamable HTTP server
const SESSION_HEADER: &str = "mcp-session-id";

/// Transport trait for MCP communication
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&mut self, message: Value) -> io::Result<()>;
    /// Next message from the server; `Ok(None)` means the connection closed
    async fn receive(&mut self) -> io::Result<Option<Value>>;
    async fn close(&mut self) -> io::Result<()>;
}

fn other_error(e: impl std::fmt::Display) -> io::Error {
    io::Error::other(e.to_string())
}

/// Stdio transport for subprocess communication
pub struct StdioTransport {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
    stderr_task: Option<JoinHandle<()>>,
}

impl StdioTransport {
    /// Spawn the server process. The child is killed when the transport is dropped.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
    ) -> io::Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| other_error("Failed to capture stdout"))?;
        let stdin = child.stdin.take();

        // Server diagnostics go to the log, not to our terminal
        let stderr_task = child.stderr.take().map(|stderr| {
            let command = command.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server_command = %command, "{}", line);
                }
            })
        });

        Ok(Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            stderr_task,
        })
    }

    /// Process id of the server, if it is still running
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "Stdin not available"))?;

        let json = serde_json::to_string(&message)?;
        trace!(message = %json, "stdio send");
        stdin.write_all(json.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;

        Ok(())
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;

            if n == 0 {
                return Ok(None);
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(trimmed) {
                Ok(value) => return Ok(Some(value)),
                // Some servers print banners on stdout before speaking JSON
                Err(_) => debug!(line = %trimmed, "Skipping non-JSON line from stdio server"),
            }
        }
    }

    async fn close(&mut self) -> io::Result<()> {
        // Closing stdin lets well-behaved servers exit on their own
        self.stdin.take();
        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        if self.child.try_wait()?.is_none() {
            self.child.kill().await?;
        }
        Ok(())
    }
}

/// Streamable HTTP transport
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
    session_id: Option<String>,
    pending: VecDeque<Value>,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::new(),
            headers,
            session_id: None,
            pending: VecDeque::new(),
        }
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(session) = &self.session_id {
            builder = builder.header(SESSION_HEADER, session.as_str());
        }
        builder
    }

    fn enqueue(&mut self, value: Value) {
        match value {
            Value::Array(batch) => self.pending.extend(batch),
            other => self.pending.push_back(other),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        let response = self
            .request(self.client.post(&self.url))
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(&message)
            .send()
            .await
            .map_err(other_error)?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.session_id = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            return Err(other_error(format!("HTTP {} from {}", status, self.url)));
        }

        // Notifications are acknowledged with 202 and no body
        if status == reqwest::StatusCode::ACCEPTED {
            return Ok(());
        }

        let is_event_stream = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        if is_event_stream {
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = event.map_err(other_error)?;
                if event.data.trim().is_empty() {
                    continue;
                }
                let value: Value = serde_json::from_str(&event.data)?;
                let done = crate::protocol::is_response(&value);
                self.enqueue(value);
                if done {
                    break;
                }
            }
        } else {
            let body = response.bytes().await.map_err(other_error)?;
            if !body.is_empty() {
                let value: Value = serde_json::from_slice(&body)?;
                self.enqueue(value);
            }
        }

        Ok(())
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        // Reported as bad data, not a broken link: the server is still reachable
        self.pending.pop_front().map(Some).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidData, "Server accepted the message but sent no response")
        })
    }

    async fn close(&mut self) -> io::Result<()> {
        if self.session_id.is_some() {
            // Best effort: servers may not support explicit session teardown
            if let Err(e) = self.request(self.client.delete(&self.url)).send().await {
                debug!(error = %e, url = %self.url, "Session teardown failed");
            }
        }
        self.pending.clear();
        Ok(())
    }
}

/// SSE transport for HTTP-based communication
pub struct SseTransport {
    endpoint: String,
    client: reqwest::Client,
    headers: HashMap<String, String>,
    incoming: mpsc::Receiver<Value>,
    reader: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its POST endpoint.
    pub async fn connect(url: &str, headers: HashMap<String, String>) -> io::Result<Self> {
        let client = reqwest::Client::new();
        let base = reqwest::Url::parse(url).map_err(other_error)?;

        let mut builder = client
            .get(base.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await.map_err(other_error)?;
        if !response.status().is_success() {
            return Err(other_error(format!("HTTP {} from {}", response.status(), url)));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel::<String>();
        let (tx, incoming) = mpsc::channel::<Value>(64);

        let reader = tokio::spawn(async move {
            let mut endpoint_tx = Some(endpoint_tx);
            let mut events = response.bytes_stream().eventsource();
            while let Some(event) = events.next().await {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "SSE stream error");
                        break;
                    }
                };

                if event.event == "endpoint" {
                    if let Some(sender) = endpoint_tx.take() {
                        let _ = sender.send(event.data.trim().to_string());
                    }
                    continue;
                }

                match serde_json::from_str::<Value>(&event.data) {
                    Ok(value) => {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!(error = %e, "Skipping malformed SSE payload"),
                }
            }
            // Dropping `tx` closes the channel; receivers observe `None`
        });

        let announced = endpoint_rx
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::UnexpectedEof, "SSE stream closed before endpoint event"))?;
        let endpoint = base.join(&announced).map_err(other_error)?.to_string();
        debug!(%endpoint, "SSE endpoint announced");

        Ok(Self {
            endpoint,
            client,
            headers,
            incoming,
            reader,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&mut self, message: Value) -> io::Result<()> {
        let mut builder = self.client.post(&self.endpoint).json(&message);
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await.map_err(other_error)?;
        if !response.status().is_success() {
            return Err(other_error(format!("HTTP {} from {}", response.status(), self.endpoint)));
        }
        Ok(())
    }

    async fn receive(&mut self) -> io::Result<Option<Value>> {
        Ok(self.incoming.recv().await)
    }

    async fn close(&mut self) -> io::Result<()> {
        self.reader.abort();
        self.incoming.close();
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stdio_roundtrip_with_cat() {
        let mut transport = StdioTransport::spawn("cat", &[], &HashMap::new())
            .await
            .unwrap();

        transport.send(serde_json::json!({"ping": 1})).await.unwrap();
        let echoed = transport.receive().await.unwrap();
        assert_eq!(echoed, Some(serde_json::json!({"ping": 1})));

        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stdio_skips_banner_lines() {
        let args = vec![
            "-c".to_string(),
            "echo 'server starting'; echo '{\"ok\":true}'".to_string(),
        ];
        let mut transport = StdioTransport::spawn("sh", &args, &HashMap::new())
            .await
            .unwrap();

        let value = transport.receive().await.unwrap();
        assert_eq!(value, Some(serde_json::json!({"ok": true})));
        assert_eq!(transport.receive().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_stdio_spawn_missing_binary() {
        let result =
            StdioTransport::spawn("definitely-not-a-real-binary-xyz", &[], &HashMap::new()).await;
        assert!(result.is_err());
    }
}
