//! External tool client
//!
//! Manages connections to external tool (MCP) servers: handshake, tool
//! discovery, registration of the discovered tools as one group, and
//! teardown. A server's tools are owned by its connection and leave the
//! registry together when it is disconnected or found dead.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use switchyard_mcp::{ClientInfo, HttpTransport, McpClient, SseTransport, StdioTransport, Transport};
use tracing::{debug, info, warn};

use crate::config::{ExternalServerConfig, ServerTransport};
use crate::error::{Error, Result};
use crate::tools::{GroupRegistration, McpToolWrapper, Tool, ToolRegistry, ToolSource};

/// Connection state of a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum ServerStatus {
    Connected,
    /// Link lost or closed; its tools are no longer registered
    Dropped(String),
}

/// One live connection, shared by the manager and the tool wrappers
pub struct ServerLink {
    name: String,
    source: ToolSource,
    transport: ServerTransport,
    client: McpClient,
    registry: Weak<ToolRegistry>,
    dropped: Mutex<Option<String>>,
}

impl ServerLink {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &McpClient {
        &self.client
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped.lock().is_some()
    }

    pub fn status(&self) -> ServerStatus {
        match self.dropped.lock().as_ref() {
            None => ServerStatus::Connected,
            Some(reason) => ServerStatus::Dropped(reason.clone()),
        }
    }

    /// Mark the link dead and unregister its tools. Only the first call acts.
    pub fn mark_dropped(&self, reason: &str) -> bool {
        {
            let mut dropped = self.dropped.lock();
            if dropped.is_some() {
                return false;
            }
            *dropped = Some(reason.to_string());
        }

        let removed = self
            .registry
            .upgrade()
            .map(|registry| registry.unregister_source(&self.source))
            .unwrap_or_default();
        warn!(
            server = %self.name,
            reason = %reason,
            removed_tools = removed.len(),
            "External server link dropped"
        );
        true
    }
}

/// Status listing entry
#[derive(Debug, Clone, Serialize)]
pub struct ExternalServerInfo {
    pub name: String,
    pub transport: ServerTransport,
    pub status: ServerStatus,
    pub tool_count: usize,
}

pub struct ExternalToolClient {
    registry: Arc<ToolRegistry>,
    links: RwLock<HashMap<String, Arc<ServerLink>>>,
    client_info: ClientInfo,
}

impl ExternalToolClient {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            links: RwLock::new(HashMap::new()),
            client_info: ClientInfo::default(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Connect to a server and register its tools.
    ///
    /// Transport setup, handshake and discovery share the server's
    /// handshake timeout.
    pub async fn connect(&self, config: &ExternalServerConfig) -> Result<GroupRegistration> {
        self.check_connectable(config)?;

        let transport = tokio::time::timeout(config.handshake_timeout(), open_transport(config))
            .await
            .map_err(|_| handshake_timeout(config))??;

        self.connect_with_transport(config, transport).await
    }

    /// Connect over an already open transport
    pub async fn connect_with_transport(
        &self,
        config: &ExternalServerConfig,
        transport: Box<dyn Transport>,
    ) -> Result<GroupRegistration> {
        self.check_connectable(config)?;
        let name = config.name.clone();

        let handshake = async {
            let mut client = McpClient::new(transport);
            let server = client.initialize(self.client_info.clone()).await?;
            let tools = client.list_tools().await?;
            Ok::<_, switchyard_mcp::McpError>((client, server, tools))
        };

        let (client, server, tools) = tokio::time::timeout(config.handshake_timeout(), handshake)
            .await
            .map_err(|_| handshake_timeout(config))?
            .map_err(|e| Error::external(&name, format!("Handshake failed: {}", e)))?;

        let link = Arc::new(ServerLink {
            name: name.clone(),
            source: ToolSource::external(&name),
            transport: config.transport,
            client,
            registry: Arc::downgrade(&self.registry),
            dropped: Mutex::new(None),
        });

        let wrappers: Vec<Arc<dyn Tool>> = tools
            .into_iter()
            .map(|tool| Arc::new(McpToolWrapper::new(tool, link.clone(), config.namespace_tools)) as Arc<dyn Tool>)
            .collect();

        // Insert before registering so a concurrent connect of the same name loses
        {
            let mut links = self.links.write();
            if let Some(existing) = links.get(&name)
                && !existing.is_dropped()
            {
                return Err(Error::external(&name, "Already connected"));
            }
            links.insert(name.clone(), link.clone());
        }

        let registration = self.registry.register_group(&link.source, wrappers);
        info!(
            server = %name,
            server_name = %server.name,
            server_version = %server.version,
            tools = registration.registered.len(),
            rejected = registration.rejected.len(),
            "Connected to external server"
        );
        Ok(registration)
    }

    fn check_connectable(&self, config: &ExternalServerConfig) -> Result<()> {
        if !config.enabled {
            return Err(Error::external(&config.name, "Server is disabled"));
        }
        if let Some(existing) = self.links.read().get(&config.name)
            && !existing.is_dropped()
        {
            return Err(Error::external(&config.name, "Already connected"));
        }
        Ok(())
    }

    /// Connect every enabled server concurrently
    pub async fn connect_enabled(&self, configs: &[ExternalServerConfig]) -> Vec<(String, Result<GroupRegistration>)> {
        let attempts = configs.iter().filter(|c| c.enabled).map(|config| async move {
            let result = self.connect(config).await;
            if let Err(e) = &result {
                warn!(server = %config.name, error = %e, "Failed to connect external server");
            }
            (config.name.clone(), result)
        });
        join_all(attempts).await
    }

    /// Unregister the server's tools and close its connection
    pub async fn disconnect(&self, name: &str) -> Result<Vec<String>> {
        let link = self
            .links
            .write()
            .remove(name)
            .ok_or_else(|| Error::external(name, "Not connected"))?;

        let removed = self.registry.unregister_source(&link.source);
        {
            let mut dropped = link.dropped.lock();
            if dropped.is_none() {
                *dropped = Some("disconnected".to_string());
            }
        }

        if let Err(e) = link.client.close().await {
            debug!(server = %name, error = %e, "Error closing external server connection");
        }
        info!(server = %name, removed_tools = removed.len(), "Disconnected external server");
        Ok(removed)
    }

    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.links.read().keys().cloned().collect();
        for name in names {
            if let Err(e) = self.disconnect(&name).await {
                debug!(server = %name, error = %e, "Disconnect skipped");
            }
        }
    }

    /// Ping the server. A lost connection drops the link.
    pub async fn probe(&self, name: &str) -> Result<ServerStatus> {
        let link = self
            .links
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::external(name, "Not connected"))?;

        if link.is_dropped() {
            return Ok(link.status());
        }

        match link.client.ping().await {
            Ok(()) => Ok(ServerStatus::Connected),
            Err(e) if e.is_connection_lost() => {
                link.mark_dropped(&e.to_string());
                Ok(link.status())
            }
            Err(e) => Err(Error::external(name, format!("Ping failed: {}", e))),
        }
    }

    pub fn status(&self, name: &str) -> Option<ServerStatus> {
        self.links.read().get(name).map(|link| link.status())
    }

    /// Every known server, sorted by name
    pub fn servers(&self) -> Vec<ExternalServerInfo> {
        let links: Vec<Arc<ServerLink>> = self.links.read().values().cloned().collect();
        let mut servers: Vec<_> = links
            .iter()
            .map(|link| ExternalServerInfo {
                name: link.name.clone(),
                transport: link.transport,
                status: link.status(),
                tool_count: self.registry.names_for(&link.source).len(),
            })
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        servers
    }
}

fn handshake_timeout(config: &ExternalServerConfig) -> Error {
    Error::external(
        &config.name,
        format!("Handshake timed out after {:?}", config.handshake_timeout()),
    )
}

async fn open_transport(config: &ExternalServerConfig) -> Result<Box<dyn Transport>> {
    let name = &config.name;
    let url = || {
        config
            .url
            .clone()
            .ok_or_else(|| Error::external(name, format!("{:?} transport needs a url", config.transport)))
    };

    let transport: Box<dyn Transport> = match config.transport {
        ServerTransport::Stdio => {
            if config.command.is_empty() {
                return Err(Error::external(name, "Stdio transport needs a command"));
            }
            debug!(server = %name, command = %config.command, "Spawning external server");
            let transport = StdioTransport::spawn(&config.command, &config.args, &config.env)
                .await
                .map_err(|e| Error::external(name, format!("Failed to start '{}': {}", config.command, e)))?;
            Box::new(transport)
        }
        ServerTransport::Http => Box::new(HttpTransport::new(url()?, config.headers.clone())),
        ServerTransport::Sse => {
            let url = url()?;
            let transport = SseTransport::connect(&url, config.headers.clone())
                .await
                .map_err(|e| Error::external(name, format!("Failed to open event stream {}: {}", url, e)))?;
            Box::new(transport)
        }
    };
    Ok(transport)
}
