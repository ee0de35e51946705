//! Orchestrator
//!
//! Owns every long-lived component of a running system: the provider
//! registry, the task router, the tool registry and executor, and the
//! external tool client. Built once from [`Config`] and torn down with
//! [`Orchestrator::shutdown`].

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::context::{tool_provider_id, ContextStore, ContextWindow, Role};
use crate::error::{Error, Result};
use crate::mcp_manager::ExternalToolClient;
use crate::provider::{GenerationParams, HealthStatus, ProviderFactory, ProviderRegistry, TaskType};
use crate::router::{RouteOutcome, RouteRequest, RoutingPolicy, TaskRouter};
use crate::tools::{builtin_tools, ToolExecutor, ToolInvocation, ToolPolicy, ToolRegistry, ToolResult, ToolSource};

/// A routed generation plus the tool calls it asked for
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub route: RouteOutcome,
    /// One result per requested call, in request order
    pub tool_results: Vec<(String, ToolResult)>,
}

pub struct Orchestrator {
    config: Config,
    providers: Arc<ProviderRegistry>,
    router: TaskRouter,
    tools: Arc<ToolRegistry>,
    executor: ToolExecutor,
    external: ExternalToolClient,
}

impl Orchestrator {
    /// Build from config: providers, routing, builtin tools, and a connection
    /// attempt to every enabled external server. Server failures are logged
    /// and do not stop startup.
    pub async fn from_config(config: Config) -> Result<Self> {
        let providers = Arc::new(ProviderFactory::build_registry(&config)?);
        let policy = RoutingPolicy::from_config(&config)?;

        let workspace = match &config.tools.workspace {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let tools = Arc::new(ToolRegistry::new());
        let registration = tools.register_group(&ToolSource::Builtin, builtin_tools(&workspace));
        if !registration.rejected.is_empty() {
            warn!(rejected = ?registration.rejected, "Some builtin tools were not registered");
        }

        let tool_policy = ToolPolicy::from_config(&config.tools)?;
        let orchestrator = Self::assemble(config, providers, policy, tools, tool_policy)?;

        let outcomes = orchestrator
            .external
            .connect_enabled(&orchestrator.config.mcp_servers)
            .await;
        let connected = outcomes.iter().filter(|(_, r)| r.is_ok()).count();

        info!(
            providers = orchestrator.providers.len(),
            tools = orchestrator.tools.len(),
            external_servers = connected,
            workspace = %workspace.display(),
            "Orchestrator ready"
        );
        Ok(orchestrator)
    }

    /// Build from parts already constructed by the caller.
    ///
    /// Every routing chain entry must name a registered provider.
    pub fn assemble(
        config: Config,
        providers: Arc<ProviderRegistry>,
        policy: RoutingPolicy,
        tools: Arc<ToolRegistry>,
        tool_policy: ToolPolicy,
    ) -> Result<Self> {
        policy.check_registered(&providers)?;

        let router = TaskRouter::new(providers.clone(), policy)
            .with_provider_timeout(Duration::from_secs(config.router.provider_timeout_secs));
        let executor = ToolExecutor::new(tools.clone(), tool_policy);
        let external = ExternalToolClient::new(tools.clone());

        Ok(Self {
            config,
            providers,
            router,
            tools,
            executor,
            external,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    pub fn router(&self) -> &TaskRouter {
        &self.router
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn executor(&self) -> &ToolExecutor {
        &self.executor
    }

    pub fn external(&self) -> &ExternalToolClient {
        &self.external
    }

    /// A fresh context window sized from config
    pub fn new_window(&self) -> ContextWindow {
        ContextWindow::new(self.config.context.max_tokens)
    }

    pub fn context_store(&self) -> ContextStore {
        match &self.config.context.snapshot_dir {
            Some(dir) => ContextStore::new(dir.clone()),
            None => ContextStore::open_default(),
        }
    }

    /// Generation parameters from config, offering every registered tool
    /// the tool policy lets run
    pub fn default_params(&self) -> GenerationParams {
        let policy = self.executor.policy();
        GenerationParams {
            temperature: self.config.router.temperature,
            max_tokens: self.config.router.max_tokens,
            model: None,
            tools: self
                .tools
                .definitions()
                .into_iter()
                .filter(|t| policy.is_allowed(&t.name))
                .collect(),
        }
    }

    pub async fn route(
        &self,
        task: &TaskType,
        request: &RouteRequest,
        window: &ContextWindow,
        cancel: &CancellationToken,
    ) -> Result<RouteOutcome> {
        self.router.route(task, request, window, cancel).await
    }

    /// Route, then run each tool call the winner asked for and append the
    /// results to the window as tool entries.
    ///
    /// Calls run one at a time in request order. A result too large for the
    /// window is returned but not appended.
    pub async fn route_and_run_tools(
        &self,
        task: &TaskType,
        request: &RouteRequest,
        window: &ContextWindow,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let route = self.route(task, request, window, cancel).await?;
        let mut tool_results = Vec::with_capacity(route.generation.tool_calls.len());

        for call in &route.generation.tool_calls {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let invocation =
                ToolInvocation::new(&call.name, call.arguments.clone()).with_requester(route.provider_id());
            let result = self.executor.execute(invocation, cancel).await;

            if let Err(e) = window.append_text(tool_provider_id(&call.name), Role::Tool, result.to_context_text(), None) {
                warn!(tool = %call.name, error = %e, "Tool result not added to context");
            }
            tool_results.push((call.call_id.clone(), result));
        }

        Ok(TurnOutcome { route, tool_results })
    }

    pub async fn run_tool(&self, invocation: ToolInvocation, cancel: &CancellationToken) -> ToolResult {
        self.executor.execute(invocation, cancel).await
    }

    pub async fn probe_providers(&self) -> Vec<(String, HealthStatus)> {
        self.providers.probe_all().await
    }

    pub async fn list_models(&self, provider_id: &str) -> Result<Vec<String>> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| Error::Configuration(format!("Unknown provider '{}'", provider_id)))?;
        Ok(provider.list_available_models().await)
    }

    /// Disconnect external servers; builtin tools and providers need no teardown
    pub async fn shutdown(&self) {
        self.external.disconnect_all().await;
        info!("Orchestrator shut down");
    }
}
