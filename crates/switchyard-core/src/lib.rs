//! Switchyard Core - task routing across AI providers
//!
//! This crate provides:
//! - Provider adapters (remote APIs, local endpoints, external CLI sessions)
//! - A task router with ordered fallback chains and a health cache
//! - A shared, token-bounded context window with snapshot persistence
//! - A tool registry and executor, including tools from external MCP servers

pub mod config;
pub mod context;
pub mod error;
pub mod mcp_manager;
pub mod orchestration;
pub mod provider;
pub mod router;
pub mod tools;

pub use config::{Config, ExternalServerConfig, ProviderConfig, ServerTransport};
pub use context::{ContextEntry, ContextMessage, ContextSnapshot, ContextStore, ContextWindow, Role, TokenCounter};
pub use error::{Error, FailureKind, ProviderError, ProviderFailure, Result, ToolError};
pub use mcp_manager::{ExternalServerInfo, ExternalToolClient, ServerStatus};
pub use orchestration::{Orchestrator, TurnOutcome};
pub use provider::{
    Capability, Generation, GenerationParams, HealthStatus, ProviderAdapter, ProviderDescriptor, ProviderKind,
    ProviderRegistry, TaskType,
};
pub use router::{RouteOutcome, RouteRequest, RoutingPolicy, TaskRouter};
pub use tools::{
    Tool, ToolDefinition, ToolDescriptor, ToolExecutor, ToolInvocation, ToolOutput, ToolPolicy, ToolRegistry,
    ToolResult, ToolSource,
};
