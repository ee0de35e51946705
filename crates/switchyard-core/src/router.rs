//! Task router
//!
//! Maps a workflow task type to an ordered fallback chain of providers and
//! walks it one candidate at a time. Transient failures move on to the next
//! candidate, fatal ones stop the chain, and the first success is appended
//! to the shared context window together with the prompt that produced it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::{ContextEntry, ContextMessage, ContextWindow, Role, USER_PROVIDER_ID};
use crate::error::{Error, FailureKind, ProviderError, ProviderFailure, Result};
use crate::provider::{Generation, GenerationParams, HealthStatus, ProviderRegistry, TaskType};

/// Default per-candidate bound on one `generate` call
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(300);

/// Task type → ordered, non-empty chain of provider ids
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingPolicy {
    chains: BTreeMap<TaskType, Vec<String>>,
}

impl RoutingPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a chain. Empty chains are rejected.
    pub fn with_chain<I, S>(mut self, task: impl Into<TaskType>, providers: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let task = task.into();
        let chain: Vec<String> = providers.into_iter().map(Into::into).collect();
        if chain.is_empty() {
            return Err(Error::Configuration(format!(
                "Routing chain for '{}' is empty",
                task
            )));
        }
        self.chains.insert(task, chain);
        Ok(self)
    }

    /// Build from the `[routing]` table, checked against the provider table.
    ///
    /// Unknown ids are an error. Ids of disabled providers are dropped with a
    /// warning; a chain left empty by that is an error.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut chains = BTreeMap::new();

        for (task, ids) in &config.routing {
            if ids.is_empty() {
                return Err(Error::Configuration(format!(
                    "Routing chain for '{}' is empty",
                    task
                )));
            }

            let mut chain = Vec::with_capacity(ids.len());
            for id in ids {
                match config.provider(id) {
                    None => {
                        return Err(Error::Configuration(format!(
                            "Routing chain for '{}' names unknown provider '{}'",
                            task, id
                        )));
                    }
                    Some(provider) if !provider.enabled => {
                        warn!(task = %task, provider = %id, "Dropping disabled provider from routing chain");
                    }
                    Some(_) => chain.push(id.clone()),
                }
            }

            if chain.is_empty() {
                return Err(Error::Configuration(format!(
                    "Every provider in the routing chain for '{}' is disabled",
                    task
                )));
            }
            chains.insert(TaskType::from(task.as_str()), chain);
        }

        Ok(Self { chains })
    }

    pub fn chain(&self, task: &TaskType) -> Option<&[String]> {
        self.chains.get(task).map(Vec::as_slice)
    }

    pub fn task_types(&self) -> impl Iterator<Item = &TaskType> {
        self.chains.keys()
    }

    /// Every chain entry must name a registered provider
    pub fn check_registered(&self, registry: &ProviderRegistry) -> Result<()> {
        for (task, chain) in &self.chains {
            if let Some(missing) = chain.iter().find(|id| !registry.contains(id)) {
                return Err(Error::Configuration(format!(
                    "Routing chain for '{}' names unregistered provider '{}'",
                    task, missing
                )));
            }
        }
        Ok(())
    }
}

/// What the caller wants generated
#[derive(Debug, Clone)]
pub struct RouteRequest {
    pub prompt: String,
    pub params: GenerationParams,
}

impl RouteRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// A successful route and the failures absorbed on the way
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub generation: Generation,
    /// Candidates that were skipped or failed before the winner, in order
    pub attempts: Vec<ProviderFailure>,
}

impl RouteOutcome {
    pub fn provider_id(&self) -> &str {
        &self.generation.provider_id
    }
}

pub struct TaskRouter {
    registry: Arc<ProviderRegistry>,
    policy: RoutingPolicy,
    provider_timeout: Duration,
}

impl TaskRouter {
    pub fn new(registry: Arc<ProviderRegistry>, policy: RoutingPolicy) -> Self {
        Self {
            registry,
            policy,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
        }
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Route one request through the chain for `task`.
    ///
    /// Candidates are tried strictly in order. On success the prompt and the
    /// response are appended to `window`; a failed route appends nothing. A
    /// response too large for the window is returned but only its prompt is
    /// recorded.
    pub async fn route(
        &self,
        task: &TaskType,
        request: &RouteRequest,
        window: &ContextWindow,
        cancel: &CancellationToken,
    ) -> Result<RouteOutcome> {
        let chain = self.policy.chain(task).ok_or_else(|| {
            Error::Configuration(format!("No routing chain for task type '{}'", task))
        })?;

        let prompt_entry = window.entry_for(USER_PROVIDER_ID, Role::User, request.prompt.as_str(), None);
        if prompt_entry.token_count > window.max_tokens() {
            return Err(Error::Validation(format!(
                "Prompt of {} tokens exceeds the context budget of {} tokens",
                prompt_entry.token_count,
                window.max_tokens()
            )));
        }

        let mut attempts = Vec::new();

        for id in chain {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let Some(provider) = self.registry.get(id) else {
                let failure = ProviderFailure::skipped(id, FailureKind::Unavailable, "Provider is not registered");
                log_absorbed(task, &failure);
                attempts.push(failure);
                continue;
            };
            let descriptor = provider.descriptor();

            if !descriptor.supports(task) {
                let failure = ProviderFailure::skipped(
                    id,
                    FailureKind::UnsupportedTask,
                    format!("Does not accept task type '{}'", task),
                );
                log_absorbed(task, &failure);
                attempts.push(failure);
                continue;
            }

            let health = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                health = self.registry.check_health(id) => health?,
            };
            if let HealthStatus::Unhealthy { reason } = health {
                let failure = ProviderFailure::skipped(id, FailureKind::Unhealthy, reason);
                log_absorbed(task, &failure);
                attempts.push(failure);
                continue;
            }

            // Leave room for the prompt itself
            let budget = descriptor
                .max_context_tokens
                .saturating_sub(prompt_entry.token_count);
            let context = ContextMessage::from_entries(&window.view(budget));

            debug!(task = %task, provider = %id, context_messages = context.len(), "Invoking provider");
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(task = %task, provider = %id, "Route cancelled during provider call");
                    return Err(Error::Cancelled);
                }
                result = tokio::time::timeout(
                    self.provider_timeout,
                    provider.generate(&request.prompt, &context, &request.params),
                ) => result.unwrap_or_else(|_| {
                    Err(ProviderError::Timeout(format!(
                        "No response within {:?}",
                        self.provider_timeout
                    )))
                }),
            };
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(generation) => {
                    let response_entry = window.entry_for(
                        id.as_str(),
                        Role::Assistant,
                        generation.text.as_str(),
                        Some(generation.model.as_str()),
                    );
                    record_exchange(window, task, prompt_entry, response_entry);

                    info!(
                        task = %task,
                        provider = %id,
                        model = %generation.model,
                        elapsed_ms,
                        skipped = attempts.len(),
                        "Route succeeded"
                    );
                    return Ok(RouteOutcome { generation, attempts });
                }
                Err(error) if error.is_fatal() => {
                    warn!(
                        task = %task,
                        provider = %id,
                        kind = %error.kind(),
                        elapsed_ms,
                        error = %error,
                        "Fatal provider error, stopping chain"
                    );
                    return Err(Error::Provider {
                        provider: id.clone(),
                        source: error,
                    });
                }
                Err(error) => {
                    let failure = ProviderFailure::new(id, &error);
                    log_absorbed(task, &failure);
                    attempts.push(failure);
                }
            }
        }

        Err(Error::ChainExhausted {
            task: task.to_string(),
            failures: attempts,
        })
    }
}

/// Append a successful exchange. The generation is already paid for, so a
/// response that cannot fit never fails the route.
fn record_exchange(window: &ContextWindow, task: &TaskType, prompt: ContextEntry, response: ContextEntry) {
    let response_tokens = response.token_count;
    let provider_id = response.provider_id.clone();
    if let Err(e) = window.append_all(vec![prompt.clone(), response]) {
        warn!(
            task = %task,
            provider = %provider_id,
            response_tokens,
            max_tokens = window.max_tokens(),
            error = %e,
            "Response does not fit the context window, recording the prompt only"
        );
        if let Err(e) = window.append(prompt) {
            warn!(task = %task, error = %e, "Prompt not added to context");
        }
    }
}

fn log_absorbed(task: &TaskType, failure: &ProviderFailure) {
    warn!(
        task = %task,
        provider = %failure.provider_id,
        kind = %failure.kind,
        reason = %failure.reason,
        "Provider candidate failed, trying next"
    );
}
