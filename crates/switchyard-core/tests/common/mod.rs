//! Shared test doubles: a scripted provider adapter

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::context::ContextMessage;
use switchyard_core::provider::{
    Generation, GenerationParams, HealthStatus, ProviderAdapter, ProviderDescriptor, ProviderKind,
    TaskType, TokenUsage, ToolCallRequest,
};
use switchyard_core::{ProviderError, ProviderRegistry};

/// Provider whose replies are queued up front. With an empty queue it
/// answers `reply from <id>`.
pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    health: HealthStatus,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    repeat_error: Option<ProviderError>,
    delay: Duration,
    tool_calls: Vec<ToolCallRequest>,
    calls: AtomicUsize,
    contexts: Mutex<Vec<Vec<ContextMessage>>>,
}

impl ScriptedProvider {
    pub fn new(id: &str) -> Self {
        Self {
            descriptor: ProviderDescriptor::new(id, ProviderKind::Remote, format!("{id}-model"), 100_000),
            health: HealthStatus::Healthy,
            script: Mutex::new(VecDeque::new()),
            repeat_error: None,
            delay: Duration::ZERO,
            tool_calls: Vec::new(),
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// Fails every call with `error`
    pub fn failing(id: &str, error: ProviderError) -> Self {
        Self {
            repeat_error: Some(error),
            ..Self::new(id)
        }
    }

    pub fn reply(self, text: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn unhealthy(mut self, reason: &str) -> Self {
        self.health = HealthStatus::unhealthy(reason);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_task_types(mut self, task_types: &[&str]) -> Self {
        self.descriptor = self.descriptor.with_task_types(task_types.iter().map(|t| TaskType::from(*t)));
        self
    }

    pub fn with_max_context(mut self, tokens: usize) -> Self {
        self.descriptor.max_context_tokens = tokens;
        self
    }

    pub fn with_tool_call(mut self, name: &str, arguments: serde_json::Value) -> Self {
        self.tool_calls.push(ToolCallRequest {
            call_id: format!("call_{}", self.tool_calls.len() + 1),
            name: name.to_string(),
            arguments,
        });
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Context handed to each `generate` call
    pub fn contexts(&self) -> Vec<Vec<ContextMessage>> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn validate(&self) -> HealthStatus {
        self.health.clone()
    }

    async fn generate(
        &self,
        _prompt: &str,
        context: &[ContextMessage],
        _params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().unwrap().push(context.to_vec());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(error) = &self.repeat_error {
            return Err(error.clone());
        }

        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(result) => result?,
            None => format!("reply from {}", self.descriptor.id),
        };

        Ok(Generation {
            text,
            usage: TokenUsage { input: 10, output: 5 },
            provider_id: self.descriptor.id.clone(),
            model: self.descriptor.default_model.clone(),
            finish_reason: "stop".to_string(),
            tool_calls: self.tool_calls.clone(),
        })
    }

    async fn list_available_models(&self) -> Vec<String> {
        vec![self.descriptor.default_model.clone()]
    }
}

/// Registry holding the given providers, returned alongside typed handles
pub fn registry_of(providers: Vec<Arc<ScriptedProvider>>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for provider in providers {
        registry.register(provider).expect("register provider");
    }
    Arc::new(registry)
}
