//! Remote API adapter built on the genai multi-provider client
//!
//! One adapter wraps one backend (`anthropic`, `openai`, `gemini`, ...). The
//! genai client picks the wire protocol from the model name; credentials come
//! from the configured key or, when none is given, from the backend's
//! environment variable.
//!
//! Gateway backends such as `openrouter` speak the OpenAI protocol at their
//! own endpoint; a service target resolver points every request there.
//!
//! Responses are consumed through the streaming API so long generations are
//! not cut off by intermediate proxies.

use futures::StreamExt;
use genai::adapter::AdapterKind;
use genai::chat::{ChatMessage, ChatOptions, ChatRequest, ChatStreamEvent, Tool};
use genai::resolver::{AuthData, AuthResolver, Endpoint, ServiceTargetResolver};
use genai::{Client, ModelIden, ServiceTarget, WebConfig};
use std::time::Duration;
use tracing::debug;

use super::logging::{log_interaction, LogRecord};
use super::model_listing::discover_or_fallback;
use super::{
    catalog, classify_error_text, Generation, GenerationParams, HealthStatus, ProviderAdapter,
    ProviderDescriptor, TokenUsage, ToolCallRequest,
};
use crate::context::{ContextMessage, Role};
use crate::error::ProviderError;

/// A provider implementation using genai
pub struct RemoteApiProvider {
    client: Client,
    descriptor: ProviderDescriptor,
    /// Catalog/genai backend name
    backend: String,
    has_configured_key: bool,
}

impl RemoteApiProvider {
    /// Transport-level ceiling; the router applies its own, shorter, per-call timeout
    const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

    fn default_web_config() -> WebConfig {
        WebConfig::default()
            .with_timeout(Self::DEFAULT_TIMEOUT)
            .with_connect_timeout(Duration::from_secs(30))
    }

    /// Create an adapter. Without `api_key` genai reads the backend's
    /// standard environment variable.
    pub fn new(
        descriptor: ProviderDescriptor,
        backend: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        let backend = backend.into();
        let has_configured_key = api_key.is_some();
        let mut builder = Client::builder().with_web_config(Self::default_web_config());

        if let Some(api_key) = api_key {
            let auth_resolver = AuthResolver::from_resolver_fn(
                move |_model_iden| -> std::result::Result<Option<AuthData>, genai::resolver::Error> {
                    Ok(Some(AuthData::from_single(api_key.clone())))
                },
            );
            builder = builder.with_auth_resolver(auth_resolver);
        }

        if let Some(endpoint) = Self::gateway_endpoint(&backend) {
            let key_env = catalog::api_key_env(&backend);
            let resolver = ServiceTargetResolver::from_resolver_fn(
                move |target: ServiceTarget| -> std::result::Result<ServiceTarget, genai::resolver::Error> {
                    let ServiceTarget { auth, model, .. } = target;
                    // A configured key already arrived through the auth resolver
                    let auth = match key_env {
                        Some(var) if !has_configured_key => AuthData::from_env(var),
                        _ => auth,
                    };
                    Ok(ServiceTarget {
                        endpoint: Endpoint::from_static(endpoint),
                        auth,
                        model: ModelIden::new(AdapterKind::OpenAI, model.model_name),
                    })
                },
            );
            builder = builder.with_service_target_resolver(resolver);
        }

        Self {
            client: builder.build(),
            descriptor,
            backend,
            has_configured_key,
        }
    }

    /// Endpoint of an OpenAI-protocol gateway backend
    fn gateway_endpoint(backend: &str) -> Option<&'static str> {
        match backend {
            "openrouter" => catalog::base_url(backend),
            _ => None,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    fn adapter_kind(&self) -> Option<AdapterKind> {
        match self.backend.as_str() {
            "anthropic" => Some(AdapterKind::Anthropic),
            "openai" => Some(AdapterKind::OpenAI),
            "gemini" => Some(AdapterKind::Gemini),
            "groq" => Some(AdapterKind::Groq),
            "cohere" => Some(AdapterKind::Cohere),
            "deepseek" => Some(AdapterKind::DeepSeek),
            "ollama" => Some(AdapterKind::Ollama),
            // Gateways list their models from the catalog
            _ => None,
        }
    }

    fn build_request(
        &self,
        prompt: &str,
        context: &[ContextMessage],
        params: &GenerationParams,
    ) -> ChatRequest {
        let mut chat_req = ChatRequest::default();

        for msg in context {
            let message = match msg.role {
                Role::System => ChatMessage::system(msg.content.as_str()),
                Role::User => ChatMessage::user(msg.content.as_str()),
                Role::Assistant => ChatMessage::assistant(msg.content.as_str()),
                // Tool output in the shared transcript has no call id for this
                // backend, so it is replayed as plain user-visible text
                Role::Tool => ChatMessage::user(format!("Tool output:\n{}", msg.content)),
            };
            chat_req = chat_req.append_message(message);
        }
        chat_req = chat_req.append_message(ChatMessage::user(prompt));

        if !params.tools.is_empty() {
            let tools: Vec<Tool> = params
                .tools
                .iter()
                .map(|t| {
                    Tool::new(&t.name)
                        .with_description(&t.description)
                        .with_schema(t.parameters.clone())
                })
                .collect();
            chat_req = chat_req.with_tools(tools);
        }

        chat_req
    }

    async fn stream_chat(
        &self,
        model: &str,
        chat_req: ChatRequest,
        options: &ChatOptions,
    ) -> Result<Generation, ProviderError> {
        let stream_response = self
            .client
            .exec_chat_stream(model, chat_req, Some(options))
            .await
            .map_err(|e| {
                tracing::error!(error = ?e, provider = %self.descriptor.id, model, "LLM request failed");
                classify_error_text(&format!("{:?}", e))
            })?;

        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = TokenUsage::default();
        let mut stream = stream_response.stream;

        while let Some(event) = stream.next().await {
            match event {
                Ok(ChatStreamEvent::Chunk(chunk)) => {
                    text.push_str(&chunk.content);
                }
                Ok(ChatStreamEvent::ToolCallChunk(tc)) => {
                    // Each ToolCallChunk carries a complete call
                    let call = tc.tool_call;
                    tool_calls.push(ToolCallRequest {
                        call_id: call.call_id,
                        name: call.fn_name,
                        arguments: call.fn_arguments,
                    });
                }
                Ok(ChatStreamEvent::End(end)) => {
                    if let Some(captured) = end.captured_usage {
                        usage.input = captured.prompt_tokens.unwrap_or(0).max(0) as u64;
                        usage.output = captured.completion_tokens.unwrap_or(0).max(0) as u64;
                    }
                    break;
                }
                // Reasoning text stays out of the shared transcript
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = ?e, provider = %self.descriptor.id, model, "LLM stream error");
                    return Err(classify_error_text(&format!("{:?}", e)));
                }
            }
        }

        let finish_reason = if tool_calls.is_empty() { "stop" } else { "tool_calls" };

        Ok(Generation {
            text,
            usage,
            provider_id: self.descriptor.id.clone(),
            model: model.to_string(),
            finish_reason: finish_reason.to_string(),
            tool_calls,
        })
    }
}

#[async_trait::async_trait]
impl ProviderAdapter for RemoteApiProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn validate(&self) -> HealthStatus {
        if self.has_configured_key {
            return HealthStatus::Healthy;
        }
        match catalog::api_key_env(&self.backend) {
            Some(var) if std::env::var(var).is_ok_and(|v| !v.trim().is_empty()) => {
                HealthStatus::Healthy
            }
            Some(var) => HealthStatus::unhealthy(format!("No API key configured; set {}", var)),
            None => HealthStatus::unhealthy(format!(
                "No API key configured for backend '{}'",
                self.backend
            )),
        }
    }

    async fn generate(
        &self,
        prompt: &str,
        context: &[ContextMessage],
        params: &GenerationParams,
    ) -> Result<Generation, ProviderError> {
        let model = params
            .model
            .as_deref()
            .unwrap_or(&self.descriptor.default_model);

        let chat_req = self.build_request(prompt, context, params);
        let options = ChatOptions::default()
            .with_temperature(params.temperature as f64)
            .with_max_tokens(params.max_tokens)
            .with_capture_usage(true);

        debug!(
            provider = %self.descriptor.id,
            model,
            messages = context.len() + 1,
            tools = params.tools.len(),
            "Sending remote request"
        );

        let result = self.stream_chat(model, chat_req, &options).await;

        let error_text = result.as_ref().err().map(|e| e.to_string());
        log_interaction(LogRecord {
            provider_id: &self.descriptor.id,
            model,
            prompt,
            context,
            tool_count: params.tools.len(),
            result: result.as_ref().ok(),
            error: error_text.as_deref(),
        });

        result
    }

    async fn list_available_models(&self) -> Vec<String> {
        let discovery = async {
            let kind = self.adapter_kind().ok_or_else(|| {
                ProviderError::MalformedRequest(format!(
                    "Backend '{}' does not support model listing",
                    self.backend
                ))
            })?;
            self.client
                .all_model_names(kind)
                .await
                .map_err(|e| classify_error_text(&format!("{:?}", e)))
        };

        discover_or_fallback(
            &self.descriptor.id,
            &self.backend,
            &self.descriptor.default_model,
            discovery,
        )
        .await
    }
}
