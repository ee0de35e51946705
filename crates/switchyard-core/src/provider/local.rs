//! Local network endpoint adapter
//!
//! Talks to a model server on the local network, either through the
//! OpenAI-compatible `/v1/chat/completions` API (llama.cpp, LM Studio, vLLM)
//! or through Ollama's native `/api/chat`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::logging::{log_interaction, LogRecord};
use super::model_listing::{discover_or_fallback, DISCOVERY_TIMEOUT};
use super::{
    Generation, GenerationParams, HealthStatus, ProviderAdapter, ProviderDescriptor, TokenUsage,
    ToolCallRequest,
};
use crate::context::{ContextMessage, Role};
use crate::error::ProviderError;

/// Wire dialect of the local server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiStyle {
    #[default]
    OpenAI,
    Ollama,
}

pub struct LocalEndpointProvider {
    http: reqwest::Client,
    descriptor: ProviderDescriptor,
    base_url: String,
    style: ApiStyle,
    /// Catalog entry used for the fallback model list
    backend: String,
}

impl LocalEndpointProvider {
    pub fn new(descriptor: ProviderDescriptor, base_url: impl Into<String>, style: ApiStyle) -> Self {
        let backend = match style {
            ApiStyle::OpenAI => "openai-compatible",
            ApiStyle::Ollama => "ollama",
        };
        Self {
            http: reqwest::Client::new(),
            descriptor,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            style,
            backend: backend.to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        match self.style {
            ApiStyle::OpenAI => format!("{}/v1/chat/completions", self.base_url),
            ApiStyle::Ollama => format!("{}/api/chat", self.base_url),
        }
    }

    fn models_url(&self) -> String {
        match self.style {
            ApiStyle::OpenAI => format!("{}/v1/models", self.base_url),
            ApiStyle::Ollama => format!("{}/api/tags", self.base_url),
        }
    }

    fn build_body(&self, model: &str, prompt: &str, context: &[ContextMessage], params: &GenerationParams) -> Value {
        let mut messages: Vec<Value> = context
            .iter()
            .map(|m| match m.role {
                // No call id to pair with, so servers would reject a "tool" role
                Role::Tool => json!({ "role": "user", "content": format!("Tool output:\n{}", m.content) }),
                role => json!({ "role": role.as_str(), "content": m.content }),
            })
            .collect();
        messages.push(json!({ "role": "user", "content": prompt }));

        let tools: Vec<Value> = params
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = match self.style {
            ApiStyle::OpenAI => json!({
                "model": model,
                "messages": messages,
                "temperature": params.temperature,
                "max_tokens": params.max_tokens,
                "stream": false,
            }),
            ApiStyle::Ollama => json!({
                "model": model,
                "messages": messages,
                "stream": false,
                "options": {
                    "temperature": params.temperature,
                    "num_predict": params.max_tokens,
                },
            }),
        };
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools);
        }
        body
    }

    fn parse_response(&self, model: &str, body: &Value) -> Result<Generation, ProviderError> {
        let (message, usage, finish_reason) = match self.style {
            ApiStyle::OpenAI => {
                let choice = body
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .ok_or_else(|| ProviderError::Unavailable("Response has no choices".into()))?;
                let usage = TokenUsage {
                    input: body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
                    output: body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
                };
                let finish = choice["finish_reason"].as_str().unwrap_or("stop").to_string();
                (&choice["message"], usage, finish)
            }
            ApiStyle::Ollama => {
                let usage = TokenUsage {
                    input: body["prompt_eval_count"].as_u64().unwrap_or(0),
                    output: body["eval_count"].as_u64().unwrap_or(0),
                };
                let finish = body["done_reason"].as_str().unwrap_or("stop").to_string();
                (&body["message"], usage, finish)
            }
        };

        let text = message["content"].as_str().unwrap_or_default().to_string();
        let tool_calls = parse_tool_calls(&message["tool_calls"]);

        Ok(Generation {
            text,
            usage,
            provider_id: self.descriptor.id.clone(),
            model: body["model"].as_str().unwrap_or(model).to_string(),
            finish_reason,
            tool_calls,
        })
    }

    async fn fetch_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self
            .http
            .get(self.models_url())
            .timeout(DISCOVERY_TIMEOUT)
            .send()
            .await?;
        let status = response.status().as_u16();
        if let Some(err) = ProviderError::from_status(status, "") {
            return Err(err);
        }
        let body: Value = response.json().await?;
        let models = match self.style {
            ApiStyle::OpenAI => body["data"]
                .as_array()
                .map(|a| a.iter().filter_map(|m| m["id"].as_str().map(String::from)).collect())
                .unwrap_or_default(),
            ApiStyle::Ollama => body["models"]
                .as_array()
                .map(|a| a.iter().filter_map(|m| m["name"].as_str().map(String::from)).collect())
                .unwrap_or_default(),
        };
        Ok(models)
    }
}

/// Both dialects use OpenAI's `tool_calls` shape; Ollama omits ids and may
/// send arguments as an object rather than a JSON string
fn parse_tool_calls(value: &Value) -> Vec<ToolCallRequest> {
    let Some(calls) = value.as_array() else {
        return Vec::new();
    };
    calls
        .iter()
        .enumerate()
        .filter_map(|(i, call)| {
            let function = call.get("function")?;
            let name = function.get("name")?.as_str()?.to_string();
            let arguments = match function.get("arguments") {
                Some(Value::String(raw)) => serde_json::from_str(raw).unwrap_or(Value::String(raw.clone())),
                Some(other) => other.clone(),
                None => json!({}),
            };
            let call_id = call
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| format!("call_{}", i));
            Some(ToolCallRequest { call_id, name, arguments })
        })
        .collect()
}

#[async_trait::async_trait]
impl ProviderAdapter for LocalEndpointProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn validate(&self) -> HealthStatus {
        let probe = self
            .http
            .get(self.models_url())
            .timeout(Duration::from_secs(3))
            .send()
            .await;
        match probe {
            Ok(response) if response.status().is_success() => HealthStatus::Healthy,
            Ok(response) => HealthStatus::unhealthy(format!(
                "{} answered HTTP {}",
                self.base_url,
                response.status()
            )),
            Err(e) => HealthStatus::unhealthy(format!("{} unreachable: {}", self.base_url, e)),
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
        let body = self.build_body(model, prompt, context, params);

        debug!(provider = %self.descriptor.id, url = %self.chat_url(), model, "Sending local request");

        let result = async {
            let response = self.http.post(self.chat_url()).json(&body).send().await?;
            let status = response.status().as_u16();
            if !response.status().is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(ProviderError::from_status(status, text)
                    .unwrap_or_else(|| ProviderError::Unavailable(format!("HTTP {}", status))));
            }
            let json: Value = response.json().await?;
            self.parse_response(model, &json)
        }
        .await;

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
        discover_or_fallback(
            &self.descriptor.id,
            &self.backend,
            &self.descriptor.default_model,
            self.fetch_models(),
        )
        .await
    }
}
