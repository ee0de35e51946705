//! External session adapter
//!
//! Drives an already-authenticated local CLI (`claude`, `gemini`, `codex`)
//! once per request. No API key is involved: the CLI owns the login.
//!
//! Arguments may contain `{prompt}` and `{model}` placeholders. When no
//! argument mentions `{prompt}`, the rendered prompt is written to the
//! CLI's stdin, which keeps long transcripts out of the argument list.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::debug;

use super::logging::{log_interaction, LogRecord};
use super::model_listing::fallback_models;
use super::{
    classify_error_text, Generation, GenerationParams, HealthStatus, ProviderAdapter,
    ProviderDescriptor, TokenUsage,
};
use crate::context::tokens::TokenCounter;
use crate::context::{ContextMessage, Role};
use crate::error::ProviderError;
use crate::tools::process_utils::{direct_command, ProcessGroupGuard};

const PROMPT_PLACEHOLDER: &str = "{prompt}";
const MODEL_PLACEHOLDER: &str = "{model}";

/// Bound on the `--version` probe
const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ExternalSessionProvider {
    descriptor: ProviderDescriptor,
    command: String,
    args: Vec<String>,
    /// Catalog entry used for the model list
    backend: String,
    counter: TokenCounter,
}

impl ExternalSessionProvider {
    pub fn new(
        descriptor: ProviderDescriptor,
        command: impl Into<String>,
        args: Vec<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            descriptor,
            command: command.into(),
            args,
            backend: backend.into(),
            counter: TokenCounter::heuristic(),
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Rendered arguments, plus the prompt when it goes on stdin instead
    fn render_args(&self, prompt: &str, model: &str) -> (Vec<String>, Option<String>) {
        let mut saw_prompt = false;
        let rendered: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                saw_prompt |= arg.contains(PROMPT_PLACEHOLDER);
                arg.replace(MODEL_PLACEHOLDER, model)
                    .replace(PROMPT_PLACEHOLDER, prompt)
            })
            .collect();
        let stdin = (!saw_prompt).then(|| prompt.to_string());
        (rendered, stdin)
    }

    async fn run(&self, args: &[String], input: Option<String>) -> Result<String, ProviderError> {
        let mut child = direct_command(&self.command)
            .args(args)
            .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let mut guard = ProcessGroupGuard::new(child.id());

        // Written from its own task so a CLI that answers before reading
        // everything cannot deadlock against a full stdout pipe
        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            let command = self.command.clone();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(input.as_bytes()).await {
                    debug!(command = %command, error = %e, "Session CLI closed stdin early");
                }
            });
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ProviderError::Transport(format!("{}: {}", self.command, e)))?;
        guard.disarm();

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() { stdout } else { stderr };
        let message = if message.is_empty() {
            format!("{} exited with {}", self.command, output.status)
        } else {
            message
        };
        Err(classify_error_text(&message))
    }

    fn spawn_error(&self, e: std::io::Error) -> ProviderError {
        if e.kind() == std::io::ErrorKind::NotFound {
            ProviderError::Unavailable(format!("'{}' is not installed or not on PATH", self.command))
        } else {
            ProviderError::Transport(format!("Failed to start '{}': {}", self.command, e))
        }
    }
}

/// Flatten the transcript into the `Role: text` layout these CLIs accept
pub(crate) fn render_transcript(context: &[ContextMessage], prompt: &str) -> String {
    let mut parts: Vec<String> = context
        .iter()
        .map(|m| {
            let label = match m.role {
                Role::System => "System",
                Role::User => "User",
                Role::Assistant => "Assistant",
                Role::Tool => "Tool",
            };
            format!("{}: {}", label, m.content)
        })
        .collect();
    parts.push(format!("User: {}", prompt));
    parts.join("\n\n")
}

#[async_trait::async_trait]
impl ProviderAdapter for ExternalSessionProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn validate(&self) -> HealthStatus {
        let probe = direct_command(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output();

        match tokio::time::timeout(VERSION_PROBE_TIMEOUT, probe).await {
            Ok(Ok(output)) if output.status.success() => HealthStatus::Healthy,
            Ok(Ok(output)) => HealthStatus::unhealthy(format!(
                "'{} --version' exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )),
            Ok(Err(e)) => HealthStatus::unhealthy(self.spawn_error(e).to_string()),
            Err(_) => HealthStatus::unhealthy(format!("'{} --version' timed out", self.command)),
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
        let transcript = render_transcript(context, prompt);
        let (args, input) = self.render_args(&transcript, model);

        debug!(
            provider = %self.descriptor.id,
            command = %self.command,
            model,
            prompt_on_stdin = input.is_some(),
            "Running session CLI"
        );

        let result = self.run(&args, input).await.map(|text| Generation {
            usage: TokenUsage {
                input: self.counter.count(&transcript) as u64,
                output: self.counter.count(&text) as u64,
            },
            text,
            provider_id: self.descriptor.id.clone(),
            model: model.to_string(),
            finish_reason: "stop".to_string(),
            tool_calls: Vec::new(),
        });

        let error_text = result.as_ref().err().map(|e| e.to_string());
        log_interaction(LogRecord {
            provider_id: &self.descriptor.id,
            model,
            prompt,
            context,
            tool_count: 0,
            result: result.as_ref().ok(),
            error: error_text.as_deref(),
        });

        result
    }

    async fn list_available_models(&self) -> Vec<String> {
        fallback_models(&self.backend, &self.descriptor.default_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;

    fn provider(command: &str, args: &[&str]) -> ExternalSessionProvider {
        let descriptor = ProviderDescriptor::new("cli", ProviderKind::Session, "sonnet", 200_000);
        ExternalSessionProvider::new(
            descriptor,
            command,
            args.iter().map(|s| s.to_string()).collect(),
            "claude-cli",
        )
    }

    #[test]
    fn test_render_args_prompt_placement() {
        let p = provider("claude", &["-p", "--model", "{model}"]);
        let (args, input) = p.render_args("hi", "opus");
        assert_eq!(args, vec!["-p", "--model", "opus"]);
        assert_eq!(input.as_deref(), Some("hi"));

        let p = provider("gemini", &["--prompt={prompt}"]);
        let (args, input) = p.render_args("hi", "m");
        assert_eq!(args, vec!["--prompt=hi"]);
        assert!(input.is_none());
    }

    #[test]
    fn test_render_transcript() {
        let context = vec![
            ContextMessage::new(Role::System, "be brief"),
            ContextMessage::new(Role::Assistant, "ok"),
        ];
        assert_eq!(
            render_transcript(&context, "go"),
            "System: be brief\n\nAssistant: ok\n\nUser: go"
        );
    }

    #[tokio::test]
    async fn test_models_come_from_catalog() {
        let models = provider("claude", &[]).list_available_models().await;
        assert!(models.contains(&"sonnet".to_string()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generate_returns_stdout() {
        let p = provider("echo", &["{prompt}"]);
        let g = p.generate("hello", &[], &GenerationParams::default()).await.unwrap();
        assert_eq!(g.text, "User: hello");
        assert_eq!(g.provider_id, "cli");
        assert!(g.usage.input > 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_long_transcript_goes_through_stdin() {
        // Far past the per-argument limit of common kernels
        let long_prompt = "x".repeat(512 * 1024);
        let p = provider("cat", &[]);
        let g = p.generate(&long_prompt, &[], &GenerationParams::default()).await.unwrap();
        assert_eq!(g.text.len(), "User: ".len() + long_prompt.len());
        assert!(g.text.starts_with("User: xxx"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_not_logged_in_is_fatal() {
        let p = provider("sh", &["-c", "echo 'Error: not logged in' >&2; exit 1"]);
        let err = p.generate("hello", &[], &GenerationParams::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Authentication(_)));
        assert!(err.is_fatal());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_generic_failure_is_transient() {
        let p = provider("sh", &["-c", "echo 'connection reset' >&2; exit 3"]);
        let err = p.generate("hello", &[], &GenerationParams::default()).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let p = provider("switchyard-no-such-binary", &[]);
        let err = p.generate("x", &[], &GenerationParams::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
        assert!(!p.validate().await.is_healthy());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_validate_runs_version_probe() {
        assert!(provider("true", &[]).validate().await.is_healthy());
        assert!(!provider("false", &[]).validate().await.is_healthy());
    }
}
