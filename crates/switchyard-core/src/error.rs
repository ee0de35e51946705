//! Error types for Switchyard Core

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using Switchyard Error
pub type Result<T> = std::result::Result<T, Error>;

/// Switchyard error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    /// A provider failed in a way retrying elsewhere cannot fix
    #[error("Provider '{provider}' failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    #[error("No provider could handle task '{task}': {}", summarize_failures(.failures))]
    ChainExhausted {
        task: String,
        failures: Vec<ProviderFailure>,
    },

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("External server '{server}': {message}")]
    ExternalServer { server: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn external(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalServer {
            server: server.into(),
            message: message.into(),
        }
    }
}

fn summarize_failures(failures: &[ProviderFailure]) -> String {
    if failures.is_empty() {
        return "no candidates were attempted".to_string();
    }
    failures
        .iter()
        .map(|f| format!("{} ({}: {})", f.provider_id, f.kind, f.reason))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure classification reported by provider adapters
///
/// The first four variants are transient: the router records them and moves
/// on to the next candidate. `Authentication` and `MalformedRequest` are fatal
/// and stop the chain.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Malformed request: {0}")]
    MalformedRequest(String),
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::Timeout,
            Self::RateLimited(_) => FailureKind::RateLimited,
            Self::Transport(_) => FailureKind::Transport,
            Self::Unavailable(_) => FailureKind::Unavailable,
            Self::Authentication(_) => FailureKind::Authentication,
            Self::MalformedRequest(_) => FailureKind::MalformedRequest,
        }
    }

    pub fn is_transient(&self) -> bool {
        !self.is_fatal()
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication(_) | Self::MalformedRequest(_))
    }

    /// Message without the classification prefix
    pub fn reason(&self) -> &str {
        match self {
            Self::Timeout(m)
            | Self::RateLimited(m)
            | Self::Transport(m)
            | Self::Unavailable(m)
            | Self::Authentication(m)
            | Self::MalformedRequest(m) => m,
        }
    }

    /// Classify an HTTP status returned by a backend.
    ///
    /// Returns `None` for success statuses.
    pub fn from_status(status: u16, body: impl Into<String>) -> Option<Self> {
        let body = body.into();
        let reason = if body.trim().is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, body.trim())
        };
        match status {
            200..=399 => None,
            401 | 403 => Some(Self::Authentication(reason)),
            408 => Some(Self::Timeout(reason)),
            429 => Some(Self::RateLimited(reason)),
            400 | 404 | 422 => Some(Self::MalformedRequest(reason)),
            500..=599 => Some(Self::Unavailable(reason)),
            _ => Some(Self::MalformedRequest(reason)),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::Timeout(e.to_string());
        }
        if let Some(status) = e.status()
            && let Some(classified) = Self::from_status(status.as_u16(), e.to_string())
        {
            return classified;
        }
        // An unreadable body is the backend's fault; another candidate may do better
        if e.is_decode() {
            return Self::Unavailable(format!("Unreadable response: {}", e));
        }
        if e.is_builder() {
            return Self::MalformedRequest(e.to_string());
        }
        Self::Transport(e.to_string())
    }
}

/// Kind of a provider failure, as recorded in route attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    Transport,
    Unavailable,
    Authentication,
    MalformedRequest,
    /// Candidate skipped: task type not in its descriptor
    UnsupportedTask,
    /// Candidate skipped: cached health says it is down
    Unhealthy,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Transport => "transport",
            Self::Unavailable => "unavailable",
            Self::Authentication => "authentication",
            Self::MalformedRequest => "malformed_request",
            Self::UnsupportedTask => "unsupported_task",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One candidate's failure inside an exhausted chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider_id: String,
    pub kind: FailureKind,
    pub reason: String,
}

impl ProviderFailure {
    pub fn new(provider_id: impl Into<String>, error: &ProviderError) -> Self {
        Self {
            provider_id: provider_id.into(),
            kind: error.kind(),
            reason: error.reason().to_string(),
        }
    }

    pub fn skipped(
        provider_id: impl Into<String>,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            provider_id: provider_id.into(),
            kind,
            reason: reason.into(),
        }
    }
}

/// Tool-specific errors
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool '{name}' is already registered by {existing_source}")]
    NameConflict {
        name: String,
        existing_source: String,
    },

    #[error("Invalid arguments: {0}")]
    Validation(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            ProviderError::from_status(401, ""),
            Some(ProviderError::Authentication(_))
        ));
        assert!(matches!(
            ProviderError::from_status(403, "forbidden"),
            Some(ProviderError::Authentication(_))
        ));
        assert!(matches!(
            ProviderError::from_status(422, ""),
            Some(ProviderError::MalformedRequest(_))
        ));
        assert!(matches!(
            ProviderError::from_status(408, ""),
            Some(ProviderError::Timeout(_))
        ));
        assert!(matches!(
            ProviderError::from_status(429, ""),
            Some(ProviderError::RateLimited(_))
        ));
        assert!(matches!(
            ProviderError::from_status(503, ""),
            Some(ProviderError::Unavailable(_))
        ));
        assert!(ProviderError::from_status(200, "").is_none());
    }

    #[test]
    fn test_fatal_vs_transient() {
        assert!(ProviderError::Authentication("x".into()).is_fatal());
        assert!(ProviderError::MalformedRequest("x".into()).is_fatal());
        assert!(ProviderError::Timeout("x".into()).is_transient());
        assert!(ProviderError::RateLimited("x".into()).is_transient());
        assert!(ProviderError::Transport("x".into()).is_transient());
        assert!(ProviderError::Unavailable("x".into()).is_transient());
    }

    #[test]
    fn test_chain_exhausted_message_lists_candidates() {
        let err = Error::ChainExhausted {
            task: "planning".into(),
            failures: vec![
                ProviderFailure::new("a", &ProviderError::Timeout("slow".into())),
                ProviderFailure::new("b", &ProviderError::Unavailable("HTTP 503".into())),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("planning"));
        assert!(msg.contains("a (timeout: slow)"));
        assert!(msg.contains("b (unavailable: HTTP 503)"));
    }
}
