//! Provider request/response logging
//!
//! Set the `SWITCHYARD_LLM_LOG` environment variable to a file path to append
//! one JSON object per provider call (request summary plus response or error).
//!
//! Example: `SWITCHYARD_LLM_LOG=/tmp/llm.log switchyard route --task planning "..."`

use serde_json::json;
use std::io::Write;
use tracing::{debug, warn};

use super::Generation;
use crate::context::ContextMessage;

pub const LOG_ENV_VAR: &str = "SWITCHYARD_LLM_LOG";

/// What to include in the log entry
#[derive(Default)]
pub struct LogRecord<'a> {
    pub provider_id: &'a str,
    pub model: &'a str,
    pub prompt: &'a str,
    pub context: &'a [ContextMessage],
    pub tool_count: usize,
    pub result: Option<&'a Generation>,
    pub error: Option<&'a str>,
}

/// Append the record to the log file if `SWITCHYARD_LLM_LOG` is set
pub fn log_interaction(record: LogRecord<'_>) {
    let Ok(log_file) = std::env::var(LOG_ENV_VAR) else {
        return;
    };

    let entry = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "provider": record.provider_id,
        "model": record.model,
        "request": {
            "prompt": record.prompt,
            "context": record.context.iter().map(|m| json!({
                "role": m.role.as_str(),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "message_count": record.context.len() + 1,
            "tool_count": record.tool_count,
        },
        "response": record.result.map(|g| json!({
            "type": if g.has_tool_calls() { "tool_calls" } else { "message" },
            "content": g.text,
            "finish_reason": g.finish_reason,
            "usage": { "input": g.usage.input, "output": g.usage.output },
            "tool_calls": g.tool_calls.iter().map(|c| json!({
                "name": c.name,
                "call_id": c.call_id,
                "arguments": c.arguments,
            })).collect::<Vec<_>>(),
        })),
        "error": record.error,
    });

    match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
    {
        Ok(mut file) => {
            if let Err(e) = writeln!(file, "{}", entry) {
                warn!("Failed to write to LLM log file: {}", e);
            }
        }
        Err(e) => {
            warn!("Failed to open LLM log file {}: {}", log_file, e);
        }
    }

    debug!("Logged provider interaction to {}", log_file);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_default() {
        let record = LogRecord {
            provider_id: "claude",
            model: "sonnet",
            ..Default::default()
        };
        assert_eq!(record.model, "sonnet");
        assert!(record.result.is_none());
        assert!(record.context.is_empty());
    }
}
