//! Execute shell command tool

use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use crate::error::ToolError;
use crate::tools::filesystem::{path_to_display, resolve_path};
use crate::tools::process_utils::{shell_command, ProcessGroupGuard};
use crate::tools::{BoxFuture, Tool, ToolOutput};

pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 30;

/// Tool for running a command line through the platform shell
pub struct ShellExecute {
    workspace: PathBuf,
}

impl ShellExecute {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

impl Tool for ShellExecute {
    fn name(&self) -> &str {
        "shell_execute"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its stdout, stderr and exit code"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Working directory (relative to the workspace or absolute)"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30)"
                }
            },
            "required": ["command"]
        })
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let command = params["command"]
                .as_str()
                .ok_or_else(|| ToolError::Validation("command is required".into()))?;
            let timeout_secs = params["timeout"].as_u64().unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS);
            let working_dir = match params["working_dir"].as_str() {
                Some(dir) => resolve_path(&self.workspace, dir),
                None => self.workspace.clone(),
            };

            let child = shell_command(command)
                .current_dir(&working_dir)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| {
                    ToolError::ExecutionFailed(format!(
                        "Failed to start command in {}: {}",
                        path_to_display(&working_dir),
                        e
                    ))
                })?;

            // Dropped with this future on timeout or cancellation
            let mut guard = ProcessGroupGuard::new(child.id());

            let output = match tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait_with_output()).await {
                Ok(output) => output.map_err(ToolError::Io)?,
                Err(_) => {
                    return Ok(ToolOutput::failure(
                        json!({ "command": command, "timed_out": true }),
                        format!("Command timed out after {} seconds", timeout_secs),
                    ));
                }
            };
            guard.disarm();

            let exit_code = output.status.code();
            let data = json!({
                "stdout": String::from_utf8_lossy(&output.stdout),
                "stderr": String::from_utf8_lossy(&output.stderr),
                "exit_code": exit_code,
            });

            if output.status.success() {
                Ok(ToolOutput::success(data))
            } else {
                let message = match exit_code {
                    Some(code) => format!("Command exited with status {}", code),
                    None => "Command terminated by a signal".to_string(),
                };
                Ok(ToolOutput::failure(data, message))
            }
        })
    }
}
