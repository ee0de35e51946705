//! Read file tool

use serde_json::{json, Value};
use std::path::PathBuf;

use crate::error::ToolError;
use crate::tools::{BoxFuture, Tool, ToolOutput};

use super::{io_error, path_to_display, resolve_path};

/// Tool for reading file contents
pub struct ReadFile {
    workspace: PathBuf,
}

impl ReadFile {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

impl Tool for ReadFile {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a UTF-8 text file"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file (relative to the workspace or absolute)"
                }
            },
            "required": ["path"]
        })
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let raw = params["path"]
                .as_str()
                .ok_or_else(|| ToolError::Validation("path is required".into()))?;
            let path = resolve_path(&self.workspace, raw);

            let content = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_error("reading", &path, e))?;

            let size = content.len();
            Ok(ToolOutput::success(json!({
                "content": content,
                "path": path_to_display(&path),
            }))
            .with_metadata("size", size))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_relative_to_workspace() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello").unwrap();

        let tool = ReadFile::new(dir.path().to_path_buf());
        let output = tool.execute(json!({"path": "a.txt"})).await.unwrap();
        assert!(output.success);
        assert_eq!(output.content["content"], "hello");
        assert_eq!(output.metadata["size"], 5);
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let tool = ReadFile::new(dir.path().to_path_buf());
        let err = tool.execute(json!({"path": "nope.txt"})).await.unwrap_err();
        assert!(err.to_string().contains("Not found"), "{err}");
    }
}
