//! Write file tool

use serde_json::{json, Value};
use std::path::PathBuf;

use crate::error::ToolError;
use crate::tools::{BoxFuture, Tool, ToolOutput};

use super::{io_error, path_to_display, resolve_path};

/// Tool for writing file contents, creating parent directories as needed
pub struct WriteFile {
    workspace: PathBuf,
}

impl WriteFile {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

impl Tool for WriteFile {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write text to a file, replacing any existing content"
    }

    fn parameters_schema(&self) -> Value {
        crate::tool_params!(
            path: "string" => "Path to the file (relative to the workspace or absolute)",
            content: "string" => "Content to write",
        )
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let raw = params["path"]
                .as_str()
                .ok_or_else(|| ToolError::Validation("path is required".into()))?;
            let content = params["content"]
                .as_str()
                .ok_or_else(|| ToolError::Validation("content is required".into()))?;
            let path = resolve_path(&self.workspace, raw);

            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_error("creating", parent, e))?;
            }

            tokio::fs::write(&path, content)
                .await
                .map_err(|e| io_error("writing", &path, e))?;

            Ok(ToolOutput::success(json!({
                "path": path_to_display(&path),
                "bytes_written": content.len()
            })))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let tool = WriteFile::new(dir.path().to_path_buf());

        let output = tool
            .execute(json!({"path": "deep/nested/out.txt", "content": "héllo"}))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.content["bytes_written"], 6);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("deep/nested/out.txt")).unwrap(),
            "héllo"
        );
    }

    #[tokio::test]
    async fn test_overwrites() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("f.txt");
        std::fs::write(&file, "old content").unwrap();

        let tool = WriteFile::new(dir.path().to_path_buf());
        tool.execute(json!({"path": file.to_str().unwrap(), "content": "new"}))
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "new");
    }
}
