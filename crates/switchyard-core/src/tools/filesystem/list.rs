//! List files tool

use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::ToolError;
use crate::tools::{BoxFuture, Tool, ToolOutput};

use super::{io_error, path_to_display, resolve_path};

/// Tool for listing the files of a directory
pub struct ListFiles {
    workspace: PathBuf,
}

impl ListFiles {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }
}

impl Tool for ListFiles {
    fn name(&self) -> &str {
        "file_list"
    }

    fn description(&self) -> &str {
        "List the files in a directory, optionally recursing into subdirectories"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (default: the workspace)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Include files in subdirectories (default: false)"
                }
            }
        })
    }

    fn execute(&self, params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
        Box::pin(async move {
            let raw = params["path"].as_str().unwrap_or(".");
            let recursive = params["recursive"].as_bool().unwrap_or(false);
            let root = resolve_path(&self.workspace, raw);

            let walk_root = root.clone();
            let files = tokio::task::spawn_blocking(move || collect_files(&walk_root, recursive))
                .await
                .map_err(|e| ToolError::ExecutionFailed(format!("Listing task failed: {}", e)))??;

            Ok(ToolOutput::success(json!({
                "path": path_to_display(&root),
                "files": files,
                "count": files.len()
            })))
        })
    }
}

/// Regular files under `root`, sorted
fn collect_files(root: &Path, recursive: bool) -> Result<Vec<String>, ToolError> {
    let metadata = std::fs::metadata(root).map_err(|e| io_error("listing", root, e))?;
    if !metadata.is_dir() {
        return Err(ToolError::ExecutionFailed(format!(
            "Not a directory: {}",
            path_to_display(root)
        )));
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(max_depth) {
        let entry = entry.map_err(|e| ToolError::ExecutionFailed(format!("Error listing {}: {}", path_to_display(root), e)))?;
        if entry.file_type().is_file() {
            files.push(path_to_display(entry.path()));
        }
    }
    files.sort();
    Ok(files)
}
