//! Filesystem tools
//!
//! Relative paths resolve against the workspace the tool was built with.

mod list;
mod path_utils;
mod read;
mod write;

pub use list::ListFiles;
pub use path_utils::{normalize_path, path_to_display, resolve_path};
pub use read::ReadFile;
pub use write::WriteFile;

use crate::error::ToolError;

/// Map an IO error on `path` to a tool error with the path in the message
pub(crate) fn io_error(action: &str, path: &std::path::Path, error: std::io::Error) -> ToolError {
    if error.kind() == std::io::ErrorKind::NotFound {
        ToolError::ExecutionFailed(format!("Not found: {}", path_to_display(path)))
    } else {
        ToolError::ExecutionFailed(format!("Error {} {}: {}", action, path_to_display(path), error))
    }
}
