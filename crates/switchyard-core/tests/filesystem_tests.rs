//! Filesystem tool tests
//!
//! Runs the file tools through the registry and executor the way a routed
//! tool call does.

use std::sync::Arc;

use serde_json::json;
use switchyard_core::tools::{builtin_tools, ToolFailureKind};
use switchyard_core::{ToolExecutor, ToolInvocation, ToolPolicy, ToolRegistry, ToolSource};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn setup_workspace() -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    std::fs::write(dir.path().join("README.md"), "# Switchyard\n").unwrap();
    std::fs::create_dir_all(dir.path().join("src/nested")).unwrap();
    std::fs::write(dir.path().join("src/lib.rs"), "pub fn answer() -> u32 { 42 }\n").unwrap();
    std::fs::write(dir.path().join("src/nested/mod.rs"), "// nested\n").unwrap();
    dir
}

fn executor_for(dir: &TempDir) -> ToolExecutor {
    let registry = Arc::new(ToolRegistry::new());
    let registration = registry.register_group(&ToolSource::Builtin, builtin_tools(dir.path()));
    assert!(registration.rejected.is_empty());
    ToolExecutor::new(registry, ToolPolicy::default())
}

mod read_write_tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read() {
        let dir = setup_workspace();
        let executor = executor_for(&dir);
        let cancel = CancellationToken::new();

        let written = executor
            .execute(
                ToolInvocation::new("file_write", json!({"path": "notes/plan.md", "content": "step one"})),
                &cancel,
            )
            .await;
        assert!(written.success, "{:?}", written.error);
        assert_eq!(written.data["bytes_written"], 8);
        assert!(dir.path().join("notes/plan.md").exists());

        let read = executor
            .execute(ToolInvocation::new("file_read", json!({"path": "notes/plan.md"})), &cancel)
            .await;
        assert!(read.success);
        assert_eq!(read.data["content"], "step one");
    }

    #[tokio::test]
    async fn test_absolute_path_is_used_as_given() {
        let dir = setup_workspace();
        let other = TempDir::new().unwrap();
        let target = other.path().join("outside.txt");
        std::fs::write(&target, "elsewhere").unwrap();

        let executor = executor_for(&dir);
        let read = executor
            .execute(
                ToolInvocation::new("file_read", json!({"path": target.to_string_lossy()})),
                &CancellationToken::new(),
            )
            .await;
        assert!(read.success);
        assert_eq!(read.data["content"], "elsewhere");
    }

    #[tokio::test]
    async fn test_missing_file_is_execution_failure() {
        let dir = setup_workspace();
        let executor = executor_for(&dir);

        let read = executor
            .execute(ToolInvocation::new("file_read", json!({"path": "nope.txt"})), &CancellationToken::new())
            .await;
        assert!(!read.success);
        assert_eq!(read.failure_kind(), Some(ToolFailureKind::Execution));
        assert!(read.error.unwrap().message.contains("Not found"));
    }

    #[tokio::test]
    async fn test_missing_argument_is_validation_failure() {
        let dir = setup_workspace();
        let executor = executor_for(&dir);

        let write = executor
            .execute(ToolInvocation::new("file_write", json!({"path": "x.txt"})), &CancellationToken::new())
            .await;
        assert_eq!(write.failure_kind(), Some(ToolFailureKind::Validation));
        assert!(!dir.path().join("x.txt").exists());
    }
}

mod list_tests {
    use super::*;

    #[tokio::test]
    async fn test_list_top_level_and_recursive() {
        let dir = setup_workspace();
        let executor = executor_for(&dir);
        let cancel = CancellationToken::new();

        let top = executor
            .execute(ToolInvocation::new("file_list", json!({})), &cancel)
            .await;
        assert!(top.success);
        assert_eq!(top.data["count"], 1);

        let all = executor
            .execute(ToolInvocation::new("file_list", json!({"recursive": true})), &cancel)
            .await;
        assert!(all.success);
        assert_eq!(all.data["count"], 3);
        let files: Vec<String> = serde_json::from_value(all.data["files"].clone()).unwrap();
        assert!(files.iter().any(|f| f.ends_with("mod.rs")));
    }

    #[tokio::test]
    async fn test_list_file_is_not_a_directory() {
        let dir = setup_workspace();
        let executor = executor_for(&dir);

        let result = executor
            .execute(ToolInvocation::new("file_list", json!({"path": "README.md"})), &CancellationToken::new())
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().message.contains("Not a directory"));
    }
}

mod policy_tests {
    use super::*;

    #[tokio::test]
    async fn test_denied_write_never_touches_disk() {
        let dir = setup_workspace();
        let registry = Arc::new(ToolRegistry::new());
        registry.register_group(&ToolSource::Builtin, builtin_tools(dir.path()));
        let executor = ToolExecutor::new(registry, ToolPolicy::new(["file_*"], ["file_write"]).unwrap());

        let result = executor
            .execute(
                ToolInvocation::new("file_write", json!({"path": "denied.txt", "content": "x"})),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(result.failure_kind(), Some(ToolFailureKind::PermissionDenied));
        assert!(!dir.path().join("denied.txt").exists());

        let shell = executor
            .execute(
                ToolInvocation::new("shell_execute", json!({"command": "true"})),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(shell.failure_kind(), Some(ToolFailureKind::PermissionDenied));
    }
}
