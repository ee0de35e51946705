//! Tool registry
//!
//! The tool map is copy-on-write: writers build a new map and swap the `Arc`
//! under a short write lock, readers clone the `Arc` and keep a consistent
//! view for as long as they hold it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{Tool, ToolDefinition, ToolDescriptor, ToolSource};
use crate::error::ToolError;

/// A tool and where it came from
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Arc<dyn Tool>,
    pub source: ToolSource,
}

impl RegisteredTool {
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.tool.name().to_string(),
            description: self.tool.description().to_string(),
            parameters: self.tool.parameters_schema(),
            source: self.source.clone(),
        }
    }
}

/// An immutable view of the registry at one point in time
pub type ToolSnapshot = Arc<HashMap<String, RegisteredTool>>;

/// Result of registering a group of tools
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupRegistration {
    pub registered: Vec<String>,
    /// Names already taken (by another source or earlier in the group)
    pub rejected: Vec<String>,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<ToolSnapshot>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one tool. The first registrant of a name keeps it.
    pub fn register(&self, tool: Arc<dyn Tool>, source: ToolSource) -> Result<(), ToolError> {
        let name = tool.name().to_string();
        let mut guard = self.tools.write();

        if let Some(existing) = guard.get(&name) {
            return Err(ToolError::NameConflict {
                name,
                existing_source: existing.source.to_string(),
            });
        }

        let mut next = HashMap::clone(&guard);
        next.insert(name.clone(), RegisteredTool { tool, source: source.clone() });
        *guard = Arc::new(next);

        debug!(tool = %name, source = %source, "Registered tool");
        Ok(())
    }

    /// Register every non-conflicting tool of `tools` in one swap
    pub fn register_group(&self, source: &ToolSource, tools: Vec<Arc<dyn Tool>>) -> GroupRegistration {
        let mut outcome = GroupRegistration::default();
        let mut guard = self.tools.write();
        let mut next = HashMap::clone(&guard);

        for tool in tools {
            let name = tool.name().to_string();
            if let Some(existing) = next.get(&name) {
                warn!(
                    tool = %name,
                    source = %source,
                    existing_source = %existing.source,
                    "Tool name already registered, skipping"
                );
                outcome.rejected.push(name);
                continue;
            }
            next.insert(name.clone(), RegisteredTool { tool, source: source.clone() });
            outcome.registered.push(name);
        }

        *guard = Arc::new(next);
        info!(
            source = %source,
            registered = outcome.registered.len(),
            rejected = outcome.rejected.len(),
            "Registered tool group"
        );
        outcome
    }

    /// Remove one tool by name, returning it if it was registered
    pub fn unregister(&self, name: &str) -> Option<RegisteredTool> {
        let mut guard = self.tools.write();
        if !guard.contains_key(name) {
            return None;
        }

        let mut next = HashMap::clone(&guard);
        let removed = next.remove(name);
        *guard = Arc::new(next);

        if let Some(entry) = &removed {
            debug!(tool = %name, source = %entry.source, "Unregistered tool");
        }
        removed
    }

    /// Remove every tool of `source` in one swap, returning their names
    pub fn unregister_source(&self, source: &ToolSource) -> Vec<String> {
        let mut guard = self.tools.write();
        let mut removed = Vec::new();
        let next: HashMap<String, RegisteredTool> = guard
            .iter()
            .filter(|(name, entry)| {
                if &entry.source == source {
                    removed.push((*name).clone());
                    false
                } else {
                    true
                }
            })
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();

        if !removed.is_empty() {
            *guard = Arc::new(next);
            info!(source = %source, removed = removed.len(), "Unregistered tool group");
        }
        removed.sort();
        removed
    }

    pub fn snapshot(&self) -> ToolSnapshot {
        self.tools.read().clone()
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.read().contains_key(name)
    }

    /// Descriptors sorted by name
    pub fn list(&self) -> Vec<ToolDescriptor> {
        let snapshot = self.snapshot();
        let mut descriptors: Vec<_> = snapshot.values().map(RegisteredTool::descriptor).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Definitions to offer a model, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let snapshot = self.snapshot();
        let mut definitions: Vec<_> = snapshot.values().map(|e| e.tool.to_definition()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names_for(&self, source: &ToolSource) -> Vec<String> {
        let mut names: Vec<_> = self
            .snapshot()
            .iter()
            .filter(|(_, e)| &e.source == source)
            .map(|(n, _)| n.clone())
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{BoxFuture, ToolOutput};
    use serde_json::{json, Value};

    struct Named(&'static str);

    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            "test tool"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }

        fn execute(&self, _params: Value) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
            Box::pin(async { Ok(ToolOutput::success("ok")) })
        }
    }

    #[test]
    fn test_first_registrant_wins() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Named("grep")), ToolSource::Builtin).unwrap();

        let err = registry
            .register(Arc::new(Named("grep")), ToolSource::external("search"))
            .unwrap_err();
        match err {
            ToolError::NameConflict { name, existing_source } => {
                assert_eq!(name, "grep");
                assert_eq!(existing_source, "builtin");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(registry.get("grep").unwrap().source, ToolSource::Builtin);
    }

    #[test]
    fn test_group_reports_rejected() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Named("a")), ToolSource::Builtin).unwrap();

        let source = ToolSource::external("srv");
        let outcome = registry.register_group(
            &source,
            vec![Arc::new(Named("a")), Arc::new(Named("b")), Arc::new(Named("b"))],
        );
        assert_eq!(outcome.registered, vec!["b"]);
        assert_eq!(outcome.rejected, vec!["a", "b"]);
        assert_eq!(registry.names_for(&source), vec!["b"]);
    }

    #[test]
    fn test_unregister_source_leaves_others() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Named("keep")), ToolSource::Builtin).unwrap();
        let source = ToolSource::external("srv");
        registry.register_group(&source, vec![Arc::new(Named("x")), Arc::new(Named("y"))]);

        let before = registry.snapshot();
        assert_eq!(registry.unregister_source(&source), vec!["x", "y"]);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("keep"));
        // Snapshots taken earlier are unaffected
        assert_eq!(before.len(), 3);
        assert!(registry.unregister_source(&source).is_empty());
    }

    #[test]
    fn test_unregister_single_tool() {
        let registry = ToolRegistry::new();
        let source = ToolSource::external("srv");
        registry.register_group(&source, vec![Arc::new(Named("x")), Arc::new(Named("y"))]);

        let before = registry.snapshot();
        let removed = registry.unregister("x").unwrap();
        assert_eq!(removed.source, source);
        assert_eq!(registry.names_for(&source), vec!["y"]);
        assert!(before.contains_key("x"));

        assert!(registry.unregister("x").is_none());
        // The freed name can be taken again
        registry.register(Arc::new(Named("x")), ToolSource::Builtin).unwrap();
        assert_eq!(registry.get("x").unwrap().source, ToolSource::Builtin);
    }

    #[test]
    fn test_list_is_sorted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(Named("zeta")), ToolSource::Builtin).unwrap();
        registry.register(Arc::new(Named("alpha")), ToolSource::Builtin).unwrap();
        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
