//! Which tools may run, and for how long by default

use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::ToolsConfig;
use crate::error::{Error, Result, ToolError};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Allow/deny rules over tool names.
///
/// Deny patterns are checked first. When any allow pattern is configured a
/// tool must also match one of them; with none, everything not denied runs.
#[derive(Debug, Clone)]
pub struct ToolPolicy {
    allow: Option<GlobSet>,
    deny: GlobSet,
    default_timeout: Duration,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            allow: None,
            deny: GlobSet::empty(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl ToolPolicy {
    pub fn new<A, D>(allow: A, deny: D) -> Result<Self>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        D: IntoIterator,
        D::Item: AsRef<str>,
    {
        let allow: Vec<_> = allow.into_iter().collect();
        Ok(Self {
            allow: if allow.is_empty() { None } else { Some(build_set(allow)?) },
            deny: build_set(deny)?,
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        })
    }

    pub fn from_config(config: &ToolsConfig) -> Result<Self> {
        Ok(Self::new(&config.allow, &config.deny)?
            .with_default_timeout(Duration::from_secs(config.default_timeout_secs)))
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn is_allowed(&self, tool: &str) -> bool {
        self.check(tool).is_ok()
    }

    pub fn check(&self, tool: &str) -> std::result::Result<(), ToolError> {
        if self.deny.is_match(tool) {
            return Err(ToolError::PermissionDenied(format!(
                "Tool '{}' matches a deny pattern",
                tool
            )));
        }
        if let Some(allow) = &self.allow
            && !allow.is_match(tool)
        {
            return Err(ToolError::PermissionDenied(format!(
                "Tool '{}' is not in the allow list",
                tool
            )));
        }
        Ok(())
    }
}

fn build_set<I>(patterns: I) -> Result<GlobSet>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Configuration(format!("Invalid tool pattern '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Configuration(format!("Invalid tool patterns: {}", e)))
}
