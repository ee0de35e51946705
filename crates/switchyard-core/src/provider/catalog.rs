//! Backend catalog: static defaults for every known backend
//!
//! Loads backend data from embedded JSON at compile time. The catalog fills in
//! descriptor defaults (context size, capabilities, default model) and is the
//! fallback model list when live discovery fails.

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::LazyLock;

use super::{Capability, ProviderKind};

/// Embedded JSON data
const PROVIDERS_JSON: &str = include_str!("providers.json");

/// Static description of one backend
#[derive(Debug, Clone, Deserialize)]
pub struct Backend {
    #[serde(skip)]
    pub id: String,
    pub name: String,
    pub kind: ProviderKind,
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Executable for session backends
    #[serde(default)]
    pub command: Option<String>,
    pub context: usize,
    pub default_model: String,
    pub models: Vec<String>,
    pub capabilities: BTreeSet<Capability>,
}

#[derive(Deserialize)]
struct RawCatalog {
    backends: HashMap<String, Backend>,
}

static CATALOG: LazyLock<HashMap<String, Backend>> = LazyLock::new(|| {
    let raw: RawCatalog =
        serde_json::from_str(PROVIDERS_JSON).expect("failed to parse providers.json");

    raw.backends
        .into_iter()
        .map(|(id, mut backend)| {
            backend.id = id.clone();
            (id, backend)
        })
        .collect()
});

/// Get a backend by ID
pub fn get(backend_id: &str) -> Option<&'static Backend> {
    CATALOG.get(backend_id)
}

/// All backend IDs, sorted
pub fn ids() -> Vec<&'static str> {
    let mut ids: Vec<_> = CATALOG.keys().map(|s| s.as_str()).collect();
    ids.sort_unstable();
    ids
}

pub fn default_model(backend_id: &str) -> Option<&'static str> {
    get(backend_id).map(|b| b.default_model.as_str())
}

pub fn api_key_env(backend_id: &str) -> Option<&'static str> {
    get(backend_id).and_then(|b| b.api_key_env.as_deref())
}

pub fn base_url(backend_id: &str) -> Option<&'static str> {
    get(backend_id).and_then(|b| b.base_url.as_deref())
}

pub fn context_window(backend_id: &str) -> Option<usize> {
    get(backend_id).map(|b| b.context)
}

/// Known models for a backend; empty for unknown backends
pub fn models(backend_id: &str) -> Vec<String> {
    get(backend_id).map(|b| b.models.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_loads() {
        assert!(get("anthropic").is_some());
        assert!(get("openai").is_some());
        assert!(get("gemini").is_some());
        assert!(get("ollama").is_some());
        assert!(get("nonexistent").is_none());
    }

    #[test]
    fn test_every_backend_is_consistent() {
        for id in ids() {
            let backend = get(id).unwrap();
            assert_eq!(backend.id, id);
            assert!(backend.context > 0, "{} has no context size", id);
            assert!(
                backend.models.contains(&backend.default_model),
                "{} default model missing from its model list",
                id
            );
            match backend.kind {
                ProviderKind::Remote => assert!(backend.api_key_env.is_some(), "{}", id),
                ProviderKind::Local => assert!(backend.base_url.is_some(), "{}", id),
                ProviderKind::Session => assert!(backend.command.is_some(), "{}", id),
            }
        }
    }

    #[test]
    fn test_lookups() {
        assert_eq!(api_key_env("anthropic"), Some("ANTHROPIC_API_KEY"));
        assert_eq!(api_key_env("openrouter"), Some("OPENROUTER_API_KEY"));
        assert_eq!(base_url("ollama"), Some("http://localhost:11434"));
        assert_eq!(context_window("gemini"), Some(1_000_000));
        assert!(default_model("anthropic").unwrap().contains("claude"));
        assert!(models("unknown").is_empty());
    }
}
