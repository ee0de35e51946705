//! Provider factory
//!
//! Turns entries of the config provider table into adapters. Catalog data for
//! the entry's backend fills in whatever the entry leaves out: default model,
//! context size, capabilities, base URL, command.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use super::{
    catalog, Capability, ExternalSessionProvider, LocalEndpointProvider, ProviderAdapter, ProviderDescriptor,
    ProviderKind, ProviderRegistry, RemoteApiProvider,
};
use crate::config::{Config, ProviderConfig};
use crate::error::{Error, Result};

/// Context size used when neither config nor catalog gives one
const FALLBACK_CONTEXT_TOKENS: usize = 8192;

pub struct ProviderFactory;

impl ProviderFactory {
    /// Descriptor for a provider table entry
    pub fn descriptor(id: &str, config: &ProviderConfig) -> Result<ProviderDescriptor> {
        let backend_id = config.backend_id();
        let backend = catalog::get(backend_id);

        if let Some(backend) = backend
            && backend.kind != config.kind
        {
            return Err(Error::Configuration(format!(
                "Provider '{}' is kind '{}' but backend '{}' is '{}'",
                id, config.kind, backend_id, backend.kind
            )));
        }

        let default_model = config
            .model
            .clone()
            .or_else(|| backend.map(|b| b.default_model.clone()))
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "Provider '{}' needs a model: backend '{}' is not in the catalog",
                    id, backend_id
                ))
            })?;

        let max_context_tokens = config
            .max_context_tokens
            .or_else(|| backend.map(|b| b.context))
            .unwrap_or(FALLBACK_CONTEXT_TOKENS);

        let capabilities: BTreeSet<Capability> = match &config.capabilities {
            Some(caps) => caps.iter().copied().collect(),
            None => backend.map(|b| b.capabilities.clone()).unwrap_or_default(),
        };

        let descriptor = ProviderDescriptor::new(id, config.kind, default_model, max_context_tokens)
            .with_capabilities(capabilities)
            .with_task_types(config.task_types.iter().cloned());
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Build one adapter
    pub fn build(id: &str, config: &ProviderConfig) -> Result<Arc<dyn ProviderAdapter>> {
        let descriptor = Self::descriptor(id, config)?;
        let backend_id = config.backend_id().to_string();

        let adapter: Arc<dyn ProviderAdapter> = match config.kind {
            ProviderKind::Remote => {
                Arc::new(RemoteApiProvider::new(descriptor, backend_id, config.resolve_api_key()))
            }
            ProviderKind::Local => {
                let base_url = config
                    .base_url
                    .clone()
                    .or_else(|| catalog::base_url(&backend_id).map(String::from))
                    .ok_or_else(|| {
                        Error::Configuration(format!("Local provider '{}' needs base_url", id))
                    })?;
                Arc::new(LocalEndpointProvider::new(descriptor, base_url, config.api_style))
            }
            ProviderKind::Session => {
                let command = config
                    .command
                    .clone()
                    .or_else(|| catalog::get(&backend_id).and_then(|b| b.command.clone()))
                    .ok_or_else(|| {
                        Error::Configuration(format!("Session provider '{}' needs command", id))
                    })?;
                Arc::new(ExternalSessionProvider::new(
                    descriptor,
                    command,
                    config.args.clone(),
                    backend_id,
                ))
            }
        };

        debug!(provider = %id, kind = %config.kind, "Built provider");
        Ok(adapter)
    }

    /// Registry holding every enabled provider of the config.
    ///
    /// An enabled entry that cannot be built fails the whole load; disable it
    /// to keep it in the file.
    pub fn build_registry(config: &Config) -> Result<ProviderRegistry> {
        let mut registry = ProviderRegistry::new()
            .with_health_ttl(Duration::from_secs(config.router.health_ttl_secs));

        for (id, provider_config) in &config.providers {
            if !provider_config.enabled {
                debug!(provider = %id, "Provider disabled, not registering");
                continue;
            }
            let adapter = Self::build(id, provider_config).inspect_err(|e| {
                error!(provider = %id, error = %e, "Invalid provider configuration");
            })?;
            registry.register(adapter)?;
        }

        Ok(registry)
    }
}
