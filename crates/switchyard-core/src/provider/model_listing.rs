//! Model listing with live discovery and catalog fallback

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use super::catalog;
use crate::error::ProviderError;

/// Bound on a live model discovery call
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Static model list for a backend, or just its default model when the
/// backend is not in the catalog
pub fn fallback_models(backend_id: &str, default_model: &str) -> Vec<String> {
    let mut models = catalog::models(backend_id);
    if !models.iter().any(|m| m == default_model) {
        models.insert(0, default_model.to_string());
    }
    models
}

/// Run `discovery` under [`DISCOVERY_TIMEOUT`], falling back to the catalog
/// when it fails, times out, or returns nothing
pub async fn discover_or_fallback<F>(
    provider_id: &str,
    backend_id: &str,
    default_model: &str,
    discovery: F,
) -> Vec<String>
where
    F: Future<Output = Result<Vec<String>, ProviderError>>,
{
    match tokio::time::timeout(DISCOVERY_TIMEOUT, discovery).await {
        Ok(Ok(models)) if !models.is_empty() => models,
        Ok(Ok(_)) => {
            debug!(provider = provider_id, "Model discovery returned nothing, using catalog");
            fallback_models(backend_id, default_model)
        }
        Ok(Err(e)) => {
            debug!(provider = provider_id, error = %e, "Model discovery failed, using catalog");
            fallback_models(backend_id, default_model)
        }
        Err(_) => {
            debug!(provider = provider_id, "Model discovery timed out, using catalog");
            fallback_models(backend_id, default_model)
        }
    }
}
