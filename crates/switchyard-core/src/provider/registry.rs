//! Provider registry with a TTL health cache
//!
//! Adapters are registered once at startup; after that only the health cache
//! changes. Health is checked lazily: the first routing attempt (or an
//! explicit probe) runs `validate`, and the result is trusted for the TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info};

use super::{HealthStatus, ProviderAdapter, ProviderDescriptor};
use crate::error::{Error, Result};

/// Default trust period for a health result
pub const DEFAULT_HEALTH_TTL: Duration = Duration::from_secs(300);

/// Default bound on one `validate` call
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// A health result and when the check that produced it started
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedHealth {
    pub status: HealthStatus,
    pub checked_at: Instant,
}

impl CachedHealth {
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.checked_at.elapsed() < ttl
    }
}

pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ProviderAdapter>>,
    /// Registration order, for stable listings
    order: Vec<String>,
    health: RwLock<HashMap<String, CachedHealth>>,
    health_ttl: Duration,
    probe_timeout: Duration,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            providers: HashMap::new(),
            order: Vec::new(),
            health: RwLock::new(HashMap::new()),
            health_ttl: DEFAULT_HEALTH_TTL,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_health_ttl(mut self, ttl: Duration) -> Self {
        self.health_ttl = ttl;
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn health_ttl(&self) -> Duration {
        self.health_ttl
    }

    /// Register an adapter. Its descriptor is validated and its id must be unused.
    pub fn register(&mut self, provider: Arc<dyn ProviderAdapter>) -> Result<()> {
        let descriptor = provider.descriptor();
        descriptor.validate()?;

        let id = descriptor.id.clone();
        if self.providers.contains_key(&id) {
            return Err(Error::Configuration(format!(
                "Provider '{}' is already registered",
                id
            )));
        }

        debug!(provider = %id, kind = %descriptor.kind, "Registered provider");
        self.order.push(id.clone());
        self.providers.insert(id, provider);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.providers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.providers.contains_key(id)
    }

    /// Ids in registration order
    pub fn ids(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.order
            .iter()
            .filter_map(|id| self.providers.get(id))
            .map(|p| p.descriptor().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Cached result, fresh or not
    pub fn cached_health(&self, id: &str) -> Option<CachedHealth> {
        self.health.read().get(id).cloned()
    }

    /// Store a check result unless a newer one is already cached.
    ///
    /// Returns whether the result was stored.
    pub fn record_health(&self, id: &str, status: HealthStatus, checked_at: Instant) -> bool {
        let mut health = self.health.write();
        if let Some(existing) = health.get(id)
            && existing.checked_at > checked_at
        {
            return false;
        }
        health.insert(id.to_string(), CachedHealth { status, checked_at });
        true
    }

    /// Drop the cached result so the next check probes again
    pub fn invalidate(&self, id: &str) {
        self.health.write().remove(id);
    }

    /// Health for `id`, probing when the cache is missing or stale
    pub async fn check_health(&self, id: &str) -> Result<HealthStatus> {
        if let Some(cached) = self.cached_health(id)
            && cached.is_fresh(self.health_ttl)
        {
            return Ok(cached.status);
        }
        self.probe(id).await
    }

    /// Run `validate` now, bounded by the probe timeout, and cache the result
    pub async fn probe(&self, id: &str) -> Result<HealthStatus> {
        let provider = self
            .get(id)
            .ok_or_else(|| Error::Configuration(format!("Unknown provider '{}'", id)))?;

        let started = Instant::now();
        let status = match tokio::time::timeout(self.probe_timeout, provider.validate()).await {
            Ok(status) => status,
            Err(_) => HealthStatus::unhealthy(format!(
                "Health check timed out after {:?}",
                self.probe_timeout
            )),
        };

        match &status {
            HealthStatus::Healthy => debug!(provider = %id, "Provider healthy"),
            HealthStatus::Unhealthy { reason } => info!(provider = %id, reason = %reason, "Provider unhealthy"),
        }

        self.record_health(id, status.clone(), started);
        Ok(status)
    }

    /// Probe every provider concurrently
    pub async fn probe_all(&self) -> Vec<(String, HealthStatus)> {
        let probes = self.order.iter().map(|id| async move {
            let status = match self.probe(id).await {
                Ok(status) => status,
                Err(e) => HealthStatus::unhealthy(e.to_string()),
            };
            (id.clone(), status)
        });
        join_all(probes).await
    }
}
