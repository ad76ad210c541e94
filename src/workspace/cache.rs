//! Lookup caches owned by a workspace handle.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::config::ComposeConfig;
use crate::errors::Result;
use crate::types::{ComputeTarget, Datastore};

use super::WorkspaceContext;

#[derive(Debug, Clone)]
enum ComputeEntry {
    Found(ComputeTarget),
    /// Lookup found nothing at this instant.
    Missing(Instant),
}

/// Wraps a workspace with a per-name compute cache and an expiry-free
/// default-datastore cache.
///
/// Found computes are kept until [`invalidate_computes`] is called; misses
/// are retried once the negative TTL has elapsed. The default datastore is
/// looked up once and kept until [`invalidate_default_datastore`].
///
/// [`invalidate_computes`]: CachedWorkspace::invalidate_computes
/// [`invalidate_default_datastore`]: CachedWorkspace::invalidate_default_datastore
#[derive(Debug)]
pub struct CachedWorkspace<W> {
    inner: W,
    negative_ttl: Duration,
    computes: RwLock<FxHashMap<String, ComputeEntry>>,
    default_datastore: RwLock<Option<Option<Datastore>>>,
}

impl<W: WorkspaceContext> CachedWorkspace<W> {
    pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(60);

    pub fn new(inner: W) -> Self {
        Self {
            inner,
            negative_ttl: Self::DEFAULT_NEGATIVE_TTL,
            computes: RwLock::new(FxHashMap::default()),
            default_datastore: RwLock::new(None),
        }
    }

    /// Cache with the negative TTL taken from `config`.
    pub fn from_config(inner: W, config: &ComposeConfig) -> Self {
        Self::new(inner).with_negative_ttl(Duration::from_secs(config.compute_negative_cache_ttl_secs))
    }

    pub fn with_negative_ttl(mut self, ttl: Duration) -> Self {
        self.negative_ttl = ttl;
        self
    }

    pub fn inner(&self) -> &W {
        &self.inner
    }

    /// Fill the compute cache from one listing call.
    pub fn cache_all_computes(&self) -> Result<usize> {
        let computes = self.inner.list_computes()?;
        let count = computes.len();
        let mut cache = self.computes.write();
        for compute in computes {
            cache.insert(compute.name.clone(), ComputeEntry::Found(compute));
        }
        tracing::debug!(workspace = %self.inner.name(), count, "cached all computes");
        Ok(count)
    }

    pub fn invalidate_computes(&self) {
        self.computes.write().clear();
    }

    pub fn invalidate_default_datastore(&self) {
        *self.default_datastore.write() = None;
    }
}

impl<W: WorkspaceContext> WorkspaceContext for CachedWorkspace<W> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get_compute_by_name(&self, name: &str) -> Result<Option<ComputeTarget>> {
        match self.computes.read().get(name) {
            Some(ComputeEntry::Found(compute)) => return Ok(Some(compute.clone())),
            Some(ComputeEntry::Missing(at)) if at.elapsed() < self.negative_ttl => return Ok(None),
            _ => {}
        }

        let found = self.inner.get_compute_by_name(name)?;
        let entry = match &found {
            Some(compute) => ComputeEntry::Found(compute.clone()),
            None => ComputeEntry::Missing(Instant::now()),
        };
        self.computes.write().insert(name.to_string(), entry);
        Ok(found)
    }

    fn get_default_datastore(&self) -> Result<Option<Datastore>> {
        if let Some(cached) = self.default_datastore.read().as_ref() {
            return Ok(cached.clone());
        }
        let datastore = self.inner.get_default_datastore()?;
        *self.default_datastore.write() = Some(datastore.clone());
        Ok(datastore)
    }

    fn list_computes(&self) -> Result<Vec<ComputeTarget>> {
        self.inner.list_computes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::InMemoryWorkspace;

    #[test]
    fn test_found_compute_is_cached() {
        let ws = InMemoryWorkspace::new("ws").with_compute(ComputeTarget::new("cpu", "AmlCompute"));
        let cached = CachedWorkspace::new(ws);
        assert!(cached.get_compute_by_name("cpu").unwrap().is_some());
        assert!(cached.get_compute_by_name("cpu").unwrap().is_some());
        assert_eq!(cached.inner().compute_lookups(), 1);
    }

    #[test]
    fn test_negative_entries_expire() {
        let ws = InMemoryWorkspace::new("ws");
        let cached = CachedWorkspace::new(ws);
        assert!(cached.get_compute_by_name("gpu").unwrap().is_none());
        cached.inner().add_compute(ComputeTarget::new("gpu", "AmlCompute"));
        // still inside the negative TTL
        assert!(cached.get_compute_by_name("gpu").unwrap().is_none());
        assert_eq!(cached.inner().compute_lookups(), 1);

        let ws = InMemoryWorkspace::new("ws");
        let cached = CachedWorkspace::new(ws).with_negative_ttl(Duration::ZERO);
        assert!(cached.get_compute_by_name("gpu").unwrap().is_none());
        cached.inner().add_compute(ComputeTarget::new("gpu", "AmlCompute"));
        assert!(cached.get_compute_by_name("gpu").unwrap().is_some());
        assert_eq!(cached.inner().compute_lookups(), 2);
    }

    #[test]
    fn test_cache_all_computes() {
        let ws = InMemoryWorkspace::new("ws")
            .with_compute(ComputeTarget::new("a", "AmlCompute"))
            .with_compute(ComputeTarget::new("b", "Kubernetes"));
        let cached = CachedWorkspace::new(ws);
        assert_eq!(cached.cache_all_computes().unwrap(), 2);
        assert_eq!(cached.get_compute_by_name("b").unwrap().unwrap().compute_type, "Kubernetes");
        assert_eq!(cached.inner().compute_lookups(), 0);
    }

    #[test]
    fn test_default_datastore_needs_explicit_invalidation() {
        let ws = InMemoryWorkspace::new("ws").with_default_datastore(Datastore::blob("first"));
        let cached = CachedWorkspace::new(ws);
        assert_eq!(cached.get_default_datastore().unwrap().unwrap().name, "first");
        cached.inner().set_default_datastore(Some(Datastore::blob("second")));
        assert_eq!(cached.get_default_datastore().unwrap().unwrap().name, "first");
        cached.invalidate_default_datastore();
        assert_eq!(cached.get_default_datastore().unwrap().unwrap().name, "second");
    }

    #[test]
    fn test_from_config_ttl() {
        let config = ComposeConfig::default().with_compute_negative_cache_ttl_secs(5);
        let cached = CachedWorkspace::from_config(InMemoryWorkspace::new("ws"), &config);
        assert_eq!(cached.negative_ttl, Duration::from_secs(5));
    }
}
