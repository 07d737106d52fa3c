//! Provider registry
//!
//! Maps provider ids to their implementations. The registry is an explicit
//! value owned by the application rather than process-global state, so tests
//! and multiple stores can each hold their own.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::{StorageError, StorageResult};
use crate::models::{ProviderDescriptor, ProviderId};

use super::provider::StorageProvider;

/// Registry of available storage providers
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: BTreeMap<ProviderId, Arc<dyn StorageProvider>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its descriptor id
    ///
    /// Registering an id twice replaces the earlier provider.
    pub fn register(&mut self, provider: Arc<dyn StorageProvider>) {
        let id = provider.descriptor().id.clone();
        if self.providers.insert(id.clone(), provider).is_some() {
            warn!(provider = %id, "Replacing already registered storage provider");
        }
    }

    /// Look up a provider
    pub fn get(&self, id: &ProviderId) -> StorageResult<Arc<dyn StorageProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::ProviderNotRegistered(id.to_string()))
    }

    /// Whether a provider is registered
    pub fn contains(&self, id: &ProviderId) -> bool {
        self.providers.contains_key(id)
    }

    /// Descriptors of every registered provider, ordered by id
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        self.providers
            .values()
            .map(|p| p.descriptor().clone())
            .collect()
    }

    /// Registered ids, ordered
    pub fn ids(&self) -> Vec<ProviderId> {
        self.providers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryProvider;

    #[test]
    fn test_register_and_get() {
        let mut registry = ProviderRegistry::new();
        assert!(registry.is_empty());

        registry.register(Arc::new(MemoryProvider::new(ProviderId::local())));
        registry.register(Arc::new(MemoryProvider::new(ProviderId::remote()).requiring_auth()));

        assert!(registry.contains(&ProviderId::local()));
        let remote = registry.get(&ProviderId::remote()).unwrap();
        assert!(remote.descriptor().requires_auth);
        assert_eq!(registry.ids(), vec![ProviderId::local(), ProviderId::remote()]);
        assert_eq!(registry.descriptors().len(), 2);
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        let err = registry.get(&ProviderId::new("dropbox")).err().unwrap();
        assert_eq!(err, StorageError::ProviderNotRegistered("dropbox".into()));
    }

    #[test]
    fn test_reregister_replaces() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(MemoryProvider::new(ProviderId::local())));
        registry.register(Arc::new(MemoryProvider::new(ProviderId::local()).requiring_auth()));

        assert_eq!(registry.ids().len(), 1);
        assert!(registry.get(&ProviderId::local()).unwrap().descriptor().requires_auth);
    }
}
