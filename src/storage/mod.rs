//! Storage layer for the budget store
//!
//! Provides the provider contract and its implementations: the on-device
//! key-value store, the remote drive, and an in-memory provider.

pub mod file_io;
pub mod kv;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod remote;

pub use file_io::write_json_atomic;
pub use kv::{ContextId, KeyValueStore, StorageEvent};
pub use local::LocalProvider;
pub use memory::MemoryProvider;
pub use provider::{
    ChangeFeed, EncryptionControl, StorageProvider, Subscription, SyncListener, SyncStatusHub,
};
pub use registry::ProviderRegistry;
pub use remote::RemoteProvider;

use std::sync::Arc;

use crate::config::{Settings, StorePaths};
use crate::error::StorageResult;
use remote::{ConsentFlow, DriveObjectStore, SessionCache};

/// Open the on-device store and register the standard providers
///
/// The remote provider is always registered; without a configured client id
/// it reports itself unavailable.
pub fn default_registry(
    paths: &StorePaths,
    settings: &Settings,
    consent: Arc<dyn ConsentFlow>,
) -> StorageResult<ProviderRegistry> {
    paths.ensure_directories()?;
    let store = Arc::new(KeyValueStore::open(paths.kv_dir(), settings.local_quota_bytes)?);

    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(LocalProvider::new(
        Arc::clone(&store),
        settings.key_derivation,
    )));
    registry.register(Arc::new(RemoteProvider::new(
        settings.remote.clone(),
        Arc::new(DriveObjectStore::new(&settings.remote)?),
        consent,
        Some(SessionCache::new(store)),
    )));
    Ok(registry)
}
