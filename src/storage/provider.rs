//! Storage provider contract
//!
//! Every backend implements [`StorageProvider`]. Optional behaviour is
//! discovered through explicit capability queries ([`StorageProvider::encryption`],
//! [`StorageProvider::change_feed`]) that return `None` when unsupported.
//!
//! Failures during `load`/`save`/`delete` are recorded in the provider's
//! [`SyncStatus`] so the UI can show them, in addition to whatever the
//! method itself returns.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::crypto::SecureString;
use crate::error::StorageResult;
use crate::models::{
    BudgetDataEnvelope, EncryptionState, ProviderDescriptor, ProviderIdentity, SyncStatus,
};

use super::kv::{ContextId, StorageEvent};

/// Callback invoked on every sync status transition
pub type SyncListener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;

/// A storage backend
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Static metadata
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Whether the provider has the configuration and capabilities it needs
    fn is_available(&self) -> bool;

    /// Whether the provider currently holds valid credentials
    ///
    /// Providers without authentication always report `true`.
    fn is_authenticated(&self) -> bool;

    /// Run the provider's authentication flow
    async fn authenticate(&self) -> StorageResult<()>;

    /// Drop credentials and any cached identifiers
    async fn sign_out(&self) -> StorageResult<()>;

    /// Who the provider is acting as, if known
    fn identity(&self) -> Option<ProviderIdentity>;

    /// Load and migrate the stored envelope
    ///
    /// `Ok(None)` means nothing has been stored yet.
    async fn load(&self) -> StorageResult<Option<BudgetDataEnvelope>>;

    /// Persist the envelope, returning whether it succeeded
    async fn save(&self, envelope: &BudgetDataEnvelope) -> bool;

    /// Remove the stored envelope, returning whether it succeeded
    async fn delete(&self) -> bool;

    /// Current sync status
    fn sync_status(&self) -> SyncStatus;

    /// Register a listener for sync status transitions
    fn on_sync_status_change(&self, listener: SyncListener) -> Subscription;

    /// Whether the provider can encrypt data at rest
    fn supports_encryption(&self) -> bool {
        self.descriptor().supports_encryption
    }

    /// Encryption controls, for providers that support encryption
    fn encryption(&self) -> Option<&dyn EncryptionControl> {
        None
    }

    /// Notifications of writes made by other contexts, for providers that see them
    fn change_feed(&self) -> Option<ChangeFeed> {
        None
    }
}

/// Passphrase and at-rest encryption management
#[async_trait]
pub trait EncryptionControl: Send + Sync {
    /// Persisted flags plus whether a passphrase is held in memory
    fn encryption_state(&self) -> StorageResult<EncryptionState>;

    /// Hold a passphrase in memory for this session
    fn set_passphrase(&self, passphrase: SecureString);

    /// Forget the in-memory passphrase
    fn clear_passphrase(&self);

    /// Encrypt existing data in place and keep it encrypted from now on
    async fn enable_encryption(&self, passphrase: SecureString) -> StorageResult<()>;

    /// Decrypt existing data in place and store plaintext from now on
    async fn disable_encryption(&self) -> StorageResult<()>;
}

struct HubInner {
    status: SyncStatus,
    listeners: Vec<(u64, SyncListener)>,
    next_id: u64,
}

/// Holder of a provider's sync status and its listeners
#[derive(Clone)]
pub struct SyncStatusHub {
    inner: Arc<Mutex<HubInner>>,
}

impl Default for SyncStatusHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatusHub {
    /// Create a hub in the idle state
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                status: SyncStatus::idle(),
                listeners: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Current status
    pub fn get(&self) -> SyncStatus {
        self.lock().status.clone()
    }

    /// Replace the status and notify every listener
    pub fn set(&self, status: SyncStatus) {
        let listeners: Vec<SyncListener> = {
            let mut inner = self.lock();
            inner.status = status.clone();
            inner.listeners.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        // Called outside the lock so listeners may read the hub
        for listener in listeners {
            listener(&status);
        }
    }

    /// Mark an operation as in flight
    pub fn begin(&self) {
        let previous = self.get();
        self.set(SyncStatus::syncing(&previous));
    }

    /// Mark a successful sync now
    pub fn synced(&self) {
        self.set(SyncStatus::synced(Utc::now()));
    }

    /// Record a failure, choosing `offline` for unreachable backends
    pub fn failed(&self, error: &crate::error::StorageError) {
        let previous = self.get();
        let status = if error.is_offline() {
            SyncStatus::offline(&previous, error.to_string())
        } else {
            SyncStatus::error(&previous, error.to_string())
        };
        self.set(status);
    }

    /// Register a listener; it stays registered until the subscription is dropped
    pub fn subscribe(&self, listener: SyncListener) -> Subscription {
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, listener));
        Subscription {
            hub: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock().listeners.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration handle returned by [`SyncStatusHub::subscribe`]
///
/// Dropping it, or calling [`Subscription::unsubscribe`], removes the listener.
#[must_use = "dropping a Subscription unregisters its listener"]
pub struct Subscription {
    hub: Weak<Mutex<HubInner>>,
    id: u64,
}

impl Subscription {
    /// Remove the listener now
    pub fn unsubscribe(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            let mut inner = hub.lock().unwrap_or_else(PoisonError::into_inner);
            inner.listeners.retain(|(id, _)| *id != self.id);
        }
    }
}

/// Stream of "another context changed my data" signals
///
/// Each signal also marks the provider as synced, since the backend now holds
/// a state newer than ours. The signal only prompts a re-read; it carries no
/// data and is not a synchronisation primitive.
pub struct ChangeFeed {
    events: broadcast::Receiver<StorageEvent>,
    context: ContextId,
    keys: HashSet<String>,
    status: SyncStatusHub,
}

impl ChangeFeed {
    /// Watch `keys` for writes not made by `context`
    pub fn new(
        events: broadcast::Receiver<StorageEvent>,
        context: ContextId,
        keys: impl IntoIterator<Item = String>,
        status: SyncStatusHub,
    ) -> Self {
        Self {
            events,
            context,
            keys: keys.into_iter().collect(),
            status,
        }
    }

    /// Wait for the next foreign change; `false` once the store is gone
    pub async fn changed(&mut self) -> bool {
        loop {
            match self.events.recv().await {
                Ok(event) if event.origin != self.context && self.keys.contains(&event.key) => {
                    self.status.synced();
                    return true;
                }
                Ok(_) => continue,
                // Missed events may have included ours; re-read to be safe
                Err(RecvError::Lagged(_)) => {
                    self.status.synced();
                    return true;
                }
                Err(RecvError::Closed) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::models::SyncState;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(counter: Arc<AtomicUsize>) -> SyncListener {
        Arc::new(move |_status: &SyncStatus| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_hub_starts_idle() {
        assert_eq!(SyncStatusHub::new().get().state, SyncState::Idle);
    }

    #[test]
    fn test_listener_notified_until_dropped() {
        let hub = SyncStatusHub::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let subscription = hub.subscribe(counting_listener(counter.clone()));

        hub.begin();
        hub.synced();
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        subscription.unsubscribe();
        hub.synced();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(hub.listener_count(), 0);
    }

    #[test]
    fn test_failed_picks_offline() {
        let hub = SyncStatusHub::new();
        hub.failed(&StorageError::offline("unreachable"));
        assert_eq!(hub.get().state, SyncState::Offline);

        hub.failed(&StorageError::remote("500"));
        assert_eq!(hub.get().state, SyncState::Error);
    }

    #[test]
    fn test_listener_can_read_hub() {
        let hub = SyncStatusHub::new();
        let inner = hub.clone();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();
        let _subscription = hub.subscribe(Arc::new(move |_status: &SyncStatus| {
            *seen_clone.lock().unwrap() = Some(inner.get().state);
        }));

        hub.synced();
        assert_eq!(*seen.lock().unwrap(), Some(SyncState::Synced));
    }

    #[tokio::test]
    async fn test_change_feed_ignores_own_context() {
        let (tx, rx) = broadcast::channel(8);
        let me = ContextId::new();
        let other = ContextId::new();
        let hub = SyncStatusHub::new();
        let mut feed = ChangeFeed::new(rx, me, vec!["data".to_string()], hub.clone());

        tx.send(StorageEvent { key: "data".into(), origin: me, present: true }).unwrap();
        tx.send(StorageEvent { key: "other".into(), origin: other, present: true }).unwrap();
        tx.send(StorageEvent { key: "data".into(), origin: other, present: true }).unwrap();

        assert!(feed.changed().await);
        assert_eq!(hub.get().state, SyncState::Synced);

        drop(tx);
        assert!(!feed.changed().await);
    }
}
