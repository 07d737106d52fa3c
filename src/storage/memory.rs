//! In-memory provider
//!
//! Holds the envelope in process memory. Useful for tests and as a scratch
//! backend; it can be configured to require authentication, to fail saves
//! and to read slowly, so the orchestrator's remote paths can be exercised
//! offline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::models::{BudgetDataEnvelope, ProviderDescriptor, ProviderId, ProviderIdentity, SyncStatus};

use super::provider::{StorageProvider, Subscription, SyncListener, SyncStatusHub};

/// Provider keeping its envelope in memory
pub struct MemoryProvider {
    descriptor: ProviderDescriptor,
    stored: Mutex<Option<BudgetDataEnvelope>>,
    authenticated: AtomicBool,
    fail_saves: AtomicBool,
    saves: AtomicUsize,
    load_delay: Mutex<Duration>,
    status: SyncStatusHub,
}

impl MemoryProvider {
    /// Create an empty provider that needs no authentication
    pub fn new(id: ProviderId) -> Self {
        let display_name = format!("Memory ({})", id);
        Self {
            descriptor: ProviderDescriptor {
                id,
                display_name,
                requires_auth: false,
                supports_realtime_sync: false,
                supports_encryption: false,
            },
            stored: Mutex::new(None),
            authenticated: AtomicBool::new(true),
            fail_saves: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
            load_delay: Mutex::new(Duration::ZERO),
            status: SyncStatusHub::new(),
        }
    }

    /// Require `authenticate` before data can be read or written
    pub fn requiring_auth(mut self) -> Self {
        self.descriptor.requires_auth = true;
        self.authenticated = AtomicBool::new(false);
        self
    }

    /// Start with `envelope` already stored
    pub fn with_envelope(self, envelope: BudgetDataEnvelope) -> Self {
        *self.stored.lock().unwrap_or_else(PoisonError::into_inner) = Some(envelope);
        self
    }

    /// Make subsequent saves fail (or succeed again)
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Hold each load for `delay` after taking its snapshot
    pub fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Number of successful saves so far
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// The envelope currently stored, if any
    pub fn stored(&self) -> Option<BudgetDataEnvelope> {
        self.stored
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check_session(&self) -> StorageResult<()> {
        if self.descriptor.requires_auth && !self.authenticated.load(Ordering::SeqCst) {
            return Err(StorageError::AuthenticationFailed(format!(
                "Not signed in to {}",
                self.descriptor.display_name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        true
    }

    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    async fn authenticate(&self) -> StorageResult<()> {
        self.authenticated.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn sign_out(&self) -> StorageResult<()> {
        if self.descriptor.requires_auth {
            self.authenticated.store(false, Ordering::SeqCst);
        }
        self.status.set(SyncStatus::idle());
        Ok(())
    }

    fn identity(&self) -> Option<ProviderIdentity> {
        self.is_authenticated().then(ProviderIdentity::device)
    }

    async fn load(&self) -> StorageResult<Option<BudgetDataEnvelope>> {
        if let Err(e) = self.check_session() {
            self.status.failed(&e);
            return Err(e);
        }
        self.status.begin();
        let stored = self.stored();
        let delay = *self.load_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.status.synced();
        Ok(stored)
    }

    async fn save(&self, envelope: &BudgetDataEnvelope) -> bool {
        self.status.begin();
        let result = self.check_session().and_then(|_| {
            if self.fail_saves.load(Ordering::SeqCst) {
                Err(StorageError::remote("Simulated save failure"))
            } else {
                Ok(())
            }
        });

        match result {
            Ok(()) => {
                *self.stored.lock().unwrap_or_else(PoisonError::into_inner) = Some(envelope.clone());
                self.saves.fetch_add(1, Ordering::SeqCst);
                self.status.synced();
                true
            }
            Err(e) => {
                self.status.failed(&e);
                false
            }
        }
    }

    async fn delete(&self) -> bool {
        if let Err(e) = self.check_session() {
            self.status.failed(&e);
            return false;
        }
        *self.stored.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.status.set(SyncStatus::idle());
        true
    }

    fn sync_status(&self) -> SyncStatus {
        self.status.get()
    }

    fn on_sync_status_change(&self, listener: SyncListener) -> Subscription {
        self.status.subscribe(listener)
    }
}
