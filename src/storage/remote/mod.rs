//! Remote drive provider
//!
//! Stores the envelope as one JSON file in the application-private area of
//! the user's remote storage account. The file id is tracked for the session
//! and a lookup by name always precedes a create, so retrying a save never
//! produces a second file.

pub mod auth;
pub mod client;

pub use auth::{AccessToken, ConsentFlow, ConsentRequest, SessionCache, TokenManager, TokenState};
pub use client::{DriveObjectStore, MemoryObjectStore, RemoteFile, RemoteObjectStore};

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::RemoteSettings;
use crate::error::{StorageError, StorageResult};
use crate::models::{
    migrate_envelope_str, BudgetDataEnvelope, ProviderDescriptor, ProviderId, ProviderIdentity,
    SyncStatus,
};

use super::provider::{StorageProvider, Subscription, SyncListener, SyncStatusHub};

/// Provider over a user-authorized remote object store
pub struct RemoteProvider {
    descriptor: ProviderDescriptor,
    settings: RemoteSettings,
    objects: Arc<dyn RemoteObjectStore>,
    consent: Arc<dyn ConsentFlow>,
    tokens: TokenManager,
    file_id: Mutex<Option<String>>,
    identity: Mutex<Option<ProviderIdentity>>,
    // One save at a time, so two first writes cannot both create the file
    write_lock: tokio::sync::Mutex<()>,
    status: SyncStatusHub,
}

impl RemoteProvider {
    pub fn new(
        settings: RemoteSettings,
        objects: Arc<dyn RemoteObjectStore>,
        consent: Arc<dyn ConsentFlow>,
        session_cache: Option<SessionCache>,
    ) -> Self {
        Self {
            descriptor: ProviderDescriptor {
                id: ProviderId::remote(),
                display_name: "Remote drive".to_string(),
                requires_auth: true,
                supports_realtime_sync: false,
                supports_encryption: false,
            },
            settings,
            objects,
            consent,
            tokens: TokenManager::new(session_cache),
            file_id: Mutex::new(None),
            identity: Mutex::new(None),
            write_lock: tokio::sync::Mutex::new(()),
            status: SyncStatusHub::new(),
        }
    }

    /// Current session state
    pub fn token_state(&self) -> TokenState {
        self.tokens.state()
    }

    /// Remote file id remembered for this session
    pub fn file_id(&self) -> Option<String> {
        self.file_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_file(&self, file_id: Option<String>) {
        *self.file_id.lock().unwrap_or_else(PoisonError::into_inner) = file_id;
    }

    fn client_id(&self) -> Option<&str> {
        self.settings
            .client_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    fn consent_request(&self) -> StorageResult<ConsentRequest> {
        let client_id = self.client_id().ok_or_else(|| {
            StorageError::ProviderUnavailable(
                "Remote storage has no application client id configured".to_string(),
            )
        })?;
        Ok(ConsentRequest {
            client_id: client_id.to_string(),
            scope: self.settings.scope.clone(),
            auth_url: self.settings.auth_url.clone(),
        })
    }

    /// Record a failure; an authentication failure also ends the session
    fn fail(&self, operation: &str, error: &StorageError) {
        if error.requires_authentication() {
            self.tokens.clear();
            self.remember_file(None);
        }
        warn!(operation, error = %error, "Remote storage operation failed");
        self.status.failed(error);
    }

    /// The session's file id, looking it up by name if not yet known
    async fn locate_file(&self, token: &str) -> StorageResult<Option<String>> {
        if let Some(id) = self.file_id() {
            return Ok(Some(id));
        }
        let found = self
            .objects
            .find_file(token, &self.settings.file_name)
            .await?
            .map(|file| file.id);
        self.remember_file(found.clone());
        Ok(found)
    }

    async fn read_envelope(&self) -> StorageResult<Option<BudgetDataEnvelope>> {
        let token = self.tokens.access_token()?;
        let Some(file_id) = self.locate_file(&token).await? else {
            return Ok(None);
        };

        match self.objects.download(&token, &file_id).await? {
            Some(text) => migrate_envelope_str(&text, &self.descriptor.id).map(Some),
            None => {
                // Removed from another device since we looked it up
                self.remember_file(None);
                Ok(None)
            }
        }
    }

    async fn write_envelope(&self, envelope: &BudgetDataEnvelope) -> StorageResult<()> {
        let token = self.tokens.access_token()?;
        let contents = serde_json::to_string(envelope)?;

        if let Some(file_id) = self.locate_file(&token).await? {
            if self.objects.update_file(&token, &file_id, &contents).await? {
                return Ok(());
            }
            debug!(file_id = %file_id, "Remote file vanished, recreating");
            self.remember_file(None);
        }

        let file = self
            .objects
            .create_file(&token, &self.settings.file_name, &contents)
            .await?;
        info!(file_id = %file.id, "Created remote budget file");
        self.remember_file(Some(file.id));
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for RemoteProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.client_id().is_some()
    }

    fn is_authenticated(&self) -> bool {
        self.tokens.is_active()
    }

    async fn authenticate(&self) -> StorageResult<()> {
        let request = self.consent_request()?;
        let token = self.consent.request_access(&request).await.map_err(|e| match e {
            StorageError::AuthenticationFailed(_) | StorageError::Network { .. } => e,
            other => StorageError::AuthenticationFailed(other.to_string()),
        })?;

        let identity = match self.objects.user_identity(&token.token).await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "Could not fetch remote account identity");
                None
            }
        };

        info!(expires_at = %token.expires_at, "Signed in to remote storage");
        self.tokens.set(token);
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = identity;
        Ok(())
    }

    async fn sign_out(&self) -> StorageResult<()> {
        if let Some(token) = self.tokens.take() {
            if let Err(e) = self.objects.revoke(&token.token).await {
                warn!(error = %e, "Token revocation failed, discarding token anyway");
            }
        }
        self.remember_file(None);
        *self.identity.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.status.set(SyncStatus::idle());
        info!("Signed out of remote storage");
        Ok(())
    }

    fn identity(&self) -> Option<ProviderIdentity> {
        if !self.is_authenticated() {
            return None;
        }
        self.identity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn load(&self) -> StorageResult<Option<BudgetDataEnvelope>> {
        self.status.begin();
        match self.read_envelope().await {
            Ok(envelope) => {
                self.status.synced();
                Ok(envelope)
            }
            Err(e) => {
                self.fail("load", &e);
                Err(e)
            }
        }
    }

    async fn save(&self, envelope: &BudgetDataEnvelope) -> bool {
        let _guard = self.write_lock.lock().await;
        self.status.begin();
        match self.write_envelope(envelope).await {
            Ok(()) => {
                debug!(transactions = envelope.transaction_count(), "Saved remote budget data");
                self.status.synced();
                true
            }
            Err(e) => {
                self.fail("save", &e);
                false
            }
        }
    }

    async fn delete(&self) -> bool {
        let _guard = self.write_lock.lock().await;
        let result = async {
            let token = self.tokens.access_token()?;
            if let Some(file_id) = self.locate_file(&token).await? {
                self.objects.delete_file(&token, &file_id).await?;
            }
            Ok::<_, StorageError>(())
        }
        .await;

        match result {
            Ok(()) => {
                self.remember_file(None);
                info!("Deleted remote budget data");
                self.status.set(SyncStatus::idle());
                true
            }
            Err(e) => {
                self.fail("delete", &e);
                false
            }
        }
    }

    fn sync_status(&self) -> SyncStatus {
        self.status.get()
    }

    fn on_sync_status_change(&self, listener: SyncListener) -> Subscription {
        self.status.subscribe(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Amount, SyncState, Transaction, TransactionKind};
    use chrono::NaiveDate;

    struct GrantingConsent;

    #[async_trait]
    impl ConsentFlow for GrantingConsent {
        async fn request_access(&self, _request: &ConsentRequest) -> StorageResult<AccessToken> {
            Ok(AccessToken::new("granted-token", 3600))
        }
    }

    struct DenyingConsent;

    #[async_trait]
    impl ConsentFlow for DenyingConsent {
        async fn request_access(&self, _request: &ConsentRequest) -> StorageResult<AccessToken> {
            Err(StorageError::Validation("user closed the window".into()))
        }
    }

    fn settings() -> RemoteSettings {
        RemoteSettings {
            client_id: Some("test-client".into()),
            ..RemoteSettings::default()
        }
    }

    fn provider_with(objects: Arc<MemoryObjectStore>) -> RemoteProvider {
        RemoteProvider::new(settings(), objects, Arc::new(GrantingConsent), None)
    }

    fn envelope(count: u32) -> BudgetDataEnvelope {
        let mut envelope = BudgetDataEnvelope::empty(ProviderId::remote());
        envelope.upsert_transactions(
            (1..=count)
                .map(|day| {
                    Transaction::new(
                        NaiveDate::from_ymd_opt(2025, 4, day).unwrap(),
                        Amount::from_cents(500),
                        TransactionKind::Expense,
                    )
                })
                .collect(),
        );
        envelope
    }

    #[test]
    fn test_unavailable_without_client_id() {
        let provider = RemoteProvider::new(
            RemoteSettings::default(),
            Arc::new(MemoryObjectStore::new()),
            Arc::new(GrantingConsent),
            None,
        );
        assert!(!provider.is_available());

        let blank = RemoteProvider::new(
            RemoteSettings {
                client_id: Some("  ".into()),
                ..RemoteSettings::default()
            },
            Arc::new(MemoryObjectStore::new()),
            Arc::new(GrantingConsent),
            None,
        );
        assert!(!blank.is_available());
    }

    #[tokio::test]
    async fn test_requires_authentication() {
        let provider = provider_with(Arc::new(MemoryObjectStore::new()));
        assert!(!provider.is_authenticated());
        assert!(provider.load().await.unwrap_err().requires_authentication());
        assert!(!provider.save(&envelope(1)).await);
        assert_eq!(provider.sync_status().state, SyncState::Error);
    }

    #[tokio::test]
    async fn test_authenticate_fetches_identity() {
        let provider = provider_with(Arc::new(MemoryObjectStore::new()));
        provider.authenticate().await.unwrap();
        assert!(provider.is_authenticated());
        assert_eq!(
            provider.identity().unwrap().email.as_deref(),
            Some("test@example.com")
        );
    }

    #[tokio::test]
    async fn test_denied_consent_is_authentication_failure() {
        let provider = RemoteProvider::new(
            settings(),
            Arc::new(MemoryObjectStore::new()),
            Arc::new(DenyingConsent),
            None,
        );
        let err = provider.authenticate().await.unwrap_err();
        assert!(err.requires_authentication());
        assert!(!provider.is_authenticated());
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let provider = provider_with(Arc::new(MemoryObjectStore::new()));
        provider.authenticate().await.unwrap();
        assert!(provider.load().await.unwrap().is_none());
        assert_eq!(provider.sync_status().state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_save_creates_once_then_updates() {
        let objects = Arc::new(MemoryObjectStore::new());
        let provider = provider_with(objects.clone());
        provider.authenticate().await.unwrap();

        assert!(provider.save(&envelope(1)).await);
        assert!(provider.save(&envelope(2)).await);
        assert!(provider.save(&envelope(2)).await);

        assert_eq!(objects.create_count(), 1);
        assert_eq!(objects.file_count(), 1);
        assert_eq!(objects.update_count(), 2);
        assert_eq!(provider.load().await.unwrap().unwrap().transaction_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_after_lost_create_response_reuses_file() {
        let objects = Arc::new(MemoryObjectStore::new());
        let provider = provider_with(objects.clone());
        provider.authenticate().await.unwrap();

        objects.lose_next_create_response();
        assert!(!provider.save(&envelope(1)).await);
        assert_eq!(provider.sync_status().state, SyncState::Offline);

        assert!(provider.save(&envelope(1)).await);
        assert_eq!(objects.file_count(), 1);
        assert_eq!(objects.create_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_file_found_by_name() {
        let objects = Arc::new(MemoryObjectStore::new());
        let seeded = serde_json::to_string(&envelope(4)).unwrap();
        let file = objects.insert_file(&settings().file_name, &seeded);

        let provider = provider_with(objects.clone());
        provider.authenticate().await.unwrap();
        assert_eq!(provider.load().await.unwrap().unwrap().transaction_count(), 4);
        assert_eq!(provider.file_id(), Some(file.id));
    }

    #[tokio::test]
    async fn test_rejected_token_ends_session() {
        let objects = Arc::new(MemoryObjectStore::new());
        let provider = provider_with(objects.clone());
        provider.authenticate().await.unwrap();

        objects.set_reject_tokens(true);
        assert!(provider.load().await.is_err());
        assert!(!provider.is_authenticated());
        assert_eq!(provider.token_state(), TokenState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_offline_sets_offline_status() {
        let objects = Arc::new(MemoryObjectStore::new());
        let provider = provider_with(objects.clone());
        provider.authenticate().await.unwrap();

        objects.set_offline(true);
        assert!(provider.load().await.unwrap_err().is_offline());
        assert_eq!(provider.sync_status().state, SyncState::Offline);
        assert!(provider.is_authenticated());
    }

    #[tokio::test]
    async fn test_sign_out_revokes_and_clears() {
        let objects = Arc::new(MemoryObjectStore::new());
        let provider = provider_with(objects.clone());
        provider.authenticate().await.unwrap();
        assert!(provider.save(&envelope(1)).await);

        provider.sign_out().await.unwrap();
        assert_eq!(objects.revoked_tokens(), vec!["granted-token".to_string()]);
        assert!(!provider.is_authenticated());
        assert!(provider.file_id().is_none());
        assert!(provider.identity().is_none());
        assert_eq!(provider.sync_status().state, SyncState::Idle);
    }

    #[tokio::test]
    async fn test_sign_out_succeeds_when_revoke_fails() {
        let objects = Arc::new(MemoryObjectStore::new());
        let provider = provider_with(objects.clone());
        provider.authenticate().await.unwrap();

        objects.set_offline(true);
        provider.sign_out().await.unwrap();
        assert!(!provider.is_authenticated());
    }

    #[tokio::test]
    async fn test_delete_removes_file() {
        let objects = Arc::new(MemoryObjectStore::new());
        let provider = provider_with(objects.clone());
        provider.authenticate().await.unwrap();
        assert!(provider.save(&envelope(1)).await);

        assert!(provider.delete().await);
        assert_eq!(objects.file_count(), 0);
        assert!(provider.load().await.unwrap().is_none());
    }
}
