//! Storage orchestrator
//!
//! The stateful coordinator the application talks to. It owns the canonical
//! in-memory envelope, selects the active provider, applies mutations, and
//! decides when the provider writes:
//!
//! - providers that need authentication are written on every mutation
//! - everything else is written once per debounce window
//!
//! Saves are serialized through a single gate so a provider never sees two
//! overlapping writes from the same orchestrator. Every local change bumps a
//! revision counter; a re-read prompted by another context is only applied
//! if the revision did not move while the provider was being read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::crypto::SecureString;
use crate::error::{StorageError, StorageResult};
use crate::export::{export_envelope_string, import_envelope_json};
use crate::models::{
    BudgetDataEnvelope, EncryptionState, ProviderDescriptor, ProviderId, SettingsMap, SyncStatus,
    Transaction,
};
use crate::storage::{
    ChangeFeed, ProviderRegistry, StorageProvider, Subscription, SyncListener, SyncStatusHub,
};

use super::debounce::Debouncer;

/// Default quiet period before a debounced write
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Orchestrator tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub debounce: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

impl OrchestratorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            debounce: Duration::from_millis(settings.debounce_ms),
        }
    }
}

/// Observable orchestrator state
#[derive(Debug, Clone)]
pub struct OrchestratorState {
    pub provider_id: ProviderId,
    pub envelope: BudgetDataEnvelope,
    pub is_loading: bool,
    pub last_error: Option<StorageError>,
    pub sync_status: SyncStatus,
    /// The active provider's data has been read; mutations are refused until then
    pub data_loaded: bool,
}

impl OrchestratorState {
    fn empty(provider_id: ProviderId) -> Self {
        Self {
            envelope: BudgetDataEnvelope::empty(provider_id.clone()),
            provider_id,
            is_loading: false,
            last_error: None,
            sync_status: SyncStatus::idle(),
            data_loaded: false,
        }
    }
}

/// What a provider switch did with the data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// Already on the requested provider
    Unchanged,
    /// The destination had transactions and they were kept as-is
    KeptDestination { transactions: usize },
    /// The destination was empty and received the source's transactions
    Migrated { transactions: usize },
    /// Neither side had transactions
    Empty,
}

struct ActiveProvider {
    provider: Arc<dyn StorageProvider>,
    _status: Subscription,
    watcher: Option<JoinHandle<()>>,
}

impl Drop for ActiveProvider {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

struct Shared {
    registry: ProviderRegistry,
    state: Mutex<OrchestratorState>,
    active: Mutex<Option<ActiveProvider>>,
    debouncer: Debouncer,
    write_gate: tokio::sync::Mutex<()>,
    status: SyncStatusHub,
    /// Bumped under the state lock whenever memory diverges from the last read
    revision: AtomicU64,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveProvider>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    fn provider(&self) -> StorageResult<Arc<dyn StorageProvider>> {
        self.active()
            .as_ref()
            .map(|active| Arc::clone(&active.provider))
            .ok_or_else(|| StorageError::ProviderUnavailable("No storage provider selected".into()))
    }

    /// Write the current envelope through the active provider
    async fn write_now(&self) -> bool {
        let _gate = self.write_gate.lock().await;
        let Ok(provider) = self.provider() else {
            return false;
        };

        // Snapshot after taking the gate so the write carries the latest state
        let envelope = {
            let mut state = self.state();
            if !state.data_loaded {
                return false;
            }
            state.envelope.touch(&provider.descriptor().id);
            state.envelope.clone()
        };

        let saved = provider.save(&envelope).await;
        let mut state = self.state();
        if saved {
            state.last_error = None;
        } else {
            let message = provider
                .sync_status()
                .error_message
                .unwrap_or_else(|| format!("{} did not accept the write", provider.descriptor().display_name));
            state.last_error = Some(StorageError::WriteFailed(message));
        }
        saved
    }

    /// Re-read after another context changed the data
    ///
    /// Returns `Ok(false)` without touching memory when a local change landed
    /// while the provider was being read, or a local write is still pending.
    async fn refresh_from_external(&self) -> StorageResult<bool> {
        if self.debouncer.is_pending() {
            debug!("Ignoring external change while a local write is pending");
            return Ok(false);
        }

        let provider = self.provider()?;
        let revision = self.revision.load(Ordering::SeqCst);
        self.state().is_loading = true;

        let result = provider.load().await;

        let mut state = self.state();
        state.is_loading = false;
        let loaded = match result {
            Ok(loaded) => loaded,
            Err(e) => {
                state.last_error = Some(e.clone());
                return Err(e);
            }
        };

        if self.revision.load(Ordering::SeqCst) != revision || self.debouncer.is_pending() {
            debug!("Discarding external re-read; local data changed while reading");
            return Ok(false);
        }

        state.envelope =
            loaded.unwrap_or_else(|| BudgetDataEnvelope::empty(provider.descriptor().id.clone()));
        state.data_loaded = true;
        state.last_error = None;
        debug!(
            provider = %state.provider_id,
            transactions = state.envelope.transaction_count(),
            "Reloaded budget data after external change"
        );
        Ok(true)
    }

    fn publish_status(&self, status: &SyncStatus) {
        self.state().sync_status = status.clone();
        self.status.set(status.clone());
    }
}

/// Coordinator over the registered storage providers
#[derive(Clone)]
pub struct StorageOrchestrator {
    inner: Arc<Shared>,
}

impl StorageOrchestrator {
    /// Create an orchestrator with no provider selected yet
    pub fn new(registry: ProviderRegistry, options: OrchestratorOptions) -> Self {
        Self {
            inner: Arc::new(Shared {
                registry,
                state: Mutex::new(OrchestratorState::empty(ProviderId::default())),
                active: Mutex::new(None),
                debouncer: Debouncer::new(options.debounce),
                write_gate: tokio::sync::Mutex::new(()),
                status: SyncStatusHub::new(),
                revision: AtomicU64::new(0),
            }),
        }
    }

    /// The registry this orchestrator selects providers from
    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    /// Snapshot of the full state
    pub fn state(&self) -> OrchestratorState {
        self.inner.state().clone()
    }

    pub fn envelope(&self) -> BudgetDataEnvelope {
        self.inner.state().envelope.clone()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.inner.state().envelope.payload.transactions.clone()
    }

    pub fn provider_id(&self) -> ProviderId {
        self.inner.state().provider_id.clone()
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.inner.state().sync_status.clone()
    }

    pub fn last_error(&self) -> Option<StorageError> {
        self.inner.state().last_error.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state().is_loading
    }

    /// Whether a debounced write has not completed yet
    pub fn has_pending_write(&self) -> bool {
        self.inner.debouncer.is_pending()
    }

    /// Descriptor of the active provider
    pub fn active_descriptor(&self) -> Option<ProviderDescriptor> {
        self.inner
            .active()
            .as_ref()
            .map(|active| active.provider.descriptor().clone())
    }

    /// The active provider instance
    pub fn active_provider(&self) -> StorageResult<Arc<dyn StorageProvider>> {
        self.inner.provider()
    }

    /// Listen to sync status changes of whichever provider is active
    pub fn on_sync_status_change(&self, listener: SyncListener) -> Subscription {
        self.inner.status.subscribe(listener)
    }

    /// Select a provider and load its data
    ///
    /// Any pending write to the previous provider is flushed first. An empty
    /// backend yields an empty envelope. On a load failure the provider stays
    /// selected with `last_error` set, so the caller can fix the cause (for
    /// example supply a passphrase) and [`reload`](Self::reload).
    pub async fn open(&self, id: &ProviderId) -> StorageResult<()> {
        self.flush().await;
        let provider = self.prepare(id).await?;
        let state = OrchestratorState::empty(id.clone());
        self.attach(provider, state);
        self.reload().await
    }

    /// Re-read the active provider's data, replacing the in-memory envelope
    pub async fn reload(&self) -> StorageResult<()> {
        let provider = self.inner.provider()?;
        self.inner.state().is_loading = true;

        let result = provider.load().await;

        let mut state = self.inner.state();
        state.is_loading = false;
        match result {
            Ok(envelope) => {
                state.envelope = envelope
                    .unwrap_or_else(|| BudgetDataEnvelope::empty(provider.descriptor().id.clone()));
                state.data_loaded = true;
                state.last_error = None;
                self.inner.bump_revision();
                debug!(
                    provider = %state.provider_id,
                    transactions = state.envelope.transaction_count(),
                    "Loaded budget data"
                );
                Ok(())
            }
            Err(e) => {
                // Keep whatever is in memory
                state.last_error = Some(e.clone());
                Err(e)
            }
        }
    }

    /// Switch the active provider, carrying data over when the destination is empty
    ///
    /// The destination's existing transactions always win; source data is only
    /// copied to a destination that holds none. If copying fails the source
    /// stays active and nothing is lost.
    pub async fn switch_provider(&self, to: &ProviderId) -> StorageResult<SwitchOutcome> {
        let current = self.inner.provider().ok();
        if current.as_ref().map(|p| &p.descriptor().id) == Some(to) {
            return Ok(SwitchOutcome::Unchanged);
        }

        self.flush().await;
        let destination = self.prepare(to).await?;

        let source = {
            let state = self.inner.state();
            state.data_loaded.then(|| state.envelope.clone())
        };
        let existing = destination.load().await?;

        let (envelope, outcome) = match existing {
            Some(envelope) if envelope.has_transactions() => {
                let transactions = envelope.transaction_count();
                info!(provider = %to, transactions, "Keeping data already at destination");
                (envelope, SwitchOutcome::KeptDestination { transactions })
            }
            existing => match source.filter(BudgetDataEnvelope::has_transactions) {
                Some(mut envelope) => {
                    envelope.touch(to);
                    if !destination.save(&envelope).await {
                        let message = destination
                            .sync_status()
                            .error_message
                            .unwrap_or_else(|| "save rejected".to_string());
                        warn!(provider = %to, error = %message, "Could not copy data to new provider");
                        return Err(StorageError::WriteFailed(message));
                    }
                    let transactions = envelope.transaction_count();
                    info!(provider = %to, transactions, "Copied data to empty provider");
                    (envelope, SwitchOutcome::Migrated { transactions })
                }
                None => (
                    existing.unwrap_or_else(|| BudgetDataEnvelope::empty(to.clone())),
                    SwitchOutcome::Empty,
                ),
            },
        };

        let mut state = OrchestratorState::empty(to.clone());
        state.envelope = envelope;
        state.data_loaded = true;
        self.attach(destination, state);
        Ok(outcome)
    }

    /// Write any pending debounced data now
    pub async fn flush(&self) -> bool {
        if self.inner.debouncer.cancel() {
            self.inner.write_now().await
        } else {
            true
        }
    }

    /// Retry after an `error` or `offline` status
    ///
    /// Writes the in-memory data if it was loaded, otherwise loads it.
    pub async fn resync(&self) -> StorageResult<()> {
        if !self.inner.state().data_loaded {
            return self.reload().await;
        }
        self.inner.debouncer.cancel();
        if self.inner.write_now().await {
            Ok(())
        } else {
            Err(self.write_error())
        }
    }

    /// Delete the active provider's data and reset to an empty envelope
    pub async fn delete_data(&self) -> StorageResult<()> {
        let provider = self.inner.provider()?;
        self.inner.debouncer.cancel();
        let _gate = self.inner.write_gate.lock().await;

        if !provider.delete().await {
            let message = provider
                .sync_status()
                .error_message
                .unwrap_or_else(|| "delete rejected".to_string());
            let error = StorageError::WriteFailed(message);
            self.inner.state().last_error = Some(error.clone());
            return Err(error);
        }

        let mut state = self.inner.state();
        state.envelope = BudgetDataEnvelope::empty(provider.descriptor().id.clone());
        state.data_loaded = true;
        state.last_error = None;
        self.inner.bump_revision();
        info!(provider = %state.provider_id, "Deleted budget data");
        Ok(())
    }

    /// Sign out of the active provider
    ///
    /// Pending data is flushed first. After signing out of a provider that
    /// requires authentication, mutations are refused until it is opened again.
    pub async fn sign_out(&self) -> StorageResult<()> {
        let provider = self.inner.provider()?;
        self.flush().await;
        provider.sign_out().await?;
        if provider.descriptor().requires_auth {
            self.inner.state().data_loaded = false;
        }
        Ok(())
    }

    // Mutators

    /// Add one transaction, replacing any with the same id
    pub async fn add_transaction(&self, transaction: Transaction) -> StorageResult<()> {
        transaction.validate()?;
        self.mutate(|envelope| envelope.upsert_transactions(vec![transaction]))
            .await
    }

    /// Add many transactions; ids already present are replaced by the incoming entry
    pub async fn bulk_add_transactions(&self, transactions: Vec<Transaction>) -> StorageResult<usize> {
        for transaction in &transactions {
            transaction.validate()?;
        }
        let count = transactions.len();
        self.mutate(|envelope| envelope.upsert_transactions(transactions))
            .await?;
        Ok(count)
    }

    /// Delete one transaction, returning whether it existed
    pub async fn delete_transaction(&self, id: &str) -> StorageResult<bool> {
        Ok(self.delete_transactions(&[id.to_string()]).await? > 0)
    }

    /// Delete transactions by id, returning how many were removed
    pub async fn delete_transactions(&self, ids: &[String]) -> StorageResult<usize> {
        self.mutate(|envelope| envelope.remove_transactions(ids)).await
    }

    /// Shallow-merge settings
    pub async fn update_settings(&self, changes: SettingsMap) -> StorageResult<()> {
        self.mutate(|envelope| envelope.merge_settings(changes)).await
    }

    /// Replace the pay period configuration
    pub async fn update_pay_period_config(&self, config: SettingsMap) -> StorageResult<()> {
        self.mutate(|envelope| envelope.set_pay_period_config(config))
            .await
    }

    // Encryption

    /// Encryption state of the active provider
    pub fn encryption_state(&self) -> StorageResult<EncryptionState> {
        let provider = self.inner.provider()?;
        let control = provider
            .encryption()
            .ok_or(StorageError::EncryptionUnsupported)?;
        control.encryption_state()
    }

    /// Hold `passphrase` for this session and re-read the data with it
    ///
    /// A wrong passphrase is forgotten again.
    pub async fn unlock(&self, passphrase: SecureString) -> StorageResult<()> {
        let provider = self.inner.provider()?;
        let control = provider
            .encryption()
            .ok_or(StorageError::EncryptionUnsupported)?;
        control.set_passphrase(passphrase);

        let result = self.reload().await;
        if matches!(result, Err(StorageError::DecryptionFailed)) {
            control.clear_passphrase();
        }
        result
    }

    /// Forget the in-memory passphrase
    pub fn lock(&self) -> StorageResult<()> {
        let provider = self.inner.provider()?;
        provider
            .encryption()
            .ok_or(StorageError::EncryptionUnsupported)?
            .clear_passphrase();
        Ok(())
    }

    /// Encrypt the active provider's data from now on
    pub async fn enable_encryption(&self, passphrase: SecureString) -> StorageResult<()> {
        let provider = self.inner.provider()?;
        let control = provider
            .encryption()
            .ok_or(StorageError::EncryptionUnsupported)?;

        self.flush().await;
        let _gate = self.inner.write_gate.lock().await;
        control.enable_encryption(passphrase).await
    }

    /// Store the active provider's data as plaintext from now on
    pub async fn disable_encryption(&self) -> StorageResult<()> {
        let provider = self.inner.provider()?;
        let control = provider
            .encryption()
            .ok_or(StorageError::EncryptionUnsupported)?;

        self.flush().await;
        let _gate = self.inner.write_gate.lock().await;
        control.disable_encryption().await
    }

    // Export / import

    /// Serialize the full envelope
    pub fn export_json(&self, pretty: bool) -> StorageResult<String> {
        export_envelope_string(&self.envelope(), pretty)
    }

    /// Replace all data with an imported document and persist it immediately
    ///
    /// Returns the number of imported transactions. If the write fails the
    /// imported data stays in memory and [`resync`](Self::resync) can retry.
    pub async fn import_json(&self, json_str: &str) -> StorageResult<usize> {
        let provider = self.inner.provider()?;
        let mut envelope = import_envelope_json(json_str, &provider.descriptor().id)?;
        envelope.touch(&provider.descriptor().id);
        let count = envelope.transaction_count();

        self.inner.debouncer.cancel();
        {
            let mut state = self.inner.state();
            state.envelope = envelope;
            state.data_loaded = true;
            self.inner.bump_revision();
        }
        info!(transactions = count, "Imported budget data");

        if self.inner.write_now().await {
            Ok(count)
        } else {
            Err(self.write_error())
        }
    }

    async fn prepare(&self, id: &ProviderId) -> StorageResult<Arc<dyn StorageProvider>> {
        let provider = self.inner.registry.get(id)?;
        if !provider.is_available() {
            return Err(StorageError::ProviderUnavailable(format!(
                "{} is not available",
                provider.descriptor().display_name
            )));
        }
        if provider.descriptor().requires_auth && !provider.is_authenticated() {
            info!(provider = %id, "Authenticating storage provider");
            provider.authenticate().await?;
        }
        Ok(provider)
    }

    /// Make `provider` active with `state`, wiring status fan-out and change watching
    fn attach(&self, provider: Arc<dyn StorageProvider>, mut state: OrchestratorState) {
        let weak = Arc::downgrade(&self.inner);
        let status = provider.on_sync_status_change(Arc::new(move |status: &SyncStatus| {
            if let Some(shared) = weak.upgrade() {
                shared.publish_status(status);
            }
        }));

        let watcher = provider
            .change_feed()
            .map(|feed| spawn_change_watcher(Arc::downgrade(&self.inner), feed));

        state.sync_status = provider.sync_status();
        let sync_status = state.sync_status.clone();
        info!(provider = %state.provider_id, "Storage provider active");

        {
            let mut current = self.inner.state();
            *current = state;
            self.inner.bump_revision();
        }
        *self.inner.active() = Some(ActiveProvider {
            provider,
            _status: status,
            watcher,
        });
        self.inner.status.set(sync_status);
    }

    async fn mutate<R>(&self, apply: impl FnOnce(&mut BudgetDataEnvelope) -> R) -> StorageResult<R> {
        let provider = self.inner.provider()?;
        let result = {
            let mut state = self.inner.state();
            if !state.data_loaded {
                return Err(state.last_error.clone().unwrap_or_else(|| {
                    StorageError::ProviderUnavailable("Budget data has not been loaded".into())
                }));
            }
            let result = apply(&mut state.envelope);
            self.inner.bump_revision();
            result
        };

        if provider.descriptor().requires_auth {
            self.inner.write_now().await;
        } else {
            self.schedule_write();
        }
        Ok(result)
    }

    fn schedule_write(&self) {
        let weak: Weak<Shared> = Arc::downgrade(&self.inner);
        self.inner.debouncer.schedule(move |generation| async move {
            if let Some(shared) = weak.upgrade() {
                shared.write_now().await;
                shared.debouncer.finish(generation);
            }
        });
    }

    fn write_error(&self) -> StorageError {
        self.last_error()
            .unwrap_or_else(|| StorageError::WriteFailed("write rejected".to_string()))
    }
}

/// Re-read the data whenever another context changes it
///
/// Local changes made before or during the re-read win; they are written
/// over the other context's data by the next save.
fn spawn_change_watcher(weak: Weak<Shared>, mut feed: ChangeFeed) -> JoinHandle<()> {
    tokio::spawn(async move {
        while feed.changed().await {
            let Some(shared) = weak.upgrade() else {
                break;
            };
            if let Err(e) = shared.refresh_from_external().await {
                warn!(error = %e, "Failed to reload after external change");
            }
        }
    })
}
