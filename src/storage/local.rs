//! On-device storage provider
//!
//! Keeps the envelope under a single key of the shared [`KeyValueStore`].
//! Companion keys hold the encryption flag and the base64 key derivation
//! salt. Each `LocalProvider` is one context of the store; other contexts
//! opened on the same store see its writes through [`ChangeFeed`].

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::crypto::{
    validate_passphrase, KeyDerivationParams, PassphraseCipher, SaltStore, SecureString,
};
use crate::error::{StorageError, StorageResult};
use crate::models::{
    migrate_envelope, migrate_envelope_str, BudgetDataEnvelope, EncryptionState,
    ProviderDescriptor, ProviderId, ProviderIdentity, SyncStatus,
};

use super::kv::{ContextId, KeyValueStore};
use super::provider::{
    ChangeFeed, EncryptionControl, StorageProvider, Subscription, SyncListener, SyncStatusHub,
};

/// Key of the serialized (possibly encrypted) envelope
pub const DATA_KEY: &str = "budget-data";

/// Key of the encryption-enabled flag
pub const ENCRYPTION_FLAG_KEY: &str = "budget-encryption-enabled";

/// Key of the base64 key derivation salt
pub const SALT_KEY: &str = "budget-encryption-salt";

/// Keys written before the envelope format existed
pub const LEGACY_TRANSACTIONS_KEY: &str = "budget-transactions";
pub const LEGACY_SETTINGS_KEY: &str = "budget-settings";
pub const LEGACY_PAY_PERIOD_KEY: &str = "budget-pay-period";

const LEGACY_KEYS: [&str; 3] = [
    LEGACY_TRANSACTIONS_KEY,
    LEGACY_SETTINGS_KEY,
    LEGACY_PAY_PERIOD_KEY,
];

/// Salt persisted next to the data in the key-value store
struct StoreSalt {
    store: Arc<KeyValueStore>,
    context: ContextId,
}

impl SaltStore for StoreSalt {
    fn load_salt(&self) -> StorageResult<Option<Vec<u8>>> {
        match self.store.get(SALT_KEY)? {
            Some(encoded) => STANDARD
                .decode(encoded.trim())
                .map(Some)
                .map_err(|e| StorageError::Encryption(format!("Stored salt is not base64: {}", e))),
            None => Ok(None),
        }
    }

    fn store_salt(&self, salt: &[u8]) -> StorageResult<()> {
        self.store.set(self.context, SALT_KEY, &STANDARD.encode(salt))
    }
}

/// Provider over the on-device key-value store
pub struct LocalProvider {
    descriptor: ProviderDescriptor,
    store: Arc<KeyValueStore>,
    context: ContextId,
    cipher: PassphraseCipher,
    passphrase: Mutex<Option<SecureString>>,
    status: SyncStatusHub,
}

impl LocalProvider {
    /// Open a new context on `store`
    pub fn new(store: Arc<KeyValueStore>, params: KeyDerivationParams) -> Self {
        let context = ContextId::new();
        let salts = Arc::new(StoreSalt {
            store: Arc::clone(&store),
            context,
        });

        Self {
            descriptor: ProviderDescriptor {
                id: ProviderId::local(),
                display_name: "This device".to_string(),
                requires_auth: false,
                supports_realtime_sync: true,
                supports_encryption: true,
            },
            store,
            context,
            cipher: PassphraseCipher::new(salts, params),
            passphrase: Mutex::new(None),
            status: SyncStatusHub::new(),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<KeyValueStore> {
        &self.store
    }

    /// This provider's context on the shared store
    pub fn context(&self) -> ContextId {
        self.context
    }

    fn encryption_enabled(&self) -> StorageResult<bool> {
        Ok(self.store.get(ENCRYPTION_FLAG_KEY)?.as_deref().map(str::trim) == Some("true"))
    }

    fn passphrase(&self) -> Option<SecureString> {
        self.passphrase
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn require_passphrase(&self) -> StorageResult<SecureString> {
        self.passphrase().ok_or(StorageError::PassphraseRequired)
    }

    async fn read_envelope(&self) -> StorageResult<Option<BudgetDataEnvelope>> {
        let raw = match self.store.get(DATA_KEY)? {
            Some(raw) => raw,
            None => return self.migrate_legacy_keys().await,
        };

        let text = if self.encryption_enabled()? {
            let passphrase = self.require_passphrase()?;
            self.cipher.decrypt(&raw, &passphrase).await?
        } else {
            raw
        };

        migrate_envelope_str(&text, &self.descriptor.id).map(Some)
    }

    async fn write_envelope(&self, envelope: &BudgetDataEnvelope) -> StorageResult<()> {
        let json = serde_json::to_string(envelope)?;

        // Never fall back to plaintext while encryption is on
        let value = if self.encryption_enabled()? {
            let passphrase = self.require_passphrase()?;
            self.cipher.encrypt(&json, &passphrase).await?
        } else {
            json
        };

        self.store.set(self.context, DATA_KEY, &value)
    }

    /// Fold pre-envelope keys into a current envelope, once
    async fn migrate_legacy_keys(&self) -> StorageResult<Option<BudgetDataEnvelope>> {
        let mut legacy = Map::new();
        for (key, field) in [
            (LEGACY_TRANSACTIONS_KEY, "transactions"),
            (LEGACY_SETTINGS_KEY, "settings"),
            (LEGACY_PAY_PERIOD_KEY, "payPeriodConfig"),
        ] {
            if let Some(raw) = self.store.get(key)? {
                let value: Value = serde_json::from_str(&raw).map_err(|e| {
                    StorageError::Validation(format!("Malformed legacy record {}: {}", key, e))
                })?;
                legacy.insert(field.to_string(), value);
            }
        }

        if legacy.is_empty() {
            return Ok(None);
        }

        let envelope = migrate_envelope(Value::Object(legacy), &self.descriptor.id)?;
        self.write_envelope(&envelope).await?;
        for key in LEGACY_KEYS {
            self.store.remove(self.context, key)?;
        }

        info!(
            transactions = envelope.transaction_count(),
            "Migrated legacy budget records"
        );
        Ok(Some(envelope))
    }

    /// Write `value` under the data key, then the flag; restore `previous` if the flag fails
    fn swap_data(&self, value: &str, previous: Option<&str>, flag: Option<&str>) -> StorageResult<()> {
        self.store.set(self.context, DATA_KEY, value)?;

        let flag_result = match flag {
            Some(flag) => self.store.set(self.context, ENCRYPTION_FLAG_KEY, flag),
            None => self.store.remove(self.context, ENCRYPTION_FLAG_KEY),
        };

        if let Err(e) = flag_result {
            let restored = match previous {
                Some(previous) => self.store.set(self.context, DATA_KEY, previous),
                None => self.store.remove(self.context, DATA_KEY),
            };
            if let Err(restore_err) = restored {
                warn!(error = %restore_err, "Failed to restore data after encryption change");
            }
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    fn is_available(&self) -> bool {
        self.store.dir().is_dir()
    }

    fn is_authenticated(&self) -> bool {
        true
    }

    async fn authenticate(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn sign_out(&self) -> StorageResult<()> {
        // The in-memory passphrase is the only credential held here
        self.clear_passphrase();
        Ok(())
    }

    fn identity(&self) -> Option<ProviderIdentity> {
        Some(ProviderIdentity::device())
    }

    async fn load(&self) -> StorageResult<Option<BudgetDataEnvelope>> {
        self.status.begin();
        match self.read_envelope().await {
            Ok(envelope) => {
                self.status.synced();
                Ok(envelope)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load local budget data");
                self.status.failed(&e);
                Err(e)
            }
        }
    }

    async fn save(&self, envelope: &BudgetDataEnvelope) -> bool {
        self.status.begin();
        match self.write_envelope(envelope).await {
            Ok(()) => {
                debug!(transactions = envelope.transaction_count(), "Saved local budget data");
                self.status.synced();
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to save local budget data");
                self.status.failed(&e);
                false
            }
        }
    }

    async fn delete(&self) -> bool {
        let result = std::iter::once(DATA_KEY)
            .chain(LEGACY_KEYS)
            .try_for_each(|key| self.store.remove(self.context, key));

        match result {
            Ok(()) => {
                info!("Deleted local budget data");
                self.status.set(SyncStatus::idle());
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to delete local budget data");
                self.status.failed(&e);
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

    fn encryption(&self) -> Option<&dyn EncryptionControl> {
        Some(self)
    }

    fn change_feed(&self) -> Option<ChangeFeed> {
        Some(ChangeFeed::new(
            self.store.subscribe(),
            self.context,
            [DATA_KEY.to_string(), ENCRYPTION_FLAG_KEY.to_string()],
            self.status.clone(),
        ))
    }
}

#[async_trait]
impl EncryptionControl for LocalProvider {
    fn encryption_state(&self) -> StorageResult<EncryptionState> {
        Ok(EncryptionState {
            enabled: self.encryption_enabled()?,
            salt_present: self.cipher.has_salt()?,
            unlocked: self.passphrase().is_some(),
        })
    }

    fn set_passphrase(&self, passphrase: SecureString) {
        *self.passphrase.lock().unwrap_or_else(PoisonError::into_inner) = Some(passphrase);
    }

    fn clear_passphrase(&self) {
        *self.passphrase.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    async fn enable_encryption(&self, passphrase: SecureString) -> StorageResult<()> {
        validate_passphrase(&passphrase)?;
        if self.encryption_enabled()? {
            return Err(StorageError::Validation(
                "Encryption is already enabled".to_string(),
            ));
        }

        let existing = self.store.get(DATA_KEY)?;
        if let Some(plaintext) = existing.as_deref() {
            let blob = self.cipher.encrypt(plaintext, &passphrase).await?;
            self.swap_data(&blob, Some(plaintext), Some("true"))?;
        } else {
            // Create the salt now so the state reports it
            self.cipher.encrypt("", &passphrase).await?;
            self.store.set(self.context, ENCRYPTION_FLAG_KEY, "true")?;
        }

        self.set_passphrase(passphrase);
        info!("Enabled local encryption");
        Ok(())
    }

    async fn disable_encryption(&self) -> StorageResult<()> {
        if !self.encryption_enabled()? {
            return Ok(());
        }
        let passphrase = self.require_passphrase()?;

        match self.store.get(DATA_KEY)? {
            Some(blob) => {
                let plaintext = self.cipher.decrypt(&blob, &passphrase).await?;
                self.swap_data(&plaintext, Some(&blob), None)?;
            }
            None => self.store.remove(self.context, ENCRYPTION_FLAG_KEY)?,
        }

        self.clear_passphrase();
        info!("Disabled local encryption");
        Ok(())
    }
}
