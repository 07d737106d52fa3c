//! User settings for the budget store
//!
//! Persisted as `config.json` in the base directory. Every field has a serde
//! default so older or hand-edited files keep loading.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::paths::StorePaths;
use crate::crypto::KeyDerivationParams;
use crate::error::{StorageError, StorageResult};
use crate::models::ProviderId;
use crate::storage::file_io::write_json_atomic;

/// Environment variable supplying the remote application client id
pub const REMOTE_CLIENT_ID_ENV: &str = "BUDGET_STORE_REMOTE_CLIENT_ID";

/// Remote drive settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    /// Pre-registered application id; the remote provider is unavailable without it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub api_base_url: String,
    pub upload_base_url: String,
    pub auth_url: String,
    pub revoke_url: String,
    pub scope: String,
    /// Name of the single remote file holding the envelope
    pub file_name: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            api_base_url: "https://www.googleapis.com/drive/v3".to_string(),
            upload_base_url: "https://www.googleapis.com/upload/drive/v3".to_string(),
            auth_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            revoke_url: "https://oauth2.googleapis.com/revoke".to_string(),
            scope: "https://www.googleapis.com/auth/drive.appdata".to_string(),
            file_name: "budget-data.json".to_string(),
        }
    }
}

/// User settings for the budget store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Provider selected at startup
    #[serde(default)]
    pub active_provider: ProviderId,

    /// Quiet period before a debounced write, in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// Size limit of the on-device store; `None` for unlimited
    #[serde(default = "default_local_quota")]
    pub local_quota_bytes: Option<u64>,

    /// Key derivation cost parameters
    #[serde(default)]
    pub key_derivation: KeyDerivationParams,

    #[serde(default)]
    pub remote: RemoteSettings,
}

fn default_schema_version() -> u32 {
    1
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_local_quota() -> Option<u64> {
    Some(5 * 1024 * 1024)
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            active_provider: ProviderId::default(),
            debounce_ms: default_debounce_ms(),
            local_quota_bytes: default_local_quota(),
            key_derivation: KeyDerivationParams::default(),
            remote: RemoteSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from disk, or defaults if the file doesn't exist
    ///
    /// Environment overrides are applied after loading.
    pub fn load_or_create(paths: &StorePaths) -> StorageResult<Self> {
        let settings_path = paths.settings_file();

        let mut settings = if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path)
                .map_err(|e| StorageError::Io(format!("Failed to read settings file: {}", e)))?;

            serde_json::from_str(&contents)
                .map_err(|e| StorageError::Config(format!("Failed to parse settings file: {}", e)))?
        } else {
            // Don't save yet - let caller decide when to persist
            Settings::default()
        };

        settings.apply_env();
        Ok(settings)
    }

    /// Save settings to disk
    pub fn save(&self, paths: &StorePaths) -> StorageResult<()> {
        paths.ensure_directories()?;
        write_json_atomic(paths.settings_file(), self)
    }

    fn apply_env(&mut self) {
        if let Ok(client_id) = std::env::var(REMOTE_CLIENT_ID_ENV) {
            if !client_id.trim().is_empty() {
                debug!("Using remote client id from environment");
                self.remote.client_id = Some(client_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.active_provider, ProviderId::local());
        assert_eq!(settings.debounce_ms, 500);
        assert_eq!(settings.local_quota_bytes, Some(5 * 1024 * 1024));
        assert!(settings.remote.client_id.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StorePaths::with_base_dir(temp_dir.path());

        let mut settings = Settings::default();
        settings.active_provider = ProviderId::remote();
        settings.debounce_ms = 250;
        settings.remote.file_name = "my-budget.json".into();
        settings.save(&paths).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.active_provider, ProviderId::remote());
        assert_eq!(loaded.debounce_ms, 250);
        assert_eq!(loaded.remote.file_name, "my-budget.json");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StorePaths::with_base_dir(temp_dir.path());
        std::fs::write(paths.settings_file(), r#"{"debounce_ms": 100}"#).unwrap();

        let loaded = Settings::load_or_create(&paths).unwrap();
        assert_eq!(loaded.debounce_ms, 100);
        assert_eq!(loaded.remote.file_name, "budget-data.json");
        assert_eq!(loaded.schema_version, 1);
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StorePaths::with_base_dir(temp_dir.path());
        std::fs::write(paths.settings_file(), "not json").unwrap();

        let err = Settings::load_or_create(&paths).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
