//! Provider metadata
//!
//! Static descriptors and identities used by the registry and the UI.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a registered storage provider
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProviderId(String);

impl ProviderId {
    /// Identifier of the on-device provider
    pub const LOCAL: &'static str = "local";

    /// Identifier of the remote drive provider
    pub const REMOTE: &'static str = "remote-drive";

    /// Create a provider id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The on-device provider id
    pub fn local() -> Self {
        Self::new(Self::LOCAL)
    }

    /// The remote drive provider id
    pub fn remote() -> Self {
        Self::new(Self::REMOTE)
    }

    /// Get the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ProviderId {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProviderId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Static capabilities of a provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderDescriptor {
    pub id: ProviderId,
    pub display_name: String,
    pub requires_auth: bool,
    pub supports_realtime_sync: bool,
    pub supports_encryption: bool,
}

/// Who the provider is signed in as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderIdentity {
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl ProviderIdentity {
    /// Identity of the anonymous on-device user
    pub fn device() -> Self {
        Self {
            display_name: "This device".to_string(),
            email: None,
        }
    }
}

/// Persisted encryption flags of an encrypting provider
///
/// The passphrase itself is never part of this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionState {
    pub enabled: bool,
    pub salt_present: bool,
    /// A passphrase is held in memory for this session
    #[serde(skip)]
    pub unlocked: bool,
}

impl EncryptionState {
    /// Encrypted data exists but this session cannot read it yet
    pub fn needs_passphrase(&self) -> bool {
        self.enabled && !self.unlocked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_id_constants() {
        assert_eq!(ProviderId::local().as_str(), "local");
        assert_eq!(ProviderId::remote().as_str(), "remote-drive");
        assert_eq!(ProviderId::default(), ProviderId::local());
    }

    #[test]
    fn test_provider_id_serializes_as_string() {
        let json = serde_json::to_string(&ProviderId::local()).unwrap();
        assert_eq!(json, "\"local\"");
    }

    #[test]
    fn test_needs_passphrase() {
        let locked = EncryptionState {
            enabled: true,
            salt_present: true,
            unlocked: false,
        };
        assert!(locked.needs_passphrase());
        assert!(!EncryptionState::default().needs_passphrase());
    }
}
