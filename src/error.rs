//! Custom error types for the budget storage layer
//!
//! This module defines the error hierarchy shared by every provider, the
//! encryption module and the orchestrator, using thiserror for ergonomic
//! error definitions.

use thiserror::Error;

/// Message shown for every failed decryption, whatever the underlying cause
pub const DECRYPTION_FAILED_MESSAGE: &str = "Invalid passphrase or corrupted data";

/// Message shown when encrypted data is read without a passphrase
pub const PASSPHRASE_REQUIRED_MESSAGE: &str = "Passphrase required to unlock encrypted data";

/// The main error type for storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The provider is missing configuration or a platform capability
    #[error("Storage provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// No provider is registered under the requested identifier
    #[error("Storage provider not registered: {0}")]
    ProviderNotRegistered(String),

    /// The user denied consent or the authentication flow failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Encrypted data was read while no passphrase is held in memory
    #[error("{}", PASSPHRASE_REQUIRED_MESSAGE)]
    PassphraseRequired,

    /// Wrong passphrase or tampered ciphertext (never says which)
    #[error("{}", DECRYPTION_FAILED_MESSAGE)]
    DecryptionFailed,

    /// The provider cannot encrypt data at rest
    #[error("Encryption is not supported by this provider")]
    EncryptionUnsupported,

    /// The local store has no room left for the write
    #[error("Storage quota exceeded: need {needed} bytes, limit is {limit} bytes")]
    QuotaExceeded { needed: u64, limit: u64 },

    /// Transient failure talking to a remote backend
    #[error("Network error: {message}")]
    Network { message: String, offline: bool },

    /// A provider reported a failed save or delete; details are in its sync status
    #[error("Failed to write budget data: {0}")]
    WriteFailed(String),

    /// Weak passphrase, malformed import file, invalid transaction
    #[error("Validation error: {0}")]
    Validation(String),

    /// Encryption pipeline failure unrelated to the passphrase
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),
}

impl StorageError {
    /// Create a network error that indicates the backend could not be reached
    pub fn offline(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            offline: true,
        }
    }

    /// Create a network error for a reachable backend that rejected the request
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            offline: false,
        }
    }

    /// Check if the caller should prompt for a passphrase and retry
    pub fn requires_passphrase(&self) -> bool {
        matches!(self, Self::PassphraseRequired | Self::DecryptionFailed)
    }

    /// Check if the caller should run the authentication flow again
    pub fn requires_authentication(&self) -> bool {
        matches!(self, Self::AuthenticationFailed(_))
    }

    /// Check if the backend could not be reached at all
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Network { offline: true, .. })
    }

    /// Check if a retry of the same operation may succeed without user input
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::QuotaExceeded { .. } | Self::WriteFailed(_) | Self::Io(_)
        )
    }

    /// Check if this is a validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::offline(err.to_string())
        } else {
            Self::remote(err.to_string())
        }
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_passphrase_errors_share_prompt() {
        assert!(StorageError::PassphraseRequired.requires_passphrase());
        assert!(StorageError::DecryptionFailed.requires_passphrase());
        assert!(!StorageError::EncryptionUnsupported.requires_passphrase());
    }

    #[test]
    fn test_decryption_message_is_generic() {
        assert_eq!(
            StorageError::DecryptionFailed.to_string(),
            "Invalid passphrase or corrupted data"
        );
    }

    #[test]
    fn test_quota_error_display() {
        let err = StorageError::QuotaExceeded {
            needed: 7000,
            limit: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Storage quota exceeded: need 7000 bytes, limit is 5000 bytes"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_network_offline_flag() {
        assert!(StorageError::offline("no route").is_offline());
        assert!(!StorageError::remote("500").is_offline());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StorageError = io_err.into();
        assert!(matches!(err, StorageError::Io(_)));
    }
}
