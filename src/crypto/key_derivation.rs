//! Key derivation using Argon2id
//!
//! Derives encryption keys from user passphrases using Argon2id,
//! a memory-hard key derivation function resistant to GPU/ASIC attacks.
//! The salt lives outside these parameters: it is persisted once per device
//! by the caller's [`SaltStore`](super::SaltStore).

use aes_gcm::aead::{rand_core::RngCore, OsRng};
use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{StorageError, StorageResult};

/// Size of a freshly generated salt in bytes
pub const SALT_SIZE: usize = 16;

/// Size of the derived AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Cost parameters for key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDerivationParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_cost: u32,
    /// Time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Parallelism degree (default: 4)
    pub parallelism: u32,
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self {
            memory_cost: 65536, // 64 MiB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl KeyDerivationParams {
    /// Create params with specific values
    pub fn with_values(memory_cost: u32, time_cost: u32, parallelism: u32) -> Self {
        Self {
            memory_cost,
            time_cost,
            parallelism,
        }
    }
}

/// A derived encryption key, wiped from memory on drop
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    key: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Get the key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

/// Generate a random salt for a device that has none yet
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive an encryption key from a passphrase and a persisted salt
///
/// This is CPU- and memory-bound; async callers run it on the blocking pool.
pub fn derive_key(
    passphrase: &str,
    salt: &[u8],
    params: &KeyDerivationParams,
) -> StorageResult<DerivedKey> {
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| StorageError::Encryption(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(passphrase.as_bytes(), salt, &mut key)
        .map_err(|e| StorageError::Encryption(format!("Key derivation failed: {}", e)))?;

    Ok(DerivedKey { key })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KeyDerivationParams {
        KeyDerivationParams::with_values(64, 1, 1)
    }

    #[test]
    fn test_derive_key() {
        let salt = generate_salt();
        let key = derive_key("test_passphrase", &salt, &fast_params()).unwrap();
        assert_eq!(key.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn test_same_passphrase_same_key() {
        let salt = generate_salt();
        let key1 = derive_key("test_passphrase", &salt, &fast_params()).unwrap();
        let key2 = derive_key("test_passphrase", &salt, &fast_params()).unwrap();
        assert_eq!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_passphrase_different_key() {
        let salt = generate_salt();
        let key1 = derive_key("passphrase1", &salt, &fast_params()).unwrap();
        let key2 = derive_key("passphrase2", &salt, &fast_params()).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_different_salt_different_key() {
        let key1 = derive_key("same_passphrase", &generate_salt(), &fast_params()).unwrap();
        let key2 = derive_key("same_passphrase", &generate_salt(), &fast_params()).unwrap();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_short_salt_rejected() {
        let result = derive_key("test_passphrase", b"abc", &fast_params());
        assert!(matches!(result, Err(StorageError::Encryption(_))));
    }

    #[test]
    fn test_invalid_params_rejected() {
        let params = KeyDerivationParams::with_values(1, 1, 4);
        let result = derive_key("test_passphrase", &generate_salt(), &params);
        assert!(result.is_err());
    }
}
