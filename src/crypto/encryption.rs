//! AES-256-GCM encryption/decryption
//!
//! Provides authenticated encryption for data at rest using AES-256-GCM.
//! Each encryption draws a fresh nonce, stored in front of the ciphertext so a
//! blob can be opened with nothing but the passphrase and the device salt:
//!
//! ```text
//! base64( nonce[12] ‖ ciphertext ‖ tag[16] )
//! ```

use std::sync::Arc;

use aes_gcm::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::debug;

use crate::error::{StorageError, StorageResult};

use super::key_derivation::{derive_key, generate_salt, DerivedKey, KeyDerivationParams};
use super::passphrase::validate_passphrase;
use super::secure_memory::SecureString;

/// Size of the AES-GCM nonce in bytes (96 bits)
const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

/// Persistent home of the per-device key derivation salt
///
/// The salt is not secret. It is generated on first use and reused for every
/// later encryption on the same device.
pub trait SaltStore: Send + Sync {
    /// Read the persisted salt, if one has been generated
    fn load_salt(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Persist the salt
    fn store_salt(&self, salt: &[u8]) -> StorageResult<()>;
}

/// Encrypt raw bytes with an already-derived key into a self-contained blob
pub fn seal(plaintext: &[u8], key: &DerivedKey) -> StorageResult<String> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| StorageError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| StorageError::Encryption(format!("Encryption failed: {}", e)))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(STANDARD.encode(blob))
}

/// Open a blob produced by [`seal`]
///
/// Malformed encoding, truncation, tampering and a wrong key all map to the
/// same [`StorageError::DecryptionFailed`].
pub fn open(blob: &str, key: &DerivedKey) -> StorageResult<Vec<u8>> {
    let bytes = STANDARD
        .decode(blob.trim())
        .map_err(|_| StorageError::DecryptionFailed)?;

    if bytes.len() < NONCE_SIZE + TAG_SIZE {
        return Err(StorageError::DecryptionFailed);
    }

    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| StorageError::Encryption(format!("Failed to create cipher: {}", e)))?;

    let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|_| StorageError::DecryptionFailed)
}

/// Passphrase-based encryption of serialized payloads
///
/// Key derivation and the cipher itself run on tokio's blocking pool so the
/// calling task is only suspended, never blocked.
#[derive(Clone)]
pub struct PassphraseCipher {
    salts: Arc<dyn SaltStore>,
    params: KeyDerivationParams,
}

impl PassphraseCipher {
    /// Create a cipher that keeps its salt in `salts`
    pub fn new(salts: Arc<dyn SaltStore>, params: KeyDerivationParams) -> Self {
        Self { salts, params }
    }

    /// Whether this device already has a persisted salt
    pub fn has_salt(&self) -> StorageResult<bool> {
        Ok(self.salts.load_salt()?.is_some())
    }

    /// Encrypt `plaintext`, generating and persisting the device salt on first use
    pub async fn encrypt(&self, plaintext: &str, passphrase: &str) -> StorageResult<String> {
        validate_passphrase(passphrase)?;

        let salt = self.salt_or_create()?;
        let passphrase = SecureString::new(passphrase);
        let plaintext = plaintext.to_owned();
        let params = self.params;

        tokio::task::spawn_blocking(move || {
            let key = derive_key(&passphrase, &salt, &params)?;
            seal(plaintext.as_bytes(), &key)
        })
        .await
        .map_err(|e| StorageError::Encryption(format!("Encryption task failed: {}", e)))?
    }

    /// Decrypt a blob produced by [`PassphraseCipher::encrypt`]
    pub async fn decrypt(&self, blob: &str, passphrase: &str) -> StorageResult<String> {
        // Without a salt nothing on this device was ever encrypted with it
        let salt = self
            .salts
            .load_salt()?
            .ok_or(StorageError::DecryptionFailed)?;
        let passphrase = SecureString::new(passphrase);
        let blob = blob.to_owned();
        let params = self.params;

        let plaintext = tokio::task::spawn_blocking(move || {
            let key = derive_key(&passphrase, &salt, &params)?;
            open(&blob, &key)
        })
        .await
        .map_err(|e| StorageError::Encryption(format!("Decryption task failed: {}", e)))??;

        String::from_utf8(plaintext).map_err(|_| StorageError::DecryptionFailed)
    }

    fn salt_or_create(&self) -> StorageResult<Vec<u8>> {
        if let Some(salt) = self.salts.load_salt()? {
            return Ok(salt);
        }
        let salt = generate_salt();
        self.salts.store_salt(&salt)?;
        debug!("Generated new key derivation salt");
        Ok(salt)
    }
}
