//! Cryptographic functions for the budget store
//!
//! Provides AES-256-GCM encryption with Argon2id key derivation
//! for optional at-rest encryption of budget data.

pub mod encryption;
pub mod key_derivation;
pub mod passphrase;
pub mod secure_memory;

pub use encryption::{open, seal, PassphraseCipher, SaltStore};
pub use key_derivation::{derive_key, generate_salt, DerivedKey, KeyDerivationParams};
pub use passphrase::{
    score_passphrase, validate_passphrase, PassphraseStrength, MIN_PASSPHRASE_LENGTH,
};
pub use secure_memory::SecureString;
