//! Interactive input for secrets
//!
//! Passphrases come from the command line or environment when given and are
//! prompted for otherwise. Remote access tokens are obtained the same way.

use async_trait::async_trait;

use crate::crypto::{validate_passphrase, SecureString};
use crate::error::{StorageError, StorageResult};
use crate::storage::remote::{AccessToken, ConsentFlow, ConsentRequest};

/// Environment variable holding a pre-issued remote access token
pub const REMOTE_TOKEN_ENV: &str = "BUDGET_STORE_REMOTE_TOKEN";

/// Lifetime assumed for pasted tokens, matching the usual implicit-grant expiry
pub const PASTED_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Use `supplied` or prompt for the current passphrase
pub fn resolve_passphrase(supplied: Option<&str>, prompt: &str) -> StorageResult<SecureString> {
    match supplied {
        Some(passphrase) => Ok(SecureString::new(passphrase)),
        None => prompt_passphrase(prompt),
    }
}

/// Use `supplied` or prompt for a new passphrase with confirmation
///
/// A supplied passphrase that is too short is an error; an interactive one
/// is asked for again.
pub fn resolve_new_passphrase(supplied: Option<&str>) -> StorageResult<SecureString> {
    if let Some(passphrase) = supplied {
        validate_passphrase(passphrase)?;
        return Ok(SecureString::new(passphrase));
    }

    loop {
        let first = prompt_passphrase("Enter new passphrase: ")?;
        if let Err(e) = validate_passphrase(&first) {
            println!("{}. Please try again.", e);
            continue;
        }

        let second = prompt_passphrase("Confirm passphrase: ")?;
        if first != second {
            println!("Passphrases do not match. Please try again.");
            continue;
        }

        return Ok(first);
    }
}

/// Prompt for a passphrase (hidden input)
pub fn prompt_passphrase(prompt: &str) -> StorageResult<SecureString> {
    rpassword::prompt_password(prompt)
        .map(SecureString::from)
        .map_err(|e| StorageError::Encryption(format!("Failed to read passphrase: {}", e)))
}

/// Consent flow for a terminal session
///
/// Prints the authorization URL and reads the access token the user pastes
/// back, unless one was provided through [`REMOTE_TOKEN_ENV`].
pub struct TerminalConsent {
    preset: Option<SecureString>,
}

impl TerminalConsent {
    pub fn new(preset: Option<SecureString>) -> Self {
        Self { preset }
    }

    pub fn from_env() -> Self {
        let preset = std::env::var(REMOTE_TOKEN_ENV)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .map(SecureString::from);
        Self::new(preset)
    }
}

#[async_trait]
impl ConsentFlow for TerminalConsent {
    async fn request_access(&self, request: &ConsentRequest) -> StorageResult<AccessToken> {
        if let Some(token) = &self.preset {
            return Ok(AccessToken::new(token.trim(), PASTED_TOKEN_LIFETIME_SECS));
        }

        let url = request.authorization_url()?;
        println!("Open this address in a browser and grant access:");
        println!();
        println!("  {}", url);
        println!();

        let pasted = tokio::task::spawn_blocking(|| rpassword::prompt_password("Access token: "))
            .await
            .map_err(|e| StorageError::AuthenticationFailed(format!("Token prompt aborted: {}", e)))?
            .map_err(|e| {
                StorageError::AuthenticationFailed(format!("Failed to read access token: {}", e))
            })?;
        let pasted = SecureString::from(pasted);

        if pasted.trim().is_empty() {
            return Err(StorageError::AuthenticationFailed(
                "No access token entered".into(),
            ));
        }
        Ok(AccessToken::new(pasted.trim(), PASTED_TOKEN_LIFETIME_SECS))
    }
}
