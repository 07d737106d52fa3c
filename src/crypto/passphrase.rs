//! Passphrase policy
//!
//! The minimum length is enforced before any key is derived. Strength scoring
//! is advisory only and never blocks an operation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Shortest passphrase accepted for encryption
pub const MIN_PASSPHRASE_LENGTH: usize = 8;

/// Advisory strength rating for UI feedback
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassphraseStrength {
    Weak,
    Fair,
    Good,
    Strong,
}

impl fmt::Display for PassphraseStrength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Weak => write!(f, "weak"),
            Self::Fair => write!(f, "fair"),
            Self::Good => write!(f, "good"),
            Self::Strong => write!(f, "strong"),
        }
    }
}

/// Reject passphrases shorter than [`MIN_PASSPHRASE_LENGTH`] characters
pub fn validate_passphrase(passphrase: &str) -> StorageResult<()> {
    if passphrase.chars().count() < MIN_PASSPHRASE_LENGTH {
        return Err(StorageError::Validation(format!(
            "Passphrase must be at least {} characters",
            MIN_PASSPHRASE_LENGTH
        )));
    }
    Ok(())
}

/// Score a passphrase for display purposes
///
/// One point each for reaching the minimum length, reaching 12 and 16
/// characters, mixing upper and lower case, containing a digit, and containing
/// a symbol.
pub fn score_passphrase(passphrase: &str) -> PassphraseStrength {
    let length = passphrase.chars().count();
    let has_lower = passphrase.chars().any(|c| c.is_lowercase());
    let has_upper = passphrase.chars().any(|c| c.is_uppercase());
    let has_digit = passphrase.chars().any(|c| c.is_ascii_digit());
    let has_symbol = passphrase
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());

    if length < MIN_PASSPHRASE_LENGTH {
        return PassphraseStrength::Weak;
    }

    let score = [
        true,
        length >= 12,
        length >= 16,
        has_lower && has_upper,
        has_digit,
        has_symbol,
    ]
    .iter()
    .filter(|&&hit| hit)
    .count();

    match score {
        0..=1 => PassphraseStrength::Weak,
        2..=3 => PassphraseStrength::Fair,
        4 => PassphraseStrength::Good,
        _ => PassphraseStrength::Strong,
    }
}
