//! Encryption CLI commands
//!
//! Provides commands for enabling, disabling, and inspecting encryption of
//! the active provider's data.

use clap::Subcommand;

use crate::crypto::{score_passphrase, SecureString, MIN_PASSPHRASE_LENGTH};
use crate::error::{StorageError, StorageResult};
use crate::services::StorageOrchestrator;

use super::prompt::{resolve_new_passphrase, resolve_passphrase};

/// Encryption management commands
#[derive(Subcommand)]
pub enum EncryptCommands {
    /// Enable encryption for your budget data
    Enable,

    /// Disable encryption (requires current passphrase)
    Disable,

    /// Show encryption status
    Status,

    /// Rate a passphrase without storing it
    Strength {
        /// Passphrase to rate; prompted for when omitted
        #[arg(value_name = "PASSPHRASE")]
        candidate: Option<String>,
    },
}

/// Handle encryption commands
///
/// `passphrase` is the passphrase given on the command line or in the
/// environment, if any.
pub async fn handle_encrypt_command(
    orchestrator: &StorageOrchestrator,
    passphrase: Option<&str>,
    cmd: EncryptCommands,
) -> StorageResult<()> {
    match cmd {
        EncryptCommands::Enable => enable_encryption(orchestrator, passphrase).await,
        EncryptCommands::Disable => disable_encryption(orchestrator, passphrase).await,
        EncryptCommands::Status => show_status(orchestrator),
        EncryptCommands::Strength { candidate } => {
            rate_passphrase(candidate.as_deref().or(passphrase))
        }
    }
}

/// Print the advisory strength of `supplied`, prompting when it is omitted
pub fn rate_passphrase(supplied: Option<&str>) -> StorageResult<()> {
    let passphrase = match supplied {
        Some(p) => SecureString::new(p),
        None => resolve_passphrase(None, "Passphrase to rate: ")?,
    };
    show_strength(&passphrase);
    Ok(())
}

async fn enable_encryption(
    orchestrator: &StorageOrchestrator,
    passphrase: Option<&str>,
) -> StorageResult<()> {
    let state = orchestrator.encryption_state()?;
    if state.enabled {
        println!("Encryption is already enabled.");
        return Ok(());
    }

    if passphrase.is_none() {
        println!("Enable Encryption");
        println!("=================");
        println!();
        println!("Your budget data will be encrypted with AES-256-GCM.");
        println!("You will need the passphrase every time the data is opened.");
        println!();
        println!("IMPORTANT: If you forget your passphrase, your data cannot be recovered!");
        println!();
    }

    let passphrase = resolve_new_passphrase(passphrase)?;
    show_strength(&passphrase);
    orchestrator.enable_encryption(passphrase).await?;

    println!("Encryption enabled successfully!");
    Ok(())
}

async fn disable_encryption(
    orchestrator: &StorageOrchestrator,
    passphrase: Option<&str>,
) -> StorageResult<()> {
    let state = orchestrator.encryption_state()?;
    if !state.enabled {
        println!("Encryption is not enabled.");
        return Ok(());
    }

    if !state.unlocked {
        let passphrase = resolve_passphrase(passphrase, "Enter current passphrase: ")?;
        orchestrator.unlock(passphrase).await?;
    }
    orchestrator.disable_encryption().await?;

    println!("Encryption disabled successfully!");
    println!("Your data is now stored unencrypted.");
    Ok(())
}

fn show_status(orchestrator: &StorageOrchestrator) -> StorageResult<()> {
    let state = match orchestrator.encryption_state() {
        Ok(state) => state,
        Err(StorageError::EncryptionUnsupported) => {
            println!("Encryption: not supported by this provider");
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if state.enabled {
        println!("Encryption: ENABLED");
        println!(
            "Session:    {}",
            if state.unlocked { "unlocked" } else { "locked" }
        );
    } else {
        println!("Encryption: DISABLED");
        println!("Your data is stored unencrypted.");
    }
    Ok(())
}

fn show_strength(passphrase: &str) {
    let strength = score_passphrase(passphrase);
    if passphrase.chars().count() < MIN_PASSPHRASE_LENGTH {
        println!(
            "Passphrase strength: {} (minimum length is {})",
            strength, MIN_PASSPHRASE_LENGTH
        );
    } else {
        println!("Passphrase strength: {}", strength);
    }
}
