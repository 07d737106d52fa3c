//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the storage orchestrator.

pub mod encrypt;
pub mod export;
pub mod prompt;
pub mod provider;
pub mod transaction;

pub use encrypt::{handle_encrypt_command, rate_passphrase, EncryptCommands};
pub use export::{handle_export_command, handle_import_command};
pub use prompt::{resolve_passphrase, TerminalConsent};
pub use provider::{handle_provider_command, show_status, ProviderCommands};
pub use transaction::{handle_transaction_command, TransactionCommands};

use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::models::ProviderId;
use crate::services::StorageOrchestrator;

/// How much of the data a command needs before it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataAccess {
    /// The command reads or writes transactions
    Required,
    /// The command only inspects the provider; locked data is fine
    Optional,
}

/// Open `id` and, if its data is encrypted, unlock it
///
/// The passphrase is taken from `passphrase` or prompted for. With
/// [`DataAccess::Optional`] a locked store is left locked and a load failure
/// is reported through the orchestrator state instead.
pub async fn open_provider(
    orchestrator: &StorageOrchestrator,
    id: &ProviderId,
    passphrase: Option<&str>,
    access: DataAccess,
) -> StorageResult<()> {
    let result = orchestrator.open(id).await;
    let error = match result {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };

    // The provider is selected even when its data could not be read
    if orchestrator.active_descriptor().is_none() {
        return Err(error);
    }

    match (error, access) {
        (StorageError::PassphraseRequired, DataAccess::Required) => {
            let passphrase = resolve_passphrase(passphrase, "Passphrase: ")?;
            orchestrator.unlock(passphrase).await
        }
        (StorageError::PassphraseRequired, DataAccess::Optional) if passphrase.is_some() => {
            let passphrase = resolve_passphrase(passphrase, "Passphrase: ")?;
            orchestrator.unlock(passphrase).await
        }
        (e, DataAccess::Optional) => {
            debug!(error = %e, "Continuing without loaded data");
            Ok(())
        }
        (e, DataAccess::Required) => Err(e),
    }
}
