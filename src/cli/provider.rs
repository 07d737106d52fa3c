//! Storage provider CLI commands
//!
//! Listing, selecting and signing out of providers, plus the overall status
//! report.

use clap::Subcommand;

use crate::config::{Settings, StorePaths};
use crate::error::{StorageError, StorageResult};
use crate::models::ProviderId;
use crate::services::{StorageOrchestrator, SwitchOutcome};

/// Provider subcommands
#[derive(Subcommand)]
pub enum ProviderCommands {
    /// List registered providers
    List,

    /// Make a provider active, copying data to it if it is empty
    Use {
        /// Provider ID (e.g. "local", "remote-drive")
        id: String,
    },

    /// Sign out of the active provider
    SignOut,

    /// Delete all budget data held by the active provider
    Wipe {
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },
}

/// Handle a provider command
pub async fn handle_provider_command(
    orchestrator: &StorageOrchestrator,
    paths: &StorePaths,
    settings: &mut Settings,
    cmd: ProviderCommands,
) -> StorageResult<()> {
    match cmd {
        ProviderCommands::List => {
            for descriptor in orchestrator.registry().descriptors() {
                let marker = if descriptor.id == settings.active_provider {
                    "*"
                } else {
                    " "
                };
                let available = orchestrator
                    .registry()
                    .get(&descriptor.id)
                    .map(|p| p.is_available())
                    .unwrap_or(false);
                println!(
                    "{} {:14} {:16} {}{}",
                    marker,
                    descriptor.id.as_str(),
                    descriptor.display_name,
                    if descriptor.requires_auth {
                        "sign-in required"
                    } else {
                        "no sign-in"
                    },
                    if available { "" } else { " (unavailable)" }
                );
            }
        }

        ProviderCommands::Use { id } => {
            let to = ProviderId::new(id);
            let outcome = orchestrator.switch_provider(&to).await?;
            settings.active_provider = to.clone();
            settings.save(paths)?;

            match outcome {
                SwitchOutcome::Unchanged => println!("Already using {}", to),
                SwitchOutcome::KeptDestination { transactions } => println!(
                    "Now using {}; kept its existing {} transaction(s)",
                    to, transactions
                ),
                SwitchOutcome::Migrated { transactions } => println!(
                    "Now using {}; copied {} transaction(s) to it",
                    to, transactions
                ),
                SwitchOutcome::Empty => println!("Now using {}", to),
            }
        }

        ProviderCommands::SignOut => {
            orchestrator.sign_out().await?;
            println!("Signed out of {}", orchestrator.provider_id());
        }

        ProviderCommands::Wipe { force } => {
            let count = orchestrator.transactions().len();
            if !force && !confirm(&format!(
                "Delete all budget data ({} transaction(s)) from {}? (yes/no): ",
                count,
                orchestrator.provider_id()
            ))? {
                println!("Aborted.");
                return Ok(());
            }
            orchestrator.delete_data().await?;
            println!("Deleted all budget data from {}", orchestrator.provider_id());
        }
    }

    Ok(())
}

/// Print the active provider's state
pub fn show_status(orchestrator: &StorageOrchestrator, paths: &StorePaths) {
    let state = orchestrator.state();
    let name = orchestrator
        .active_descriptor()
        .map(|d| d.display_name)
        .unwrap_or_else(|| "none".to_string());

    println!("Budget Store Status");
    println!("===================");
    println!("Data directory: {}", paths.base_dir().display());
    println!("Provider:       {} ({})", state.provider_id, name);
    println!("Sync state:     {}", state.sync_status.state);
    if let Some(at) = state.sync_status.last_synced_at {
        println!("Last synced:    {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(message) = &state.sync_status.error_message {
        println!("Sync error:     {}", message);
    }
    if let Ok(encryption) = orchestrator.encryption_state() {
        println!(
            "Encryption:     {}",
            match (encryption.enabled, encryption.unlocked) {
                (false, _) => "disabled",
                (true, true) => "enabled (unlocked)",
                (true, false) => "enabled (locked)",
            }
        );
    }
    if state.data_loaded {
        println!("Transactions:   {}", state.envelope.transaction_count());
        println!(
            "Saved at:       {}",
            state.envelope.saved_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    } else if let Some(e) = &state.last_error {
        println!("Data:           not loaded ({})", e);
    }
}

fn confirm(prompt: &str) -> StorageResult<bool> {
    use std::io::Write;

    print!("{}", prompt);
    std::io::stdout()
        .flush()
        .map_err(|e| StorageError::Io(e.to_string()))?;

    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|e| StorageError::Io(e.to_string()))?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}
