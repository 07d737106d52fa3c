use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;

use budget_store::cli::{
    handle_encrypt_command, handle_export_command, handle_import_command,
    handle_provider_command, handle_transaction_command, open_provider, rate_passphrase,
    show_status, DataAccess, EncryptCommands, ProviderCommands, TerminalConsent,
    TransactionCommands,
};
use budget_store::config::{Settings, StorePaths};
use budget_store::logging;
use budget_store::services::{OrchestratorOptions, StorageOrchestrator};
use budget_store::storage::default_registry;

#[derive(Parser)]
#[command(
    name = "budget-store",
    author = "Kaylee Beyene",
    version,
    about = "Storage for your personal budget, on this device or in your remote drive",
    long_about = "budget-store keeps your budget transactions, settings and pay period \
                  configuration on this device or in a single file in your remote drive, \
                  optionally encrypted with a passphrase."
)]
struct Cli {
    /// Use this data directory instead of the default
    #[arg(long, global = true, env = "BUDGET_STORE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Passphrase for encrypted data; prompted for when needed and omitted
    #[arg(long, global = true, env = "BUDGET_STORE_PASSPHRASE", hide_env_values = true)]
    passphrase: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Transaction management commands
    #[command(subcommand, alias = "txn")]
    Transaction(TransactionCommands),

    /// Encryption management commands
    #[command(subcommand)]
    Encrypt(EncryptCommands),

    /// Storage provider commands
    #[command(subcommand)]
    Provider(ProviderCommands),

    /// Export all data as JSON
    Export {
        /// Output file path; stdout when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Replace all data with an exported JSON document
    Import {
        /// Path to the JSON file
        file: PathBuf,
    },

    /// Re-send local data to the active provider after a failed sync
    Resync,

    /// Show the active provider, sync state and data summary
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let Some(command) = cli.command else {
        println!("budget-store - storage for your personal budget");
        println!();
        println!("Run 'budget-store --help' for usage information.");
        return Ok(());
    };

    // Strength rating needs no stored data at all
    if let Commands::Encrypt(EncryptCommands::Strength { candidate }) = &command {
        rate_passphrase(candidate.as_deref().or(cli.passphrase.as_deref()))?;
        return Ok(());
    }

    let paths = match cli.data_dir {
        Some(dir) => StorePaths::with_base_dir(dir),
        None => StorePaths::new()?,
    };
    let mut settings = Settings::load_or_create(&paths)?;

    let registry = default_registry(&paths, &settings, Arc::new(TerminalConsent::from_env()))?;
    let orchestrator =
        StorageOrchestrator::new(registry, OrchestratorOptions::from_settings(&settings));
    let passphrase = cli.passphrase.as_deref();

    let access = match &command {
        Commands::Status
        | Commands::Encrypt(_)
        | Commands::Provider(ProviderCommands::List) => DataAccess::Optional,
        _ => DataAccess::Required,
    };
    let opened = open_provider(&orchestrator, &settings.active_provider, passphrase, access).await;
    match (opened, &command) {
        (Ok(()), _) => {}
        // Switching away must stay possible when the current provider cannot be read
        (Err(e), Commands::Provider(ProviderCommands::Use { .. })) => {
            warn!(error = %e, "Current provider could not be opened; its data will not be copied");
        }
        (Err(e), _) => return Err(e.into()),
    }

    match command {
        Commands::Transaction(cmd) => handle_transaction_command(&orchestrator, cmd).await?,
        Commands::Encrypt(cmd) => handle_encrypt_command(&orchestrator, passphrase, cmd).await?,
        Commands::Provider(cmd) => {
            handle_provider_command(&orchestrator, &paths, &mut settings, cmd).await?
        }
        Commands::Export { output, pretty } => {
            handle_export_command(&orchestrator, output, pretty)?
        }
        Commands::Import { file } => handle_import_command(&orchestrator, file).await?,
        Commands::Resync => {
            orchestrator.resync().await?;
            println!("Sync state: {}", orchestrator.sync_status().state);
        }
        Commands::Status => show_status(&orchestrator, &paths),
    }

    if !orchestrator.flush().await {
        if let Some(e) = orchestrator.last_error() {
            anyhow::bail!(e);
        }
    }

    Ok(())
}
