//! CLI commands for data export and import
//!
//! Exports are the full budget document as JSON; imports replace the active
//! provider's data with such a document.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use crate::error::{StorageError, StorageResult};
use crate::export::{export_envelope_json, ExportSummary};
use crate::services::StorageOrchestrator;

/// Write the current data to `output`, or to stdout when omitted
pub fn handle_export_command(
    orchestrator: &StorageOrchestrator,
    output: Option<PathBuf>,
    pretty: bool,
) -> StorageResult<()> {
    let envelope = orchestrator.envelope();

    match output {
        Some(path) => {
            let file = File::create(&path).map_err(|e| {
                StorageError::Io(format!("Failed to create {}: {}", path.display(), e))
            })?;
            let mut writer = BufWriter::new(file);
            export_envelope_json(&envelope, &mut writer, pretty)?;
            writer
                .flush()
                .map_err(|e| StorageError::Io(format!("Failed to write export: {}", e)))?;

            let summary = ExportSummary::of(&envelope);
            println!("Exported {} transaction(s) to {}", summary.transaction_count, path.display());
            if let (Some(first), Some(last)) =
                (summary.earliest_transaction, summary.latest_transaction)
            {
                println!("  Date range: {} to {}", first, last);
            }
        }
        None => {
            let stdout = io::stdout();
            let mut writer = stdout.lock();
            export_envelope_json(&envelope, &mut writer, pretty)?;
            writeln!(writer).map_err(|e| StorageError::Io(e.to_string()))?;
        }
    }

    Ok(())
}

/// Replace the current data with the document at `input`
pub async fn handle_import_command(
    orchestrator: &StorageOrchestrator,
    input: PathBuf,
) -> StorageResult<()> {
    let contents = fs::read_to_string(&input)
        .map_err(|e| StorageError::Io(format!("Failed to read {}: {}", input.display(), e)))?;

    let replaced = orchestrator.transactions().len();
    let imported = orchestrator.import_json(&contents).await?;

    println!("Imported {} transaction(s) from {}", imported, input.display());
    if replaced > 0 {
        println!("  Replaced {} existing transaction(s)", replaced);
    }
    Ok(())
}
