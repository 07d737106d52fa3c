//! JSON export and import
//!
//! The exported document is the envelope itself, so an export from one
//! provider can be imported into any other. Imports go through migration,
//! which accepts older formats as well.

use std::collections::HashSet;
use std::io::Write;

use chrono::NaiveDate;

use crate::error::{StorageError, StorageResult};
use crate::models::{migrate_envelope_str, BudgetDataEnvelope, ProviderId};

/// Summary of an envelope, for reporting after export or import
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub transaction_count: usize,
    pub earliest_transaction: Option<NaiveDate>,
    pub latest_transaction: Option<NaiveDate>,
}

impl ExportSummary {
    pub fn of(envelope: &BudgetDataEnvelope) -> Self {
        let dates = envelope.transactions().iter().map(|t| t.date);
        Self {
            transaction_count: envelope.transaction_count(),
            earliest_transaction: dates.clone().min(),
            latest_transaction: dates.max(),
        }
    }
}

/// Write the envelope as JSON
pub fn export_envelope_json<W: Write>(
    envelope: &BudgetDataEnvelope,
    writer: &mut W,
    pretty: bool,
) -> StorageResult<()> {
    if pretty {
        serde_json::to_writer_pretty(writer, envelope)
    } else {
        serde_json::to_writer(writer, envelope)
    }
    .map_err(|e| StorageError::Json(format!("Failed to export budget data: {}", e)))
}

/// Serialize the envelope to a JSON string
pub fn export_envelope_string(envelope: &BudgetDataEnvelope, pretty: bool) -> StorageResult<String> {
    let mut output = Vec::new();
    export_envelope_json(envelope, &mut output, pretty)?;
    String::from_utf8(output).map_err(|e| StorageError::Json(e.to_string()))
}

/// Parse, migrate and validate an exported document
///
/// `origin` is recorded for legacy documents that carry no origin provider.
pub fn import_envelope_json(json_str: &str, origin: &ProviderId) -> StorageResult<BudgetDataEnvelope> {
    let envelope = migrate_envelope_str(json_str, origin)?;
    validate_import(&envelope)?;
    Ok(envelope)
}

fn validate_import(envelope: &BudgetDataEnvelope) -> StorageResult<()> {
    let mut ids = HashSet::new();
    for txn in envelope.transactions() {
        txn.validate()?;
        if !ids.insert(txn.id.as_str()) {
            return Err(StorageError::Validation(format!(
                "Import contains duplicate transaction id {}",
                txn.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Amount, Transaction, TransactionKind, CURRENT_FORMAT_VERSION};
    use serde_json::json;

    fn sample() -> BudgetDataEnvelope {
        let mut envelope = BudgetDataEnvelope::empty(ProviderId::local());
        envelope.upsert_transactions(vec![
            Transaction::new(
                NaiveDate::from_ymd_opt(2025, 1, 5).unwrap(),
                Amount::from_cents(1500),
                TransactionKind::Expense,
            ),
            Transaction::new(
                NaiveDate::from_ymd_opt(2025, 1, 20).unwrap(),
                Amount::from_cents(300000),
                TransactionKind::Income,
            ),
        ]);
        envelope
    }

    #[test]
    fn test_export_then_import() {
        let envelope = sample();
        let json_string = export_envelope_string(&envelope, true).unwrap();
        assert!(json_string.contains("\"formatVersion\""));

        let imported = import_envelope_json(&json_string, &ProviderId::remote()).unwrap();
        assert_eq!(imported, envelope);
    }

    #[test]
    fn test_summary() {
        let summary = ExportSummary::of(&sample());
        assert_eq!(summary.transaction_count, 2);
        assert_eq!(summary.earliest_transaction, NaiveDate::from_ymd_opt(2025, 1, 5));
        assert_eq!(summary.latest_transaction, NaiveDate::from_ymd_opt(2025, 1, 20));
    }

    #[test]
    fn test_import_legacy_array() {
        let legacy = json!([{ "id": "x", "date": "2024-11-11", "amount": 9.99, "type": "expense" }]);
        let imported = import_envelope_json(&legacy.to_string(), &ProviderId::local()).unwrap();
        assert_eq!(imported.format_version, CURRENT_FORMAT_VERSION);
        assert_eq!(imported.transactions()[0].amount.cents(), 999);
    }

    #[test]
    fn test_import_rejects_duplicate_ids() {
        let doc = json!({
            "formatVersion": "2.0",
            "savedAt": "2025-01-01T00:00:00Z",
            "originProvider": "local",
            "payload": {
                "transactions": [
                    { "id": "a", "date": "2025-01-01", "amount": 1, "kind": "expense" },
                    { "id": "a", "date": "2025-01-02", "amount": 2, "kind": "expense" }
                ]
            }
        });
        let err = import_envelope_json(&doc.to_string(), &ProviderId::local()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_import_rejects_amount_with_currency_symbol() {
        for amount in ["1.5€", "1.+5"] {
            let doc = json!({
                "formatVersion": CURRENT_FORMAT_VERSION,
                "savedAt": "2025-01-01T00:00:00Z",
                "originProvider": "local",
                "payload": {
                    "transactions": [
                        { "id": "a", "date": "2025-01-01", "amount": amount, "kind": "expense" }
                    ]
                }
            });
            let err = import_envelope_json(&doc.to_string(), &ProviderId::local()).unwrap_err();
            assert!(err.is_validation(), "{} should be rejected", amount);
        }

        let legacy = json!([{ "id": "x", "date": "2024-11-11", "amount": "9.9€" }]);
        assert!(import_envelope_json(&legacy.to_string(), &ProviderId::local())
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_import_rejects_malformed() {
        assert!(import_envelope_json("{", &ProviderId::local())
            .unwrap_err()
            .is_validation());
    }
}
