//! Envelope migration
//!
//! Brings any stored or imported budget document up to the current envelope
//! format. Recognised inputs:
//!
//! - a bare JSON array of transactions (the original pre-envelope format)
//! - a versionless object with top-level `transactions` / `settings` / `payPeriodConfig`
//! - a `1.x` envelope carrying its data under `data` instead of `payload`
//! - a `2.x` envelope, returned with its transactions in newest-first order
//!
//! Envelopes written by a newer major version are rejected rather than
//! silently truncated.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};

use super::amount::Amount;
use super::envelope::{BudgetDataEnvelope, BudgetPayload, CURRENT_FORMAT_VERSION};
use super::provider::ProviderId;
use super::transaction::{sort_newest_first, Transaction, TransactionKind};

/// Parse and migrate a serialized budget document
pub fn migrate_envelope_str(text: &str, origin: &ProviderId) -> StorageResult<BudgetDataEnvelope> {
    let raw: Value = serde_json::from_str(text)
        .map_err(|e| StorageError::Validation(format!("Malformed budget data: {}", e)))?;
    migrate_envelope(raw, origin)
}

/// Migrate a parsed budget document to the current envelope format
///
/// `origin` is recorded as the origin provider for legacy documents that
/// predate the field.
pub fn migrate_envelope(raw: Value, origin: &ProviderId) -> StorageResult<BudgetDataEnvelope> {
    match raw {
        Value::Array(items) => {
            info!(count = items.len(), "Migrating legacy transaction list");
            let payload = BudgetPayload {
                transactions: migrate_transactions(items)?,
                ..Default::default()
            };
            Ok(BudgetDataEnvelope::with_payload(origin.clone(), payload))
        }
        Value::Object(object) => migrate_object(object, origin),
        other => Err(StorageError::Validation(format!(
            "Unrecognised budget data: expected an object or array, found {}",
            type_name(&other)
        ))),
    }
}

fn migrate_object(
    mut object: Map<String, Value>,
    origin: &ProviderId,
) -> StorageResult<BudgetDataEnvelope> {
    let version = object
        .get("formatVersion")
        .and_then(Value::as_str)
        .map(str::to_string);

    let major = match version.as_deref() {
        None => 0,
        Some(v) => major_version(v)?,
    };

    let current_major = major_version(CURRENT_FORMAT_VERSION)?;
    if major > current_major {
        return Err(StorageError::Validation(format!(
            "Budget data format {} is newer than supported format {}",
            version.unwrap_or_default(),
            CURRENT_FORMAT_VERSION
        )));
    }

    if major == current_major {
        let mut envelope: BudgetDataEnvelope = serde_json::from_value(Value::Object(object))
            .map_err(|e| StorageError::Validation(format!("Malformed budget envelope: {}", e)))?;
        sort_newest_first(&mut envelope.payload.transactions);
        return Ok(envelope);
    }

    debug!(version = ?version, "Migrating legacy budget object");

    let saved_at = object
        .get("savedAt")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    let mut body = match object.remove("data") {
        Some(Value::Object(data)) => data,
        _ => object,
    };

    let transactions = match body.remove("transactions") {
        Some(Value::Array(items)) => migrate_transactions(items)?,
        Some(Value::Null) | None => Vec::new(),
        Some(other) => {
            return Err(StorageError::Validation(format!(
                "Expected transactions to be an array, found {}",
                type_name(&other)
            )))
        }
    };

    let payload = BudgetPayload {
        transactions,
        settings: take_mapping(&mut body, "settings"),
        pay_period_config: take_mapping(&mut body, "payPeriodConfig"),
    };

    let mut envelope = BudgetDataEnvelope::with_payload(origin.clone(), payload);
    if let Some(saved_at) = saved_at {
        envelope.saved_at = saved_at;
    }
    Ok(envelope)
}

fn major_version(version: &str) -> StorageResult<u32> {
    version
        .split('.')
        .next()
        .and_then(|major| major.trim().parse().ok())
        .ok_or_else(|| StorageError::Validation(format!("Invalid format version: {}", version)))
}

fn take_mapping(body: &mut Map<String, Value>, key: &str) -> Map<String, Value> {
    match body.remove(key) {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Transaction shape accepted from older data
#[derive(Debug, Deserialize)]
struct LegacyTransaction {
    #[serde(default)]
    id: Option<Value>,
    date: String,
    amount: Value,
    #[serde(default, alias = "name", alias = "memo")]
    description: Option<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default, alias = "type")]
    kind: Option<String>,
}

fn migrate_transactions(items: Vec<Value>) -> StorageResult<Vec<Transaction>> {
    let mut transactions = items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            let legacy: LegacyTransaction = serde_json::from_value(item).map_err(|e| {
                StorageError::Validation(format!("Invalid transaction at index {}: {}", index, e))
            })?;
            legacy_to_transaction(legacy, index)
        })
        .collect::<StorageResult<Vec<_>>>()?;

    // Older writers could append the same id twice; the later entry wins
    let mut seen = HashSet::new();
    transactions = transactions
        .into_iter()
        .rev()
        .filter(|txn| seen.insert(txn.id.clone()))
        .collect();
    transactions.reverse();

    sort_newest_first(&mut transactions);
    Ok(transactions)
}

fn legacy_to_transaction(legacy: LegacyTransaction, index: usize) -> StorageResult<Transaction> {
    let invalid = |what: String| StorageError::Validation(format!("Transaction {}: {}", index, what));

    let (amount, negative) = match &legacy.amount {
        Value::Number(n) => {
            let value = n
                .as_f64()
                .ok_or_else(|| invalid(format!("invalid amount {}", n)))?;
            (
                Amount::from_decimal(value).map_err(|e| invalid(e.to_string()))?,
                value < 0.0,
            )
        }
        Value::String(s) => (
            Amount::parse(s).map_err(|e| invalid(e.to_string()))?,
            s.trim().starts_with('-'),
        ),
        other => return Err(invalid(format!("invalid amount {}", other))),
    };

    let kind = match legacy.kind.as_deref() {
        Some(kind) => kind.parse::<TransactionKind>()?,
        None if negative => TransactionKind::Expense,
        None => TransactionKind::Income,
    };

    // Dates were sometimes stored as full ISO timestamps
    let date_part = legacy.date.get(..10).unwrap_or(&legacy.date);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .map_err(|_| invalid(format!("invalid date {}", legacy.date)))?;

    let id = match legacy.id {
        Some(Value::String(s)) if !s.trim().is_empty() => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => Transaction::generate_id(),
    };

    Ok(Transaction {
        id,
        date,
        amount,
        description: legacy.description.unwrap_or_default(),
        category: legacy.category.unwrap_or_default(),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_current_envelope_unchanged() {
        let mut original = BudgetDataEnvelope::empty(ProviderId::remote());
        original.upsert_transactions(vec![Transaction::new(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            Amount::from_cents(1234),
            TransactionKind::Income,
        )]);

        let raw = serde_json::to_value(&original).unwrap();
        let migrated = migrate_envelope(raw, &ProviderId::local()).unwrap();
        assert_eq!(migrated, original);

        // Running it twice changes nothing either
        let again = migrate_envelope(serde_json::to_value(&migrated).unwrap(), &ProviderId::local()).unwrap();
        assert_eq!(again, original);
    }

    #[test]
    fn test_legacy_array() {
        let raw = json!([
            {"id": "a", "date": "2025-01-01", "amount": 10, "description": "Coffee", "type": "expense"},
            {"id": "b", "date": "2025-01-03", "amount": "2500.00", "category": "Work", "type": "income"}
        ]);

        let envelope = migrate_envelope(raw, &ProviderId::local()).unwrap();
        assert_eq!(envelope.format_version, CURRENT_FORMAT_VERSION);
        assert_eq!(envelope.origin_provider, ProviderId::local());
        let ids: Vec<_> = envelope.transactions().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(envelope.transactions()[0].amount.cents(), 250000);
        assert_eq!(envelope.transactions()[1].description, "Coffee");
    }

    #[test]
    fn test_legacy_negative_amount_becomes_expense() {
        let raw = json!([{ "id": 7, "date": "2025-01-01T10:00:00.000Z", "amount": -4.5 }]);
        let envelope = migrate_envelope(raw, &ProviderId::local()).unwrap();
        let txn = &envelope.transactions()[0];
        assert_eq!(txn.id, "7");
        assert_eq!(txn.kind, TransactionKind::Expense);
        assert_eq!(txn.amount.cents(), 450);
    }

    #[test]
    fn test_missing_id_generated() {
        let raw = json!([{ "date": "2025-01-01", "amount": 1, "kind": "income" }]);
        let envelope = migrate_envelope(raw, &ProviderId::local()).unwrap();
        assert!(!envelope.transactions()[0].id.is_empty());
    }

    #[test]
    fn test_versionless_object() {
        let raw = json!({
            "transactions": [{"id": "a", "date": "2025-01-01", "amount": 1, "kind": "expense"}],
            "settings": {"currency": "EUR"},
            "payPeriodConfig": {"frequency": "biweekly"}
        });
        let envelope = migrate_envelope(raw, &ProviderId::local()).unwrap();
        assert_eq!(envelope.transaction_count(), 1);
        assert_eq!(envelope.payload.settings["currency"], "EUR");
        assert_eq!(envelope.payload.pay_period_config["frequency"], "biweekly");
    }

    #[test]
    fn test_v1_envelope_with_data_field() {
        let raw = json!({
            "formatVersion": "1.0",
            "savedAt": "2024-06-01T12:00:00Z",
            "data": {
                "transactions": [{"id": "a", "date": "2024-05-30", "amount": 20, "kind": "expense"}],
                "settings": {}
            }
        });
        let envelope = migrate_envelope(raw, &ProviderId::remote()).unwrap();
        assert_eq!(envelope.format_version, CURRENT_FORMAT_VERSION);
        assert_eq!(envelope.origin_provider, ProviderId::remote());
        assert_eq!(envelope.saved_at.to_rfc3339(), "2024-06-01T12:00:00+00:00");
        assert_eq!(envelope.transaction_count(), 1);
    }

    #[test]
    fn test_newer_major_rejected() {
        let raw = json!({ "formatVersion": "3.0", "payload": {} });
        let err = migrate_envelope(raw, &ProviderId::local()).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_scalar_rejected() {
        assert!(migrate_envelope(json!(42), &ProviderId::local()).is_err());
        assert!(migrate_envelope_str("not json", &ProviderId::local())
            .unwrap_err()
            .is_validation());
    }

    #[test]
    fn test_current_envelope_sorted_newest_first() {
        let raw = json!({
            "formatVersion": CURRENT_FORMAT_VERSION,
            "savedAt": "2025-02-01T00:00:00Z",
            "originProvider": "local",
            "payload": {
                "transactions": [
                    {"id": "old", "date": "2025-01-01", "amount": 1, "kind": "expense"},
                    {"id": "new", "date": "2025-01-20", "amount": 2, "kind": "expense"},
                    {"id": "mid", "date": "2025-01-10", "amount": 3, "kind": "income"}
                ]
            }
        });
        let envelope = migrate_envelope(raw, &ProviderId::local()).unwrap();
        let ids: Vec<_> = envelope.transactions().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
    }

    #[test]
    fn test_legacy_duplicate_ids_keep_latest() {
        let raw = json!([
            {"id": "a", "date": "2025-01-01", "amount": 10, "type": "expense"},
            {"id": "b", "date": "2025-01-02", "amount": 5, "type": "expense"},
            {"id": "a", "date": "2025-01-03", "amount": 12, "type": "expense"}
        ]);
        let envelope = migrate_envelope(raw, &ProviderId::local()).unwrap();
        assert_eq!(envelope.transaction_count(), 2);
        let a = envelope.transactions().iter().find(|t| t.id == "a").unwrap();
        assert_eq!(a.amount.cents(), 1200);
        assert_eq!(a.date, NaiveDate::from_ymd_opt(2025, 1, 3).unwrap());
    }

    #[test]
    fn test_bad_transaction_reports_index() {
        let raw = json!([{ "id": "a", "date": "yesterday", "amount": 1 }]);
        let err = migrate_envelope(raw, &ProviderId::local()).unwrap_err();
        assert!(err.to_string().contains("Transaction 0"));
    }
}
