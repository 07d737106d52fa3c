//! Budget data envelope
//!
//! The versioned unit of persistence. Every provider stores exactly one
//! envelope, and every envelope read from a backend goes through
//! [`migrate_envelope`](super::migration::migrate_envelope) before use.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::provider::ProviderId;
use super::transaction::{sort_newest_first, Transaction};

/// Format version written by this build
pub const CURRENT_FORMAT_VERSION: &str = "2.0";

/// Free-form settings mapping
pub type SettingsMap = Map<String, Value>;

/// Application data carried by an envelope
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetPayload {
    /// Transactions, newest first
    #[serde(default)]
    pub transactions: Vec<Transaction>,

    #[serde(default)]
    pub settings: SettingsMap,

    #[serde(default)]
    pub pay_period_config: SettingsMap,
}

/// The versioned container wrapping all persisted application data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetDataEnvelope {
    pub format_version: String,
    pub saved_at: DateTime<Utc>,
    pub origin_provider: ProviderId,
    pub payload: BudgetPayload,
}

impl BudgetDataEnvelope {
    /// Create an empty envelope owned by `origin`
    pub fn empty(origin: ProviderId) -> Self {
        Self::with_payload(origin, BudgetPayload::default())
    }

    /// Wrap an existing payload in a current-format envelope
    pub fn with_payload(origin: ProviderId, payload: BudgetPayload) -> Self {
        Self {
            format_version: CURRENT_FORMAT_VERSION.to_string(),
            saved_at: Utc::now(),
            origin_provider: origin,
            payload,
        }
    }

    /// All transactions, newest first
    pub fn transactions(&self) -> &[Transaction] {
        &self.payload.transactions
    }

    /// Number of transactions
    pub fn transaction_count(&self) -> usize {
        self.payload.transactions.len()
    }

    /// Whether the envelope holds no transactions
    pub fn has_transactions(&self) -> bool {
        !self.payload.transactions.is_empty()
    }

    /// Stamp the envelope as written now by `origin`
    pub fn touch(&mut self, origin: &ProviderId) {
        self.saved_at = Utc::now();
        self.origin_provider = origin.clone();
    }

    /// Insert transactions, replacing any existing entry with the same id
    ///
    /// Within `incoming` the last occurrence of an id wins. Inserted entries
    /// sort ahead of existing ones on the same date.
    pub fn upsert_transactions(&mut self, incoming: Vec<Transaction>) {
        let mut seen = HashSet::new();
        let mut batch: Vec<Transaction> = incoming
            .into_iter()
            .rev()
            .filter(|txn| seen.insert(txn.id.clone()))
            .collect();
        batch.reverse();

        self.payload
            .transactions
            .retain(|existing| !seen.contains(&existing.id));

        batch.append(&mut self.payload.transactions);
        sort_newest_first(&mut batch);
        self.payload.transactions = batch;
    }

    /// Remove transactions by id, returning how many were removed
    pub fn remove_transactions(&mut self, ids: &[String]) -> usize {
        let ids: HashSet<&str> = ids.iter().map(String::as_str).collect();
        let before = self.payload.transactions.len();
        self.payload
            .transactions
            .retain(|txn| !ids.contains(txn.id.as_str()));
        before - self.payload.transactions.len()
    }

    /// Shallow-merge `changes` into the settings mapping
    pub fn merge_settings(&mut self, changes: SettingsMap) {
        self.payload.settings.extend(changes);
    }

    /// Replace the pay period configuration
    pub fn set_pay_period_config(&mut self, config: SettingsMap) {
        self.payload.pay_period_config = config;
    }
}
