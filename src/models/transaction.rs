//! Transaction model
//!
//! A single income or expense entry. Ids are opaque strings: new ones are
//! UUIDs, but anything unique that older data or importers supply is kept.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

use super::amount::Amount;

/// Direction of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    #[default]
    Expense,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Income => write!(f, "income"),
            Self::Expense => write!(f, "expense"),
        }
    }
}

impl std::str::FromStr for TransactionKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "income" | "in" => Ok(Self::Income),
            "expense" | "out" => Ok(Self::Expense),
            other => Err(StorageError::Validation(format!(
                "Unknown transaction kind: {}",
                other
            ))),
        }
    }
}

/// A financial transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier within an envelope
    pub id: String,

    /// Transaction date
    pub date: NaiveDate,

    /// Amount, always non-negative
    pub amount: Amount,

    /// Free-text description
    #[serde(default)]
    pub description: String,

    /// Category name
    #[serde(default)]
    pub category: String,

    /// Income or expense
    #[serde(alias = "type")]
    pub kind: TransactionKind,
}

impl Transaction {
    /// Create a new transaction with a fresh id
    pub fn new(date: NaiveDate, amount: Amount, kind: TransactionKind) -> Self {
        Self {
            id: Self::generate_id(),
            date,
            amount,
            description: String::new(),
            category: String::new(),
            kind,
        }
    }

    /// Create a transaction with all common fields
    pub fn with_details(
        date: NaiveDate,
        amount: Amount,
        kind: TransactionKind,
        description: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        let mut txn = Self::new(date, amount, kind);
        txn.description = description.into();
        txn.category = category.into();
        txn
    }

    /// Generate a new opaque transaction id
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Override the id (for callers that bring their own)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Check if this is income
    pub fn is_income(&self) -> bool {
        self.kind == TransactionKind::Income
    }

    /// Validate the transaction before it enters an envelope
    pub fn validate(&self) -> StorageResult<()> {
        if self.id.trim().is_empty() {
            return Err(StorageError::Validation(
                "Transaction id cannot be empty".into(),
            ));
        }
        if self.description.len() > 500 {
            return Err(StorageError::Validation(format!(
                "Description too long ({} chars, max 500)",
                self.description.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.is_income() { "+" } else { "-" };
        write!(
            f,
            "{} {}{} {}",
            self.date.format("%Y-%m-%d"),
            sign,
            self.amount,
            self.description
        )
    }
}

/// Sort transactions newest-first, keeping the current order for equal dates
pub fn sort_newest_first(transactions: &mut [Transaction]) {
    transactions.sort_by(|a, b| b.date.cmp(&a.date));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    #[test]
    fn test_new_transaction() {
        let txn = Transaction::new(test_date(), Amount::from_cents(5000), TransactionKind::Expense);
        assert!(!txn.id.is_empty());
        assert!(!txn.is_income());
        assert!(txn.validate().is_ok());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Transaction::new(test_date(), Amount::zero(), TransactionKind::Income);
        let b = Transaction::new(test_date(), Amount::zero(), TransactionKind::Income);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_empty_id_invalid() {
        let txn = Transaction::new(test_date(), Amount::zero(), TransactionKind::Income).with_id(" ");
        assert!(txn.validate().unwrap_err().is_validation());
    }

    #[test]
    fn test_serialization_shape() {
        let txn = Transaction::with_details(
            test_date(),
            Amount::from_cents(1250),
            TransactionKind::Income,
            "Salary",
            "Work",
        )
        .with_id("t1");

        let json = serde_json::to_value(&txn).unwrap();
        assert_eq!(json["id"], "t1");
        assert_eq!(json["date"], "2025-01-15");
        assert_eq!(json["amount"], 12.5);
        assert_eq!(json["kind"], "income");
    }

    #[test]
    fn test_type_alias_accepted() {
        let json = r#"{"id":"x","date":"2025-01-15","amount":3,"type":"expense"}"#;
        let txn: Transaction = serde_json::from_str(json).unwrap();
        assert_eq!(txn.kind, TransactionKind::Expense);
        assert_eq!(txn.amount.cents(), 300);
    }

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Income".parse::<TransactionKind>().unwrap(), TransactionKind::Income);
        assert!("refund".parse::<TransactionKind>().is_err());
    }

    #[test]
    fn test_sort_newest_first() {
        let old = Transaction::new(
            NaiveDate::from_ymd_opt(2024, 12, 1).unwrap(),
            Amount::zero(),
            TransactionKind::Expense,
        );
        let new = Transaction::new(test_date(), Amount::zero(), TransactionKind::Expense);
        let mut list = vec![old.clone(), new.clone()];
        sort_newest_first(&mut list);
        assert_eq!(list[0].id, new.id);
        assert_eq!(list[1].id, old.id);
    }
}
