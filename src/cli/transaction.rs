//! Transaction CLI commands
//!
//! Implements CLI commands for transaction management.

use chrono::{NaiveDate, Utc};
use clap::Subcommand;
use tabled::settings::Style;
use tabled::{Table, Tabled};

use crate::error::{StorageError, StorageResult};
use crate::models::{transaction::sort_newest_first, Amount, Transaction, TransactionKind};
use crate::services::StorageOrchestrator;

/// Transaction subcommands
#[derive(Subcommand)]
pub enum TransactionCommands {
    /// Add a new transaction
    Add {
        /// Amount (e.g., "42.50")
        #[arg(allow_hyphen_values = true)]
        amount: String,
        /// Description
        #[arg(short = 'D', long, default_value = "")]
        description: String,
        /// Category name
        #[arg(short, long, default_value = "")]
        category: String,
        /// Transaction date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        date: Option<String>,
        /// Record as income instead of an expense
        #[arg(long)]
        income: bool,
        /// Use this id instead of generating one; an existing entry is replaced
        #[arg(long)]
        id: Option<String>,
    },
    /// List transactions, newest first
    List {
        /// Number of transactions to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Filter by kind (income, expense)
        #[arg(short, long)]
        kind: Option<TransactionKind>,
        /// Filter by category name
        #[arg(short, long)]
        category: Option<String>,
    },
    /// Delete transactions
    Delete {
        /// Transaction IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[derive(Tabled)]
struct TransactionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Date")]
    date: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Amount")]
    amount: String,
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<&Transaction> for TransactionRow {
    fn from(txn: &Transaction) -> Self {
        Self {
            id: txn.id.clone(),
            date: txn.date.format("%Y-%m-%d").to_string(),
            kind: txn.kind.to_string(),
            amount: txn.amount.to_string(),
            category: txn.category.clone(),
            description: txn.description.clone(),
        }
    }
}

/// Handle a transaction command
pub async fn handle_transaction_command(
    orchestrator: &StorageOrchestrator,
    cmd: TransactionCommands,
) -> StorageResult<()> {
    match cmd {
        TransactionCommands::Add {
            amount,
            description,
            category,
            date,
            income,
            id,
        } => {
            let amount = Amount::parse(&amount)
                .map_err(|e| StorageError::Validation(e.to_string()))?;
            let date = match date {
                Some(d) => parse_date(&d)?,
                None => Utc::now().date_naive(),
            };
            let kind = if income {
                TransactionKind::Income
            } else {
                TransactionKind::Expense
            };

            let mut txn = Transaction::with_details(date, amount, kind, description, category);
            if let Some(id) = id {
                txn = txn.with_id(id);
            }
            let summary = txn.to_string();
            let id = txn.id.clone();

            orchestrator.add_transaction(txn).await?;
            println!("Added transaction: {}", summary);
            println!("  ID: {}", id);
        }

        TransactionCommands::List {
            limit,
            kind,
            category,
        } => {
            let mut transactions: Vec<Transaction> = orchestrator
                .transactions()
                .into_iter()
                .filter(|t| kind.map_or(true, |k| t.kind == k))
                .filter(|t| {
                    category
                        .as_deref()
                        .map_or(true, |c| t.category.eq_ignore_ascii_case(c))
                })
                .collect();
            print!("{}", format_transaction_list(&mut transactions, limit));
        }

        TransactionCommands::Delete { ids } => {
            let removed = orchestrator.delete_transactions(&ids).await?;
            if removed == 0 {
                return Err(StorageError::Validation(
                    "No matching transactions found".into(),
                ));
            }
            println!("Deleted {} transaction(s)", removed);
        }
    }

    Ok(())
}

/// Render transactions newest first as a table
pub fn format_transaction_list(transactions: &mut [Transaction], limit: usize) -> String {
    if transactions.is_empty() {
        return "No transactions found.\n".to_string();
    }

    sort_newest_first(transactions);
    let shown = limit.min(transactions.len());
    let rows: Vec<TransactionRow> = transactions[..shown].iter().map(TransactionRow::from).collect();

    let mut output = Table::new(rows).with(Style::rounded()).to_string();
    output.push('\n');
    if shown < transactions.len() {
        output.push_str(&format!(
            "Showing {} of {} transactions\n",
            shown,
            transactions.len()
        ));
    }
    output
}

fn parse_date(s: &str) -> StorageResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| StorageError::Validation(format!("Invalid date '{}', expected YYYY-MM-DD", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn txn(day: u32, description: &str) -> Transaction {
        Transaction::with_details(
            NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            Amount::from_cents(1250),
            TransactionKind::Expense,
            description,
            "Food",
        )
    }

    #[test]
    fn test_format_empty_list() {
        assert_eq!(format_transaction_list(&mut [], 10), "No transactions found.\n");
    }

    #[test]
    fn test_format_list_newest_first_and_limited() {
        let mut transactions = vec![txn(1, "older"), txn(9, "newer"), txn(5, "middle")];
        let output = format_transaction_list(&mut transactions, 2);

        let newer = output.find("newer").unwrap();
        let middle = output.find("middle").unwrap();
        assert!(newer < middle);
        assert!(!output.contains("older"));
        assert!(output.contains("Showing 2 of 3 transactions"));
        assert!(output.contains("12.50"));
    }

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2025-02-28").unwrap(),
            NaiveDate::from_ymd_opt(2025, 2, 28).unwrap()
        );
        assert!(parse_date("28/02/2025").unwrap_err().is_validation());
    }
}
