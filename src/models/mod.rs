//! Core data models for the budget store
//!
//! This module contains the persisted envelope and everything it carries,
//! plus the small value types providers use to describe themselves.

pub mod amount;
pub mod envelope;
pub mod migration;
pub mod provider;
pub mod sync_status;
pub mod transaction;

pub use amount::{Amount, AmountParseError};
pub use envelope::{BudgetDataEnvelope, BudgetPayload, SettingsMap, CURRENT_FORMAT_VERSION};
pub use migration::{migrate_envelope, migrate_envelope_str};
pub use provider::{EncryptionState, ProviderDescriptor, ProviderId, ProviderIdentity};
pub use sync_status::{SyncState, SyncStatus};
pub use transaction::{Transaction, TransactionKind};
