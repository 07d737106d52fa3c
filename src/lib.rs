//! budget-store - Pluggable storage for a personal budgeting application
//!
//! This library persists a budget (transactions, settings and pay period
//! configuration) through interchangeable storage providers. Data can live on
//! the device or in a single file on a remote drive, and the on-device copy can
//! be encrypted with a passphrase.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Paths and settings
//! - `crypto`: Key derivation, authenticated encryption and passphrase policy
//! - `error`: Custom error types
//! - `models`: The budget envelope, transactions and provider metadata
//! - `storage`: The provider contract, registry and provider implementations
//! - `services`: The storage orchestrator and write debouncing
//! - `export`: JSON export and import
//! - `cli`: Command handlers for the `budget-store` binary
//!
//! # Example
//!
//! ```rust,ignore
//! use budget_store::config::{Settings, StorePaths};
//! use budget_store::services::{OrchestratorOptions, StorageOrchestrator};
//! use budget_store::storage::default_registry;
//!
//! let paths = StorePaths::new()?;
//! let settings = Settings::load_or_create(&paths)?;
//! let registry = default_registry(&paths, &settings, consent)?;
//! let orchestrator = StorageOrchestrator::new(registry, OrchestratorOptions::from_settings(&settings));
//! orchestrator.open(&settings.active_provider).await?;
//! ```

pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod export;
pub mod logging;
pub mod models;
pub mod services;
pub mod storage;

pub use error::{StorageError, StorageResult};
