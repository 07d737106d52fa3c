//! Export module for the budget store
//!
//! Exports are the envelope document itself (JSON), suitable for manual
//! backup and for moving data between providers.

pub mod json;

pub use json::{export_envelope_json, export_envelope_string, import_envelope_json, ExportSummary};
