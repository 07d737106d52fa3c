//! Configuration module for the budget store
//!
//! This module provides configuration management including:
//! - Base directory resolution
//! - User settings persistence
//! - Remote provider settings

pub mod paths;
pub mod settings;

pub use paths::StorePaths;
pub use settings::{RemoteSettings, Settings};
