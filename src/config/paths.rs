//! Path management for the budget store
//!
//! ## Path Resolution Order
//!
//! 1. `BUDGET_STORE_DATA_DIR` environment variable (if set)
//! 2. The platform data directory from `directories` (e.g. `~/.local/share/budget-store`)
//! 3. `$HOME/.config/budget-store`

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::error::{StorageError, StorageResult};

/// Environment variable overriding the base directory
pub const DATA_DIR_ENV: &str = "BUDGET_STORE_DATA_DIR";

/// Manages all paths used by the budget store
#[derive(Debug, Clone)]
pub struct StorePaths {
    base_dir: PathBuf,
}

impl StorePaths {
    /// Resolve the base directory
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> StorageResult<Self> {
        let base_dir = match std::env::var(DATA_DIR_ENV) {
            Ok(custom) if !custom.trim().is_empty() => PathBuf::from(custom),
            _ => resolve_default_path()?,
        };

        Ok(Self { base_dir })
    }

    /// Use a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Directory of the on-device key-value store
    pub fn kv_dir(&self) -> PathBuf {
        self.base_dir.join("kv")
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Ensure the base and key-value directories exist
    pub fn ensure_directories(&self) -> StorageResult<()> {
        for dir in [self.base_dir.clone(), self.kv_dir()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                StorageError::Io(format!("Failed to create directory {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

fn resolve_default_path() -> StorageResult<PathBuf> {
    if let Some(dirs) = ProjectDirs::from("", "", "budget-store") {
        return Ok(dirs.data_dir().to_path_buf());
    }

    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".config").join("budget-store"))
        .map_err(|_| StorageError::Config("Could not determine a home directory".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_custom_base_dir() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StorePaths::with_base_dir(temp_dir.path());

        assert_eq!(paths.base_dir(), temp_dir.path());
        assert_eq!(paths.kv_dir(), temp_dir.path().join("kv"));
        assert_eq!(paths.settings_file(), temp_dir.path().join("config.json"));
    }

    #[test]
    fn test_ensure_directories() {
        let temp_dir = TempDir::new().unwrap();
        let paths = StorePaths::with_base_dir(temp_dir.path().join("nested"));

        paths.ensure_directories().unwrap();
        assert!(paths.kv_dir().is_dir());
    }

    #[test]
    fn test_default_path_resolves() {
        assert!(resolve_default_path().is_ok());
    }
}
